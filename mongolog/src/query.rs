//! Helpers to render a collection call as a readable query line.
//!
//! ```
//! use mongolog::bson::Bson;
//! use mongolog::query;
//!
//! let args = vec![Bson::Document(mongolog::bson::doc! { "status": "active" })];
//! let line = query::format("users", "find", &query::build(&args));
//! assert_eq!(line, r#"users.find({"status":"active"})"#);
//! ```

use serde::ser::Serialize;

/// Rendered in place of an argument that could not be serialised.
pub const PLACEHOLDER: &str = "{...}";

/// Serialises a value as compact JSON, falling back to [`PLACEHOLDER`] when it can't be encoded.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| PLACEHOLDER.to_owned())
}

/// Serialises each argument on its own, so one bad argument does not hide the others.
pub fn build<T: Serialize>(args: &[T]) -> Vec<String> {
    args.iter().map(serialize).collect()
}

/// Joins the parts of a call into `collection.method(arg,arg,...)`.
pub fn format<S: AsRef<str>>(collection: &str, method: &str, args: &[S]) -> String {
    let args = args.iter().map(AsRef::as_ref).collect::<Vec<&str>>();
    format!("{}.{}({})", collection, method, args.join(","))
}
