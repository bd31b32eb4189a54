//! # Mongolog
//!
//! The `mongolog` crate adds query timing and logging on top of a MongoDB collection, built on
//! the official `bson` & `mongodb` crates.
//!
//! It provides the following:
//!
//! - A [`LoggedCollection`] that times every call made through it and reports a readable query
//!   line to a [`Connection`]
//! - A [`QueryLog`] connection that keeps those lines in memory and hands them to listeners
//! - A blocking [`Client`] whose collections can be wrapped directly
//!
//! The wrapper is not tied to the bundled client, any type implementing [`Collection`] can be
//! logged.
//!
//! ## Logging queries
//!
//! ```no_run
//! # fn doc() -> Result<(), mongolog::Error> {
//! use mongolog::bson::{doc, Bson};
//!
//! let client = mongolog::Client::builder()
//!     .uri("mongodb://127.0.0.1:27017")
//!     .database("app")
//!     .logging(true)
//!     .build()?;
//!
//! let users = client.collection("users");
//! let logged = client.logged(&users);
//!
//! // Insert style calls write the generated `_id` back into the document.
//! let mut user = doc! { "name": "foo", "status": "active" };
//! logged.insert(&mut user, None)?;
//!
//! // Everything else is forwarded by name.
//! let found = logged.invoke("find", &mut [Bson::Document(doc! { "status": "active" })])?;
//! println!("{}", found);
//!
//! for entry in client.query_log().entries() {
//!     // users.insert({"name":"foo","status":"active"},{})
//!     // users.find({"status":"active"})
//!     println!("{} ({:?})", entry.query, entry.time);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Listening for queries
//!
//! Queries are always written to the [`log`](https://docs.rs/log) facade at debug level, for
//! anything else register a listener.
//!
//! ```
//! use mongolog::QueryLog;
//!
//! let log = QueryLog::new();
//! log.listen(|entry| {
//!     if entry.time.as_millis() > 100 {
//!         println!("slow query: {}", entry.query);
//!     }
//! });
//! ```

#![deny(missing_docs)]
#![deny(unused_imports)]

#[macro_use]
pub extern crate bson;
#[macro_use]
extern crate log;
pub extern crate mongodb as db;

pub use self::client::{Client, ClientBuilder};
pub use self::collection::Collection;
pub use self::connection::{Connection, QueryEntry, QueryLog};
pub use self::error::{Error, Kind as ErrorKind};
pub use self::logged::LoggedCollection;
pub use self::mongo::MongoCollection;

pub(crate) use error::Result;

mod client;
mod collection;
mod connection;
mod error;
mod logged;
mod mongo;
pub mod options;
pub mod query;
