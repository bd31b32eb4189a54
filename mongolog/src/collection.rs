use bson::{Bson, Document};

/// The operations a collection handle exposes to a [`LoggedCollection`](crate::LoggedCollection).
///
/// Drivers name the same operation differently between versions, so rather than binding to one
/// driver's method set the proxy forwards calls by name. An implementation decides which names it
/// understands and how their arguments map onto the real driver.
///
/// # Examples
///
/// A collection that answers every call with its arguments.
///
/// ```
/// use mongolog::bson::{Bson, Document};
/// use mongolog::Collection;
///
/// struct Echo;
///
/// impl Collection for Echo {
///     type Error = std::convert::Infallible;
///
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn call(&self, _method: &str, args: Vec<Bson>) -> Result<Bson, Self::Error> {
///         Ok(Bson::Array(args))
///     }
///
///     fn call_insert(
///         &self,
///         _method: &str,
///         values: &mut Bson,
///         _options: Document,
///     ) -> Result<Bson, Self::Error> {
///         Ok(values.clone())
///     }
/// }
/// ```
pub trait Collection {
    /// The error returned by the underlying driver.
    type Error;

    /// The name of the collection.
    fn name(&self) -> &str;

    /// Forwards the named operation with its positional arguments.
    fn call(&self, method: &str, args: Vec<Bson>) -> Result<Bson, Self::Error>;

    /// Forwards an insert style operation (`insert`, `batchInsert`, `save`).
    ///
    /// The implementation may write into `values`, for example to assign a generated `_id`, and
    /// that write must be visible to the caller once this returns.
    fn call_insert(
        &self,
        method: &str,
        values: &mut Bson,
        options: Document,
    ) -> Result<Bson, Self::Error>;

    /// The driver's own `insert` operation.
    fn insert(&self, values: &mut Bson, options: Document) -> Result<Bson, Self::Error> {
        self.call_insert("insert", values, options)
    }
}
