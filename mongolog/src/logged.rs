use std::time::Instant;

use bson::{Bson, Document};

use crate::collection::Collection;
use crate::connection::Connection;
use crate::query;

// These are handed the first argument mutably, the driver may assign an `_id` to it.
const INSERT_METHODS: [&str; 3] = ["insert", "batchInsert", "save"];

/// Wraps a collection so that every call made through it is timed and logged on a connection.
///
/// The wrapper holds nothing but the two references, results and errors from the collection are
/// handed back untouched. A call is logged once it returns successfully as
/// `<collection>.<method>(<arg>,<arg>,...)`, with each argument rendered as JSON.
///
/// # Examples
///
/// ```no_run
/// # fn doc() -> Result<(), mongolog::Error> {
/// use mongolog::bson::doc;
/// use mongolog::LoggedCollection;
///
/// let client = mongolog::Client::builder().logging(true).build()?;
/// let users = client.collection("users");
/// let logged = LoggedCollection::new(&client, &users);
///
/// let mut user = doc! { "name": "foo" };
/// logged.save(&mut user, None)?;
/// println!("saved with id {}", user.get_object_id("_id").unwrap());
///
/// for entry in client.query_log().entries() {
///     println!("{} took {:?}", entry.query, entry.time);
/// }
/// # Ok(())
/// # }
/// ```
pub struct LoggedCollection<'a, C: ?Sized, N: ?Sized> {
    connection: &'a N,
    collection: &'a C,
}

impl<'a, C, N> Clone for LoggedCollection<'a, C, N>
where
    C: ?Sized,
    N: ?Sized,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C, N> Copy for LoggedCollection<'a, C, N>
where
    C: ?Sized,
    N: ?Sized,
{
}

impl<'a, C, N> LoggedCollection<'a, C, N>
where
    C: Collection + ?Sized,
    N: Connection + ?Sized,
{
    /// Constructs a `LoggedCollection` over `collection`, reporting to `connection`.
    pub fn new(connection: &'a N, collection: &'a C) -> Self {
        Self {
            connection,
            collection,
        }
    }

    /// The name of the wrapped collection.
    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Returns the wrapped collection.
    pub fn inner(&self) -> &'a C {
        self.collection
    }

    /// Inserts a document through the collection's `insert`.
    ///
    /// Any field the driver writes into `values` (such as `_id`) is kept on return.
    ///
    /// # Errors
    ///
    /// This method fails if the underlying collection fails, the error is returned as is.
    pub fn insert(&self, values: &mut Document, options: Option<Document>) -> Result<Bson, C::Error> {
        self.insert_as("insert", values, options)
    }

    /// Inserts a batch of documents through the collection's `insert`.
    ///
    /// Any field the driver writes into the documents (such as `_id`) is kept on return.
    ///
    /// # Errors
    ///
    /// This method fails if the underlying collection fails, the error is returned as is.
    pub fn insert_batch(
        &self,
        values: &mut Vec<Document>,
        options: Option<Document>,
    ) -> Result<Bson, C::Error> {
        self.insert_as("insertBatch", values, options)
    }

    /// Saves a document through the collection's `insert`.
    ///
    /// Any field the driver writes into `values` (such as `_id`) is kept on return.
    ///
    /// # Errors
    ///
    /// This method fails if the underlying collection fails, the error is returned as is.
    pub fn save(&self, values: &mut Document, options: Option<Document>) -> Result<Bson, C::Error> {
        self.insert_as("save", values, options)
    }

    /// Forwards any named method to the collection.
    ///
    /// For `insert`, `batchInsert` and `save` only the first two arguments are forwarded: the
    /// first is handed over mutably so changes made by the driver show up in `args`, and the
    /// second is used as the options, defaulting to an empty document when it is missing or
    /// null. Options that are not a document are left for the collection to reject, so the call
    /// is forwarded with `args` as given, as is every other method.
    ///
    /// # Errors
    ///
    /// This method fails if the underlying collection fails, the error is returned as is and the
    /// call is not logged.
    pub fn invoke(&self, method: &str, args: &mut [Bson]) -> Result<Bson, C::Error> {
        let query = query::build(&*args);
        let start = Instant::now();

        let options = match args.get(1) {
            None | Some(Bson::Null) => Some(Document::new()),
            Some(Bson::Document(options)) => Some(options.clone()),
            Some(_) => None,
        };
        let result = match options {
            Some(options) if INSERT_METHODS.contains(&method) => match args.first_mut() {
                Some(values) => self.collection.call_insert(method, values, options),
                None => self
                    .collection
                    .call_insert(method, &mut Bson::Null, options),
            },
            _ => self.collection.call(method, args.to_vec()),
        }?;

        self.log(method, &query, start);
        Ok(result)
    }

    fn insert_as<V>(
        &self,
        method: &str,
        values: &mut V,
        options: Option<Document>,
    ) -> Result<Bson, C::Error>
    where
        V: Values,
    {
        let options = options.unwrap_or_default();
        let query = vec![query::serialize(&*values), query::serialize(&options)];
        let start = Instant::now();

        let mut bson = values.to_bson();
        let result = self.collection.insert(&mut bson, options);
        values.restore(bson);
        let result = result?;

        self.log(method, &query, start);
        Ok(result)
    }

    fn log(&self, method: &str, query: &[String], start: Instant) {
        let time = self.connection.elapsed_time(start);
        let line = query::format(self.collection.name(), method, query);
        self.connection.log_query(&line, &[], time);
    }
}

// Copies the caller's values into a `Bson` for the driver and takes back whatever it wrote. A
// value the driver turned into a different shape is dropped and the caller's values are kept.
trait Values: serde::Serialize {
    fn to_bson(&self) -> Bson;
    fn restore(&mut self, bson: Bson);
}

impl Values for Document {
    fn to_bson(&self) -> Bson {
        Bson::Document(self.clone())
    }

    fn restore(&mut self, bson: Bson) {
        if let Bson::Document(doc) = bson {
            *self = doc;
        }
    }
}

impl Values for Vec<Document> {
    fn to_bson(&self) -> Bson {
        Bson::Array(self.iter().cloned().map(Bson::Document).collect())
    }

    fn restore(&mut self, bson: Bson) {
        let values = match bson {
            Bson::Array(values) => values,
            _ => return,
        };
        let docs = values
            .into_iter()
            .map(|value| match value {
                Bson::Document(doc) => Some(doc),
                _ => None,
            })
            .collect::<Option<Vec<Document>>>();
        if let Some(docs) = docs {
            *self = docs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    use bson::oid::ObjectId;

    #[derive(Default)]
    struct Log {
        timed: Cell<u32>,
        lines: RefCell<Vec<(String, Vec<Bson>, Duration)>>,
    }

    impl Connection for Log {
        fn elapsed_time(&self, _start: Instant) -> Duration {
            self.timed.set(self.timed.get() + 1);
            Duration::from_millis(7)
        }

        fn log_query(&self, query: &str, bindings: &[Bson], time: Duration) {
            self.lines
                .borrow_mut()
                .push((query.to_owned(), bindings.to_vec(), time));
        }
    }

    impl Log {
        fn queries(&self) -> Vec<String> {
            self.lines.borrow().iter().map(|l| l.0.clone()).collect()
        }
    }

    #[derive(Debug, PartialEq)]
    enum Call {
        Call(String, Vec<Bson>),
        Insert(String, Bson, Document),
    }

    struct Users {
        calls: RefCell<Vec<Call>>,
        fail: bool,
    }

    impl Users {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail: true,
            }
        }
    }

    fn assign_id(values: &mut Bson) {
        match values {
            Bson::Document(doc) => {
                doc.insert("_id", 42);
            }
            Bson::Array(docs) => {
                for (i, doc) in docs.iter_mut().enumerate() {
                    if let Bson::Document(doc) = doc {
                        doc.insert("_id", i as i32);
                    }
                }
            }
            _ => {}
        }
    }

    impl Collection for Users {
        type Error = String;

        fn name(&self) -> &str {
            "users"
        }

        fn call(&self, method: &str, args: Vec<Bson>) -> Result<Bson, Self::Error> {
            self.calls
                .borrow_mut()
                .push(Call::Call(method.to_owned(), args.clone()));
            if self.fail {
                return Err(format!("{} failed", method));
            }
            Ok(Bson::Array(args))
        }

        fn call_insert(
            &self,
            method: &str,
            values: &mut Bson,
            options: Document,
        ) -> Result<Bson, Self::Error> {
            self.calls.borrow_mut().push(Call::Insert(
                method.to_owned(),
                values.clone(),
                options,
            ));
            assign_id(values);
            if self.fail {
                return Err(format!("{} failed", method));
            }
            Ok(Bson::Boolean(true))
        }
    }

    #[test]
    fn invoke_forwards_arguments_unchanged() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let oid = ObjectId::new();
        let mut args = vec![
            Bson::Document(doc! { "_id": oid }),
            Bson::Document(doc! { "$set": { "age": 3 } }),
        ];
        let result = logged.invoke("update", &mut args).unwrap();

        assert_eq!(result, Bson::Array(args.clone()));
        assert_eq!(
            *users.calls.borrow(),
            vec![Call::Call("update".to_owned(), args)]
        );
    }

    #[test]
    fn invoke_logs_query_line() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        logged
            .invoke("find", &mut [Bson::Document(doc! { "status": "active" })])
            .unwrap();

        let lines = log.lines.borrow();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, r#"users.find({"status":"active"})"#);
        assert!(lines[0].1.is_empty());
        assert_eq!(lines[0].2, Duration::from_millis(7));
    }

    #[test]
    fn invoke_without_arguments() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        logged.invoke("drop", &mut []).unwrap();
        assert_eq!(log.queries(), vec!["users.drop()".to_owned()]);
    }

    #[test]
    fn invoke_insert_like_passes_first_argument_mutably() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut args = vec![Bson::Array(vec![
            Bson::Document(doc! { "name": "foo" }),
            Bson::Document(doc! { "name": "bar" }),
        ])];
        logged.invoke("batchInsert", &mut args).unwrap();

        assert_eq!(
            args[0],
            Bson::Array(vec![
                Bson::Document(doc! { "name": "foo", "_id": 0 }),
                Bson::Document(doc! { "name": "bar", "_id": 1 }),
            ])
        );
        match &users.calls.borrow()[0] {
            Call::Insert(method, _, options) => {
                assert_eq!(method, "batchInsert");
                assert_eq!(*options, Document::new());
            }
            call => panic!("unexpected call {:?}", call),
        }
        // The line shows the arguments as they were handed in.
        assert_eq!(
            log.queries(),
            vec![r#"users.batchInsert([{"name":"foo"},{"name":"bar"}])"#.to_owned()]
        );
    }

    #[test]
    fn invoke_insert_like_forwards_options() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut args = vec![
            Bson::Document(doc! { "name": "foo" }),
            Bson::Document(doc! { "w": 1 }),
            Bson::String("ignored".to_owned()),
        ];
        logged.invoke("save", &mut args).unwrap();

        assert_eq!(
            *users.calls.borrow(),
            vec![Call::Insert(
                "save".to_owned(),
                Bson::Document(doc! { "name": "foo" }),
                doc! { "w": 1 },
            )]
        );
        assert_eq!(args[0], Bson::Document(doc! { "name": "foo", "_id": 42 }));
    }

    #[test]
    fn invoke_insert_like_null_options_default() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut args = vec![Bson::Document(doc! { "name": "foo" }), Bson::Null];
        logged.invoke("insert", &mut args).unwrap();
        assert_eq!(
            *users.calls.borrow(),
            vec![Call::Insert(
                "insert".to_owned(),
                Bson::Document(doc! { "name": "foo" }),
                Document::new(),
            )]
        );
    }

    #[test]
    fn invoke_insert_like_keeps_invalid_options() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut args = vec![
            Bson::Document(doc! { "name": "foo" }),
            Bson::String("fsync".to_owned()),
        ];
        logged.invoke("insert", &mut args).unwrap();
        assert_eq!(
            *users.calls.borrow(),
            vec![Call::Call("insert".to_owned(), args.clone())]
        );
        assert_eq!(
            log.queries(),
            vec![r#"users.insert({"name":"foo"},"fsync")"#.to_owned()]
        );
    }

    #[test]
    fn invoke_insert_like_without_arguments() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        logged.invoke("insert", &mut []).unwrap();
        assert_eq!(
            *users.calls.borrow(),
            vec![Call::Insert("insert".to_owned(), Bson::Null, Document::new())]
        );
        assert_eq!(log.queries(), vec!["users.insert()".to_owned()]);
    }

    #[test]
    fn invoke_error_is_not_logged() {
        let log = Log::default();
        let users = Users::failing();
        let logged = LoggedCollection::new(&log, &users);

        let err = logged.invoke("find", &mut []).unwrap_err();
        assert_eq!(err, "find failed");
        assert_eq!(log.timed.get(), 0);
        assert!(log.lines.borrow().is_empty());
    }

    #[test]
    fn save_defaults_options() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut user = doc! { "name": "Ann" };
        let result = logged.save(&mut user, None).unwrap();

        assert_eq!(result, Bson::Boolean(true));
        assert_eq!(
            *users.calls.borrow(),
            vec![Call::Insert(
                "insert".to_owned(),
                Bson::Document(doc! { "name": "Ann" }),
                Document::new(),
            )]
        );
        assert_eq!(log.queries(), vec![r#"users.save({"name":"Ann"},{})"#.to_owned()]);
        assert_eq!(user, doc! { "name": "Ann", "_id": 42 });
    }

    #[test]
    fn insert_keeps_generated_id() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut user = doc! { "name": "foo" };
        logged.insert(&mut user, Some(doc! { "w": 1 })).unwrap();

        assert_eq!(user.get_i32("_id").unwrap(), 42);
        assert_eq!(
            log.queries(),
            vec![r#"users.insert({"name":"foo"},{"w":1})"#.to_owned()]
        );
    }

    #[test]
    fn insert_batch_keeps_generated_ids() {
        let log = Log::default();
        let users = Users::new();
        let logged = LoggedCollection::new(&log, &users);

        let mut batch = vec![doc! { "name": "foo" }, doc! { "name": "bar" }];
        logged.insert_batch(&mut batch, None).unwrap();

        assert_eq!(
            batch,
            vec![doc! { "name": "foo", "_id": 0 }, doc! { "name": "bar", "_id": 1 }]
        );
        match &users.calls.borrow()[0] {
            Call::Insert(method, _, _) => assert_eq!(method, "insert"),
            call => panic!("unexpected call {:?}", call),
        }
        assert_eq!(
            log.queries(),
            vec![r#"users.insertBatch([{"name":"foo"},{"name":"bar"}],{})"#.to_owned()]
        );
    }

    #[test]
    fn insert_error_keeps_values_and_skips_log() {
        let log = Log::default();
        let users = Users::failing();
        let logged = LoggedCollection::new(&log, &users);

        let mut user = doc! { "name": "foo" };
        let err = logged.insert(&mut user, None).unwrap_err();

        assert_eq!(err, "insert failed");
        assert_eq!(user.get_str("name").unwrap(), "foo");
        assert!(log.lines.borrow().is_empty());
    }

    // Replaces whatever it is handed with `null`.
    struct Clobber;

    impl Collection for Clobber {
        type Error = String;

        fn name(&self) -> &str {
            "users"
        }

        fn call(&self, _method: &str, _args: Vec<Bson>) -> Result<Bson, Self::Error> {
            Ok(Bson::Null)
        }

        fn call_insert(
            &self,
            _method: &str,
            values: &mut Bson,
            _options: Document,
        ) -> Result<Bson, Self::Error> {
            *values = Bson::Null;
            Ok(Bson::Boolean(true))
        }
    }

    #[test]
    fn insert_keeps_values_the_driver_replaced() {
        let log = Log::default();
        let logged = LoggedCollection::new(&log, &Clobber);

        let mut user = doc! { "name": "foo" };
        logged.insert(&mut user, None).unwrap();
        assert_eq!(user, doc! { "name": "foo" });

        let mut batch = vec![doc! { "name": "foo" }, doc! { "name": "bar" }];
        logged.insert_batch(&mut batch, None).unwrap();
        assert_eq!(batch, vec![doc! { "name": "foo" }, doc! { "name": "bar" }]);
    }

    #[test]
    fn name() {
        let log = Log::default();
        let users = Users::new();
        assert_eq!(LoggedCollection::new(&log, &users).name(), "users");
    }
}
