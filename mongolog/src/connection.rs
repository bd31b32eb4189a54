use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bson::Bson;

/// The timing and logging sink that a [`LoggedCollection`](crate::LoggedCollection) reports to.
pub trait Connection {
    /// Returns the time that has passed since `start`.
    fn elapsed_time(&self, start: Instant) -> Duration;

    /// Records a query that has been run along with its bindings and execution time.
    fn log_query(&self, query: &str, bindings: &[Bson], time: Duration);
}

/// A query that has been recorded by a [`QueryLog`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryEntry {
    /// The readable form of the query, e.g. `users.find({"name":"foo"})`.
    pub query: String,
    /// The bindings passed alongside the query.
    pub bindings: Vec<Bson>,
    /// How long the query took to run.
    pub time: Duration,
}

type Listener = Arc<dyn Fn(&QueryEntry) + Send + Sync>;

/// An in-memory [`Connection`] that keeps a log of the queries run against it.
///
/// Every query is written to the `log` facade at debug level and handed to any registered
/// listeners. The queries are only kept in memory while logging is enabled, which it is not by
/// default.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
///
/// use mongolog::{Connection, QueryLog};
///
/// let log = QueryLog::new();
/// log.enable();
///
/// let time = log.elapsed_time(Instant::now());
/// log.log_query("users.find({})", &[], time);
///
/// assert_eq!(log.entries()[0].query, "users.find({})");
/// ```
#[derive(Default)]
pub struct QueryLog {
    enabled: AtomicBool,
    entries: Mutex<Vec<QueryEntry>>,
    listeners: RwLock<Vec<Listener>>,
}

impl QueryLog {
    /// Constructs an empty `QueryLog` with logging disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts keeping queries in memory.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stops keeping queries in memory, the queries already kept are left alone.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Whether queries are currently being kept.
    pub fn logging(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Returns a copy of the queries kept so far.
    pub fn entries(&self) -> Vec<QueryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears the kept queries.
    pub fn flush(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Registers a callback that is invoked for every logged query.
    ///
    /// Listeners are called whether or not logging is enabled. A listener registered while a
    /// query is being handed out is called from the next query on.
    pub fn listen<F>(&self, listener: F)
    where
        F: Fn(&QueryEntry) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }
}

impl Connection for QueryLog {
    fn elapsed_time(&self, start: Instant) -> Duration {
        start.elapsed()
    }

    fn log_query(&self, query: &str, bindings: &[Bson], time: Duration) {
        debug!("{} ({:.2}ms)", query, time.as_secs_f64() * 1000.0);

        let entry = QueryEntry {
            query: query.to_owned(),
            bindings: bindings.to_vec(),
            time,
        };
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&entry);
        }
        if self.logging() {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry);
        }
    }
}
