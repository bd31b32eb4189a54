use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{
    Acknowledgment, AuthMechanism, ClientOptions, CountOptions, Credential, DeleteOptions,
    FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions, ReplaceOptions,
    ServerAddress, Tls, TlsOptions, UpdateOptions, WriteConcern,
};
use mongodb::results::{DeleteResult, UpdateResult};
use url::Url;

use crate::connection::{Connection, QueryLog};
use crate::logged::LoggedCollection;
use crate::mongo::MongoCollection;

/// A `ClientBuilder` can be used to create a `Client` with custom configuration.
pub struct ClientBuilder {
    ca: Option<String>,
    cert_key: Option<String>,
    database: Option<String>,
    logging: bool,
    password: Option<String>,
    uri: Option<String>,
    username: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse<T>(key: &str, value: &str) -> crate::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| crate::error::builder(format!("invalid value for '{}': {}", key, e)))
}

fn millis(key: &str, value: &str) -> crate::Result<Duration> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

impl ClientBuilder {
    /// Constructs a new `ClientBuilder`.
    ///
    /// This is the same as `Client::builder()`.
    pub fn new() -> Self {
        Self {
            ca: None,
            cert_key: None,
            database: None,
            logging: false,
            password: None,
            uri: None,
            username: None,
        }
    }

    /// Returns a `Client` built from this `ClientBuilder` configuration.
    ///
    /// # Errors
    ///
    /// This method fails if the uri is invalid or the `mongodb::Client` cannot be initialised.
    pub fn build(self) -> crate::Result<Client> {
        let database = self
            .database
            .clone()
            .unwrap_or_else(|| String::from("db"));
        let logging = self.logging;
        let options = self.client_options()?;

        let log = QueryLog::new();
        if logging {
            log.enable();
        }
        let inner = ClientInner::new(options, database, log)?;
        Ok(Client {
            inner: Arc::new(inner),
        })
    }

    // NOTE: `ClientOptions::parse` is async and resolves SRV records, we only need the plain
    // `mongodb://` form so it is handled here.
    fn client_options(self) -> crate::Result<ClientOptions> {
        let uri = self
            .uri
            .unwrap_or_else(|| String::from("mongodb://127.0.0.1:27017"));
        let url = Url::parse(&uri).map_err(crate::error::builder)?;
        if url.scheme() != "mongodb" {
            return Err(crate::error::builder(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let mut options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: url.host_str().unwrap_or("127.0.0.1").to_owned(),
                port: url.port(),
            }])
            .build();
        let mut kv = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<String, String>>();

        if let Some(app_name) = kv.remove("appName") {
            options.app_name = Some(app_name);
        }
        if let Some(connect_timeout) = kv.remove("connectTimeoutMS") {
            options.connect_timeout = Some(millis("connectTimeoutMS", &connect_timeout)?);
        }
        if let Some(direct) = kv.remove("directConnection") {
            options.direct_connection = Some(parse("directConnection", &direct)?);
        }
        if let Some(max_pool_size) = kv.remove("maxPoolSize") {
            options.max_pool_size = Some(parse("maxPoolSize", &max_pool_size)?);
        }
        if let Some(min_pool_size) = kv.remove("minPoolSize") {
            options.min_pool_size = Some(parse("minPoolSize", &min_pool_size)?);
        }
        if let Some(replica_set) = kv.remove("replicaSet") {
            options.repl_set_name = Some(replica_set);
        }
        if let Some(retry_reads) = kv.remove("retryReads") {
            options.retry_reads = Some(parse("retryReads", &retry_reads)?);
        }
        if let Some(retry_writes) = kv.remove("retryWrites") {
            options.retry_writes = Some(parse("retryWrites", &retry_writes)?);
        }
        if let Some(timeout) = kv.remove("serverSelectionTimeoutMS") {
            options.server_selection_timeout = Some(millis("serverSelectionTimeoutMS", &timeout)?);
        }

        let journal = kv.remove("journal");
        let w = kv.remove("w");
        let w_timeout = kv.remove("wTimeoutMS");
        if journal.is_some() || w.is_some() || w_timeout.is_some() {
            let mut write_concern = WriteConcern::default();
            if let Some(journal) = journal {
                write_concern.journal = Some(parse("journal", &journal)?);
            }
            if let Some(w) = w {
                let w = match w.parse::<u32>() {
                    Ok(n) => Acknowledgment::Nodes(n),
                    Err(_) => match w.as_str() {
                        "majority" => Acknowledgment::Majority,
                        _ => Acknowledgment::Custom(w),
                    },
                };
                write_concern.w = Some(w);
            }
            if let Some(w_timeout) = w_timeout {
                write_concern.w_timeout = Some(millis("wTimeoutMS", &w_timeout)?);
            }
            options.write_concern = Some(write_concern);
        }

        let auth_source = kv.remove("authSource");
        let auth_mechanism = kv.remove("authMechanism");
        if !url.username().is_empty()
            || self.username.is_some()
            || auth_source.is_some()
            || auth_mechanism.is_some()
        {
            let mut credential = Credential::default();
            if self.username.is_some() || !url.username().is_empty() {
                credential.username = self.username.or_else(|| Some(url.username().to_owned()));
                credential.password = self
                    .password
                    .or_else(|| url.password().map(|p| p.to_owned()));
            }
            credential.source = auth_source;
            if let Some(auth_mechanism) = auth_mechanism {
                credential.mechanism =
                    Some(AuthMechanism::from_str(&auth_mechanism).map_err(crate::error::builder)?);
            }
            options.credential = Some(credential);
        }

        let tls_enabled = kv.remove("tls");
        let tls_insecure = kv.remove("tlsInsecure");
        let tls_ca_file = kv.remove("tlsCAFile");
        let tls_certificate_key_file = kv.remove("tlsCertificateKeyFile");
        let tls_allow_invalid_certificates = kv.remove("tlsAllowInvalidCertificates");
        if self.ca.is_some()
            || self.cert_key.is_some()
            || tls_enabled.is_some()
            || tls_insecure.is_some()
            || tls_ca_file.is_some()
            || tls_certificate_key_file.is_some()
            || tls_allow_invalid_certificates.is_some()
        {
            let enabled = match tls_enabled {
                Some(enabled) => parse("tls", &enabled)?,
                None => true,
            };
            let tls = if enabled {
                let mut tls = TlsOptions::default();
                if let Some(allow) = tls_allow_invalid_certificates {
                    tls.allow_invalid_certificates =
                        Some(parse("tlsAllowInvalidCertificates", &allow)?);
                } else if let Some(insecure) = tls_insecure {
                    tls.allow_invalid_certificates = Some(parse("tlsInsecure", &insecure)?);
                }
                if let Some(ca_file_path) = self.ca.or(tls_ca_file) {
                    tls.ca_file_path = Some(PathBuf::from(ca_file_path));
                }
                if let Some(cert_key_file_path) = self.cert_key.or(tls_certificate_key_file) {
                    tls.cert_key_file_path = Some(PathBuf::from(cert_key_file_path));
                }
                Tls::Enabled(tls)
            } else {
                Tls::Disabled
            };
            options.tls = Some(tls);
        }

        for key in kv.keys() {
            warn!("ignoring unsupported uri option '{}'", key);
        }

        Ok(options)
    }

    /// Sets the username/password that should be used by this client.
    ///
    /// # Example
    ///
    /// ```rust
    /// let _client = mongolog::Client::builder()
    ///     .auth("foo", Some("bar"))
    ///     .build().unwrap();
    /// ```
    pub fn auth<U, P>(mut self, username: U, password: Option<P>) -> Self
    where
        U: Display,
        P: Display,
    {
        self.username = Some(username.to_string());
        if let Some(password) = password {
            self.password = Some(password.to_string());
        }
        self
    }

    /// Sets the CA file that should be used by this client for TLS.
    pub fn ca<I: Into<String>>(mut self, path: I) -> Self {
        self.ca = Some(path.into());
        self
    }

    /// Sets the certificate file that should be used by this client for identification.
    pub fn cert_key<I: Into<String>>(mut self, path: I) -> Self {
        self.cert_key = Some(path.into());
        self
    }

    /// Sets the database that should be used by this client.
    ///
    /// # Example
    ///
    /// ```rust
    /// let _client = mongolog::Client::builder()
    ///     .database("foo")
    ///     .build().unwrap();
    /// ```
    pub fn database<I: Into<String>>(mut self, database: I) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets whether the client's query log should keep queries from the start.
    ///
    /// Defaults to false, it can be toggled later through [`Client::query_log`].
    pub fn logging(mut self, enable: bool) -> Self {
        self.logging = enable;
        self
    }

    /// Sets the uri that this client should use to connect to a mongo instance.
    ///
    /// # Example
    ///
    /// ```rust
    /// # fn doc() -> Result<(), mongolog::Error> {
    /// let _client = mongolog::Client::builder()
    ///     .uri("mongodb://foo")
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn uri<I: Into<String>>(mut self, uri: I) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// A synchronous `Client` to query mongo with.
///
/// The client uses sane defaults but these can be tweaked using the builder. To configure a
/// `Client`, use `Client::builder`.
///
/// The `Client` holds a connection pool and a runtime thread internally, so it is advised that
/// you create once, and reuse it. It is also the [`Connection`] its collections report their
/// queries to, see [`Client::query_log`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("database", &self.inner.database)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::large_enum_variant)]
pub(crate) enum Request {
    Aggregate(String, Vec<Document>),
    Count(String, Option<Document>, CountOptions),
    Delete(bool, String, Document, DeleteOptions),
    Distinct(String, String, Option<Document>),
    Drop(String),
    Find(String, Option<Document>, FindOptions),
    FindOne(String, Option<Document>, FindOneOptions),
    InsertMany(String, Vec<Document>, InsertManyOptions),
    InsertOne(String, Document, InsertOneOptions),
    Replace(String, Document, Document, ReplaceOptions),
    Update(bool, String, Document, Document, UpdateOptions),
}

pub(crate) enum Response {
    Count(u64),
    Delete(DeleteResult),
    Document(Option<Document>),
    Documents(Vec<Document>),
    Dropped,
    Inserted(usize),
    Update(UpdateResult),
    Values(Vec<Bson>),
}

type OneshotResponse = std::sync::mpsc::Sender<crate::Result<Response>>;
type ThreadSender = tokio::sync::mpsc::UnboundedSender<(Request, OneshotResponse)>;

struct ClientInner {
    _thread: Option<thread::JoinHandle<()>>,
    database: String,
    log: QueryLog,
    tx: ThreadSender,
}

impl Client {
    /// Constructs a new `Client`.
    ///
    /// # Panics
    ///
    /// This method panics if the `mongodb::Client` fails to initialise.
    ///
    /// Use `Client::builder()` if you wish to handle this failure as an `Error` instead of
    /// panicking.
    pub fn new() -> Self {
        ClientBuilder::new().build().expect("Client::new()")
    }

    /// Creates a `ClientBuilder` to configure a `Client`.
    ///
    /// This is the same as `ClientBuilder::new()`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Returns a handle to the named collection in the client's database.
    pub fn collection<I: Into<String>>(&self, name: I) -> MongoCollection {
        MongoCollection::new(self.clone(), name.into())
    }

    /// The name of the database the client's collections live in.
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// Wraps `collection` so that its queries are logged on this client.
    pub fn logged<'a>(
        &'a self,
        collection: &'a MongoCollection,
    ) -> LoggedCollection<'a, MongoCollection, Client> {
        LoggedCollection::new(self, collection)
    }

    /// The log that queries run through [`logged`](Client::logged) collections are recorded in.
    pub fn query_log(&self) -> &QueryLog {
        &self.inner.log
    }

    pub(crate) fn execute(&self, req: Request) -> crate::Result<Response> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.inner
            .tx
            .send((req, tx))
            .map_err(|_| crate::error::runtime("failed to send request to runtime thread"))?;
        rx.recv().map_err(crate::error::runtime)?
    }
}

impl Connection for Client {
    fn elapsed_time(&self, start: Instant) -> Duration {
        self.inner.log.elapsed_time(start)
    }

    fn log_query(&self, query: &str, bindings: &[Bson], time: Duration) {
        self.inner.log.log_query(query, bindings, time)
    }
}

async fn dispatch(database: &mongodb::Database, req: Request) -> mongodb::error::Result<Response> {
    Ok(match req {
        Request::Aggregate(collection, pipeline) => {
            let cursor = database
                .collection::<Document>(&collection)
                .aggregate(pipeline, None)
                .await?;
            Response::Documents(cursor.try_collect().await?)
        }
        Request::Count(collection, filter, options) => Response::Count(
            database
                .collection::<Document>(&collection)
                .count_documents(filter, options)
                .await?,
        ),
        Request::Delete(many, collection, filter, options) => {
            let collection = database.collection::<Document>(&collection);
            Response::Delete(if many {
                collection.delete_many(filter, options).await?
            } else {
                collection.delete_one(filter, options).await?
            })
        }
        Request::Distinct(collection, key, filter) => Response::Values(
            database
                .collection::<Document>(&collection)
                .distinct(key, filter, None)
                .await?,
        ),
        Request::Drop(collection) => {
            database
                .collection::<Document>(&collection)
                .drop(None)
                .await?;
            Response::Dropped
        }
        Request::Find(collection, filter, options) => {
            let cursor = database
                .collection::<Document>(&collection)
                .find(filter, options)
                .await?;
            Response::Documents(cursor.try_collect().await?)
        }
        Request::FindOne(collection, filter, options) => Response::Document(
            database
                .collection::<Document>(&collection)
                .find_one(filter, options)
                .await?,
        ),
        Request::InsertMany(collection, documents, options) => Response::Inserted(
            database
                .collection::<Document>(&collection)
                .insert_many(documents, options)
                .await?
                .inserted_ids
                .len(),
        ),
        Request::InsertOne(collection, document, options) => {
            database
                .collection::<Document>(&collection)
                .insert_one(document, options)
                .await?;
            Response::Inserted(1)
        }
        Request::Replace(collection, filter, document, options) => Response::Update(
            database
                .collection::<Document>(&collection)
                .replace_one(filter, document, options)
                .await?,
        ),
        Request::Update(many, collection, filter, update, options) => {
            let collection = database.collection::<Document>(&collection);
            Response::Update(if many {
                collection.update_many(filter, update, options).await?
            } else {
                collection.update_one(filter, update, options).await?
            })
        }
    })
}

impl ClientInner {
    fn new(options: ClientOptions, database: String, log: QueryLog) -> crate::Result<Self> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(Request, OneshotResponse)>();
        let (spawn_tx, spawn_rx) = std::sync::mpsc::channel::<crate::Result<()>>();
        let name = database.clone();
        let handle = thread::Builder::new()
            .name("mongolog-runtime".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(crate::error::builder)
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        if let Err(e) = spawn_tx.send(Err(e)) {
                            error!("failed to communicate runtime builder: {:?}", e);
                        }
                        return;
                    }
                };
                let f = async move {
                    let client = match mongodb::Client::with_options(options)
                        .map_err(crate::error::builder)
                    {
                        Ok(client) => client,
                        Err(e) => {
                            if let Err(e) = spawn_tx.send(Err(e)) {
                                error!("failed to create mongodb client: {:?}", e);
                            }
                            return;
                        }
                    };
                    if let Err(e) = spawn_tx.send(Ok(())) {
                        error!("failed to communicate successful startup: {:?}", e);
                        return;
                    }
                    let database = client.database(&name);
                    while let Some((req, req_tx)) = rx.recv().await {
                        let resp = dispatch(&database, req)
                            .await
                            .map_err(crate::error::mongodb);
                        let _ = req_tx.send(resp);
                    }
                    trace!("runtime thread for '{}' shutting down", name);
                };
                rt.block_on(f);
            })
            .map_err(crate::error::builder)?;

        spawn_rx.recv().map_err(crate::error::builder)??;

        Ok(Self {
            _thread: Some(handle),
            database,
            log,
            tx,
        })
    }
}
