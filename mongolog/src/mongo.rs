use bson::oid::ObjectId;
use bson::{Bson, Document};
use mongodb::results::UpdateResult;

use crate::client::{Client, Request, Response};
use crate::collection::Collection;
use crate::error::{invalid_argument, runtime, unsupported};
use crate::options;

/// A [`Collection`] backed by a mongodb collection, obtained through [`Client::collection`].
///
/// Calls are forwarded using the method names of the legacy driver:
///
/// | Method | Arguments | Returns |
/// |---|---|---|
/// | `aggregate` | `[stage, ...]` or `stage, ...` | array of documents |
/// | `batchInsert` | `[document, ...], options?` | `{ ok, n }` |
/// | `count` | `filter?, options?` | int64 |
/// | `distinct` | `key, filter?` | array |
/// | `drop` | | `{ ok }` |
/// | `find` | `filter?, projection?, options?` | array of documents |
/// | `findOne` | `filter?, projection?, options?` | document or null |
/// | `insert` | `document, options?` | `{ ok, n }` |
/// | `remove` | `filter?, options?` | `{ ok, n }` |
/// | `save` | `document, options?` | `{ ok, n, updatedExisting }` |
/// | `update` | `filter, update, options?` | `{ ok, n, nModified, updatedExisting, upserted? }` |
///
/// Documents inserted without an `_id` are given a new `ObjectId`, which is written back into
/// the caller's value.
#[derive(Clone)]
pub struct MongoCollection {
    client: Client,
    name: String,
}

struct Args<'a> {
    collection: &'a str,
    method: &'a str,
    position: usize,
    args: std::vec::IntoIter<Bson>,
}

impl<'a> Args<'a> {
    fn new(collection: &'a str, method: &'a str, args: Vec<Bson>) -> Self {
        Self {
            collection,
            method,
            position: 0,
            args: args.into_iter(),
        }
    }

    fn next(&mut self) -> Option<Bson> {
        self.position += 1;
        self.args.next()
    }

    fn invalid(&self, expected: &str, got: &Bson) -> crate::Error {
        invalid_argument(format!(
            "{}.{} expects argument {} to be {}, got {}",
            self.collection, self.method, self.position, expected, got
        ))
    }

    fn document(&mut self) -> crate::Result<Option<Document>> {
        match self.next() {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Document(doc)) => Ok(Some(doc)),
            Some(v) => Err(self.invalid("a document", &v)),
        }
    }

    fn required_document(&mut self) -> crate::Result<Document> {
        match self.next() {
            Some(Bson::Document(doc)) => Ok(doc),
            Some(v) => Err(self.invalid("a document", &v)),
            None => Err(self.invalid("a document", &Bson::Null)),
        }
    }

    fn string(&mut self) -> crate::Result<String> {
        match self.next() {
            Some(Bson::String(s)) => Ok(s),
            Some(v) => Err(self.invalid("a string", &v)),
            None => Err(self.invalid("a string", &Bson::Null)),
        }
    }

    fn pipeline(mut self) -> crate::Result<Vec<Document>> {
        let mut stages = Vec::new();
        while let Some(arg) = self.next() {
            match arg {
                Bson::Array(values) if self.position == 1 => {
                    for value in values {
                        match value {
                            Bson::Document(doc) => stages.push(doc),
                            v => return Err(self.invalid("an array of stages", &v)),
                        }
                    }
                }
                Bson::Document(doc) => stages.push(doc),
                v => return Err(self.invalid("a stage", &v)),
            }
        }
        Ok(stages)
    }
}

fn assign_id(doc: &mut Document) {
    if !doc.contains_key("_id") {
        doc.insert("_id", ObjectId::new());
    }
}

fn ok(n: i64) -> Bson {
    Bson::Document(doc! { "ok": 1.0, "n": n })
}

fn updated(result: UpdateResult) -> Bson {
    reply(result.matched_count, result.modified_count, result.upserted_id)
}

fn reply(matched: u64, modified: u64, upserted: Option<Bson>) -> Bson {
    let n = if upserted.is_some() { 1 } else { matched as i64 };
    let mut doc = doc! {
        "ok": 1.0,
        "n": n,
        "nModified": modified as i64,
        "updatedExisting": matched > 0,
    };
    if let Some(id) = upserted {
        doc.insert("upserted", id);
    }
    Bson::Document(doc)
}

impl MongoCollection {
    pub(crate) fn new(client: Client, name: String) -> Self {
        Self { client, name }
    }

    /// Returns the client this collection was obtained from.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn unexpected(&self) -> crate::Error {
        runtime(format!(
            "incorrect response from runtime thread for '{}'",
            self.name
        ))
    }

    fn insert_values(&self, values: &mut Bson, options: &Document) -> crate::Result<Bson> {
        match values {
            Bson::Document(doc) => {
                assign_id(doc);
                let req = Request::InsertOne(
                    self.name.clone(),
                    doc.clone(),
                    options::insert_one(options)?,
                );
                match self.client.execute(req)? {
                    Response::Inserted(n) => Ok(ok(n as i64)),
                    _ => Err(self.unexpected()),
                }
            }
            Bson::Array(values) => {
                if values.is_empty() {
                    return Err(invalid_argument(format!(
                        "{}.insert requires at least one document",
                        self.name
                    )));
                }
                if let Some(v) = values.iter().find(|v| !matches!(v, Bson::Document(_))) {
                    return Err(invalid_argument(format!(
                        "{}.insert expects an array of documents, got {}",
                        self.name, v
                    )));
                }
                let documents = values
                    .iter_mut()
                    .filter_map(|v| match v {
                        Bson::Document(doc) => {
                            assign_id(doc);
                            Some(doc.clone())
                        }
                        _ => None,
                    })
                    .collect::<Vec<Document>>();
                let req = Request::InsertMany(
                    self.name.clone(),
                    documents,
                    options::insert_many(options)?,
                );
                match self.client.execute(req)? {
                    Response::Inserted(n) => Ok(ok(n as i64)),
                    _ => Err(self.unexpected()),
                }
            }
            v => Err(invalid_argument(format!(
                "{}.insert expects a document or an array of documents, got {}",
                self.name, v
            ))),
        }
    }

    fn save(&self, values: &mut Bson, options: &Document) -> crate::Result<Bson> {
        let id = match values {
            Bson::Document(doc) => doc.get("_id").cloned(),
            v => {
                return Err(invalid_argument(format!(
                    "{}.save expects a document, got {}",
                    self.name, v
                )))
            }
        };
        let (id, doc) = match (id, values) {
            (Some(id), Bson::Document(doc)) => (id, doc),
            (_, values) => return self.insert_values(values, options),
        };
        let mut options = options::replace(options)?;
        options.upsert = Some(true);
        let req = Request::Replace(self.name.clone(), doc! { "_id": id }, doc.clone(), options);
        match self.client.execute(req)? {
            Response::Update(result) => Ok(updated(result)),
            _ => Err(self.unexpected()),
        }
    }

    fn update(&self, mut args: Args<'_>) -> crate::Result<Bson> {
        let filter = args.required_document()?;
        let update = args.required_document()?;
        let options = args.document()?.unwrap_or_default();
        // A document without operators replaces the matched document outright.
        let operators = update.keys().next().map_or(false, |k| k.starts_with('$'));
        let req = if operators {
            let (many, opts) = options::update(&options)?;
            Request::Update(many, self.name.clone(), filter, update, opts)
        } else {
            Request::Replace(self.name.clone(), filter, update, options::replace(&options)?)
        };
        match self.client.execute(req)? {
            Response::Update(result) => Ok(updated(result)),
            _ => Err(self.unexpected()),
        }
    }
}

impl Collection for MongoCollection {
    type Error = crate::Error;

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, method: &str, args: Vec<Bson>) -> crate::Result<Bson> {
        let mut args = Args::new(&self.name, method, args);
        match method {
            "aggregate" => {
                let req = Request::Aggregate(self.name.clone(), args.pipeline()?);
                match self.client.execute(req)? {
                    Response::Documents(docs) => {
                        Ok(Bson::Array(docs.into_iter().map(Bson::Document).collect()))
                    }
                    _ => Err(self.unexpected()),
                }
            }
            "count" => {
                let filter = args.document()?;
                let options = options::count(&args.document()?.unwrap_or_default())?;
                match self
                    .client
                    .execute(Request::Count(self.name.clone(), filter, options))?
                {
                    Response::Count(n) => Ok(Bson::Int64(n as i64)),
                    _ => Err(self.unexpected()),
                }
            }
            "distinct" => {
                let key = args.string()?;
                let filter = args.document()?;
                match self
                    .client
                    .execute(Request::Distinct(self.name.clone(), key, filter))?
                {
                    Response::Values(values) => Ok(Bson::Array(values)),
                    _ => Err(self.unexpected()),
                }
            }
            "drop" => match self.client.execute(Request::Drop(self.name.clone()))? {
                Response::Dropped => Ok(Bson::Document(doc! { "ok": 1.0 })),
                _ => Err(self.unexpected()),
            },
            "find" => {
                let filter = args.document()?;
                let projection = args.document()?;
                let options = options::find(&args.document()?.unwrap_or_default(), projection)?;
                match self
                    .client
                    .execute(Request::Find(self.name.clone(), filter, options))?
                {
                    Response::Documents(docs) => {
                        Ok(Bson::Array(docs.into_iter().map(Bson::Document).collect()))
                    }
                    _ => Err(self.unexpected()),
                }
            }
            "findOne" => {
                let filter = args.document()?;
                let projection = args.document()?;
                let options =
                    options::find_one(&args.document()?.unwrap_or_default(), projection)?;
                match self
                    .client
                    .execute(Request::FindOne(self.name.clone(), filter, options))?
                {
                    Response::Document(doc) => Ok(doc.map(Bson::Document).unwrap_or(Bson::Null)),
                    _ => Err(self.unexpected()),
                }
            }
            "insert" | "batchInsert" | "save" => {
                let mut values = args.next().unwrap_or(Bson::Null);
                let options = args.document()?.unwrap_or_default();
                self.call_insert(method, &mut values, options)
            }
            "remove" => {
                let filter = args.document()?.unwrap_or_default();
                let (many, options) = options::delete(&args.document()?.unwrap_or_default())?;
                let req = Request::Delete(many, self.name.clone(), filter, options);
                match self.client.execute(req)? {
                    Response::Delete(result) => Ok(ok(result.deleted_count as i64)),
                    _ => Err(self.unexpected()),
                }
            }
            "update" => self.update(args),
            _ => Err(unsupported(format!("{}.{}", self.name, method))),
        }
    }

    fn call_insert(
        &self,
        method: &str,
        values: &mut Bson,
        options: Document,
    ) -> crate::Result<Bson> {
        match method {
            "insert" | "batchInsert" => self.insert_values(values, &options),
            "save" => self.save(values, &options),
            _ => Err(unsupported(format!("{}.{}", self.name, method))),
        }
    }
}
