use std::cell::{Cell, RefCell};
use std::fmt;

use mongolog::bson::{Bson, Document};
use mongolog::Collection;

/// Raised by `Memory` for anything it does not understand.
#[derive(Debug, PartialEq)]
pub struct MemoryError(pub String);

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MemoryError {}

/// An in-memory collection that understands a handful of methods.
pub struct Memory {
    name: String,
    documents: RefCell<Vec<Document>>,
    next_id: Cell<i64>,
}

#[allow(dead_code)]
impl Memory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            documents: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.borrow().clone()
    }

    fn store(&self, doc: &mut Document) {
        if !doc.contains_key("_id") {
            doc.insert("_id", self.next_id.get());
            self.next_id.set(self.next_id.get() + 1);
        }
        self.documents.borrow_mut().push(doc.clone());
    }

    fn matches(doc: &Document, filter: &Document) -> bool {
        filter.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

impl Collection for Memory {
    type Error = MemoryError;

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, method: &str, args: Vec<Bson>) -> Result<Bson, Self::Error> {
        let filter = match args.first() {
            Some(Bson::Document(filter)) => filter.clone(),
            None | Some(Bson::Null) => Document::new(),
            Some(v) => return Err(MemoryError(format!("bad filter {}", v))),
        };
        let found = self
            .documents
            .borrow()
            .iter()
            .filter(|doc| Self::matches(doc, &filter))
            .cloned()
            .collect::<Vec<Document>>();
        match method {
            "find" => Ok(Bson::Array(found.into_iter().map(Bson::Document).collect())),
            "count" => Ok(Bson::Int64(found.len() as i64)),
            _ => Err(MemoryError(format!("{} is not supported", method))),
        }
    }

    fn call_insert(
        &self,
        method: &str,
        values: &mut Bson,
        _options: Document,
    ) -> Result<Bson, Self::Error> {
        match (method, values) {
            ("insert", Bson::Document(doc)) | ("save", Bson::Document(doc)) => {
                self.store(doc);
                Ok(Bson::Boolean(true))
            }
            ("insert", Bson::Array(docs)) | ("batchInsert", Bson::Array(docs)) => {
                for doc in docs.iter_mut() {
                    match doc {
                        Bson::Document(doc) => self.store(doc),
                        v => return Err(MemoryError(format!("not a document {}", v))),
                    }
                }
                Ok(Bson::Boolean(true))
            }
            (method, v) => Err(MemoryError(format!("cannot {} {}", method, v))),
        }
    }
}
