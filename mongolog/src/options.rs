//! Conversions from the option documents callers pass alongside a query into the driver's option
//! types.
//!
//! Unknown keys are ignored, known keys with the wrong type are an
//! [`InvalidArgument`](crate::ErrorKind::InvalidArgument) error.

use std::convert::TryFrom;
use std::time::Duration;

use bson::{Bson, Document};
use mongodb::options::{
    Acknowledgment, CountOptions, DeleteOptions, FindOneOptions, FindOptions, InsertManyOptions,
    InsertOneOptions, ReplaceOptions, UpdateOptions, WriteConcern,
};

use crate::error::invalid_argument;

fn int(options: &Document, key: &str) -> crate::Result<Option<i64>> {
    match options.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(v)) => Ok(Some(i64::from(*v))),
        Some(Bson::Int64(v)) => Ok(Some(*v)),
        Some(Bson::Double(v)) if v.fract() == 0.0 => Ok(Some(*v as i64)),
        Some(v) => Err(invalid_argument(format!(
            "option '{}' must be an integer, got {}",
            key, v
        ))),
    }
}

fn unsigned(options: &Document, key: &str) -> crate::Result<Option<u64>> {
    match int(options, key)? {
        Some(v) if v < 0 => Err(invalid_argument(format!(
            "option '{}' must not be negative",
            key
        ))),
        v => Ok(v.map(|v| v as u64)),
    }
}

fn flag(options: &Document, key: &str) -> crate::Result<Option<bool>> {
    match options.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Boolean(v)) => Ok(Some(*v)),
        Some(Bson::Int32(v)) => Ok(Some(*v != 0)),
        Some(Bson::Int64(v)) => Ok(Some(*v != 0)),
        Some(v) => Err(invalid_argument(format!(
            "option '{}' must be a boolean, got {}",
            key, v
        ))),
    }
}

fn document(options: &Document, key: &str) -> crate::Result<Option<Document>> {
    match options.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(v)) => Ok(Some(v.clone())),
        Some(v) => Err(invalid_argument(format!(
            "option '{}' must be a document, got {}",
            key, v
        ))),
    }
}

/// Reads `w`, `j`/`journal` and `wtimeout`/`wTimeoutMS` into a `WriteConcern`.
///
/// Returns `None` when none of them are set so that the collection's own write concern applies.
pub fn write_concern(options: &Document) -> crate::Result<Option<WriteConcern>> {
    let w = options.get("w");
    let journal = match flag(options, "j")? {
        Some(j) => Some(j),
        None => flag(options, "journal")?,
    };
    let w_timeout = match int(options, "wtimeout")? {
        Some(t) => Some(t),
        None => int(options, "wTimeoutMS")?,
    };
    if w.is_none() && journal.is_none() && w_timeout.is_none() {
        return Ok(None);
    }

    let mut write_concern = WriteConcern::default();
    write_concern.journal = journal;
    if let Some(w) = w {
        let w = match w {
            Bson::Int32(n) if *n >= 0 => Acknowledgment::Nodes(*n as u32),
            Bson::Int64(n) if *n >= 0 => match u32::try_from(*n) {
                Ok(n) => Acknowledgment::Nodes(n),
                Err(_) => {
                    return Err(invalid_argument(format!(
                        "option 'w' is out of range, got {}",
                        n
                    )))
                }
            },
            Bson::String(s) if s == "majority" => Acknowledgment::Majority,
            Bson::String(s) => Acknowledgment::Custom(s.to_owned()),
            v => {
                return Err(invalid_argument(format!(
                    "option 'w' must be a node count or tag, got {}",
                    v
                )))
            }
        };
        write_concern.w = Some(w);
    }
    if let Some(w_timeout) = w_timeout {
        if w_timeout < 0 {
            return Err(invalid_argument("option 'wtimeout' must not be negative"));
        }
        write_concern.w_timeout = Some(Duration::from_millis(w_timeout as u64));
    }
    Ok(Some(write_concern))
}

/// Reads `limit`, `skip` and `sort` into `FindOptions`.
pub fn find(options: &Document, projection: Option<Document>) -> crate::Result<FindOptions> {
    let mut find = FindOptions::default();
    find.limit = int(options, "limit")?;
    find.skip = unsigned(options, "skip")?;
    find.sort = document(options, "sort")?;
    find.projection = projection;
    Ok(find)
}

/// Reads `skip` and `sort` into `FindOneOptions`.
pub fn find_one(options: &Document, projection: Option<Document>) -> crate::Result<FindOneOptions> {
    let mut find = FindOneOptions::default();
    find.skip = unsigned(options, "skip")?;
    find.sort = document(options, "sort")?;
    find.projection = projection;
    Ok(find)
}

/// Reads `limit` and `skip` into `CountOptions`.
pub fn count(options: &Document) -> crate::Result<CountOptions> {
    let mut count = CountOptions::default();
    count.limit = unsigned(options, "limit")?;
    count.skip = unsigned(options, "skip")?;
    Ok(count)
}

/// Reads the write concern into `InsertOneOptions`.
pub fn insert_one(options: &Document) -> crate::Result<InsertOneOptions> {
    let mut insert = InsertOneOptions::default();
    insert.write_concern = write_concern(options)?;
    Ok(insert)
}

/// Reads the write concern and `ordered` (or its inverse `continueOnError`) into
/// `InsertManyOptions`.
pub fn insert_many(options: &Document) -> crate::Result<InsertManyOptions> {
    let mut insert = InsertManyOptions::default();
    insert.write_concern = write_concern(options)?;
    insert.ordered = match flag(options, "ordered")? {
        Some(ordered) => Some(ordered),
        None => flag(options, "continueOnError")?.map(|c| !c),
    };
    Ok(insert)
}

/// Reads the write concern and `upsert` into `UpdateOptions`, along with whether `multiple` (or
/// `multi`) documents should be updated.
pub fn update(options: &Document) -> crate::Result<(bool, UpdateOptions)> {
    let many = match flag(options, "multiple")? {
        Some(many) => many,
        None => flag(options, "multi")?.unwrap_or(false),
    };
    let mut update = UpdateOptions::default();
    update.upsert = flag(options, "upsert")?;
    update.write_concern = write_concern(options)?;
    Ok((many, update))
}

/// Reads the write concern and `upsert` into `ReplaceOptions`.
pub fn replace(options: &Document) -> crate::Result<ReplaceOptions> {
    let mut replace = ReplaceOptions::default();
    replace.upsert = flag(options, "upsert")?;
    replace.write_concern = write_concern(options)?;
    Ok(replace)
}

/// Reads the write concern into `DeleteOptions`, along with whether every matching document
/// should be removed (i.e. `justOne` is not set).
pub fn delete(options: &Document) -> crate::Result<(bool, DeleteOptions)> {
    let many = !flag(options, "justOne")?.unwrap_or(false);
    let mut delete = DeleteOptions::default();
    delete.write_concern = write_concern(options)?;
    Ok((many, delete))
}
