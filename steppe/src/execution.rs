use crate::error::{DriverError, Result};
use crate::types::Hint;
use mongodb::bson::{self, Bson, Document};
use serde::de::DeserializeOwned;

pub type ExecResult = std::result::Result<Outcome, DriverError>;

/// Result of a write operation, as reported by the collaborator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteResult {
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted_id: Option<Bson>,
    pub inserted_id: Option<Bson>,
}

/// A server-side cursor. Shaping calls are made before the first document is
/// pulled.
pub trait Cursor: Iterator<Item = std::result::Result<Document, DriverError>> {
    fn limit(&mut self, limit: i64);
    fn skip(&mut self, skip: u64);
    fn sort(&mut self, sort: &Document);
    fn immortal(&mut self, immortal: bool);
    fn slave_okay(&mut self, slave_okay: bool);
    fn snapshot(&mut self);
    fn hint(&mut self, hint: &Hint);
}

/// Whatever a collaborator call produced.
pub enum Outcome {
    Cursor(Box<dyn Cursor>),
    /// An already materialized list, e.g. inline map-reduce or distinct values.
    Results(Vec<Bson>),
    Document(Option<Document>),
    Write(WriteResult),
    Count(u64),
}

impl Outcome {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Cursor(_) => "a cursor",
            Self::Results(_) => "a result list",
            Self::Document(_) => "a document",
            Self::Write(_) => "a write result",
            Self::Count(_) => "a count",
        }
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, Self::Cursor(_) | Self::Results(_))
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(document) => document,
            _ => None,
        }
    }

    pub fn into_write(self) -> Option<WriteResult> {
        match self {
            Self::Write(write) => Some(write),
            _ => None,
        }
    }

    pub fn into_count(self) -> Option<u64> {
        match self {
            Self::Count(count) => Some(count),
            _ => None,
        }
    }

    /// Deserializes a single-document outcome into `T`.
    pub fn deserialize_document<T: DeserializeOwned>(self) -> Result<Option<T>> {
        self.into_document()
            .map(|document| bson::from_document(document))
            .transpose()
            .map_err(Into::into)
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cursor(_) => f.write_str("Cursor(..)"),
            Self::Results(results) => f.debug_tuple("Results").field(results).finish(),
            Self::Document(document) => f.debug_tuple("Document").field(document).finish(),
            Self::Write(write) => f.debug_tuple("Write").field(write).finish(),
            Self::Count(count) => f.debug_tuple("Count").field(count).finish(),
        }
    }
}

/// The database collaborator a [`Query`](crate::Query) dispatches to. One
/// method per operation; `options` always carries the caller's execution
/// options merged with the query-specific keys.
pub trait Execution {
    fn find(&self, filter: &Document, projection: Option<&Document>) -> ExecResult;

    fn find_and_update(&self, filter: &Document, update: &Document, options: Document)
    -> ExecResult;

    fn find_and_remove(&self, filter: &Document, options: Document) -> ExecResult;

    fn insert(&self, document: &Document, options: Document) -> ExecResult;

    fn update(&self, filter: &Document, update: &Document, options: Document) -> ExecResult;

    fn remove(&self, filter: &Document, options: Document) -> ExecResult;

    fn group(
        &self,
        keys: &Bson,
        initial: &Document,
        reduce: Option<&Bson>,
        options: Document,
    ) -> ExecResult;

    fn map_reduce(
        &self,
        map: &Bson,
        reduce: Option<&Bson>,
        out: &Bson,
        filter: &Document,
        options: Document,
    ) -> ExecResult;

    fn distinct(&self, field: &str, filter: &Document, options: Document) -> ExecResult;

    fn geo_near(&self, near: &Bson, filter: &Document, options: Document) -> ExecResult;

    fn count(&self, filter: &Document, options: Document) -> ExecResult;
}
