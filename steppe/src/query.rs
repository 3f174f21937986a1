use crate::builder::{Builder, Operation, OperationKind, geo_near_options, u64_to_bson};
use crate::cursor::EagerCursor;
use crate::error::{Error, Result};
use crate::execution::{Cursor, ExecResult, Execution, Outcome};
use mongodb::bson::{self, Bson, Document, doc};
use serde::de::DeserializeOwned;

/// A finalized [`Builder`] bound to an [`Execution`].
///
/// The builder is snapshotted when the query is created, so later changes to
/// the builder do not leak into it.
pub struct Query<'a> {
    execution: &'a dyn Execution,
    builder: Builder,
    options: Document,
    result: Option<Outcome>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(execution: &'a dyn Execution, builder: Builder, options: Document) -> Self {
        Self {
            execution,
            builder,
            options,
            result: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.builder.kind()
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub fn debug(&self) -> Document {
        self.builder.debug()
    }

    /// Runs the operation. Every call reaches the collaborator again; use
    /// [`result`](Query::result) to run it at most once.
    ///
    /// Iterable kinds must get a cursor or a result list back. A find is held
    /// to a cursor, since limit, skip, sort and hints are applied to the
    /// cursor and a plain list would silently drop them.
    pub fn execute(&self) -> Result<Outcome> {
        let kind = self.kind();
        log::debug!("dispatching {kind} query");

        let outcome = self
            .dispatch()
            .map_err(|source| Error::execution(kind, source))?;

        let expected = if kind == OperationKind::Find {
            (!matches!(outcome, Outcome::Cursor(_))).then_some("a cursor")
        } else {
            (kind.is_iterable() && !outcome.is_iterable()).then_some("an iterable result")
        };
        if let Some(expected) = expected {
            return Err(Error::Postcondition {
                operation: kind,
                found: outcome.kind_name(),
                expected,
            });
        }

        Ok(match outcome {
            Outcome::Cursor(cursor) => Outcome::Cursor(self.shape(cursor)),
            other => other,
        })
    }

    /// The outcome of the first [`execute`](Query::execute), cached for the
    /// lifetime of the query.
    pub fn result(&mut self) -> Result<&mut Outcome> {
        let outcome = match self.result.take() {
            Some(outcome) => outcome,
            None => self.execute()?,
        };

        Ok(self.result.insert(outcome))
    }

    /// Rows of a find, group, mapReduce, distinct or geoNear result. Cursor
    /// rows are consumed as they are yielded.
    pub fn iter(&mut self) -> Result<Rows<'_>> {
        let operation = self.kind();
        if !operation.is_iterable() {
            return Err(Error::UnsupportedOperation {
                method: "iter",
                operation,
                requirement: "only find, group, mapReduce, distinct and geoNear results are iterable",
            });
        }

        let source = match self.result()? {
            Outcome::Cursor(cursor) => RowSource::Cursor(cursor),
            Outcome::Results(results) => RowSource::Results(results.iter()),
            other => {
                return Err(Error::Postcondition {
                    operation,
                    found: other.kind_name(),
                    expected: "an iterable result",
                });
            }
        };

        Ok(Rows { operation, source })
    }

    pub fn to_vec(&mut self) -> Result<Vec<Bson>> {
        self.iter()?.collect()
    }

    /// First document of the result.
    ///
    /// Find-and-modify queries return their memoized document. Iterable kinds
    /// run a fresh copy of the query (limited to one row for finds), leaving
    /// the memoized result untouched.
    pub fn single_result(&mut self) -> Result<Option<Bson>> {
        let operation = self.kind();

        match operation {
            OperationKind::FindAndUpdate | OperationKind::FindAndRemove => match self.result()? {
                Outcome::Document(document) => Ok(document.clone().map(Bson::Document)),
                other => Err(Error::Postcondition {
                    operation,
                    found: other.kind_name(),
                    expected: "a document",
                }),
            },
            kind if kind.is_iterable() => {
                let mut builder = self.builder.clone();
                if kind == OperationKind::Find {
                    builder.limit(1);
                }

                let mut query = Query::new(self.execution, builder, self.options.clone());
                let first = query.iter()?.next().transpose();
                first
            }
            _ => Err(Error::UnsupportedOperation {
                method: "single_result",
                operation,
                requirement: "only queries returning documents have a single result",
            }),
        }
    }

    pub fn single_result_as<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        self.single_result()?
            .map(bson::from_bson)
            .transpose()
            .map_err(Into::into)
    }

    fn options(&self, keys: Document) -> Document {
        let mut options = self.options.clone();
        options.extend(keys);
        options
    }

    fn dispatch(&self) -> ExecResult {
        let builder = &self.builder;
        let filter = builder.query_array();
        let cursor = builder.cursor_options();

        match builder.operation() {
            Operation::Find => self.execution.find(filter, builder.projection()),
            Operation::FindAndUpdate => {
                let mut keys = doc! { "new": builder.is_return_new(), "upsert": builder.is_upsert() };
                self.find_and_modify_keys(&mut keys);
                self.execution
                    .find_and_update(filter, builder.new_obj(), self.options(keys))
            }
            Operation::FindAndRemove => {
                let mut keys = Document::new();
                self.find_and_modify_keys(&mut keys);
                self.execution.find_and_remove(filter, self.options(keys))
            }
            Operation::Insert => self
                .execution
                .insert(builder.new_obj(), self.options(Document::new())),
            Operation::Update => {
                let keys = doc! { "upsert": builder.is_upsert(), "multiple": builder.is_multiple() };
                self.execution
                    .update(filter, builder.new_obj(), self.options(keys))
            }
            Operation::Remove => self.execution.remove(filter, self.options(Document::new())),
            Operation::Group(spec) => {
                let mut keys = spec.options.clone();
                if !filter.is_empty() {
                    keys.insert("cond", filter.clone());
                }
                self.execution.group(
                    &spec.keys,
                    &spec.initial,
                    spec.reduce.as_ref(),
                    self.options(keys),
                )
            }
            Operation::MapReduce(spec) => {
                let mut keys = spec.options.clone();
                if let Some(limit) = cursor.limit {
                    keys.insert("limit", limit);
                }
                self.execution.map_reduce(
                    &spec.map,
                    spec.reduce.as_ref(),
                    &spec.out,
                    filter,
                    self.options(keys),
                )
            }
            Operation::Distinct(field) => {
                self.execution
                    .distinct(field, filter, self.options(Document::new()))
            }
            Operation::GeoNear(spec) => {
                let keys = geo_near_options(spec, cursor.limit);
                self.execution.geo_near(&spec.near, filter, self.options(keys))
            }
            Operation::Count => {
                let mut keys = Document::new();
                if let Some(limit) = cursor.limit {
                    keys.insert("limit", limit);
                }
                if let Some(skip) = cursor.skip {
                    keys.insert("skip", u64_to_bson(skip));
                }
                self.execution.count(filter, self.options(keys))
            }
        }
    }

    fn find_and_modify_keys(&self, keys: &mut Document) {
        let sort = &self.builder.cursor_options().sort;
        if !sort.is_empty() {
            keys.insert("sort", sort.clone());
        }
        if let Some(projection) = self.builder.projection() {
            keys.insert("fields", projection.clone());
        }
    }

    fn shape(&self, mut cursor: Box<dyn Cursor>) -> Box<dyn Cursor> {
        let options = self.builder.cursor_options();
        log::trace!("shaping {} cursor: {options:?}", self.kind());

        if let Some(limit) = options.limit {
            cursor.limit(limit);
        }
        if let Some(skip) = options.skip {
            Cursor::skip(cursor.as_mut(), skip);
        }
        if !options.sort.is_empty() {
            cursor.sort(&options.sort);
        }
        if options.immortal {
            cursor.immortal(true);
        }
        if let Some(slave_okay) = options.slave_okay {
            cursor.slave_okay(slave_okay);
        }
        if options.snapshot {
            cursor.snapshot();
        }
        for hint in &options.hints {
            cursor.hint(hint);
        }

        if options.eager {
            Box::new(EagerCursor::new(cursor))
        } else {
            cursor
        }
    }
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("builder", &self.builder)
            .field("options", &self.options)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Iterator over the rows of an iterable [`Query`] result.
pub struct Rows<'q> {
    operation: OperationKind,
    source: RowSource<'q>,
}

enum RowSource<'q> {
    Cursor(&'q mut Box<dyn Cursor>),
    Results(std::slice::Iter<'q, Bson>),
}

impl Iterator for Rows<'_> {
    type Item = Result<Bson>;

    fn next(&mut self) -> Option<Self::Item> {
        let operation = self.operation;
        match &mut self.source {
            RowSource::Cursor(cursor) => cursor.next().map(|row| {
                row.map(Bson::Document)
                    .map_err(|source| Error::execution(operation, source))
            }),
            RowSource::Results(results) => results.next().cloned().map(Ok),
        }
    }
}
