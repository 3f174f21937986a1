#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use steppe::bson::{Bson, Document, doc};
use steppe::{Cursor, DriverError, ExecResult, Execution, Hint, Outcome, WriteResult};

/// One collaborator call, its arguments flattened into a document.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub args: Document,
}

/// Records every call and answers from a fixed set of rows.
#[derive(Default)]
pub struct MockExecution {
    calls: RefCell<Vec<Call>>,
    cursor_log: Rc<RefCell<Vec<String>>>,
    rows: Vec<Document>,
    failure: Option<String>,
    scalars: bool,
    lists: bool,
}

impl MockExecution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Document>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_owned()),
            ..Self::default()
        }
    }

    /// Every call answers with a count, whatever the operation.
    pub fn answering_scalars() -> Self {
        Self {
            scalars: true,
            ..Self::default()
        }
    }

    /// Every call answers with the rows as a materialized list.
    pub fn answering_lists(rows: Vec<Document>) -> Self {
        Self {
            rows,
            lists: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn last_call(&self) -> Call {
        self.calls.borrow().last().cloned().expect("no call recorded")
    }

    /// Shaping calls and fetches seen by cursors handed out so far.
    pub fn cursor_log(&self) -> Vec<String> {
        self.cursor_log.borrow().clone()
    }

    pub fn fetches(&self) -> usize {
        self.cursor_log
            .borrow()
            .iter()
            .filter(|entry| *entry == "fetch")
            .count()
    }

    fn record(&self, method: &'static str, args: Document) -> Option<ExecResult> {
        self.calls.borrow_mut().push(Call { method, args });

        if let Some(message) = &self.failure {
            return Some(Err(message.clone().into()));
        }
        if self.scalars {
            return Some(Ok(Outcome::Count(0)));
        }
        if self.lists {
            return Some(Ok(self.results()));
        }
        None
    }

    fn cursor(&self) -> Outcome {
        Outcome::Cursor(Box::new(VecCursor {
            rows: self.rows.clone().into_iter(),
            log: self.cursor_log.clone(),
        }))
    }

    fn results(&self) -> Outcome {
        Outcome::Results(self.rows.iter().cloned().map(Bson::Document).collect())
    }
}

impl Execution for MockExecution {
    fn find(&self, filter: &Document, projection: Option<&Document>) -> ExecResult {
        let args = doc! { "filter": filter.clone(), "projection": projection.cloned() };
        self.record("find", args).unwrap_or_else(|| Ok(self.cursor()))
    }

    fn find_and_update(
        &self,
        filter: &Document,
        update: &Document,
        options: Document,
    ) -> ExecResult {
        let args = doc! { "filter": filter.clone(), "update": update.clone(), "options": options };
        self.record("find_and_update", args)
            .unwrap_or_else(|| Ok(Outcome::Document(self.rows.first().cloned())))
    }

    fn find_and_remove(&self, filter: &Document, options: Document) -> ExecResult {
        let args = doc! { "filter": filter.clone(), "options": options };
        self.record("find_and_remove", args)
            .unwrap_or_else(|| Ok(Outcome::Document(self.rows.first().cloned())))
    }

    fn insert(&self, document: &Document, options: Document) -> ExecResult {
        let args = doc! { "document": document.clone(), "options": options };
        self.record("insert", args).unwrap_or_else(|| {
            Ok(Outcome::Write(WriteResult {
                inserted_id: Some(Bson::Int32(1)),
                ..WriteResult::default()
            }))
        })
    }

    fn update(&self, filter: &Document, update: &Document, options: Document) -> ExecResult {
        let args = doc! { "filter": filter.clone(), "update": update.clone(), "options": options };
        self.record("update", args).unwrap_or_else(|| {
            Ok(Outcome::Write(WriteResult {
                matched: 1,
                modified: 1,
                ..WriteResult::default()
            }))
        })
    }

    fn remove(&self, filter: &Document, options: Document) -> ExecResult {
        let args = doc! { "filter": filter.clone(), "options": options };
        self.record("remove", args).unwrap_or_else(|| {
            Ok(Outcome::Write(WriteResult {
                deleted: self.rows.len() as u64,
                ..WriteResult::default()
            }))
        })
    }

    fn group(
        &self,
        keys: &Bson,
        initial: &Document,
        reduce: Option<&Bson>,
        options: Document,
    ) -> ExecResult {
        let args = doc! {
            "keys": keys.clone(),
            "initial": initial.clone(),
            "reduce": reduce.cloned(),
            "options": options,
        };
        self.record("group", args).unwrap_or_else(|| Ok(self.results()))
    }

    fn map_reduce(
        &self,
        map: &Bson,
        reduce: Option<&Bson>,
        out: &Bson,
        filter: &Document,
        options: Document,
    ) -> ExecResult {
        let inline = matches!(out, Bson::Document(out) if out.contains_key("inline"));
        let args = doc! {
            "map": map.clone(),
            "reduce": reduce.cloned(),
            "out": out.clone(),
            "filter": filter.clone(),
            "options": options,
        };
        self.record("map_reduce", args).unwrap_or_else(|| {
            Ok(if inline { self.results() } else { self.cursor() })
        })
    }

    fn distinct(&self, field: &str, filter: &Document, options: Document) -> ExecResult {
        let args = doc! { "field": field, "filter": filter.clone(), "options": options };
        self.record("distinct", args).unwrap_or_else(|| {
            Ok(Outcome::Results(
                self.rows.iter().filter_map(|row| row.get(field).cloned()).collect(),
            ))
        })
    }

    fn geo_near(&self, near: &Bson, filter: &Document, options: Document) -> ExecResult {
        let args = doc! { "near": near.clone(), "filter": filter.clone(), "options": options };
        self.record("geo_near", args).unwrap_or_else(|| Ok(self.results()))
    }

    fn count(&self, filter: &Document, options: Document) -> ExecResult {
        let args = doc! { "filter": filter.clone(), "options": options };
        self.record("count", args)
            .unwrap_or_else(|| Ok(Outcome::Count(self.rows.len() as u64)))
    }
}

/// Cursor over fixed rows that logs shaping calls and fetches.
pub struct VecCursor {
    rows: std::vec::IntoIter<Document>,
    log: Rc<RefCell<Vec<String>>>,
}

impl VecCursor {
    fn log(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl Iterator for VecCursor {
    type Item = Result<Document, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        self.log("fetch".to_owned());
        Some(Ok(row))
    }
}

impl Cursor for VecCursor {
    fn limit(&mut self, limit: i64) {
        self.log(format!("limit {limit}"));
    }

    fn skip(&mut self, skip: u64) {
        self.log(format!("skip {skip}"));
    }

    fn sort(&mut self, sort: &Document) {
        self.log(format!("sort {sort}"));
    }

    fn immortal(&mut self, immortal: bool) {
        self.log(format!("immortal {immortal}"));
    }

    fn slave_okay(&mut self, slave_okay: bool) {
        self.log(format!("slave_okay {slave_okay}"));
    }

    fn snapshot(&mut self) {
        self.log("snapshot".to_owned());
    }

    fn hint(&mut self, hint: &Hint) {
        self.log(format!("hint {}", Bson::from(hint.clone())));
    }
}

pub fn people() -> Vec<Document> {
    vec![
        doc! { "name": "alice", "city": "Ulaanbaatar" },
        doc! { "name": "bayar", "city": "Erdenet" },
        doc! { "name": "chinua", "city": "Ulaanbaatar" },
    ]
}
