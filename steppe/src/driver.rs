//! [`Execution`] over the synchronous `mongodb` driver.

use crate::error::DriverError;
use crate::execution::{Cursor, ExecResult, Execution, Outcome, WriteResult};
use crate::types::Hint;
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::options::{
    CountOptions, DeleteOptions, DistinctOptions, FindOneAndDeleteOptions,
    FindOneAndUpdateOptions, InsertOneOptions, ReadPreference, ReturnDocument,
    SelectionCriteria, UpdateOptions,
};
use mongodb::sync::{Client, Collection, Database};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Runs queries against one collection. Commands without a collection-level
/// driver method (`group`, `mapReduce`, `geoNear`) go through
/// `Database::run_command`.
///
/// Execution options use the server's camelCase names (`writeConcern`,
/// `collation`, `maxTimeMS`, ...) and are read into the driver's options for
/// each action. Keys an action has no option for are ignored.
#[derive(Clone, Debug)]
pub struct MongoExecution {
    client: Client,
    database: Database,
    collection: Collection<Document>,
}

impl MongoExecution {
    pub fn new(client: Client, database: impl AsRef<str>, collection: impl AsRef<str>) -> Self {
        let database = client.database(database.as_ref());
        let collection = database.collection(collection.as_ref());
        Self {
            client,
            database,
            collection,
        }
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    fn run_command(&self, command: Document) -> Result<Document, DriverError> {
        log::debug!("running command on {}: {command}", self.database.name());
        Ok(self.database.run_command(command).run()?)
    }
}

fn results(mut reply: Document, key: &str) -> ExecResult {
    match reply.remove(key) {
        Some(Bson::Array(results)) => Ok(Outcome::Results(results)),
        Some(other) => Err(format!("`{key}` in command reply is not an array: {other}").into()),
        None => Err(format!("command reply has no `{key}`: {reply}").into()),
    }
}

fn take_flag(options: &mut Document, key: &str) -> bool {
    matches!(options.remove(key), Some(Bson::Boolean(true)))
}

/// `maxTimeMS` as a duration. Some driver options only read it under a
/// different name, so it is taken out and set by hand.
fn take_max_time(options: &mut Document) -> Result<Option<Duration>, DriverError> {
    match options.remove("maxTimeMS") {
        None => Ok(None),
        Some(millis) => {
            let millis: u64 = bson::from_bson(millis)?;
            Ok(Some(Duration::from_millis(millis)))
        }
    }
}

fn driver_options<T: DeserializeOwned>(options: Document) -> Result<T, DriverError> {
    Ok(bson::from_document(options)?)
}

/// Database (when not the current one) and collection a non-inline
/// map-reduce writes to.
fn out_collection(out: &Bson) -> Option<(Option<&str>, &str)> {
    match out {
        Bson::String(name) => Some((None, name.as_str())),
        Bson::Document(out) if !out.contains_key("inline") => {
            let name = out.iter().find_map(|(action, target)| match (action.as_str(), target) {
                ("replace" | "merge" | "reduce", Bson::String(name)) => Some(name.as_str()),
                _ => None,
            })?;
            Some((out.get_str("db").ok(), name))
        }
        _ => None,
    }
}

impl Execution for MongoExecution {
    fn find(&self, filter: &Document, projection: Option<&Document>) -> ExecResult {
        Ok(Outcome::Cursor(Box::new(MongoCursor::new(
            self.collection.clone(),
            filter.clone(),
            projection.cloned(),
        ))))
    }

    fn find_and_update(
        &self,
        filter: &Document,
        update: &Document,
        mut options: Document,
    ) -> ExecResult {
        let return_document = if take_flag(&mut options, "new") {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        };
        let max_time = take_max_time(&mut options)?;
        rename_fields(&mut options);

        let mut options: FindOneAndUpdateOptions = driver_options(options)?;
        options.return_document = Some(return_document);
        options.max_time = max_time.or(options.max_time);

        let document = self
            .collection
            .find_one_and_update(filter.clone(), update.clone())
            .with_options(options)
            .run()?;

        Ok(Outcome::Document(document))
    }

    fn find_and_remove(&self, filter: &Document, mut options: Document) -> ExecResult {
        let max_time = take_max_time(&mut options)?;
        rename_fields(&mut options);

        let mut options: FindOneAndDeleteOptions = driver_options(options)?;
        options.max_time = max_time.or(options.max_time);

        let document = self
            .collection
            .find_one_and_delete(filter.clone())
            .with_options(options)
            .run()?;

        Ok(Outcome::Document(document))
    }

    fn insert(&self, document: &Document, options: Document) -> ExecResult {
        let options: InsertOneOptions = driver_options(options)?;
        let inserted = self
            .collection
            .insert_one(document.clone())
            .with_options(options)
            .run()?;

        Ok(Outcome::Write(WriteResult {
            inserted_id: Some(inserted.inserted_id),
            ..WriteResult::default()
        }))
    }

    fn update(&self, filter: &Document, update: &Document, mut options: Document) -> ExecResult {
        let multiple = take_flag(&mut options, "multiple");
        let options: UpdateOptions = driver_options(options)?;

        let updated = if multiple {
            self.collection
                .update_many(filter.clone(), update.clone())
                .with_options(options)
                .run()?
        } else {
            self.collection
                .update_one(filter.clone(), update.clone())
                .with_options(options)
                .run()?
        };

        Ok(Outcome::Write(WriteResult {
            matched: updated.matched_count,
            modified: updated.modified_count,
            upserted_id: updated.upserted_id,
            ..WriteResult::default()
        }))
    }

    fn remove(&self, filter: &Document, options: Document) -> ExecResult {
        let options: DeleteOptions = driver_options(options)?;
        let deleted = self
            .collection
            .delete_many(filter.clone())
            .with_options(options)
            .run()?;

        Ok(Outcome::Write(WriteResult {
            deleted: deleted.deleted_count,
            ..WriteResult::default()
        }))
    }

    fn group(
        &self,
        keys: &Bson,
        initial: &Document,
        reduce: Option<&Bson>,
        options: Document,
    ) -> ExecResult {
        let mut group = doc! { "ns": self.collection.name() };
        match keys {
            Bson::JavaScriptCode(_) => group.insert("$keyf", keys.clone()),
            _ => group.insert("key", keys.clone()),
        };
        group.insert("initial", initial.clone());
        if let Some(reduce) = reduce {
            group.insert("$reduce", reduce.clone());
        }
        group.extend(options);

        results(self.run_command(doc! { "group": group })?, "retval")
    }

    fn map_reduce(
        &self,
        map: &Bson,
        reduce: Option<&Bson>,
        out: &Bson,
        filter: &Document,
        options: Document,
    ) -> ExecResult {
        let mut command = doc! { "mapReduce": self.collection.name(), "map": map.clone() };
        if let Some(reduce) = reduce {
            command.insert("reduce", reduce.clone());
        }
        command.insert("out", out.clone());
        command.insert("query", filter.clone());
        command.extend(options);

        let reply = self.run_command(command)?;
        let collection = match out_collection(out) {
            None => return results(reply, "results"),
            Some((Some(database), name)) => self.client.database(database).collection(name),
            Some((None, name)) => self.database.collection(name),
        };

        Ok(Outcome::Cursor(Box::new(MongoCursor::new(
            collection,
            Document::new(),
            None,
        ))))
    }

    fn distinct(&self, field: &str, filter: &Document, options: Document) -> ExecResult {
        let options: DistinctOptions = driver_options(options)?;
        let values = self
            .collection
            .distinct(field, filter.clone())
            .with_options(options)
            .run()?;

        Ok(Outcome::Results(values))
    }

    fn geo_near(&self, near: &Bson, filter: &Document, options: Document) -> ExecResult {
        let mut command = doc! {
            "geoNear": self.collection.name(),
            "near": near.clone(),
            "query": filter.clone(),
        };
        command.extend(options);

        results(self.run_command(command)?, "results")
    }

    fn count(&self, filter: &Document, mut options: Document) -> ExecResult {
        let max_time = take_max_time(&mut options)?;
        let mut options: CountOptions = driver_options(options)?;
        options.max_time = max_time.or(options.max_time);

        let count = self
            .collection
            .count_documents(filter.clone())
            .with_options(options)
            .run()?;

        Ok(Outcome::Count(count))
    }
}

/// Find-and-modify takes its projection as `projection`, not `fields`.
fn rename_fields(options: &mut Document) {
    if let Some(fields) = options.remove("fields") {
        options.insert("projection", fields);
    }
}

/// A find that is only sent to the server on the first `next()`, so shaping
/// calls can still change it.
pub struct MongoCursor {
    collection: Collection<Document>,
    filter: Document,
    projection: Option<Document>,
    limit: Option<i64>,
    skip: Option<u64>,
    sort: Option<Document>,
    hint: Option<Hint>,
    immortal: bool,
    slave_okay: bool,
    cursor: Option<mongodb::sync::Cursor<Document>>,
    exhausted: bool,
}

impl MongoCursor {
    fn new(collection: Collection<Document>, filter: Document, projection: Option<Document>) -> Self {
        Self {
            collection,
            filter,
            projection,
            limit: None,
            skip: None,
            sort: None,
            hint: None,
            immortal: false,
            slave_okay: false,
            cursor: None,
            exhausted: false,
        }
    }

    fn open(&self) -> mongodb::error::Result<mongodb::sync::Cursor<Document>> {
        log::debug!(
            "find on {}: filter {}, limit {:?}, skip {:?}",
            self.collection.name(),
            self.filter,
            self.limit,
            self.skip
        );

        let mut action = self.collection.find(self.filter.clone());
        if let Some(limit) = self.limit {
            action = action.limit(limit);
        }
        if let Some(skip) = self.skip {
            action = action.skip(skip);
        }
        if let Some(sort) = &self.sort {
            action = action.sort(sort.clone());
        }
        if let Some(projection) = &self.projection {
            action = action.projection(projection.clone());
        }
        if let Some(hint) = &self.hint {
            action = action.hint(match hint {
                Hint::Name(name) => mongodb::options::Hint::Name(name.clone()),
                Hint::Keys(keys) => mongodb::options::Hint::Keys(keys.clone()),
            });
        }
        if self.immortal {
            action = action.no_cursor_timeout(true);
        }
        if self.slave_okay {
            action = action.selection_criteria(SelectionCriteria::ReadPreference(
                ReadPreference::SecondaryPreferred {
                    options: Default::default(),
                },
            ));
        }

        action.run()
    }
}

impl Iterator for MongoCursor {
    type Item = Result<Document, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        if self.cursor.is_none() {
            match self.open() {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(error) => {
                    self.exhausted = true;
                    return Some(Err(error.into()));
                }
            }
        }

        let next = self.cursor.as_mut()?.next();
        if next.is_none() {
            self.exhausted = true;
        }
        next.map(|row| row.map_err(Into::into))
    }
}

impl Cursor for MongoCursor {
    fn limit(&mut self, limit: i64) {
        self.limit = Some(limit);
    }

    fn skip(&mut self, skip: u64) {
        self.skip = Some(skip);
    }

    fn sort(&mut self, sort: &Document) {
        self.sort = Some(sort.clone());
    }

    fn immortal(&mut self, immortal: bool) {
        self.immortal = immortal;
    }

    fn slave_okay(&mut self, slave_okay: bool) {
        self.slave_okay = slave_okay;
    }

    fn snapshot(&mut self) {
        log::debug!("snapshot mode is not supported by the server, ignoring");
    }

    /// The driver takes a single hint, so the last one wins.
    fn hint(&mut self, hint: &Hint) {
        self.hint = Some(hint.clone());
    }
}
