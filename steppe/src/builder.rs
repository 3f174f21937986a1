use crate::error::{Error, Result};
use crate::execution::Execution;
use crate::expr::Expr;
use crate::query::Query;
use crate::types::{CurrentDateType, Hint, Operand, Order, Point};
use mongodb::bson::{Bson, Document, doc};
use std::fmt::Display;

/// The eleven operations a [`Builder`] can describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Find,
    FindAndUpdate,
    FindAndRemove,
    Insert,
    Update,
    Remove,
    Group,
    MapReduce,
    Distinct,
    GeoNear,
    Count,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::FindAndUpdate => "findAndUpdate",
            Self::FindAndRemove => "findAndRemove",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Group => "group",
            Self::MapReduce => "mapReduce",
            Self::Distinct => "distinct",
            Self::GeoNear => "geoNear",
            Self::Count => "count",
        }
    }

    /// Kinds whose result can be walked with [`Query::iter`].
    pub fn is_iterable(self) -> bool {
        matches!(
            self,
            Self::Find | Self::Group | Self::MapReduce | Self::Distinct | Self::GeoNear
        )
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupSpec {
    pub keys: Bson,
    pub initial: Document,
    pub reduce: Option<Bson>,
    pub options: Document,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapReduceSpec {
    pub map: Bson,
    pub reduce: Option<Bson>,
    pub out: Bson,
    pub options: Document,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoNearSpec {
    pub near: Bson,
    pub spherical: bool,
    pub distance_multiplier: Option<f64>,
    pub max_distance: Option<f64>,
    pub min_distance: Option<f64>,
}

/// The selected operation together with the fields only that operation uses.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Operation {
    #[default]
    Find,
    FindAndUpdate,
    FindAndRemove,
    Insert,
    Update,
    Remove,
    Group(GroupSpec),
    MapReduce(MapReduceSpec),
    Distinct(String),
    GeoNear(GeoNearSpec),
    Count,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Find => OperationKind::Find,
            Self::FindAndUpdate => OperationKind::FindAndUpdate,
            Self::FindAndRemove => OperationKind::FindAndRemove,
            Self::Insert => OperationKind::Insert,
            Self::Update => OperationKind::Update,
            Self::Remove => OperationKind::Remove,
            Self::Group(_) => OperationKind::Group,
            Self::MapReduce(_) => OperationKind::MapReduce,
            Self::Distinct(_) => OperationKind::Distinct,
            Self::GeoNear(_) => OperationKind::GeoNear,
            Self::Count => OperationKind::Count,
        }
    }
}

/// Settings applied to cursors returned by find and map-reduce. Accepted for
/// every operation, ignored by the ones that don't produce a cursor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CursorOptions {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub sort: Document,
    pub hints: Vec<Hint>,
    pub slave_okay: Option<bool>,
    pub immortal: bool,
    pub snapshot: bool,
    pub eager: bool,
}

fn js(code: impl Into<String>) -> Bson {
    Bson::JavaScriptCode(code.into())
}

macro_rules! forward {
    ($( $(#[$meta:meta])* fn $name:ident(&mut self $(, $arg:ident: $ty:ty)*); )*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self $(, $arg: $ty)*) -> &mut Self {
                self.expr.$name($($arg),*);
                self
            }
        )*
    };
}

macro_rules! try_forward {
    ($( $(#[$meta:meta])* fn $name:ident(&mut self $(, $arg:ident: $ty:ty)*); )*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self $(, $arg: $ty)*) -> Result<&mut Self> {
                self.expr.$name($($arg),*)?;
                Ok(self)
            }
        )*
    };
}

/// Fluent description of one database operation.
///
/// A builder starts out as a find. Calling a type selector such as
/// [`update`](Builder::update) or [`group`](Builder::group) switches the
/// operation while keeping every criterion added so far. Cloning a builder
/// copies its criteria, so clones can be extended independently.
///
/// ```
/// use steppe::Builder;
///
/// let mut qb = Builder::new();
/// qb.field("username").equals("alice")?;
/// qb.update().field("hits").inc(1)?.upsert(true);
/// # Ok::<(), steppe::Error>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Builder {
    operation: Operation,
    expr: Expr,
    cursor: CursorOptions,
    select: Option<Document>,
    upsert: bool,
    multiple: bool,
    new: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh expression for composing `$push` modifiers, `$elemMatch`,
    /// `$or` clauses and the like.
    pub fn expr() -> Expr {
        Expr::new()
    }

    pub fn get_query<'a>(&self, execution: &'a dyn Execution) -> Query<'a> {
        self.get_query_with_options(execution, Document::new())
    }

    /// Snapshots the builder. `options` are handed to every collaborator call
    /// that accepts options; query-specific keys take precedence.
    pub fn get_query_with_options<'a>(
        &self,
        execution: &'a dyn Execution,
        options: Document,
    ) -> Query<'a> {
        Query::new(execution, self.clone(), options)
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn query_array(&self) -> &Document {
        self.expr.query()
    }

    pub fn new_obj(&self) -> &Document {
        self.expr.new_obj()
    }

    pub fn set_query_array(&mut self, query: Document) -> &mut Self {
        self.expr.set_query(query);
        self
    }

    pub fn set_new_obj(&mut self, new_obj: Document) -> &mut Self {
        self.expr.set_new_obj(new_obj);
        self
    }

    pub fn cursor_options(&self) -> &CursorOptions {
        &self.cursor
    }

    pub fn projection(&self) -> Option<&Document> {
        self.select.as_ref()
    }

    pub fn is_upsert(&self) -> bool {
        self.upsert
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    pub fn is_return_new(&self) -> bool {
        self.new
    }

    // type selectors

    pub fn find(&mut self) -> &mut Self {
        self.select_operation(Operation::Find)
    }

    pub fn find_and_update(&mut self) -> &mut Self {
        self.select_operation(Operation::FindAndUpdate)
    }

    pub fn find_and_remove(&mut self) -> &mut Self {
        self.select_operation(Operation::FindAndRemove)
    }

    pub fn insert(&mut self) -> &mut Self {
        self.select_operation(Operation::Insert)
    }

    pub fn update(&mut self) -> &mut Self {
        self.select_operation(Operation::Update)
    }

    pub fn update_one(&mut self) -> &mut Self {
        self.multiple = false;
        self.select_operation(Operation::Update)
    }

    pub fn update_many(&mut self) -> &mut Self {
        self.multiple = true;
        self.select_operation(Operation::Update)
    }

    pub fn remove(&mut self) -> &mut Self {
        self.select_operation(Operation::Remove)
    }

    pub fn count(&mut self) -> &mut Self {
        self.select_operation(Operation::Count)
    }

    pub fn distinct(&mut self, field: impl Into<String>) -> &mut Self {
        self.select_operation(Operation::Distinct(field.into()))
    }

    /// Switches to a `group` command. `keys` is either a key document or a
    /// JavaScript key function; `reduce` may also be supplied later through
    /// [`reduce`](Builder::reduce).
    pub fn group(
        &mut self,
        keys: impl Into<Bson>,
        initial: Document,
        reduce: Option<&str>,
        options: Document,
    ) -> &mut Self {
        self.select_operation(Operation::Group(GroupSpec {
            keys: keys.into(),
            initial,
            reduce: reduce.map(js),
            options,
        }))
    }

    /// Switches to map-reduce with inline output and no options; see
    /// [`map_reduce`](Builder::map_reduce) for the full form.
    pub fn map(&mut self, map: impl Into<String>) -> &mut Self {
        self.select_operation(Operation::MapReduce(MapReduceSpec {
            map: js(map),
            reduce: None,
            out: Bson::Document(doc! { "inline": true }),
            options: Document::new(),
        }))
    }

    pub fn map_reduce(
        &mut self,
        map: impl Into<String>,
        reduce: impl Into<String>,
        out: Option<Bson>,
        options: Document,
    ) -> &mut Self {
        self.select_operation(Operation::MapReduce(MapReduceSpec {
            map: js(map),
            reduce: Some(js(reduce)),
            out: out.map_or_else(|| Bson::Document(doc! { "inline": true }), map_reduce_out),
            options,
        }))
    }

    /// Switches to a `geoNear` command. A GeoJSON point turns `spherical` on.
    pub fn geo_near(&mut self, near: impl Into<Point>) -> &mut Self {
        let near = near.into();
        let spherical = near.is_geojson();

        self.select_operation(Operation::GeoNear(GeoNearSpec {
            near: near.into(),
            spherical,
            distance_multiplier: None,
            max_distance: None,
            min_distance: None,
        }))
    }

    fn select_operation(&mut self, operation: Operation) -> &mut Self {
        self.operation = operation;
        self
    }

    // operation-specific settings

    pub fn reduce(&mut self, reduce: impl Into<String>) -> Result<&mut Self> {
        match &mut self.operation {
            Operation::MapReduce(spec) => spec.reduce = Some(js(reduce)),
            Operation::Group(spec) => spec.reduce = Some(js(reduce)),
            other => {
                return Err(Error::UnsupportedOperation {
                    method: "reduce",
                    operation: other.kind(),
                    requirement: "call map_reduce(), map() or group() first",
                });
            }
        }

        Ok(self)
    }

    pub fn finalize(&mut self, finalize: impl Into<String>) -> Result<&mut Self> {
        let options = match &mut self.operation {
            Operation::MapReduce(spec) => &mut spec.options,
            Operation::Group(spec) => &mut spec.options,
            other => {
                return Err(Error::UnsupportedOperation {
                    method: "finalize",
                    operation: other.kind(),
                    requirement: "call map_reduce(), map() or group() first",
                });
            }
        };
        options.insert("finalize", js(finalize));

        Ok(self)
    }

    /// Output target of a map-reduce. A bare collection name becomes
    /// `{ replace: name }`.
    pub fn out(&mut self, out: impl Into<Bson>) -> Result<&mut Self> {
        self.map_reduce_spec("out")?.out = map_reduce_out(out.into());
        Ok(self)
    }

    pub fn map_reduce_options(&mut self, options: Document) -> Result<&mut Self> {
        self.map_reduce_spec("map_reduce_options")?.options = options;
        Ok(self)
    }

    fn map_reduce_spec(&mut self, method: &'static str) -> Result<&mut MapReduceSpec> {
        match &mut self.operation {
            Operation::MapReduce(spec) => Ok(spec),
            other => Err(Error::UnsupportedOperation {
                method,
                operation: other.kind(),
                requirement: "call map_reduce() or map() first",
            }),
        }
    }

    pub fn spherical(&mut self, spherical: bool) -> Result<&mut Self> {
        self.geo_near_spec("spherical")?.spherical = spherical;
        Ok(self)
    }

    pub fn distance_multiplier(&mut self, multiplier: f64) -> Result<&mut Self> {
        self.geo_near_spec("distance_multiplier")?.distance_multiplier = Some(multiplier);
        Ok(self)
    }

    fn geo_near_spec(&mut self, method: &'static str) -> Result<&mut GeoNearSpec> {
        match &mut self.operation {
            Operation::GeoNear(spec) => Ok(spec),
            other => Err(Error::UnsupportedOperation {
                method,
                operation: other.kind(),
                requirement: "call geo_near() first",
            }),
        }
    }

    /// For a `geoNear` command this sets the command option; otherwise it adds
    /// `$maxDistance` to the `$near`/`$nearSphere` criteria of the current field.
    pub fn max_distance(&mut self, distance: f64) -> Result<&mut Self> {
        if let Operation::GeoNear(spec) = &mut self.operation {
            spec.max_distance = Some(distance);
        } else {
            self.expr.max_distance(distance)?;
        }

        Ok(self)
    }

    pub fn min_distance(&mut self, distance: f64) -> Result<&mut Self> {
        if let Operation::GeoNear(spec) = &mut self.operation {
            spec.min_distance = Some(distance);
        } else {
            self.expr.min_distance(distance)?;
        }

        Ok(self)
    }

    pub fn upsert(&mut self, upsert: bool) -> &mut Self {
        self.upsert = upsert;
        self
    }

    pub fn multiple(&mut self, multiple: bool) -> &mut Self {
        self.multiple = multiple;
        self
    }

    pub fn return_new(&mut self, new: bool) -> &mut Self {
        self.new = new;
        self
    }

    // cursor shaping

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.cursor.limit = Some(limit);
        self
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.cursor.skip = Some(skip);
        self
    }

    pub fn sort(&mut self, field: impl Into<String>, order: impl Into<Order>) -> &mut Self {
        let field: String = field.into();
        let order: Order = order.into();
        self.cursor.sort.insert(field, order);
        self
    }

    /// Sorts by a `$meta` value, projecting it as well unless the field is
    /// already part of the projection.
    pub fn sort_meta(&mut self, field: impl Into<String>, keyword: impl Into<String>) -> &mut Self {
        let field = field.into();
        let keyword = keyword.into();

        if !self.select.as_ref().is_some_and(|select| select.contains_key(&field)) {
            self.select_meta(field.clone(), keyword.clone());
        }
        self.cursor.sort.insert(field, doc! { "$meta": keyword });
        self
    }

    pub fn hint(&mut self, hint: impl Into<Hint>) -> &mut Self {
        self.cursor.hints.push(hint.into());
        self
    }

    pub fn slave_okay(&mut self, slave_okay: bool) -> &mut Self {
        self.cursor.slave_okay = Some(slave_okay);
        self
    }

    pub fn immortal(&mut self, immortal: bool) -> &mut Self {
        self.cursor.immortal = immortal;
        self
    }

    pub fn snapshot(&mut self, snapshot: bool) -> &mut Self {
        self.cursor.snapshot = snapshot;
        self
    }

    pub fn eager_cursor(&mut self, eager: bool) -> &mut Self {
        self.cursor.eager = eager;
        self
    }

    // projection

    pub fn select<S: Into<String>>(&mut self, fields: impl IntoIterator<Item = S>) -> &mut Self {
        let select = self.select.get_or_insert_with(Document::new);
        for field in fields {
            let field: String = field.into();
            select.insert(field, 1);
        }
        self
    }

    pub fn exclude<S: Into<String>>(&mut self, fields: impl IntoIterator<Item = S>) -> &mut Self {
        let select = self.select.get_or_insert_with(Document::new);
        for field in fields {
            let field: String = field.into();
            select.insert(field, 0);
        }
        self
    }

    /// `$slice` projection: a count, or `skip` and `limit` when both are given.
    pub fn select_slice(
        &mut self,
        field: impl Into<String>,
        count_or_skip: i32,
        limit: Option<i32>,
    ) -> &mut Self {
        let slice = match limit {
            Some(limit) => Bson::Array(vec![count_or_skip.into(), limit.into()]),
            None => Bson::Int32(count_or_skip),
        };
        self.project(field.into(), doc! { "$slice": slice })
    }

    pub fn select_elem_match(
        &mut self,
        field: impl Into<String>,
        criteria: impl Into<Operand>,
    ) -> &mut Self {
        self.project(field.into(), doc! { "$elemMatch": criteria.into().into_bson() })
    }

    pub fn select_meta(&mut self, field: impl Into<String>, keyword: impl Into<String>) -> &mut Self {
        let keyword: String = keyword.into();
        self.project(field.into(), doc! { "$meta": keyword })
    }

    fn project(&mut self, field: String, projection: Document) -> &mut Self {
        self.select
            .get_or_insert_with(Document::new)
            .insert(field, projection);
        self
    }

    // criteria and updates, see `Expr`

    pub fn field(&mut self, field: impl Into<String>) -> &mut Self {
        self.expr.field(field);
        self
    }

    /// `$set` on the current field. Inserts always write the value in place,
    /// whatever `atomic` says.
    pub fn set(&mut self, value: impl Into<Bson>, atomic: bool) -> Result<&mut Self> {
        let atomic = atomic && self.kind() != OperationKind::Insert;
        self.expr.set(value, atomic)?;
        Ok(self)
    }

    forward! {
        fn operator(&mut self, operator: &str, value: impl Into<Bson>);
        fn gt(&mut self, value: impl Into<Bson>);
        fn gte(&mut self, value: impl Into<Bson>);
        fn lt(&mut self, value: impl Into<Bson>);
        fn lte(&mut self, value: impl Into<Bson>);
        fn not_equal(&mut self, value: impl Into<Bson>);
        fn range(&mut self, start: impl Into<Bson>, end: impl Into<Bson>);
        fn exists(&mut self, exists: bool);
        fn size(&mut self, size: i32);
        fn bson_type(&mut self, bson_type: impl Into<Bson>);
        fn modulo(&mut self, divisor: impl Into<Bson>, remainder: impl Into<Bson>);
        fn elem_match(&mut self, criteria: impl Into<Operand>);
        fn not(&mut self, criteria: impl Into<Operand>);
        fn bits_all_clear(&mut self, mask: impl Into<Bson>);
        fn bits_all_set(&mut self, mask: impl Into<Bson>);
        fn bits_any_clear(&mut self, mask: impl Into<Bson>);
        fn bits_any_set(&mut self, mask: impl Into<Bson>);
        fn add_and(&mut self, criteria: impl Into<Operand>);
        fn add_or(&mut self, criteria: impl Into<Operand>);
        fn add_nor(&mut self, criteria: impl Into<Operand>);
        fn js_where(&mut self, javascript: impl Into<String>);
        fn comment(&mut self, comment: impl Into<String>);
        fn text(&mut self, search: impl Into<String>);
        fn near(&mut self, point: impl Into<Point>);
        fn near_sphere(&mut self, point: impl Into<Point>);
        fn geo_within(&mut self, geometry: Document);
        fn geo_within_box(&mut self, x1: f64, y1: f64, x2: f64, y2: f64);
        fn geo_within_center(&mut self, x: f64, y: f64, radius: f64);
        fn geo_within_center_sphere(&mut self, x: f64, y: f64, radius: f64);
        fn geo_intersects(&mut self, geometry: Document);
    }

    pub fn is_in<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.expr.is_in(values);
        self
    }

    pub fn not_in<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.expr.not_in(values);
        self
    }

    pub fn all<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.expr.all(values);
        self
    }

    pub fn pull_all<V: Into<Bson>>(
        &mut self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<&mut Self> {
        self.expr.pull_all(values)?;
        Ok(self)
    }

    pub fn geo_within_polygon(&mut self, points: &[(f64, f64)]) -> Result<&mut Self> {
        self.expr.geo_within_polygon(points)?;
        Ok(self)
    }

    try_forward! {
        fn equals(&mut self, value: impl Into<Bson>);
        fn language(&mut self, language: impl Into<String>);
        fn case_sensitive(&mut self, case_sensitive: bool);
        fn diacritic_sensitive(&mut self, diacritic_sensitive: bool);
        fn set_on_insert(&mut self, value: impl Into<Bson>);
        fn unset(&mut self);
        fn inc(&mut self, value: impl Into<Bson>);
        fn mul(&mut self, value: impl Into<Bson>);
        fn min(&mut self, value: impl Into<Bson>);
        fn max(&mut self, value: impl Into<Bson>);
        fn rename(&mut self, name: impl Into<String>);
        fn push(&mut self, value: impl Into<Operand>);
        fn add_to_set(&mut self, value: impl Into<Operand>);
        fn pull(&mut self, value: impl Into<Operand>);
        fn pop_first(&mut self);
        fn pop_last(&mut self);
        fn current_date(&mut self, date_type: CurrentDateType);
        fn bit_and(&mut self, value: impl Into<Bson>);
        fn bit_or(&mut self, value: impl Into<Bson>);
        fn bit_xor(&mut self, value: impl Into<Bson>);
    }

    /// Renders the whole description as one document, for logging and
    /// debugging. Nothing is executed.
    pub fn debug(&self) -> Document {
        let mut debug = doc! {
            "type": self.kind().as_str(),
            "query": self.query_array().clone(),
            "newObj": self.new_obj().clone(),
        };

        if let Some(select) = &self.select {
            debug.insert("select", select.clone());
        }
        if !self.cursor.sort.is_empty() {
            debug.insert("sort", self.cursor.sort.clone());
        }
        if let Some(limit) = self.cursor.limit {
            debug.insert("limit", limit);
        }
        if let Some(skip) = self.cursor.skip {
            debug.insert("skip", u64_to_bson(skip));
        }
        if !self.cursor.hints.is_empty() {
            let hints: Vec<Bson> = self.cursor.hints.iter().cloned().map(Bson::from).collect();
            debug.insert("hints", hints);
        }
        debug.insert("upsert", self.upsert);
        debug.insert("multiple", self.multiple);
        debug.insert("new", self.new);

        match &self.operation {
            Operation::Group(spec) => {
                debug.insert(
                    "group",
                    doc! {
                        "keys": spec.keys.clone(),
                        "initial": spec.initial.clone(),
                        "reduce": spec.reduce.clone(),
                        "options": spec.options.clone(),
                    },
                );
            }
            Operation::MapReduce(spec) => {
                debug.insert(
                    "mapReduce",
                    doc! {
                        "map": spec.map.clone(),
                        "reduce": spec.reduce.clone(),
                        "out": spec.out.clone(),
                        "options": spec.options.clone(),
                    },
                );
            }
            Operation::Distinct(field) => {
                debug.insert("distinct", field.as_str());
            }
            Operation::GeoNear(spec) => {
                let mut geo_near = doc! { "near": spec.near.clone() };
                geo_near.extend(geo_near_options(spec, None));
                debug.insert("geoNear", geo_near);
            }
            _ => {}
        }

        debug
    }
}

fn map_reduce_out(out: Bson) -> Bson {
    match out {
        Bson::String(collection) => Bson::Document(doc! { "replace": collection }),
        other => other,
    }
}

pub(crate) fn u64_to_bson(value: u64) -> Bson {
    i64::try_from(value).map_or(Bson::Int64(i64::MAX), Bson::Int64)
}

/// Command options of a `geoNear`, `num` coming from the builder's limit.
pub(crate) fn geo_near_options(spec: &GeoNearSpec, num: Option<i64>) -> Document {
    let mut options = doc! { "spherical": spec.spherical };

    if let Some(multiplier) = spec.distance_multiplier {
        options.insert("distanceMultiplier", multiplier);
    }
    if let Some(distance) = spec.max_distance {
        options.insert("maxDistance", distance);
    }
    if let Some(distance) = spec.min_distance {
        options.insert("minDistance", distance);
    }
    if let Some(num) = num {
        options.insert("num", num);
    }

    options
}
