//! Field-by-field construction of filter criteria and update documents.
//!
//! An [`Expr`] holds two documents: the filter (`query`) and the update or
//! insert document (`new_obj`). Methods act on the *current field* selected
//! with [`Expr::field`]; filter operators fall back to the root of the filter
//! when no field is selected, update operators refuse to run without one.

use crate::error::{Error, Result};
use crate::types::{CurrentDateType, Operand, Order, Point};
use mongodb::bson::{Bson, Document, doc};
use std::collections::HashMap;

/// Legacy aliases accepted by `$type`, mapped to their numeric BSON type codes.
const BSON_TYPE_ALIASES: &[(&str, i32)] = &[
    ("double", 1),
    ("string", 2),
    ("object", 3),
    ("array", 4),
    ("binary", 5),
    ("undefined", 6),
    ("objectid", 7),
    ("boolean", 8),
    ("date", 9),
    ("null", 10),
    ("regex", 11),
    ("jscode", 13),
    ("symbol", 14),
    ("jscodewithscope", 15),
    ("integer32", 16),
    ("timestamp", 17),
    ("integer64", 18),
    ("maxkey", 127),
    ("minkey", 255),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NearOperator {
    Near,
    NearSphere,
}

impl NearOperator {
    fn key(self) -> &'static str {
        match self {
            Self::Near => "$near",
            Self::NearSphere => "$nearSphere",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$near" => Some(Self::Near),
            "$nearSphere" => Some(Self::NearSphere),
            _ => None,
        }
    }
}

/// Which proximity operator was applied to a scope, and in which form.
/// `$maxDistance`/`$minDistance` land inside the operator for GeoJSON points
/// and next to it for legacy coordinate pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NearCriteria {
    operator: NearOperator,
    geojson: bool,
}

impl NearCriteria {
    fn new(operator: NearOperator, point: &Bson) -> Self {
        Self {
            operator,
            geojson: matches!(point, Bson::Document(point) if point.contains_key("$geometry")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expr {
    query: Document,
    new_obj: Document,
    current_field: Option<String>,
    text: bool,
    // keyed by field, `None` is the root of the filter
    near: HashMap<Option<String>, NearCriteria>,
}

impl Expr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, field: impl Into<String>) -> &mut Self {
        self.current_field = Some(field.into());
        self
    }

    pub fn current_field(&self) -> Option<&str> {
        self.current_field.as_deref()
    }

    pub fn query(&self) -> &Document {
        &self.query
    }

    pub fn into_query(self) -> Document {
        self.query
    }

    pub fn new_obj(&self) -> &Document {
        &self.new_obj
    }

    /// Replaces the whole filter document.
    pub fn set_query(&mut self, query: Document) -> &mut Self {
        self.query = query;
        self.rescan();
        self
    }

    pub fn set_new_obj(&mut self, new_obj: Document) -> &mut Self {
        self.new_obj = new_obj;
        self
    }

    /// Sets an equality criterion on the current field, overwriting whatever
    /// the field held. Without a current field the value must be a document and
    /// replaces the entire filter.
    pub fn equals(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        let value = value.into();

        if let Some(field) = self.current_field.clone() {
            let near = match &value {
                Bson::Document(criteria) => near_criteria(criteria),
                _ => None,
            };
            match near {
                Some(near) => self.near.insert(Some(field.clone()), near),
                None => self.near.remove(&Some(field.clone())),
            };
            self.query.insert(field, value);
            return Ok(self);
        }

        match value {
            Bson::Document(query) => Ok(self.set_query(query)),
            other => Err(Error::InvalidArgument {
                method: "equals",
                message: format!(
                    "without a current field the value must be a document, got {:?}",
                    other.element_type()
                ),
            }),
        }
    }

    /// Merges `operator: value` into the criteria of the current field (or the
    /// root of the filter). A bare equality value already stored for the field
    /// is first rewritten as `{ $in: [value] }`, so the two criteria combine.
    ///
    /// `$near`, `$nearSphere` and a root `$text` arm the modifiers that depend
    /// on them, whichever method added the operator.
    pub fn operator(&mut self, operator: &str, value: impl Into<Bson>) -> &mut Self {
        self.wrap_equality_criteria();

        let value = value.into();
        if let Some(near) = NearOperator::from_key(operator) {
            self.near
                .insert(self.current_field.clone(), NearCriteria::new(near, &value));
        } else if operator == "$text" && self.current_field.is_none() {
            self.text = matches!(value, Bson::Document(_));
        }

        match self.current_field.clone() {
            Some(field) => {
                document_entry(&mut self.query, &field).insert(operator, value);
            }
            None => {
                self.query.insert(operator, value);
            }
        }

        self
    }

    fn wrap_equality_criteria(&mut self) {
        let Some(field) = self.current_field.as_deref() else {
            return;
        };
        let Some(existing) = self.query.get_mut(field) else {
            return;
        };

        // An empty container reads as "no criteria yet" and is left alone.
        let keep = match &*existing {
            Bson::Document(criteria) => criteria
                .keys()
                .next()
                .is_none_or(|key| key.starts_with('$')),
            Bson::Array(values) => values.is_empty(),
            _ => false,
        };
        if keep {
            return;
        }

        let value = std::mem::replace(existing, Bson::Null);
        *existing = Bson::Document(doc! { "$in": Bson::Array(vec![value]) });
    }

    pub fn gt(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.operator("$gt", value)
    }

    pub fn gte(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.operator("$gte", value)
    }

    pub fn lt(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.operator("$lt", value)
    }

    pub fn lte(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.operator("$lte", value)
    }

    pub fn not_equal(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.operator("$ne", value)
    }

    /// `$gte: start` and `$lt: end`.
    pub fn range(&mut self, start: impl Into<Bson>, end: impl Into<Bson>) -> &mut Self {
        self.operator("$gte", start).operator("$lt", end)
    }

    pub fn is_in<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.operator("$in", array(values))
    }

    pub fn not_in<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.operator("$nin", array(values))
    }

    pub fn all<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.operator("$all", array(values))
    }

    pub fn exists(&mut self, exists: bool) -> &mut Self {
        self.operator("$exists", exists)
    }

    pub fn size(&mut self, size: i32) -> &mut Self {
        self.operator("$size", size)
    }

    /// `$type`. Legacy string aliases such as `"objectid"` are translated to
    /// their numeric codes; anything else is passed through untouched.
    pub fn bson_type(&mut self, bson_type: impl Into<Bson>) -> &mut Self {
        let bson_type = match bson_type.into() {
            Bson::String(alias) => BSON_TYPE_ALIASES
                .iter()
                .find(|(name, _)| *name == alias)
                .map_or(Bson::String(alias), |(_, code)| Bson::Int32(*code)),
            other => other,
        };

        self.operator("$type", bson_type)
    }

    pub fn modulo(&mut self, divisor: impl Into<Bson>, remainder: impl Into<Bson>) -> &mut Self {
        self.operator(
            "$mod",
            Bson::Array(vec![divisor.into(), remainder.into()]),
        )
    }

    pub fn elem_match(&mut self, criteria: impl Into<Operand>) -> &mut Self {
        self.operator("$elemMatch", criteria.into().into_bson())
    }

    pub fn not(&mut self, criteria: impl Into<Operand>) -> &mut Self {
        self.operator("$not", criteria.into().into_bson())
    }

    pub fn bits_all_clear(&mut self, mask: impl Into<Bson>) -> &mut Self {
        self.operator("$bitsAllClear", mask)
    }

    pub fn bits_all_set(&mut self, mask: impl Into<Bson>) -> &mut Self {
        self.operator("$bitsAllSet", mask)
    }

    pub fn bits_any_clear(&mut self, mask: impl Into<Bson>) -> &mut Self {
        self.operator("$bitsAnyClear", mask)
    }

    pub fn bits_any_set(&mut self, mask: impl Into<Bson>) -> &mut Self {
        self.operator("$bitsAnySet", mask)
    }

    pub fn add_and(&mut self, criteria: impl Into<Operand>) -> &mut Self {
        self.add_clause("$and", criteria.into())
    }

    pub fn add_or(&mut self, criteria: impl Into<Operand>) -> &mut Self {
        self.add_clause("$or", criteria.into())
    }

    pub fn add_nor(&mut self, criteria: impl Into<Operand>) -> &mut Self {
        self.add_clause("$nor", criteria.into())
    }

    fn add_clause(&mut self, operator: &str, criteria: Operand) -> &mut Self {
        let criteria = criteria.into_bson();

        match self.query.get_mut(operator) {
            Some(Bson::Array(clauses)) => clauses.push(criteria),
            _ => {
                self.query.insert(operator, vec![criteria]);
            }
        }

        self
    }

    pub fn js_where(&mut self, javascript: impl Into<String>) -> &mut Self {
        self.query
            .insert("$where", Bson::JavaScriptCode(javascript.into()));
        self
    }

    pub fn comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.query.insert("$comment", Bson::String(comment.into()));
        self
    }

    pub fn text(&mut self, search: impl Into<String>) -> &mut Self {
        let search: String = search.into();
        self.query.insert("$text", doc! { "$search": search });
        self.text = true;
        self
    }

    pub fn language(&mut self, language: impl Into<String>) -> Result<&mut Self> {
        self.text_criteria("language")?
            .insert("$language", Bson::String(language.into()));
        Ok(self)
    }

    /// Only `true` is written; `false` drops the option so servers without
    /// support for it still accept the query.
    pub fn case_sensitive(&mut self, case_sensitive: bool) -> Result<&mut Self> {
        let text = self.text_criteria("case_sensitive")?;
        if case_sensitive {
            text.insert("$caseSensitive", true);
        } else {
            text.remove("$caseSensitive");
        }
        Ok(self)
    }

    pub fn diacritic_sensitive(&mut self, diacritic_sensitive: bool) -> Result<&mut Self> {
        let text = self.text_criteria("diacritic_sensitive")?;
        if diacritic_sensitive {
            text.insert("$diacriticSensitive", true);
        } else {
            text.remove("$diacriticSensitive");
        }
        Ok(self)
    }

    fn text_criteria(&mut self, method: &'static str) -> Result<&mut Document> {
        if !self.text {
            return Err(Error::Precondition {
                method,
                requirement: "a $text operator (call text() first)",
            });
        }

        Ok(document_entry(&mut self.query, "$text"))
    }

    pub fn near(&mut self, point: impl Into<Point>) -> &mut Self {
        self.near_operator(NearOperator::Near, point.into())
    }

    pub fn near_sphere(&mut self, point: impl Into<Point>) -> &mut Self {
        self.near_operator(NearOperator::NearSphere, point.into())
    }

    fn near_operator(&mut self, operator: NearOperator, point: Point) -> &mut Self {
        let value = match point {
            Point::GeoJson(point) => Bson::Document(doc! { "$geometry": point }),
            legacy @ Point::Legacy(..) => legacy.into(),
        };

        self.operator(operator.key(), value)
    }

    pub fn max_distance(&mut self, distance: f64) -> Result<&mut Self> {
        self.near_modifier("max_distance", "$maxDistance", distance)
    }

    pub fn min_distance(&mut self, distance: f64) -> Result<&mut Self> {
        self.near_modifier("min_distance", "$minDistance", distance)
    }

    fn near_modifier(&mut self, method: &'static str, key: &str, distance: f64) -> Result<&mut Self> {
        let scope = self.current_field.clone();
        let Some(near) = self.near.get(&scope).copied() else {
            return Err(Error::Precondition {
                method,
                requirement: "a $near or $nearSphere operator (call near() or near_sphere() first)",
            });
        };

        let criteria = match &scope {
            Some(field) => document_entry(&mut self.query, field),
            None => &mut self.query,
        };
        let target = if near.geojson {
            document_entry(criteria, near.operator.key())
        } else {
            criteria
        };
        target.insert(key, distance);

        Ok(self)
    }

    pub fn geo_within(&mut self, geometry: Document) -> &mut Self {
        self.operator("$geoWithin", doc! { "$geometry": geometry })
    }

    pub fn geo_within_box(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> &mut Self {
        self.operator("$geoWithin", doc! { "$box": [[x1, y1], [x2, y2]] })
    }

    pub fn geo_within_center(&mut self, x: f64, y: f64, radius: f64) -> &mut Self {
        self.operator("$geoWithin", doc! { "$center": [[x, y], radius] })
    }

    pub fn geo_within_center_sphere(&mut self, x: f64, y: f64, radius: f64) -> &mut Self {
        self.operator("$geoWithin", doc! { "$centerSphere": [[x, y], radius] })
    }

    pub fn geo_within_polygon(&mut self, points: &[(f64, f64)]) -> Result<&mut Self> {
        if points.len() < 3 {
            return Err(Error::InvalidArgument {
                method: "geo_within_polygon",
                message: format!("a polygon needs three or more points, got {}", points.len()),
            });
        }

        let points: Vec<Bson> = points
            .iter()
            .map(|&(x, y)| Bson::Array(vec![Bson::Double(x), Bson::Double(y)]))
            .collect();

        Ok(self.operator("$geoWithin", doc! { "$polygon": points }))
    }

    pub fn geo_intersects(&mut self, geometry: Document) -> &mut Self {
        self.operator("$geoIntersects", doc! { "$geometry": geometry })
    }

    // $push modifiers

    pub fn each<V: Into<Bson>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.operator("$each", array(values))
    }

    pub fn slice(&mut self, slice: i32) -> &mut Self {
        self.operator("$slice", slice)
    }

    pub fn position(&mut self, position: i32) -> &mut Self {
        self.operator("$position", position)
    }

    pub fn sort(&mut self, field: impl Into<String>, order: impl Into<Order>) -> &mut Self {
        let field: String = field.into();
        let order: Order = order.into();
        self.operator("$sort", doc! { field: order })
    }

    // update operators

    /// `$set` on the current field. With `atomic == false` the value is written
    /// straight into the document instead, dotted paths becoming nested
    /// documents; that is the shape inserts need.
    pub fn set(&mut self, value: impl Into<Bson>, atomic: bool) -> Result<&mut Self> {
        if atomic {
            return self.update_operator("set", "$set", value.into());
        }

        let field = self.require_current_field("set")?.to_owned();
        let (parents, leaf) = match field.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, field.as_str()),
        };

        let mut target = &mut self.new_obj;
        for key in parents.into_iter().flat_map(|parents| parents.split('.')) {
            target = document_entry(target, key);
        }
        let value: Bson = value.into();
        target.insert(leaf, value);

        Ok(self)
    }

    pub fn set_on_insert(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.update_operator("set_on_insert", "$setOnInsert", value.into())
    }

    pub fn unset(&mut self) -> Result<&mut Self> {
        self.update_operator("unset", "$unset", Bson::Int32(1))
    }

    pub fn inc(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.update_operator("inc", "$inc", value.into())
    }

    pub fn mul(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.update_operator("mul", "$mul", value.into())
    }

    pub fn min(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.update_operator("min", "$min", value.into())
    }

    pub fn max(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.update_operator("max", "$max", value.into())
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.update_operator("rename", "$rename", Bson::String(name.into()))
    }

    /// Appends to the array in the current field. An [`Expr`] operand carries
    /// push modifiers; the resulting document always starts with `$each`
    /// (empty when never set), whatever order the modifiers were added in.
    pub fn push(&mut self, value: impl Into<Operand>) -> Result<&mut Self> {
        let value = match value.into() {
            Operand::Expr(modifiers) => {
                let mut push = doc! { "$each": Bson::Array(Vec::new()) };
                for (key, value) in modifiers.into_query() {
                    push.insert(key, value);
                }
                Bson::Document(push)
            }
            other => other.into_bson(),
        };

        self.update_operator("push", "$push", value)
    }

    pub fn add_to_set(&mut self, value: impl Into<Operand>) -> Result<&mut Self> {
        self.update_operator("add_to_set", "$addToSet", value.into().into_bson())
    }

    pub fn pull(&mut self, value: impl Into<Operand>) -> Result<&mut Self> {
        self.update_operator("pull", "$pull", value.into().into_bson())
    }

    pub fn pull_all<V: Into<Bson>>(
        &mut self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<&mut Self> {
        self.update_operator("pull_all", "$pullAll", array(values))
    }

    pub fn pop_first(&mut self) -> Result<&mut Self> {
        self.update_operator("pop_first", "$pop", Bson::Int32(-1))
    }

    pub fn pop_last(&mut self) -> Result<&mut Self> {
        self.update_operator("pop_last", "$pop", Bson::Int32(1))
    }

    pub fn current_date(&mut self, date_type: CurrentDateType) -> Result<&mut Self> {
        self.update_operator(
            "current_date",
            "$currentDate",
            Bson::Document(date_type.to_document()),
        )
    }

    pub fn bit_and(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.bit("bit_and", "and", value.into())
    }

    pub fn bit_or(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.bit("bit_or", "or", value.into())
    }

    pub fn bit_xor(&mut self, value: impl Into<Bson>) -> Result<&mut Self> {
        self.bit("bit_xor", "xor", value.into())
    }

    fn bit(&mut self, method: &'static str, operation: &str, value: Bson) -> Result<&mut Self> {
        let field = self.require_current_field(method)?.to_owned();
        let bit = document_entry(&mut self.new_obj, "$bit");
        document_entry(bit, &field).insert(operation, value);
        Ok(self)
    }

    fn update_operator(
        &mut self,
        method: &'static str,
        operator: &str,
        value: Bson,
    ) -> Result<&mut Self> {
        let field = self.require_current_field(method)?.to_owned();
        document_entry(&mut self.new_obj, operator).insert(field, value);
        Ok(self)
    }

    fn require_current_field(&self, method: &'static str) -> Result<&str> {
        self.current_field
            .as_deref()
            .ok_or_else(|| Error::requires_field(method))
    }

    /// Rebuilds the text and proximity flags after the filter was replaced wholesale.
    fn rescan(&mut self) {
        self.text = matches!(self.query.get("$text"), Some(Bson::Document(_)));
        self.near.clear();

        if let Some(near) = near_criteria(&self.query) {
            self.near.insert(None, near);
        }
        for (field, criteria) in &self.query {
            if let Bson::Document(criteria) = criteria {
                if let Some(near) = near_criteria(criteria) {
                    self.near.insert(Some(field.clone()), near);
                }
            }
        }
    }
}

fn near_criteria(criteria: &Document) -> Option<NearCriteria> {
    [NearOperator::Near, NearOperator::NearSphere]
        .into_iter()
        .find_map(|operator| {
            criteria
                .get(operator.key())
                .map(|point| NearCriteria::new(operator, point))
        })
}

fn array<V: Into<Bson>>(values: impl IntoIterator<Item = V>) -> Bson {
    Bson::Array(values.into_iter().map(Into::into).collect())
}

/// Returns the sub-document under `key`, first replacing a missing or
/// non-document value with an empty document. Existing keys keep their position.
fn document_entry<'a>(parent: &'a mut Document, key: &str) -> &'a mut Document {
    if !matches!(parent.get(key), Some(Bson::Document(_))) {
        parent.insert(key, Document::new());
    }

    match parent.get_mut(key) {
        Some(Bson::Document(child)) => child,
        _ => unreachable!("`{key}` was just set to a document"),
    }
}
