use crate::expr::Expr;
use mongodb::bson::{Bson, Document, doc};

/// Argument accepted by the merge-capable operators: a single value, a list of
/// values, or another [`Expr`] used as a sub-document builder.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Value(Bson),
    Values(Vec<Bson>),
    Expr(Expr),
}

impl Operand {
    /// Resolves the operand into the value stored in the query or update document.
    /// Sub-expressions contribute their filter document.
    pub fn into_bson(self) -> Bson {
        match self {
            Self::Value(value) => value,
            Self::Values(values) => Bson::Array(values),
            Self::Expr(expr) => Bson::Document(expr.into_query()),
        }
    }
}

macro_rules! impl_operand_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Self::Value(value.into())
                }
            }
        )*
    };
}

impl_operand_value!(Bson, Document, &str, String, bool, i32, i64, f64);

impl From<Expr> for Operand {
    fn from(value: Expr) -> Self {
        Self::Expr(value)
    }
}

impl From<Vec<Bson>> for Operand {
    fn from(value: Vec<Bson>) -> Self {
        Self::Values(value)
    }
}

/// Sort direction. Strings follow the loose convention of the shell: `"asc"`
/// (any case) is ascending, every other string is descending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

impl From<&str> for Order {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }
}

impl From<i32> for Order {
    fn from(value: i32) -> Self {
        if value < 0 { Self::Desc } else { Self::Asc }
    }
}

impl From<Order> for Bson {
    fn from(value: Order) -> Self {
        Bson::Int32(value.as_i32())
    }
}

/// Index hint applied to a cursor, either by index name or by key pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum Hint {
    Name(String),
    Keys(Document),
}

impl From<&str> for Hint {
    fn from(value: &str) -> Self {
        Self::Name(value.to_owned())
    }
}

impl From<String> for Hint {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<Document> for Hint {
    fn from(value: Document) -> Self {
        Self::Keys(value)
    }
}

impl From<Hint> for Bson {
    fn from(value: Hint) -> Self {
        match value {
            Hint::Name(name) => Bson::String(name),
            Hint::Keys(keys) => Bson::Document(keys),
        }
    }
}

/// A location for `$near`, `$nearSphere` and `geoNear`: a legacy coordinate
/// pair or a GeoJSON point document (`{ type: "Point", coordinates: [x, y] }`).
#[derive(Clone, Debug, PartialEq)]
pub enum Point {
    Legacy(f64, f64),
    GeoJson(Document),
}

impl Point {
    pub fn is_geojson(&self) -> bool {
        matches!(self, Self::GeoJson(_))
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::Legacy(x, y)
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self::Legacy(x, y)
    }
}

impl From<Document> for Point {
    fn from(value: Document) -> Self {
        Self::GeoJson(value)
    }
}

impl From<Point> for Bson {
    fn from(value: Point) -> Self {
        match value {
            Point::Legacy(x, y) => Bson::Array(vec![Bson::Double(x), Bson::Double(y)]),
            Point::GeoJson(point) => Bson::Document(point),
        }
    }
}

/// Type written by `$currentDate`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CurrentDateType {
    #[default]
    Date,
    Timestamp,
}

impl CurrentDateType {
    pub(crate) fn to_document(self) -> Document {
        let name = match self {
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        };

        doc! { "$type": name }
    }
}
