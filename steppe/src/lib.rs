//! Steppe is a fluent query builder for `MongoDB`.
//!
//! A [`Builder`] accumulates a filter document, an update document and the
//! settings of one of eleven operations. [`Builder::get_query`] snapshots it
//! into a [`Query`], which dispatches to an [`Execution`] (the database
//! boundary) and shapes the cursor it gets back.
//!
//! ## Example
//!
//! ```
//! use steppe::{Builder, bson::doc};
//!
//! let mut qb = Builder::new();
//! qb.field("age").gte(18).lt(65);
//! qb.field("status").equals("active")?;
//! qb.field("status").not_equal("banned");
//!
//! assert_eq!(
//!     qb.query_array(),
//!     &doc! {
//!         "age": { "$gte": 18, "$lt": 65 },
//!         "status": { "$in": ["active"], "$ne": "banned" },
//!     }
//! );
//!
//! // Same criteria, now an upserting update
//! qb.update().field("visits").inc(1)?.upsert(true);
//! assert_eq!(qb.new_obj(), &doc! { "$inc": { "visits": 1 } });
//! # Ok::<(), steppe::Error>(())
//! ```
//!
//! Executing requires an [`Execution`]. With the `driver` feature enabled,
//! `driver::MongoExecution` runs queries through the synchronous `mongodb`
//! driver.

#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc
)]

pub use mongodb::bson;

mod builder;
mod cursor;
#[cfg(feature = "driver")]
pub mod driver;
mod error;
mod execution;
mod expr;
mod query;
pub mod types;

pub use builder::{
    Builder, CursorOptions, GeoNearSpec, GroupSpec, MapReduceSpec, Operation, OperationKind,
};
pub use cursor::EagerCursor;
pub use error::{DriverError, Error, Result};
pub use execution::{Cursor, ExecResult, Execution, Outcome, WriteResult};
pub use expr::Expr;
pub use query::{Query, Rows};
pub use types::{CurrentDateType, Hint, Operand, Order, Point};
