use crate::builder::OperationKind;
use mongodb::bson;
use thiserror::Error;

/// Opaque failure raised by an [`Execution`](crate::Execution) implementation.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A fluent call needs state that an earlier call should have set up.
    #[error("{method}() requires {requirement}")]
    Precondition {
        method: &'static str,
        requirement: &'static str,
    },

    #[error("{method}() is not supported for {operation} queries ({requirement})")]
    UnsupportedOperation {
        method: &'static str,
        operation: OperationKind,
        requirement: &'static str,
    },

    /// The collaborator answered with a result of the wrong shape.
    #[error("{operation} query returned {found} where {expected} was expected")]
    Postcondition {
        operation: OperationKind,
        found: &'static str,
        expected: &'static str,
    },

    #[error("invalid argument to {method}(): {message}")]
    InvalidArgument {
        method: &'static str,
        message: String,
    },

    #[error("{operation} failed: {source}")]
    Execution {
        operation: OperationKind,
        #[source]
        source: DriverError,
    },

    #[error("BSON: {0}")]
    Deserialize(#[from] bson::de::Error),
}

impl Error {
    pub(crate) fn requires_field(method: &'static str) -> Self {
        Self::Precondition {
            method,
            requirement: "a current field (call field() first)",
        }
    }

    pub(crate) fn execution(operation: OperationKind, source: DriverError) -> Self {
        Self::Execution { operation, source }
    }
}
