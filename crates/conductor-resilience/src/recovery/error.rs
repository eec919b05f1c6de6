//! The error a unit of work reports back to the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known error type names used for classification.
pub mod error_kinds {
    /// Wrong shape of data.
    pub const TYPE_ERROR: &str = "TypeError";
    /// Reference to something missing.
    pub const REFERENCE_ERROR: &str = "ReferenceError";
    /// Business validation rejected the input.
    pub const VALIDATION_ERROR: &str = "ValidationError";
    /// The unit exceeded its time budget.
    pub const TIMEOUT_ERROR: &str = "TimeoutError";
    /// A remote dependency was unreachable.
    pub const NETWORK_ERROR: &str = "NetworkError";
    /// The unit observed its cancellation token.
    pub const CANCELLED: &str = "CancelledError";
    /// Anything unclassified.
    pub const GENERIC: &str = "Error";
}

/// Failure reported by a unit of work: a type name used for classification
/// plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    /// Error type name, matched exactly against recovery configs.
    pub kind: String,

    /// Message propagated on terminal failure.
    pub message: String,
}

impl ExecutionError {
    /// Creates an error of an arbitrary kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(error_kinds::TYPE_ERROR, message)
    }

    /// `ReferenceError`
    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(error_kinds::REFERENCE_ERROR, message)
    }

    /// `ValidationError`
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(error_kinds::VALIDATION_ERROR, message)
    }

    /// `TimeoutError`
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(error_kinds::TIMEOUT_ERROR, message)
    }

    /// `NetworkError`
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(error_kinds::NETWORK_ERROR, message)
    }

    /// `CancelledError`
    pub fn cancelled() -> Self {
        Self::new(error_kinds::CANCELLED, "cancelled by request")
    }

    /// Unclassified error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(error_kinds::GENERIC, message)
    }

    /// Wraps any std error under the given kind.
    pub fn from_error<E: std::error::Error>(kind: impl Into<String>, err: &E) -> Self {
        Self::new(kind, err.to_string())
    }

    /// Returns the error type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns true if the unit reported that it was cancelled.
    pub fn is_cancellation(&self) -> bool {
        self.kind == error_kinds::CANCELLED
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(error_kinds::TYPE_ERROR, &err)
    }
}
