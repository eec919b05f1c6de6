//! # Conductor Resilience
//!
//! Failure handling for units of work: per-operation error classification,
//! recovery strategies (fallback, retry, skip, fail), backoff calculation,
//! and timeout racing.

pub mod recovery;
pub mod retry;
pub mod timeout;

pub use recovery::*;
pub use retry::*;
pub use timeout::*;
