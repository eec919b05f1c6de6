//! # Conductor Core
//!
//! Core types, traits, and error definitions shared by every Conductor crate:
//! the injectable [`Clock`], strongly-typed identifiers, the unified
//! [`ConductorError`], and tracing bootstrap.

pub mod clock;
pub mod error;
pub mod id;
pub mod severity;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ConductorError, ConductorResult};
pub use id::{AlertId, EntryId, JobId};
pub use severity::Severity;
pub use telemetry::{init_tracing, TelemetryConfig};
