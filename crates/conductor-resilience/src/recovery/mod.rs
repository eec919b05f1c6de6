//! Error classification and recovery strategy execution.

mod config;
mod error;
mod history;
mod manager;
mod metrics;

pub use config::{ConfigMatch, RecoveryConfig, RecoverySettings, RecoveryStrategy, WILDCARD};
pub use error::{error_kinds, ExecutionError};
pub use history::{ErrorHistory, ErrorRecord};
pub use manager::{RecoveryAction, RecoveryManager, RecoveryOutcome};
pub use metrics::{GlobalRecoveryMetrics, OperationMetrics, RecoveryMetricsRegistry};
