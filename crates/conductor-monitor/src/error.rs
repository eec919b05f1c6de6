//! Monitor error types.

use conductor_core::AlertId;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors raised by monitor operations. Detected conditions are alerts,
/// never errors.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Alert not found (or no longer active).
    #[error("Alert not found: {0}")]
    AlertNotFound(AlertId),

    /// Alert rule not found.
    #[error("Alert rule not found: {0}")]
    RuleNotFound(String),

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A notification channel failed to deliver.
    #[error("Channel '{channel}' failed: {message}")]
    Channel { channel: String, message: String },

    /// Monitor misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MonitorError {
    /// Channel delivery failure.
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Get error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            MonitorError::AlertNotFound(_) => "ALERT_NOT_FOUND",
            MonitorError::RuleNotFound(_) => "RULE_NOT_FOUND",
            MonitorError::InvalidState(_) => "INVALID_STATE",
            MonitorError::Channel { .. } => "CHANNEL_ERROR",
            MonitorError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}
