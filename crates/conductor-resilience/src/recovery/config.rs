//! Recovery configuration: which errors of which operation get which strategy.

use crate::retry::Backoff;
use conductor_core::{ConductorError, ConductorResult, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Matches every error type, or every operation when used as the operation name.
pub const WILDCARD: &str = "*";

/// What to do with a failed unit.
///
/// Each strategy carries its own configuration. In serialized form the
/// variant is selected by a `strategy` field next to the other config fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Succeed with a substitute value.
    Fallback {
        /// Explicit value; when absent the per-operation default is used.
        #[serde(default)]
        fallback_value: Option<Value>,
    },
    /// Re-run the unit after a backoff delay.
    Retry {
        /// Retries allowed after the first failure.
        max_retries: u32,
        /// Delay before the first retry.
        #[serde(default = "default_retry_delay_ms")]
        retry_delay_ms: u64,
        /// Growth of the delay between retries.
        #[serde(default)]
        backoff: Backoff,
        /// Used once retries are exhausted.
        #[serde(default)]
        fallback_value: Option<Value>,
    },
    /// Succeed with no value.
    Skip,
    /// Terminal failure.
    Fail,
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl RecoveryStrategy {
    /// Returns the strategy name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fallback { .. } => "fallback",
            Self::Retry { .. } => "retry",
            Self::Skip => "skip",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recovery rule for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Operation name, or `*` for every operation.
    pub operation: String,

    /// Error type names this rule applies to; `*` matches every type.
    #[serde(default = "default_error_types")]
    pub error_types: Vec<String>,

    /// Strategy and its parameters.
    #[serde(flatten)]
    pub strategy: RecoveryStrategy,

    /// Severity reported for matched errors.
    #[serde(default)]
    pub severity: Severity,

    /// Disabled rules are ignored during lookup.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_error_types() -> Vec<String> {
    vec![WILDCARD.to_string()]
}

fn default_true() -> bool {
    true
}

impl RecoveryConfig {
    /// Creates an enabled rule matching every error type of `operation`.
    pub fn new(operation: impl Into<String>, strategy: RecoveryStrategy) -> Self {
        Self {
            operation: operation.into(),
            error_types: default_error_types(),
            strategy,
            severity: Severity::default(),
            enabled: true,
        }
    }

    /// Fallback rule.
    pub fn fallback(operation: impl Into<String>, value: Value) -> Self {
        Self::new(
            operation,
            RecoveryStrategy::Fallback {
                fallback_value: Some(value),
            },
        )
    }

    /// Retry rule without a terminal fallback.
    pub fn retry(operation: impl Into<String>, max_retries: u32, retry_delay_ms: u64, backoff: Backoff) -> Self {
        Self::new(
            operation,
            RecoveryStrategy::Retry {
                max_retries,
                retry_delay_ms,
                backoff,
                fallback_value: None,
            },
        )
    }

    /// Skip rule.
    pub fn skip(operation: impl Into<String>) -> Self {
        Self::new(operation, RecoveryStrategy::Skip)
    }

    /// Fail rule.
    pub fn fail(operation: impl Into<String>) -> Self {
        Self::new(operation, RecoveryStrategy::Fail)
    }

    /// Restricts the rule to the given error types.
    #[must_use]
    pub fn for_errors<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// True if the error type list names `kind` exactly.
    pub fn matches_exactly(&self, kind: &str) -> bool {
        self.error_types.iter().any(|t| t == kind)
    }

    /// True if the rule applies to any error type.
    pub fn is_wildcard(&self) -> bool {
        self.error_types.iter().any(|t| t == WILDCARD)
    }

    /// True if the rule applies to every operation.
    pub fn is_global(&self) -> bool {
        self.operation == WILDCARD
    }

    /// Two rules with the same operation and error type set replace each other.
    pub(crate) fn same_matcher(&self, other: &Self) -> bool {
        if self.operation != other.operation || self.error_types.len() != other.error_types.len() {
            return false;
        }
        self.error_types.iter().all(|t| other.error_types.contains(t))
    }

    /// Checks the rule is usable.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.operation.trim().is_empty() {
            return Err(ConductorError::validation("recovery operation name must not be empty"));
        }
        if self.error_types.is_empty() {
            return Err(ConductorError::validation(format!(
                "recovery rule for '{}' must list at least one error type",
                self.operation
            )));
        }
        if self.error_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ConductorError::validation(format!(
                "recovery rule for '{}' contains an empty error type",
                self.operation
            )));
        }
        if let RecoveryStrategy::Retry { max_retries: 0, .. } = self.strategy {
            return Err(ConductorError::validation(format!(
                "retry rule for '{}' must allow at least one retry",
                self.operation
            )));
        }
        Ok(())
    }
}

/// How a rule was found for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigMatch {
    /// Operation rule naming the error type.
    Exact,
    /// Operation rule with `*` error types.
    Wildcard,
    /// Rule registered for operation `*`.
    Global,
    /// No rule; severity derived from the error type and the unit fails.
    Default,
}

/// Recovery manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// History length that triggers trimming.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Records kept after trimming.
    #[serde(default = "default_history_retain")]
    pub history_retain: usize,

    /// Rules registered at startup.
    #[serde(default)]
    pub rules: Vec<RecoveryConfig>,
}

fn default_history_capacity() -> usize {
    1000
}

fn default_history_retain() -> usize {
    500
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            history_retain: default_history_retain(),
            rules: Vec::new(),
        }
    }
}
