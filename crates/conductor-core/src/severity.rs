//! Severity levels shared by recovery classification and alerting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How serious a failure or condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action needed.
    Low,
    /// Degraded but self-healing.
    Medium,
    /// Needs attention.
    High,
    /// Needs immediate attention.
    Critical,
}

impl Severity {
    /// Derives a severity from an error type name when no explicit
    /// classification exists.
    ///
    /// timeout/network ⇒ medium, type/reference ⇒ high, validation ⇒ low,
    /// anything else ⇒ medium.
    #[must_use]
    pub fn from_error_kind(kind: &str) -> Self {
        let kind = kind.to_ascii_lowercase();
        if kind.contains("timeout") || kind.contains("network") {
            Self::Medium
        } else if kind.contains("type") || kind.contains("reference") {
            Self::High
        } else if kind.contains("validation") {
            Self::Low
        } else {
            Self::Medium
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("Unknown severity: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_classification() {
        assert_eq!(Severity::from_error_kind("TimeoutError"), Severity::Medium);
        assert_eq!(Severity::from_error_kind("NetworkError"), Severity::Medium);
        assert_eq!(Severity::from_error_kind("TypeError"), Severity::High);
        assert_eq!(Severity::from_error_kind("ReferenceError"), Severity::High);
        assert_eq!(Severity::from_error_kind("ValidationError"), Severity::Low);
        assert_eq!(Severity::from_error_kind("SomethingElse"), Severity::Medium);
    }

    #[test]
    fn test_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_parse() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
    }
}
