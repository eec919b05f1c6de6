//! Job error types.

use conductor_core::{ConductorError, EntryId, JobId};
use conductor_resilience::ExecutionError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The queue holds `max_size` pending jobs already.
    #[error("Queue is full: {pending} pending jobs (max {max_size})")]
    QueueFull { pending: usize, max_size: usize },

    /// A dependency cycle was found while resolving execution order.
    #[error("Circular dependency detected at '{unit}'")]
    CycleDependency { unit: String },

    /// Job exceeded its timeout.
    #[error("Job {job_id} timed out after {timeout_ms}ms")]
    Timeout { job_id: JobId, timeout_ms: u64 },

    /// Handler reported an error.
    #[error("Job execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Scheduled entry is waiting on dependencies.
    #[error("Entry '{entry}' has unsatisfied dependencies: {pending:?}")]
    UnsatisfiedDependency { entry: String, pending: Vec<String> },

    /// Schedule input rejected.
    #[error("Invalid schedule: {0}")]
    ScheduleValidation(String),

    /// Job or entry not found.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Operation not allowed in the current status.
    #[error("Invalid job state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Queue or pool is shutting down.
    #[error("Shutting down, not accepting work")]
    ShuttingDown,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Job not found.
    pub fn job_not_found(id: &JobId) -> Self {
        Self::NotFound {
            resource: "Job",
            id: id.to_string(),
        }
    }

    /// Scheduled entry not found.
    pub fn entry_not_found(id: &EntryId) -> Self {
        Self::NotFound {
            resource: "Scheduled entry",
            id: id.to_string(),
        }
    }

    /// Returns true if the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::QueueFull { .. } | JobError::UnsatisfiedDependency { .. } | JobError::Timeout { .. }
        )
    }

    /// Returns an error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            JobError::QueueFull { .. } => "QUEUE_FULL",
            JobError::CycleDependency { .. } => "CYCLE_DEPENDENCY",
            JobError::Timeout { .. } => "JOB_TIMEOUT",
            JobError::Execution(_) => "JOB_EXECUTION_FAILED",
            JobError::UnsatisfiedDependency { .. } => "UNSATISFIED_DEPENDENCY",
            JobError::ScheduleValidation(_) => "SCHEDULE_VALIDATION",
            JobError::NotFound { .. } => "NOT_FOUND",
            JobError::InvalidState { .. } => "INVALID_STATE",
            JobError::ShuttingDown => "SHUTTING_DOWN",
            JobError::Configuration(_) => "CONFIGURATION_ERROR",
            JobError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ConductorError> for JobError {
    fn from(err: ConductorError) -> Self {
        match err {
            ConductorError::Validation(msg) => JobError::ScheduleValidation(msg),
            ConductorError::Configuration(msg) => JobError::Configuration(msg),
            ConductorError::NotFound { resource_type, id } => JobError::NotFound {
                resource: resource_type,
                id,
            },
            other => JobError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_display() {
        let err = JobError::QueueFull {
            pending: 10,
            max_size: 10,
        };
        assert!(err.to_string().contains("max 10"));
        assert!(err.is_transient());
        assert_eq!(err.error_code(), "QUEUE_FULL");
    }

    #[test]
    fn test_cycle_names_unit() {
        let err = JobError::CycleDependency { unit: "a".into() };
        assert!(err.to_string().contains("'a'"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_execution_error() {
        let err = JobError::from(ExecutionError::type_error("bad"));
        assert!(matches!(err, JobError::Execution(_)));
        assert!(err.to_string().contains("TypeError"));
    }

    #[test]
    fn test_from_conductor_error() {
        let err = JobError::from(ConductorError::configuration("missing"));
        assert!(matches!(err, JobError::Configuration(_)));

        let err = JobError::from(ConductorError::internal("boom"));
        match err {
            JobError::Internal(msg) => assert!(msg.contains("boom")),
            _ => panic!("Expected Internal error"),
        }
    }

    #[test]
    fn test_not_found_helpers() {
        let id = JobId::new();
        let err = JobError::job_not_found(&id);
        assert!(err.to_string().contains(&id.to_string()));
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
