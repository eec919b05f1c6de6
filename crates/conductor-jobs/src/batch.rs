//! Runs a batch of dependent units in order, routing failures through the
//! recovery manager.

use crate::dependency::{resolve_dependencies, Dependent};
use crate::error::JobResult;
use crate::handler::HandlerResult;
use conductor_core::SharedClock;
use conductor_resilience::{ExecutionError, RecoveryAction, RecoveryManager};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Input handed to the unit function.
#[derive(Debug, Clone)]
pub struct UnitInput {
    /// Zero-based attempt.
    pub attempt: u32,

    /// Values of units that already produced one, keyed by unit name.
    pub values: Map<String, Value>,
}

/// A unit that ended in a terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Unit name.
    pub unit: String,
    /// Last error.
    pub error: ExecutionError,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Execution order.
    pub order: Vec<String>,

    /// Values by unit (including fallbacks).
    pub values: Map<String, Value>,

    /// Units skipped by recovery.
    pub skipped: Vec<String>,

    /// Units whose value is a fallback.
    pub fallbacks: Vec<String>,

    /// Units that failed.
    pub failures: Vec<UnitFailure>,

    /// Retries performed across the batch.
    pub retries: u32,
}

impl BatchOutcome {
    /// True when no unit failed.
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs batches under one recovery operation name.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    operation: String,
    recovery: Arc<RecoveryManager>,
    clock: SharedClock,
}

impl BatchRunner {
    /// Creates a runner whose failures are classified under `operation`.
    pub fn new(operation: impl Into<String>, recovery: Arc<RecoveryManager>, clock: SharedClock) -> Self {
        Self {
            operation: operation.into(),
            recovery,
            clock,
        }
    }

    /// Recovery operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Resolves the order of `units` and runs `run` on each.
    ///
    /// A dependency cycle fails before any unit runs. Retries wait through
    /// the clock; a terminal failure is recorded and the batch continues.
    pub async fn run<T, F, Fut>(&self, units: &[T], run: F) -> JobResult<BatchOutcome>
    where
        T: Dependent,
        F: Fn(&T, UnitInput) -> Fut,
        Fut: Future<Output = HandlerResult>,
    {
        let ordered = resolve_dependencies(units)?;
        let mut outcome = BatchOutcome {
            order: ordered.iter().map(|unit| unit.name().to_string()).collect(),
            ..BatchOutcome::default()
        };

        info!(operation = %self.operation, units = ordered.len(), "Running batch");

        for unit in ordered {
            let name = unit.name().to_string();
            let mut attempt = 0;
            loop {
                let input = UnitInput {
                    attempt,
                    values: outcome.values.clone(),
                };
                let started = Instant::now();
                let error = match run(unit, input).await {
                    Ok(value) => {
                        self.recovery.record_execution(&self.operation, started.elapsed());
                        outcome.values.insert(name.clone(), value);
                        break;
                    }
                    Err(error) => error,
                };

                let context = json!({ "unit": name, "attempt": attempt });
                let decision = self.recovery.handle(&self.operation, &error, &context, attempt);
                match decision.action {
                    RecoveryAction::Retry { delay, next_attempt } => {
                        debug!(unit = %name, delay_ms = delay.as_millis() as u64, "Retrying unit");
                        self.clock.sleep(delay).await;
                        attempt = next_attempt;
                        outcome.retries += 1;
                    }
                    RecoveryAction::Fallback { value } => {
                        outcome.values.insert(name.clone(), value);
                        outcome.fallbacks.push(name.clone());
                        break;
                    }
                    RecoveryAction::Skip => {
                        outcome.skipped.push(name.clone());
                        break;
                    }
                    RecoveryAction::Fail { .. } => {
                        warn!(unit = %name, error = %error, "Unit failed");
                        outcome.failures.push(UnitFailure {
                            unit: name.clone(),
                            error,
                        });
                        break;
                    }
                }
            }
        }

        info!(
            operation = %self.operation,
            completed = outcome.values.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failures.len(),
            "Batch finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::UnitSpec;
    use crate::error::JobError;
    use conductor_core::{Clock, ManualClock};
    use conductor_resilience::{Backoff, RecoveryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runner() -> (BatchRunner, Arc<RecoveryManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let recovery = Arc::new(RecoveryManager::new(clock.clone()));
        (
            BatchRunner::new("calculate_field", recovery.clone(), clock.clone()),
            recovery,
            clock,
        )
    }

    #[tokio::test]
    async fn test_values_flow_in_dependency_order() {
        let (runner, _, _) = runner();
        let units = vec![
            UnitSpec::new("total").depends_on(["subtotal"]),
            UnitSpec::new("subtotal"),
        ];

        let outcome = runner
            .run(&units, |unit: &UnitSpec, input: UnitInput| {
                let name = unit.name.clone();
                async move {
                    match name.as_str() {
                        "subtotal" => Ok(json!(10)),
                        _ => Ok(json!(input.values["subtotal"].as_i64().unwrap_or(0) * 2)),
                    }
                }
            })
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.order, vec!["subtotal", "total"]);
        assert_eq!(outcome.values["total"], json!(20));
    }

    #[test]
    fn test_cycle_runs_nothing() {
        let (runner, _, _) = runner();
        let calls = AtomicU32::new(0);
        let units = vec![
            UnitSpec::new("a").depends_on(["b"]),
            UnitSpec::new("b").depends_on(["a"]),
        ];

        let result = tokio_test::block_on(runner.run(&units, |_unit: &UnitSpec, _input: UnitInput| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Value::Null) }
        }));

        assert!(matches!(result, Err(JobError::CycleDependency { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_waits_through_clock() {
        let (runner, recovery, clock) = runner();
        recovery
            .register_config(RecoveryConfig::retry("calculate_field", 2, 100, Backoff::Exponential))
            .unwrap();
        let start = clock.now();
        let units = vec![UnitSpec::new("flaky")];

        let outcome = runner
            .run(&units, |_unit: &UnitSpec, input: UnitInput| async move {
                if input.attempt < 2 {
                    Err(ExecutionError::network("retry me"))
                } else {
                    Ok(json!("done"))
                }
            })
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.retries, 2);
        assert_eq!(outcome.values["flaky"], json!("done"));
        // 100ms + 200ms of virtual time
        assert_eq!(clock.now() - start, chrono::Duration::milliseconds(300));
    }

    #[tokio::test]
    async fn test_fallback_skip_and_failure() {
        let (runner, recovery, _) = runner();
        recovery
            .register_config(RecoveryConfig::fallback("calculate_field", json!(0)).for_errors(["TypeError"]))
            .unwrap();
        recovery
            .register_config(RecoveryConfig::skip("calculate_field").for_errors(["ValidationError"]))
            .unwrap();
        let units = vec![
            UnitSpec::new("typed").priority(1),
            UnitSpec::new("invalid").priority(2),
            UnitSpec::new("broken").priority(3),
            UnitSpec::new("fine").priority(4),
        ];

        let outcome = runner
            .run(&units, |unit: &UnitSpec, _input: UnitInput| {
                let name = unit.name.clone();
                async move {
                    match name.as_str() {
                        "typed" => Err(ExecutionError::type_error("nan")),
                        "invalid" => Err(ExecutionError::validation("negative")),
                        "broken" => Err(ExecutionError::other("boom")),
                        _ => Ok(json!(true)),
                    }
                }
            })
            .await
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.fallbacks, vec!["typed"]);
        assert_eq!(outcome.values["typed"], json!(0));
        assert_eq!(outcome.skipped, vec!["invalid"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit, "broken");
        assert_eq!(outcome.values["fine"], json!(true));
        assert!(!outcome.values.contains_key("invalid"));
    }
}
