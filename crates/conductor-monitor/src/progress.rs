//! Progress tracking for long-running, multi-phase operations.
//!
//! A [`ProgressTracker`] holds a phase, a status and step counters, and
//! notifies registered listeners on every phase or status change.
//! Listeners run after the tracker's lock is released.

use crate::error::{MonitorError, MonitorResult};
use chrono::{DateTime, Utc};
use conductor_core::SharedClock;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stage of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Initializing,
    Validating,
    Processing,
    Finalizing,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Validating => "validating",
            Self::Processing => "processing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change notification sent to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseChanged {
        operation: String,
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },
    StatusChanged {
        operation: String,
        from: ProgressStatus,
        to: ProgressStatus,
        at: DateTime<Utc>,
    },
}

type Listener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Serializable view of a tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub operation: String,
    pub phase: Phase,
    pub status: ProgressStatus,
    pub completed: u64,
    pub total: u64,
    pub percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct ProgressState {
    phase: Phase,
    status: ProgressStatus,
    completed: u64,
    total: u64,
    started_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl ProgressState {
    #[allow(clippy::cast_precision_loss)]
    fn percentage(&self) -> f64 {
        if self.total == 0 {
            if self.status == ProgressStatus::Completed { 100.0 } else { 0.0 }
        } else {
            (self.completed as f64 / self.total as f64 * 100.0).min(100.0)
        }
    }
}

/// Tracks one operation.
pub struct ProgressTracker {
    operation: String,
    clock: SharedClock,
    state: Mutex<ProgressState>,
    listeners: RwLock<Vec<Listener>>,
}

impl ProgressTracker {
    pub fn new(operation: impl Into<String>, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            operation: operation.into(),
            clock,
            state: Mutex::new(ProgressState {
                phase: Phase::Initializing,
                status: ProgressStatus::Idle,
                completed: 0,
                total: 0,
                started_at: None,
                updated_at: now,
                finished_at: None,
                error: None,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Register a change listener.
    pub fn add_listener(&self, listener: impl Fn(&ProgressEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Begin the operation with `total` steps.
    pub fn start(&self, total: u64) -> MonitorResult<()> {
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock();
            if state.status != ProgressStatus::Idle {
                return Err(MonitorError::InvalidState(format!(
                    "'{}' already started ({})",
                    self.operation, state.status
                )));
            }
            state.total = total;
            state.started_at = Some(now);
            self.change(&mut state, None, Some(ProgressStatus::Running), now)
        };
        info!(operation = %self.operation, total, "Progress started");
        self.emit(&events);
        Ok(())
    }

    /// Move to another phase.
    pub fn set_phase(&self, phase: Phase) -> MonitorResult<()> {
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock();
            self.ensure_active(&state)?;
            self.change(&mut state, Some(phase), None, now)
        };
        self.emit(&events);
        Ok(())
    }

    /// Change status. Use [`fail`](Self::fail) and
    /// [`complete`](Self::complete) to finish.
    pub fn set_status(&self, status: ProgressStatus) -> MonitorResult<()> {
        if status.is_finished() {
            return Err(MonitorError::InvalidState(format!(
                "use complete() or fail() to set '{status}'"
            )));
        }
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock();
            self.ensure_active(&state)?;
            self.change(&mut state, None, Some(status), now)
        };
        self.emit(&events);
        Ok(())
    }

    /// Add completed steps, capped at the total when one is set.
    pub fn advance(&self, steps: u64) -> MonitorResult<u64> {
        let mut state = self.state.lock();
        self.ensure_active(&state)?;
        state.completed = state.completed.saturating_add(steps);
        if state.total > 0 {
            state.completed = state.completed.min(state.total);
        }
        state.updated_at = self.clock.now();
        debug!(operation = %self.operation, completed = state.completed, total = state.total, "Progress advanced");
        Ok(state.completed)
    }

    pub fn set_total(&self, total: u64) -> MonitorResult<()> {
        let mut state = self.state.lock();
        self.ensure_active(&state)?;
        state.total = total;
        if total > 0 {
            state.completed = state.completed.min(total);
        }
        state.updated_at = self.clock.now();
        Ok(())
    }

    /// Finish with an error.
    pub fn fail(&self, reason: impl Into<String>) -> MonitorResult<()> {
        let reason = reason.into();
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock();
            self.ensure_active(&state)?;
            state.error = Some(reason.clone());
            state.finished_at = Some(now);
            self.change(&mut state, None, Some(ProgressStatus::Failed), now)
        };
        warn!(operation = %self.operation, reason = %reason, "Progress failed");
        self.emit(&events);
        Ok(())
    }

    /// Finish successfully; every step counts as completed.
    pub fn complete(&self) -> MonitorResult<()> {
        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock();
            self.ensure_active(&state)?;
            state.completed = state.total;
            state.finished_at = Some(now);
            self.change(&mut state, Some(Phase::Done), Some(ProgressStatus::Completed), now)
        };
        info!(operation = %self.operation, "Progress completed");
        self.emit(&events);
        Ok(())
    }

    pub fn percentage(&self) -> f64 {
        self.state.lock().percentage()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            operation: self.operation.clone(),
            phase: state.phase,
            status: state.status,
            completed: state.completed,
            total: state.total,
            percentage: state.percentage(),
            started_at: state.started_at,
            updated_at: state.updated_at,
            finished_at: state.finished_at,
            error: state.error.clone(),
        }
    }

    fn ensure_active(&self, state: &ProgressState) -> MonitorResult<()> {
        match state.status {
            ProgressStatus::Idle => Err(MonitorError::InvalidState(format!(
                "'{}' has not started",
                self.operation
            ))),
            s if s.is_finished() => Err(MonitorError::InvalidState(format!(
                "'{}' already finished ({s})",
                self.operation
            ))),
            _ => Ok(()),
        }
    }

    fn change(
        &self,
        state: &mut ProgressState,
        phase: Option<Phase>,
        status: Option<ProgressStatus>,
        now: DateTime<Utc>,
    ) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        if let Some(to) = phase.filter(|p| *p != state.phase) {
            events.push(ProgressEvent::PhaseChanged {
                operation: self.operation.clone(),
                from: state.phase,
                to,
                at: now,
            });
            state.phase = to;
        }
        if let Some(to) = status.filter(|s| *s != state.status) {
            events.push(ProgressEvent::StatusChanged {
                operation: self.operation.clone(),
                from: state.status,
                to,
                at: now,
            });
            state.status = to;
        }
        state.updated_at = now;
        events
    }

    fn emit(&self, events: &[ProgressEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("operation", &self.operation)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// Named trackers owned by the monitor.
#[derive(Debug)]
pub struct ProgressRegistry {
    clock: SharedClock,
    trackers: RwLock<BTreeMap<String, Arc<ProgressTracker>>>,
}

impl ProgressRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            trackers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Tracker for `operation`, created on first use.
    pub fn track(&self, operation: &str) -> Arc<ProgressTracker> {
        if let Some(tracker) = self.trackers.read().get(operation) {
            return tracker.clone();
        }
        self.trackers
            .write()
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(ProgressTracker::new(operation, self.clock.clone())))
            .clone()
    }

    pub fn get(&self, operation: &str) -> Option<Arc<ProgressTracker>> {
        self.trackers.read().get(operation).cloned()
    }

    pub fn remove(&self, operation: &str) -> Option<Arc<ProgressTracker>> {
        self.trackers.write().remove(operation)
    }

    /// Snapshots of every tracker, by operation name.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.trackers.read().values().map(|t| t.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::ManualClock;

    fn tracker() -> (Arc<ManualClock>, ProgressTracker) {
        let clock = Arc::new(ManualClock::starting_now());
        let tracker = ProgressTracker::new("season-import", clock.clone());
        (clock, tracker)
    }

    #[test]
    fn test_full_lifecycle_emits_changes() {
        let (_clock, tracker) = tracker();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tracker.add_listener(move |e| sink.lock().push(e.clone()));

        tracker.start(4).unwrap();
        tracker.set_phase(Phase::Validating).unwrap();
        tracker.set_phase(Phase::Validating).unwrap();
        tracker.set_phase(Phase::Processing).unwrap();
        assert_eq!(tracker.advance(3).unwrap(), 3);
        assert_eq!(tracker.percentage(), 75.0);
        tracker.complete().unwrap();

        let events = events.lock();
        // Idle->Running, Init->Validating, Validating->Processing, Processing->Done, Running->Completed
        assert_eq!(events.len(), 5);
        assert!(matches!(
            events[0],
            ProgressEvent::StatusChanged { from: ProgressStatus::Idle, to: ProgressStatus::Running, .. }
        ));
        assert!(matches!(
            events[4],
            ProgressEvent::StatusChanged { to: ProgressStatus::Completed, .. }
        ));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.phase, Phase::Done);
        assert_eq!(snapshot.completed, 4);
        assert_eq!(snapshot.percentage, 100.0);
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn test_advance_is_capped() {
        let (_clock, tracker) = tracker();
        tracker.start(10).unwrap();
        assert_eq!(tracker.advance(25).unwrap(), 10);
        tracker.set_total(20).unwrap();
        assert_eq!(tracker.percentage(), 50.0);
    }

    #[test]
    fn test_fail_records_reason() {
        let (clock, tracker) = tracker();
        tracker.start(0).unwrap();
        clock.advance_millis(500);
        tracker.fail("upstream unavailable").unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, ProgressStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("upstream unavailable"));
        assert_eq!(snapshot.percentage, 0.0);
        assert!(tracker.advance(1).is_err());
        assert!(tracker.complete().is_err());
    }

    #[test]
    fn test_requires_start() {
        let (_clock, tracker) = tracker();
        assert!(tracker.advance(1).is_err());
        assert!(tracker.set_phase(Phase::Processing).is_err());
        tracker.start(1).unwrap();
        assert!(tracker.start(1).is_err());
        assert!(tracker.set_status(ProgressStatus::Completed).is_err());
        tracker.set_status(ProgressStatus::Paused).unwrap();
        assert_eq!(tracker.snapshot().status, ProgressStatus::Paused);
    }

    #[test]
    fn test_registry_reuses_trackers() {
        let registry = ProgressRegistry::new(Arc::new(ManualClock::starting_now()));
        let a = registry.track("import");
        let b = registry.track("import");
        assert!(Arc::ptr_eq(&a, &b));
        registry.track("export");
        assert_eq!(registry.snapshots().len(), 2);
        assert!(registry.remove("import").is_some());
        assert!(registry.get("import").is_none());
    }
}
