//! Scheduler for one-time, recurring and cron-lite entries.
//!
//! Entries live in a single mutex-guarded map. A tick collects the due
//! entries and resolves their dependencies under the lock, releases it, and
//! only then submits to the queue. Bookkeeping for a successful submission
//! re-acquires the lock; a rejected submission leaves the entry untouched so
//! the next tick retries it.

use crate::config::{ScheduleDefinition, ScheduleKind, SchedulerConfig};
use crate::cron::CronLite;
use crate::dependency::{resolve_dependencies, UnitSpec};
use crate::error::{JobError, JobResult};
use crate::job::{JobStatus, JobTemplate, NewJob};
use crate::metrics::SchedulerMetrics;
use crate::queue::PriorityJobQueue;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::{EntryId, JobId, SharedClock};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How an entry recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Recurring,
    Cron,
}

impl ScheduleType {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Recurring => "recurring",
            ScheduleType::Cron => "cron",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional limits and dependencies for a new entry.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Disable after this many materializations.
    pub max_runs: Option<u32>,

    /// Disable once the next run would fall after this instant.
    pub end_date: Option<DateTime<Utc>>,

    /// Entry names or job ids that must be satisfied first.
    pub dependencies: Vec<String>,
}

impl ScheduleOptions {
    /// No limits, no dependencies.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    #[must_use]
    pub fn end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    #[must_use]
    pub fn depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }
}

/// A registered schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledEntry {
    pub id: EntryId,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub next_run: DateTime<Utc>,

    /// Interval for recurring entries.
    pub interval_ms: Option<u64>,

    /// Expression for cron entries.
    pub cron_expression: Option<String>,

    #[serde(skip)]
    cron: Option<CronLite>,

    pub max_runs: Option<u32>,
    pub end_date: Option<DateTime<Utc>>,
    pub dependencies: Vec<String>,
    pub enabled: bool,
    pub run_count: u32,
    pub last_run: Option<DateTime<Utc>>,

    /// Job produced by the latest materialization.
    pub last_job_id: Option<JobId>,

    /// Template each materialization is built from.
    pub job: JobTemplate,

    /// Non-fatal validation warnings (cron-lite syntax).
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledEntry {
    /// Whether `max_runs` or `end_date` has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_runs.is_some_and(|max| self.run_count >= max)
            || self.end_date.is_some_and(|end| self.next_run > end)
    }

    /// The run following a materialization at `now`, skipping missed slots.
    fn following_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.schedule_type {
            ScheduleType::Once => None,
            ScheduleType::Recurring => {
                let step = ChronoDuration::milliseconds(i64::try_from(self.interval_ms?).ok()?);
                if step <= ChronoDuration::zero() {
                    return None;
                }
                let mut next = self.next_run + step;
                while next <= now {
                    next += step;
                }
                Some(next)
            }
            ScheduleType::Cron => self.cron.as_ref()?.next_after(now),
        }
    }
}

/// Filter for [`Scheduler::entries`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub enabled: Option<bool>,
    pub schedule_type: Option<ScheduleType>,
    pub name_contains: Option<String>,
}

impl EntryFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn schedule_type(mut self, schedule_type: ScheduleType) -> Self {
        self.schedule_type = Some(schedule_type);
        self
    }

    #[must_use]
    pub fn name_contains(mut self, fragment: impl Into<String>) -> Self {
        self.name_contains = Some(fragment.into());
        self
    }

    /// Check an entry against the filter.
    pub fn matches(&self, entry: &ScheduledEntry) -> bool {
        self.enabled.map_or(true, |e| entry.enabled == e)
            && self.schedule_type.map_or(true, |t| entry.schedule_type == t)
            && self
                .name_contains
                .as_deref()
                .map_or(true, |fragment| entry.name.contains(fragment))
    }
}

/// What a single tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Entries materialized this tick and the jobs they produced.
    pub materialized: Vec<(EntryId, JobId)>,

    /// Entries skipped for unmet dependencies.
    pub skipped: Vec<JobError>,

    /// Entries whose job the queue rejected.
    pub rejected: Vec<(EntryId, JobError)>,
}

impl TickReport {
    /// Nothing happened.
    pub fn is_empty(&self) -> bool {
        self.materialized.is_empty() && self.skipped.is_empty() && self.rejected.is_empty()
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub id: String,
    pub running: bool,
    pub entries: usize,
    pub enabled: usize,
    pub materialized: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub ticks: u64,
}

#[derive(Default)]
struct SchedulerState {
    entries: HashMap<EntryId, ScheduledEntry>,
    fired_once: HashSet<String>,
    materialized: u64,
    skipped: u64,
    rejected: u64,
    ticks: u64,
}

impl SchedulerState {
    fn publish_gauge(&self) {
        SchedulerMetrics::update_entries(self.entries.len());
    }

    /// Splits dependencies into unmet entry names and job ids to check later.
    fn check_dependencies(&self, dependencies: &[String]) -> (Vec<String>, Vec<(String, JobId)>) {
        let mut pending = Vec::new();
        let mut jobs = Vec::new();
        for dep in dependencies {
            if let Some(entry) = self.entries.values().find(|e| &e.name == dep) {
                if entry.run_count == 0 {
                    pending.push(dep.clone());
                }
            } else if self.fired_once.contains(dep) {
                continue;
            } else if let Ok(job_id) = JobId::parse(dep) {
                jobs.push((dep.clone(), job_id));
            } else {
                pending.push(dep.clone());
            }
        }
        (pending, jobs)
    }

    /// Applies a successful materialization. `advance` recomputes `next_run`.
    fn record_materialization(&mut self, id: EntryId, job_id: JobId, now: DateTime<Utc>, advance: bool) {
        self.materialized += 1;
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.run_count += 1;
        entry.last_run = Some(now);
        entry.last_job_id = Some(job_id);
        SchedulerMetrics::entry_materialized(&entry.name, entry.schedule_type.as_str());

        if entry.schedule_type == ScheduleType::Once {
            let name = entry.name.clone();
            self.entries.remove(&id);
            self.fired_once.insert(name);
            self.publish_gauge();
            return;
        }

        if advance {
            match entry.following_run(now) {
                Some(next) => entry.next_run = next,
                None => {
                    entry.enabled = false;
                    info!(entry = %entry.name, "No further runs, entry disabled");
                    return;
                }
            }
        }
        if entry.is_exhausted() {
            entry.enabled = false;
            info!(
                entry = %entry.name,
                run_count = entry.run_count,
                "Entry reached its run limit, disabled"
            );
        }
    }
}

struct DueEntry {
    id: EntryId,
    name: String,
    job: NewJob,
    pending: Vec<String>,
    job_dependencies: Vec<(String, JobId)>,
}

/// Materializes scheduled entries into queued jobs.
pub struct Scheduler {
    id: String,
    queue: Arc<PriorityJobQueue>,
    config: SchedulerConfig,
    clock: SharedClock,
    state: Mutex<SchedulerState>,

    /// Serializes ticks and manual triggers.
    tick_guard: Mutex<()>,
    /// Holds a stop request until the tick loop consumes it.
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler feeding `queue`.
    pub fn new(queue: Arc<PriorityJobQueue>, config: SchedulerConfig, clock: SharedClock) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: format!("scheduler-{}", Uuid::now_v7()),
            queue,
            config,
            clock,
            state: Mutex::new(SchedulerState::default()),
            tick_guard: Mutex::new(()),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Scheduler id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Schedule a single materialization at `at`.
    pub fn schedule_once(
        &self,
        name: impl Into<String>,
        at: DateTime<Utc>,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<EntryId> {
        let entry = self.base_entry(name.into(), ScheduleType::Once, at, job, options)?;
        self.insert(entry)
    }

    /// Schedule a materialization every `interval_ms`, the first at `start`.
    pub fn schedule_recurring(
        &self,
        name: impl Into<String>,
        start: DateTime<Utc>,
        interval_ms: u64,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<EntryId> {
        let min = self.config.min_interval_ms.max(1);
        if interval_ms < min {
            return Err(JobError::ScheduleValidation(format!(
                "interval {interval_ms}ms is below the minimum of {min}ms"
            )));
        }
        let mut entry = self.base_entry(name.into(), ScheduleType::Recurring, start, job, options)?;
        entry.interval_ms = Some(interval_ms);
        self.insert(entry)
    }

    /// Schedule materializations on a cron-lite expression.
    pub fn schedule_cron(
        &self,
        name: impl Into<String>,
        expression: &str,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<EntryId> {
        let name = name.into();
        let cron = CronLite::parse(expression)?;
        for warning in cron.warnings() {
            warn!(entry = %name, expression, warning = %warning, "Cron expression simplified");
        }
        let first = cron.next_after(self.clock.now()).ok_or_else(|| {
            JobError::ScheduleValidation(format!("cron expression '{expression}' never matches"))
        })?;
        let mut entry = self.base_entry(name, ScheduleType::Cron, first, job, options)?;
        entry.cron_expression = Some(expression.to_string());
        entry.warnings = cron.warnings().to_vec();
        entry.cron = Some(cron);
        self.insert(entry)
    }

    /// Register a declarative schedule.
    pub fn register_definition(&self, definition: &ScheduleDefinition) -> JobResult<EntryId> {
        let job = definition.job.clone();
        let options = ScheduleOptions::new().depends_on(definition.dependencies.iter().cloned());
        match &definition.kind {
            ScheduleKind::Once { at } => self.schedule_once(definition.name.clone(), *at, job, options),
            ScheduleKind::Recurring {
                start,
                interval_ms,
                max_runs,
                end_date,
            } => {
                let start = start.unwrap_or_else(|| self.clock.now());
                let options = ScheduleOptions {
                    max_runs: *max_runs,
                    end_date: *end_date,
                    ..options
                };
                self.schedule_recurring(definition.name.clone(), start, *interval_ms, job, options)
            }
            ScheduleKind::Cron {
                expression,
                max_runs,
                end_date,
            } => {
                let options = ScheduleOptions {
                    max_runs: *max_runs,
                    end_date: *end_date,
                    ..options
                };
                self.schedule_cron(definition.name.clone(), expression, job, options)
            }
        }
    }

    fn base_entry(
        &self,
        name: String,
        schedule_type: ScheduleType,
        next_run: DateTime<Utc>,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<ScheduledEntry> {
        if name.trim().is_empty() {
            return Err(JobError::ScheduleValidation("entry name must not be empty".into()));
        }
        if job.job_type.trim().is_empty() {
            return Err(JobError::ScheduleValidation("job type must not be empty".into()));
        }
        if options.max_runs == Some(0) {
            return Err(JobError::ScheduleValidation("max_runs must be at least 1".into()));
        }
        if options.end_date.is_some_and(|end| end < next_run) {
            return Err(JobError::ScheduleValidation("end_date precedes the first run".into()));
        }
        if options.dependencies.iter().any(|d| d == &name) {
            return Err(JobError::CycleDependency { unit: name });
        }

        Ok(ScheduledEntry {
            id: EntryId::new(),
            name,
            schedule_type,
            next_run,
            interval_ms: None,
            cron_expression: None,
            cron: None,
            max_runs: options.max_runs,
            end_date: options.end_date,
            dependencies: options.dependencies,
            enabled: true,
            run_count: 0,
            last_run: None,
            last_job_id: None,
            job,
            warnings: Vec::new(),
            created_at: self.clock.now(),
        })
    }

    fn insert(&self, entry: ScheduledEntry) -> JobResult<EntryId> {
        let mut state = self.state.lock();
        if state.entries.values().any(|e| e.name == entry.name) {
            return Err(JobError::ScheduleValidation(format!(
                "an entry named '{}' already exists",
                entry.name
            )));
        }

        let mut units: Vec<UnitSpec> = state
            .entries
            .values()
            .map(|e| UnitSpec::new(e.name.clone()).depends_on(e.dependencies.iter().cloned()))
            .collect();
        units.push(UnitSpec::new(entry.name.clone()).depends_on(entry.dependencies.iter().cloned()));
        resolve_dependencies(&units)?;

        let id = entry.id;
        info!(
            entry_id = %id,
            entry = %entry.name,
            schedule_type = %entry.schedule_type,
            next_run = %entry.next_run,
            "Scheduled entry registered"
        );
        state.fired_once.remove(&entry.name);
        state.entries.insert(id, entry);
        state.publish_gauge();
        Ok(id)
    }

    /// Materialize every enabled entry that is due and whose dependencies
    /// are satisfied.
    pub fn tick(&self) -> TickReport {
        let _guard = self.tick_guard.lock();
        let now = self.clock.now();

        let due: Vec<DueEntry> = {
            let mut state = self.state.lock();
            state.ticks += 1;
            let mut due: Vec<&ScheduledEntry> = state
                .entries
                .values()
                .filter(|e| e.enabled && e.next_run <= now)
                .collect();
            due.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.name.cmp(&b.name)));
            due.into_iter()
                .map(|entry| {
                    let (pending, job_dependencies) = state.check_dependencies(&entry.dependencies);
                    DueEntry {
                        id: entry.id,
                        name: entry.name.clone(),
                        job: entry.job.materialize(&entry.name, entry.id),
                        pending,
                        job_dependencies,
                    }
                })
                .collect()
        };

        let mut report = TickReport::default();
        for mut candidate in due {
            for (name, job_id) in &candidate.job_dependencies {
                if self.queue.status(*job_id) != Some(JobStatus::Completed) {
                    candidate.pending.push(name.clone());
                }
            }
            if !candidate.pending.is_empty() {
                debug!(entry = %candidate.name, pending = ?candidate.pending, "Dependencies unmet, skipping");
                SchedulerMetrics::entry_skipped(&candidate.name);
                self.state.lock().skipped += 1;
                report.skipped.push(JobError::UnsatisfiedDependency {
                    entry: candidate.name,
                    pending: candidate.pending,
                });
                continue;
            }

            match self.queue.submit(candidate.job) {
                Ok(job_id) => {
                    debug!(entry = %candidate.name, job_id = %job_id, "Entry materialized");
                    self.state
                        .lock()
                        .record_materialization(candidate.id, job_id, now, true);
                    report.materialized.push((candidate.id, job_id));
                }
                Err(e) => {
                    warn!(entry = %candidate.name, error = %e, "Queue rejected scheduled job, retrying next tick");
                    self.state.lock().rejected += 1;
                    report.rejected.push((candidate.id, e));
                }
            }
        }
        report
    }

    /// Materialize an entry now, ignoring `next_run` and dependencies.
    ///
    /// Disabled and exhausted entries are rejected.
    pub fn trigger_now(&self, id: EntryId) -> JobResult<JobId> {
        let _guard = self.tick_guard.lock();
        let job = {
            let state = self.state.lock();
            let entry = state.entries.get(&id).ok_or_else(|| JobError::entry_not_found(&id))?;
            if entry.is_exhausted() {
                return Err(JobError::InvalidState {
                    expected: "enabled entry".into(),
                    actual: "exhausted".into(),
                });
            }
            if !entry.enabled {
                return Err(JobError::InvalidState {
                    expected: "enabled entry".into(),
                    actual: "disabled".into(),
                });
            }
            entry.job.materialize(&entry.name, entry.id)
        };

        let job_id = self.queue.submit(job)?;
        let now = self.clock.now();
        self.state.lock().record_materialization(id, job_id, now, false);
        info!(entry_id = %id, job_id = %job_id, "Entry triggered manually");
        Ok(job_id)
    }

    /// Remove an entry.
    pub fn cancel(&self, id: EntryId) -> JobResult<ScheduledEntry> {
        let mut state = self.state.lock();
        let entry = state.entries.remove(&id).ok_or_else(|| JobError::entry_not_found(&id))?;
        state.publish_gauge();
        info!(entry_id = %id, entry = %entry.name, "Scheduled entry cancelled");
        Ok(entry)
    }

    /// Re-enable an entry. Exhausted entries stay disabled.
    pub fn enable(&self, id: EntryId) -> JobResult<()> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&id).ok_or_else(|| JobError::entry_not_found(&id))?;
        if entry.is_exhausted() {
            return Err(JobError::InvalidState {
                expected: "entry with runs remaining".into(),
                actual: "exhausted".into(),
            });
        }
        entry.enabled = true;
        debug!(entry = %entry.name, "Entry enabled");
        Ok(())
    }

    /// Stop materializing an entry without removing it.
    pub fn disable(&self, id: EntryId) -> JobResult<()> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&id).ok_or_else(|| JobError::entry_not_found(&id))?;
        entry.enabled = false;
        debug!(entry = %entry.name, "Entry disabled");
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, id: EntryId) -> Option<ScheduledEntry> {
        self.state.lock().entries.get(&id).cloned()
    }

    /// Look up an entry by name.
    pub fn find_by_name(&self, name: &str) -> Option<ScheduledEntry> {
        self.state.lock().entries.values().find(|e| e.name == name).cloned()
    }

    /// Entries matching `filter`, soonest first.
    pub fn entries(&self, filter: &EntryFilter) -> Vec<ScheduledEntry> {
        let mut entries: Vec<ScheduledEntry> = self
            .state
            .lock()
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.name.cmp(&b.name)));
        entries
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            id: self.id.clone(),
            running: self.running.load(Ordering::SeqCst),
            entries: state.entries.len(),
            enabled: state.entries.values().filter(|e| e.enabled).count(),
            materialized: state.materialized,
            skipped: state.skipped,
            rejected: state.rejected,
            ticks: state.ticks,
        }
    }

    /// Whether the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the tick loop until [`Scheduler::stop`] is called.
    ///
    /// A stop requested before the loop is first polled ends it on entry.
    pub async fn start(&self) -> JobResult<()> {
        if !self.config.enabled {
            info!(scheduler_id = %self.id, "Scheduler disabled by configuration");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Scheduler already running".to_string()));
        }

        info!(
            scheduler_id = %self.id,
            tick_interval_ms = self.config.tick_interval_ms,
            "Starting scheduler"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = interval(self.config.tick_interval());

        loop {
            tokio::select! {
                biased;

                () = stop_requested(&mut shutdown_rx) => {
                    info!(scheduler_id = %self.id, "Received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick();
                    if !report.is_empty() {
                        debug!(
                            materialized = report.materialized.len(),
                            skipped = report.skipped.len(),
                            rejected = report.rejected.len(),
                            "Scheduler tick"
                        );
                    }
                }
            }
        }

        self.shutdown.send_replace(false);
        self.running.store(false, Ordering::SeqCst);
        info!(scheduler_id = %self.id, "Scheduler stopped");
        Ok(())
    }

    /// Stop the tick loop.
    pub fn stop(&self) {
        info!(scheduler_id = %self.id, "Stopping scheduler...");
        self.shutdown.send_replace(true);
    }
}

/// Resolves once a stop has been requested on `rx`.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
