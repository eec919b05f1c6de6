//! Handler seam: the code that actually runs a job.

use crate::job::JobContext;
use conductor_resilience::ExecutionError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Result returned by a handler.
pub type HandlerResult = Result<Value, ExecutionError>;

/// Runs jobs of one type: `(payload, context) -> value`.
///
/// Closures `Fn(Value, JobContext) -> impl Future<Output = HandlerResult>`
/// implement this trait.
pub trait JobHandler: Send + Sync {
    /// Execute the job.
    fn handle(&self, payload: Value, ctx: JobContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> JobHandler for F
where
    F: Fn(Value, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, payload: Value, ctx: JobContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(payload, ctx))
    }
}

/// Handlers keyed by job type, plus an optional default.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    default: RwLock<Option<Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type, replacing any previous one.
    pub fn register(&self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        let job_type = job_type.into();
        info!(job_type = %job_type, "Registered job handler");
        self.handlers.write().insert(job_type, Arc::new(handler));
    }

    /// Register an async closure for a job type.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(job_type, handler);
    }

    /// Handler used for job types with no registered handler.
    pub fn set_default<F, Fut>(&self, handler: F)
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        *self.default.write() = Some(Arc::new(handler));
    }

    /// Resolves the handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .get(job_type)
            .cloned()
            .or_else(|| self.default.read().clone())
    }

    /// Returns true if a job type has a dedicated handler.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.read().contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .field("has_default", &self.default.read().is_some())
            .finish()
    }
}
