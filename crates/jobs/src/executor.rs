// crates/jobs/src/executor.rs
//! Bounded worker pool that runs job task functions.
//!
//! Task bodies are synchronous and may block for hours (training loops,
//! AutoML search, downloads), so they run on the blocking thread pool.
//! A semaphore caps how many jobs run at once; submissions past the cap
//! stay `pending` until a slot frees. Cancellation is cooperative only:
//! the executor cannot interrupt a running task, it can only answer `false`
//! on the next progress tick and settle the record afterwards.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::store::JobStore;
use crate::types::Job;

/// Handed to every task function for reporting progress and observing
/// cancellation.
pub struct ProgressReporter {
    store: Arc<JobStore>,
    job_id: String,
}

impl ProgressReporter {
    /// Record a progress tick (clamped into [0, 100]) with a human-readable
    /// message. Returns `true` to keep going, `false` once cancellation has
    /// been requested — a well-behaved task checks this and returns early.
    pub fn update(&self, progress: f64, message: &str) -> bool {
        self.store.record_progress(&self.job_id, progress, message)
    }
}

/// Runs task functions against jobs held in a [`JobStore`].
///
/// Submission is fire-and-forget: task errors never surface to the caller,
/// they become the job's `failed` state. Whatever path the task takes —
/// return, error, panic, cancellation — the record ends in exactly one
/// terminal state with `completed_at` set.
pub struct JobExecutor {
    store: Arc<JobStore>,
    permits: Arc<Semaphore>,
}

impl JobExecutor {
    /// Create an executor running at most `workers` jobs simultaneously.
    pub fn new(store: Arc<JobStore>, workers: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Submit a previously created job for execution.
    ///
    /// The task receives a snapshot of the job (taken at the moment it starts
    /// running) and a [`ProgressReporter`]. Its `Ok` value is coerced to a
    /// JSON map and stored as the result, unless cancellation was requested
    /// during the run — then the job ends `cancelled` regardless.
    pub fn submit<F>(&self, job_id: &str, task: F)
    where
        F: FnOnce(&Job, &ProgressReporter) -> anyhow::Result<Value> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let id = job_id.to_string();

        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&permits).acquire_owned().await else {
                // Semaphore closed: executor is shutting down.
                return;
            };

            // Cancelled (or vanished) while queued — the task is never invoked.
            let Some(job) = store.begin(&id) else {
                tracing::debug!(job_id = %id, "job left pending before start, skipping");
                return;
            };

            let reporter = ProgressReporter {
                store: Arc::clone(&store),
                job_id: id.clone(),
            };
            let outcome = tokio::task::spawn_blocking(move || task(&job, &reporter)).await;

            match outcome {
                Ok(Ok(value)) => store.finish(&id, coerce_result(value)),
                Ok(Err(err)) => {
                    tracing::warn!(job_id = %id, error = %err, "job task failed");
                    store.fail(&id, err.to_string(), format!("{err:?}"));
                }
                Err(join_err) if join_err.is_panic() => {
                    let msg = panic_message(join_err.into_panic());
                    tracing::error!(job_id = %id, panic = %msg, "job task panicked");
                    store.fail(&id, msg.clone(), format!("task panicked: {msg}"));
                }
                Err(join_err) => {
                    tracing::error!(job_id = %id, error = %join_err, "job task aborted");
                    store.fail(&id, "task aborted".into(), join_err.to_string());
                }
            }
        });
    }
}

/// Task results are stored as mappings; non-object values get wrapped.
fn coerce_result(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "task panicked".to_string(),
        },
    }
}
