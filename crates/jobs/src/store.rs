// crates/jobs/src/store.rs
//! Concurrency-safe store of job records.
//!
//! A single coarse `RwLock` guards the id→record map. Mutation frequency is
//! bounded by human-triggered jobs plus periodic progress ticks, so one lock
//! is enough; what matters is that every mutation leaves the record in a
//! consistent lifecycle state and that notification dispatch happens after
//! the lock is released.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::events::{JobEvent, JobEventKind};
use crate::types::{HistoryEntry, Job, JobStatus, JobType};

/// Same-process observer invoked synchronously on every mutation of a job.
pub type ObserverFn = Box<dyn Fn(&Job) + Send + Sync>;

/// Error string recorded when a job ends cancelled.
pub const CANCELLED_ERROR: &str = "Job cancelled by user";

/// Thread-safe mapping from job id to [`Job`].
///
/// Shared between the request-handling layer and the executor's workers via
/// `Arc`. Every mutation is published on a broadcast feed (for the
/// notification bridge) and to any registered per-job observers.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    observers: Mutex<HashMap<String, Vec<ObserverFn>>>,
    events_tx: broadcast::Sender<JobEvent>,
}

impl JobStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            jobs: RwLock::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            events_tx,
        }
    }

    /// Subscribe to the mutation event feed (consumed by the notification
    /// bridge and the SSE route).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events_tx.subscribe()
    }

    /// Create a new pending job and insert it into the store.
    pub fn create(&self, job_type: JobType, config: Map<String, Value>) -> Job {
        let job = Job::new(job_type, config);
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(job.id.clone(), job.clone());
            }
            Err(e) => tracing::error!("RwLock poisoned writing jobs map: {e}"),
        }
        job
    }

    /// Point lookup, returning a snapshot clone.
    pub fn get(&self, id: &str) -> Option<Job> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }

    /// List jobs sorted by `created_at` descending, optionally filtered,
    /// truncated to `limit`.
    pub fn list(
        &self,
        type_filter: Option<JobType>,
        status_filter: Option<JobStatus>,
        limit: usize,
    ) -> Vec<Job> {
        let mut jobs: Vec<Job> = match self.jobs.read() {
            Ok(jobs) => jobs
                .values()
                .filter(|j| type_filter.map_or(true, |t| j.job_type == t))
                .filter(|j| status_filter.map_or(true, |s| j.status == s))
                .cloned()
                .collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                return Vec::new();
            }
        };
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    /// Request cancellation of a job.
    ///
    /// A pending job transitions to `cancelled` immediately (no worker will
    /// ever observe the flag); a running job is asked to stop through its
    /// progress callback. Returns false for unknown or already-terminal jobs.
    pub fn cancel(&self, id: &str) -> bool {
        let snapshot = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return false;
                }
            };
            let Some(job) = jobs.get_mut(id) else {
                return false;
            };
            if job.status.is_terminal() {
                return false;
            }
            job.cancellation_requested = true;
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Cancelled;
                job.error = Some(CANCELLED_ERROR.to_string());
                job.completed_at = Some(Utc::now());
            }
            job.clone()
        };
        self.dispatch(&snapshot, JobEventKind::Lifecycle, Map::new());
        true
    }

    /// Merge a metrics delta into the job (last-write-wins per key) and
    /// optionally append a timestamped snapshot of the delta to its history.
    pub fn update_metrics(
        &self,
        id: &str,
        delta: Map<String, Value>,
        append_history: bool,
    ) -> bool {
        let snapshot = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return false;
                }
            };
            let Some(job) = jobs.get_mut(id) else {
                return false;
            };
            for (key, value) in delta.clone() {
                job.metrics.insert(key, value);
            }
            if append_history {
                job.history.push(HistoryEntry {
                    timestamp: Utc::now(),
                    values: delta.clone(),
                });
            }
            job.clone()
        };
        self.dispatch(&snapshot, JobEventKind::Metrics, delta);
        true
    }

    /// Evict terminal jobs whose `completed_at` is older than `max_age`.
    /// Non-terminal jobs are never removed regardless of age.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let removed: Vec<String> = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return 0;
                }
            };
            let stale: Vec<String> = jobs
                .iter()
                .filter(|(_, j)| {
                    j.status.is_terminal() && j.completed_at.is_some_and(|t| t < cutoff)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                jobs.remove(id);
            }
            stale
        };
        if !removed.is_empty() {
            if let Ok(mut observers) = self.observers.lock() {
                for id in &removed {
                    observers.remove(id);
                }
            }
            tracing::debug!(count = removed.len(), "evicted old terminal jobs");
        }
        removed.len()
    }

    /// Register a same-process observer called synchronously on every
    /// mutation of the given job. Lighter-weight than the channel transport
    /// for consumers living in this process.
    pub fn observe(&self, id: &str, observer: ObserverFn) {
        match self.observers.lock() {
            Ok(mut observers) => observers.entry(id.to_string()).or_default().push(observer),
            Err(e) => tracing::error!("Mutex poisoned registering observer: {e}"),
        }
    }

    // ── Executor-side transitions ───────────────────────────────────────

    /// Transition pending→running and return a start snapshot, or `None` if
    /// the job is unknown or already left `pending` (e.g. cancelled while
    /// queued). Sets `started_at` exactly once.
    pub(crate) fn begin(&self, id: &str) -> Option<Job> {
        let snapshot = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return None;
                }
            };
            let job = jobs.get_mut(id)?;
            if job.status != JobStatus::Pending {
                return None;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        };
        self.dispatch(&snapshot, JobEventKind::Lifecycle, Map::new());
        Some(snapshot)
    }

    /// Record a progress tick. Returns `true` when the task should keep
    /// going, `false` once cancellation has been requested (or the job is
    /// gone). Progress is clamped into [0, 100].
    pub(crate) fn record_progress(&self, id: &str, progress: f64, message: &str) -> bool {
        let (snapshot, keep_going) = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return false;
                }
            };
            let Some(job) = jobs.get_mut(id) else {
                return false;
            };
            if job.status == JobStatus::Running {
                job.progress = progress.clamp(0.0, 100.0);
                job.progress_message = Some(message.to_string());
            }
            (job.clone(), !job.cancellation_requested)
        };
        self.dispatch(&snapshot, JobEventKind::Lifecycle, Map::new());
        keep_going
    }

    /// Terminal transition for a task that returned normally.
    ///
    /// Cancellation takes precedence: if the flag was set at any point during
    /// execution the job ends `cancelled` even though the task produced a
    /// result. Otherwise it completes with `progress` forced to 100.
    pub(crate) fn finish(&self, id: &str, result: Map<String, Value>) {
        let snapshot = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return;
                }
            };
            let Some(job) = jobs.get_mut(id) else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            if job.cancellation_requested {
                job.status = JobStatus::Cancelled;
                job.error = Some(CANCELLED_ERROR.to_string());
            } else {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.progress = 100.0;
            }
            job.completed_at = Some(Utc::now());
            job.clone()
        };
        self.dispatch(&snapshot, JobEventKind::Lifecycle, Map::new());
    }

    /// Terminal transition for a task that returned an error or panicked.
    pub(crate) fn fail(&self, id: &str, error: String, traceback: String) {
        let snapshot = {
            let mut jobs = match self.jobs.write() {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    return;
                }
            };
            let Some(job) = jobs.get_mut(id) else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Failed;
            job.error = Some(error);
            job.error_traceback = Some(traceback);
            job.completed_at = Some(Utc::now());
            job.clone()
        };
        self.dispatch(&snapshot, JobEventKind::Lifecycle, Map::new());
    }

    /// Publish a mutation: broadcast for the bridge (never blocks, zero
    /// subscribers is fine) and synchronous per-job observers. Called with
    /// the jobs lock released.
    fn dispatch(&self, job: &Job, kind: JobEventKind, metrics_delta: Map<String, Value>) {
        let _ = self.events_tx.send(JobEvent {
            job: job.summary(),
            kind,
            metrics_delta,
        });
        match self.observers.lock() {
            Ok(observers) => {
                if let Some(list) = observers.get(&job.id) {
                    for observer in list {
                        observer(job);
                    }
                }
            }
            Err(e) => tracing::error!("Mutex poisoned reading observers: {e}"),
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
