// crates/jobs/src/types.rs
//! Types for the background job system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of background work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Training,
    Evaluation,
    Prediction,
    Automl,
    Export,
    Analysis,
    Maintenance,
    UpdateDownload,
    UpdateApply,
    VenvCreate,
    VenvInstall,
}

impl JobType {
    /// Wire name, also used as the id prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Training => "training",
            JobType::Evaluation => "evaluation",
            JobType::Prediction => "prediction",
            JobType::Automl => "automl",
            JobType::Export => "export",
            JobType::Analysis => "analysis",
            JobType::Maintenance => "maintenance",
            JobType::UpdateDownload => "update_download",
            JobType::UpdateApply => "update_apply",
            JobType::VenvCreate => "venv_create",
            JobType::VenvInstall => "venv_install",
        }
    }
}

/// Lifecycle status of a background job.
///
/// Transitions are one-directional: pending → running → {completed, failed,
/// cancelled}, plus pending → cancelled for cancel-before-start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// True for states that permit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One timestamped metrics snapshot appended during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub values: Map<String, Value>,
}

/// A single unit of background work.
///
/// Identity (`id`, `job_type`, `config`, `created_at`) is fixed at creation;
/// everything else is mutated through the [`JobStore`](crate::JobStore) as the
/// job moves through its lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Percent complete in [0, 100].
    pub progress: f64,
    pub progress_message: Option<String>,
    /// Caller-supplied description of what to execute. Opaque to the core.
    pub config: Map<String, Value>,
    /// Set only on successful completion.
    pub result: Option<Map<String, Value>>,
    /// Short human-readable failure message. Set on failure and cancellation.
    pub error: Option<String>,
    /// Full diagnostic detail behind `error`.
    pub error_traceback: Option<String>,
    pub metrics: Map<String, Value>,
    /// Append-only; entries are never removed or reordered.
    pub history: Vec<HistoryEntry>,
    /// Set once by a cancel request, never cleared.
    pub cancellation_requested: bool,
}

impl Job {
    pub(crate) fn new(job_type: JobType, config: Map<String, Value>) -> Self {
        Self {
            id: new_job_id(job_type),
            job_type,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            progress_message: None,
            config,
            result: None,
            error: None,
            error_traceback: None,
            metrics: Map::new(),
            history: Vec::new(),
            cancellation_requested: false,
        }
    }

    /// Wall-clock duration in seconds, `None` until the job has started.
    /// For running jobs this is the elapsed time so far.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    /// Serialized form for polling consumers. History is exposed separately.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            job_type: self.job_type,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress,
            progress_message: self.progress_message.clone(),
            config: self.config.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            metrics: self.metrics.clone(),
            duration_seconds: self.duration_seconds(),
        }
    }
}

/// Wire form of a [`Job`] returned by the HTTP layer and carried in
/// notification payloads.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub progress_message: Option<String>,
    pub config: Map<String, Value>,
    pub result: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub metrics: Map<String, Value>,
    pub duration_seconds: Option<f64>,
}

/// Allocate a job id: type prefix plus a random 12-hex suffix.
fn new_job_id(job_type: JobType) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", job_type.as_str(), &suffix[..12])
}
