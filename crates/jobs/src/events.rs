// crates/jobs/src/events.rs
//! Job mutation events and their mapping onto notification message types.
//!
//! The mapping is a pure function over the job snapshot so it can be tested
//! without any transport attached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::JobSummary;
use crate::JobStatus;

/// Closed set of notification message kinds carried on the wire.
///
/// Job lifecycle kinds are produced by [`message_type_for`]; the domain kinds
/// (training_epoch, maintenance_*, refit_*) are published by task functions
/// through the channel layer; the system kinds (ping..error) belong to the
/// connection protocol itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobCancelled,
    JobMetrics,
    TrainingEpoch,
    MaintenanceStarted,
    MaintenanceProgress,
    MaintenanceCompleted,
    MaintenanceFailed,
    RefitStarted,
    RefitProgress,
    RefitStep,
    RefitCompleted,
    RefitFailed,
    Ping,
    Pong,
    Connected,
    Subscribed,
    Unsubscribed,
    Error,
}

/// What kind of mutation produced a [`JobEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEventKind {
    /// A status or progress transition.
    Lifecycle,
    /// A metrics merge via `update_metrics`.
    Metrics,
}

/// One job mutation, published on the store's broadcast feed.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job: JobSummary,
    pub kind: JobEventKind,
    /// The merged delta for `Metrics` events, empty otherwise.
    pub metrics_delta: Map<String, Value>,
}

/// Choose the wire message type for a job mutation.
///
/// Cancelled jobs are reported as `job_failed` carrying the cancellation
/// error string; `pending` mutations produce no message (creation is not
/// announced, only the first running tick is).
pub fn message_type_for(event: &JobEvent) -> Option<MessageType> {
    if event.kind == JobEventKind::Metrics {
        return Some(MessageType::JobMetrics);
    }
    match event.job.status {
        JobStatus::Pending => None,
        JobStatus::Running => {
            if event.job.progress > 0.0 {
                Some(MessageType::JobProgress)
            } else {
                Some(MessageType::JobStarted)
            }
        }
        JobStatus::Completed => Some(MessageType::JobCompleted),
        JobStatus::Failed | JobStatus::Cancelled => Some(MessageType::JobFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Job, JobType};
    use pretty_assertions::assert_eq;

    fn event(status: JobStatus, progress: f64, kind: JobEventKind) -> JobEvent {
        let mut job = Job::new(JobType::Training, Map::new());
        job.status = status;
        job.progress = progress;
        JobEvent {
            job: job.summary(),
            kind,
            metrics_delta: Map::new(),
        }
    }

    #[test]
    fn test_message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::JobStarted).unwrap(),
            "\"job_started\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::RefitStep).unwrap(),
            "\"refit_step\""
        );
        let parsed: MessageType = serde_json::from_str("\"unsubscribed\"").unwrap();
        assert_eq!(parsed, MessageType::Unsubscribed);
    }

    #[test]
    fn test_first_running_tick_is_started() {
        let ev = event(JobStatus::Running, 0.0, JobEventKind::Lifecycle);
        assert_eq!(message_type_for(&ev), Some(MessageType::JobStarted));
    }

    #[test]
    fn test_running_with_progress_is_progress() {
        let ev = event(JobStatus::Running, 12.5, JobEventKind::Lifecycle);
        assert_eq!(message_type_for(&ev), Some(MessageType::JobProgress));
    }

    #[test]
    fn test_terminal_mappings() {
        let ev = event(JobStatus::Completed, 100.0, JobEventKind::Lifecycle);
        assert_eq!(message_type_for(&ev), Some(MessageType::JobCompleted));

        let ev = event(JobStatus::Failed, 30.0, JobEventKind::Lifecycle);
        assert_eq!(message_type_for(&ev), Some(MessageType::JobFailed));

        // Cancellation goes out as job_failed, not job_cancelled.
        let ev = event(JobStatus::Cancelled, 30.0, JobEventKind::Lifecycle);
        assert_eq!(message_type_for(&ev), Some(MessageType::JobFailed));
    }

    #[test]
    fn test_pending_emits_nothing() {
        let ev = event(JobStatus::Pending, 0.0, JobEventKind::Lifecycle);
        assert_eq!(message_type_for(&ev), None);
    }

    #[test]
    fn test_metrics_event_wins_over_status() {
        let ev = event(JobStatus::Running, 50.0, JobEventKind::Metrics);
        assert_eq!(message_type_for(&ev), Some(MessageType::JobMetrics));
    }
}
