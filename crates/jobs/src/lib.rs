// crates/jobs/src/lib.rs
//! Background job system for long-running ML pipeline work.
//!
//! Provides:
//! - `JobStore` — thread-safe registry of job records with lifecycle
//!   transitions, metrics history, and age-based cleanup
//! - `JobExecutor` — bounded worker pool with cooperative cancellation
//! - `ProgressReporter` — the callback handed to task functions
//! - `JobEvent` / `message_type_for` — mutation events and their mapping
//!   onto notification message types
//!
//! Transport (HTTP/WebSocket) lives in `trainyard-server`; this crate knows
//! nothing about connections, only about jobs and the events they emit.

pub mod events;
pub mod executor;
pub mod store;
pub mod types;

pub use events::{message_type_for, JobEvent, JobEventKind, MessageType};
pub use executor::{JobExecutor, ProgressReporter};
pub use store::{JobStore, ObserverFn, CANCELLED_ERROR};
pub use types::{HistoryEntry, Job, JobStatus, JobSummary, JobType};
