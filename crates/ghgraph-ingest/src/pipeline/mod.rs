//! Upload pipeline for decoded interactions.
//!
//! - [`DedupeIndex`] - in-memory claim sets for users, repositories and interactions
//! - [`Uploader`] - bounded-concurrency upload of interactions as vertices and edges
//! - [`RepairQueue`] - failed mutations, replayed after the upload phase
//! - [`Telemetry`] - run counters and the periodic progress line
//!
//! # Architecture
//!
//! ```text
//! [InteractionLog] → [Uploader] → claim? → [GraphStore]
//!                        ↓                      ↓
//!                  [DedupeIndex]         failure → [RepairQueue] → replay
//! ```
//!
//! Claims are the only coordination between upload tasks. Whoever claims an
//! entity first is the only one that ever sends its mutation.

mod dedupe;
mod repair;
mod telemetry;
mod uploader;

pub use dedupe::{DedupeIndex, DedupeStats};
pub use repair::{
    Applied, FailedMutation, RepairQueue, RetryPolicy, read_failures, record_applied, replay,
    write_failures,
};
pub use telemetry::{ProgressReporter, Telemetry, TelemetrySnapshot};
pub use uploader::{AttemptOutcome, DEFAULT_CONCURRENCY, UploadReport, Uploader, UploaderConfig};
