//! Ghgraph ingestion pipeline components.
//!
//! This crate loads GitHub archive interactions into a property graph of
//! users and repositories.
//!
//! # Modules
//!
//! - [`source`] - Shard cache, download and parallel decoding
//! - [`pipeline`] - Deduplication, concurrent upload, repair and telemetry
//! - [`store`] - Graph store trait with Gremlin and in-memory backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ArchiveSource  │  Hourly gzip NDJSON shards, cached on disk
//! └────────┬────────┘
//!          │  decode phase (one task per shard)
//!          ▼
//! ┌─────────────────┐
//! │ InteractionLog  │  Every decoded interaction, duplicates included
//! └────────┬────────┘
//!          │  upload phase (at most N interactions in flight)
//!          ▼
//! ┌─────────────────┐
//! │    Uploader     │  DedupeIndex claims gate every mutation
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   GraphStore    │  Gremlin server, or in memory for dry runs
//! └─────────────────┘
//! ```
//!
//! The two phases never overlap: uploading starts only after every shard has
//! finished decoding.

pub mod error;
pub mod pipeline;
pub mod source;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use pipeline::{
    DedupeIndex, DedupeStats, FailedMutation, ProgressReporter, RetryPolicy, Telemetry,
    TelemetrySnapshot, UploadReport, Uploader, UploaderConfig,
};

pub use source::{ArchiveConfig, ArchiveSource, DecodeStats, InteractionLog, ShardCache, ShardId};

pub use store::{GraphStore, GremlinConfig, GremlinStore, MemoryGraphStore, Mutation};
