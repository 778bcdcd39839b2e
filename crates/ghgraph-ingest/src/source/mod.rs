//! Archive shard source.
//!
//! The decode phase turns hourly, gzip-compressed archive shards into
//! [`Interaction`] records:
//!
//! ```text
//! [ShardId] → [ShardCache] → [decode_shard] → [InteractionLog]
//!                 ↓
//!          HTTP download on miss
//! ```
//!
//! Shards decode in parallel and independently. A shard that fails to fetch
//! or decompress contributes nothing and is reported in its [`ShardReport`];
//! its siblings are unaffected.

mod archive;
mod cache;
mod shard;

pub use archive::{ArchiveConfig, ArchiveSource, ShardDecode, decode_shard};
pub use cache::ShardCache;
pub use shard::ShardId;

use ghgraph_core::Interaction;
use parking_lot::Mutex;

/// Append-only collection of decoded interactions shared by all shard tasks.
#[derive(Debug, Default)]
pub struct InteractionLog {
    records: Mutex<Vec<Interaction>>,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a shard's records in one step.
    pub fn extend(&self, batch: Vec<Interaction>) {
        self.records.lock().extend(batch);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Take every record, leaving the log empty.
    pub fn take(&self) -> Vec<Interaction> {
        std::mem::take(&mut *self.records.lock())
    }
}

/// Outcome of decoding one shard.
#[derive(Debug, Clone)]
pub struct ShardReport {
    pub shard: ShardId,

    /// Non-empty lines read.
    pub events: usize,

    /// Interactions appended to the log.
    pub interactions: usize,

    /// Lines that could not be decoded.
    pub malformed: usize,

    /// Why the shard contributed nothing, if it failed.
    pub error: Option<String>,
}

impl ShardReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Statistics from a decode phase.
#[derive(Debug, Clone, Default)]
pub struct DecodeStats {
    pub shards_decoded: usize,
    pub shards_failed: usize,
    pub total_events: usize,
    pub interactions: usize,
    pub malformed_lines: usize,

    /// Per-shard reports, in shard order.
    pub reports: Vec<ShardReport>,
}

impl DecodeStats {
    fn from_reports(mut reports: Vec<ShardReport>) -> Self {
        reports.sort_by_key(|r| r.shard);

        let mut stats = DecodeStats::default();
        for report in &reports {
            if report.is_ok() {
                stats.shards_decoded += 1;
            } else {
                stats.shards_failed += 1;
            }
            stats.total_events += report.events;
            stats.interactions += report.interactions;
            stats.malformed_lines += report.malformed;
        }
        stats.reports = reports;
        stats
    }

    /// Reports of the shards that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ShardReport> {
        self.reports.iter().filter(|r| !r.is_ok())
    }
}
