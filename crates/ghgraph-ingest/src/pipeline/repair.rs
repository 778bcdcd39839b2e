//! Retry policy and the repair queue for failed store mutations.
//!
//! Claims in the [`DedupeIndex`](super::DedupeIndex) are never released, so the
//! worker that wins a claim owns the corresponding mutation for the rest of
//! the run. When that mutation keeps failing, it lands in the
//! [`RepairQueue`] with enough detail to be replayed: first by the repair
//! pass at the end of the upload phase, later by `replay-failures` from a
//! JSON lines file.

use super::telemetry::Telemetry;
use crate::store::{GraphStore, Mutation, MutationReceipt};
use crate::{Error, Result};
use ghgraph_core::Interaction;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::time::Duration;

/// How often and how patiently a mutation is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

/// How a mutation that did not fail ended up in the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applied {
    /// Created by this run.
    Created(MutationReceipt),
    /// Present before this run first sent it.
    AlreadyPresent,
}

impl RetryPolicy {
    /// Apply `mutation`, retrying transient failures.
    ///
    /// On failure, returns the attempt count and the last error.
    pub async fn apply(
        &self,
        store: &dyn GraphStore,
        mutation: &Mutation,
    ) -> std::result::Result<Applied, (u32, Error)> {
        self.apply_after(store, mutation, 0).await
    }

    /// Like [`apply`](Self::apply) for a mutation already sent
    /// `prior_attempts` times.
    ///
    /// Stores create if absent and answer 409 for anything already there.
    /// Only the claim winner ever sends a given mutation, so a 409 after an
    /// earlier send means that send landed and its response was lost.
    pub async fn apply_after(
        &self,
        store: &dyn GraphStore,
        mutation: &Mutation,
        prior_attempts: u32,
    ) -> std::result::Result<Applied, (u32, Error)> {
        let total_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match mutation.apply(store).await {
                Ok(receipt) => return Ok(Applied::Created(receipt)),
                Err(Error::Store { status: 409, .. }) if prior_attempts + attempt > 1 => {
                    tracing::debug!("{} landed on an earlier attempt", mutation);
                    return Ok(Applied::Created(MutationReceipt::default()));
                }
                Err(Error::Store { status: 409, .. }) => {
                    tracing::debug!("{} already present in store", mutation);
                    return Ok(Applied::AlreadyPresent);
                }
                Err(err) => err,
            };

            if attempt >= total_attempts || !is_retryable(&err) {
                return Err((attempt, err));
            }

            let backoff = self.base_backoff.saturating_mul(1 << (attempt - 1).min(16));
            tracing::debug!(
                "Retrying {} in {:?} (attempt {}/{}): {}",
                mutation,
                backoff,
                attempt,
                total_attempts,
                err
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Fold an applied mutation into `telemetry`; pre-existing entities are
/// counted apart from created ones.
pub fn record_applied(telemetry: &Telemetry, mutation: &Mutation, applied: Applied) {
    match applied {
        Applied::Created(receipt) if mutation.is_vertex() => {
            telemetry.record_vertex(receipt.request_charge)
        }
        Applied::Created(receipt) => telemetry.record_edge(receipt.request_charge),
        Applied::AlreadyPresent => telemetry.record_existing(),
    }
}

/// Transport failures, throttling, server errors, and missing endpoints
/// (which another worker may still be creating) are worth retrying.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Http(_) | Error::Io(_) => true,
        Error::Store { status, .. } => matches!(status, 404 | 408 | 429 | 449 | 500..=599),
        _ => false,
    }
}

/// A mutation that could not be applied, identified precisely enough to
/// retry it without re-running the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMutation {
    pub mutation: Mutation,
    /// The interaction whose upload attempt issued the mutation.
    pub interaction: Option<Interaction>,
    /// Store calls made so far (zero if it was never sent).
    pub attempts: u32,
    /// The last error.
    pub error: String,
}

impl FailedMutation {
    pub fn new(
        mutation: Mutation,
        interaction: Option<&Interaction>,
        attempts: u32,
        error: &Error,
    ) -> Self {
        Self {
            mutation,
            interaction: interaction.cloned(),
            attempts,
            error: error.to_string(),
        }
    }
}

/// Mutations awaiting repair, shared by all upload workers.
#[derive(Debug, Default)]
pub struct RepairQueue {
    failed: Mutex<Vec<FailedMutation>>,
    failed_vertices: Mutex<HashSet<String>>,
}

impl RepairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failed mutation.
    pub fn push(&self, failed: FailedMutation) {
        if let Mutation::Vertex { id, .. } = &failed.mutation {
            self.failed_vertices.lock().insert(id.clone());
        }
        metrics::counter!("graph_mutation_failures_total").increment(1);
        self.failed.lock().push(failed);
    }

    /// Whether creating the vertex `id` has failed in this run.
    pub fn vertex_failed(&self, id: &str) -> bool {
        self.failed_vertices.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.failed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.lock().is_empty()
    }

    /// Take every queued mutation, leaving the queue empty.
    pub fn drain(&self) -> Vec<FailedMutation> {
        self.failed_vertices.lock().clear();
        std::mem::take(&mut *self.failed.lock())
    }
}

/// Replay failed mutations, vertices before edges.
///
/// Each mutation gets a fresh round of retries under `policy`. Successes are
/// folded into `telemetry`; what still fails is returned with its attempt
/// count accumulated.
pub async fn replay(
    store: &dyn GraphStore,
    mut failed: Vec<FailedMutation>,
    policy: &RetryPolicy,
    telemetry: &Telemetry,
) -> Vec<FailedMutation> {
    // stable: keeps edge order within each group
    failed.sort_by_key(|f| !f.mutation.is_vertex());

    let mut remaining = Vec::new();
    for mut entry in failed {
        match policy
            .apply_after(store, &entry.mutation, entry.attempts)
            .await
        {
            Ok(applied) => {
                record_applied(telemetry, &entry.mutation, applied);
                tracing::info!("Repaired {}", entry.mutation);
            }
            Err((attempts, err)) => {
                tracing::error!("Still failing after repair: {}: {}", entry.mutation, err);
                entry.attempts += attempts;
                entry.error = err.to_string();
                remaining.push(entry);
            }
        }
    }

    remaining
}

/// Write failures as JSON lines.
pub fn write_failures<W: Write>(mut writer: W, failed: &[FailedMutation]) -> Result<()> {
    for entry in failed {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read failures written by [`write_failures`]; blank lines are ignored.
pub fn read_failures<R: BufRead>(reader: R) -> Result<Vec<FailedMutation>> {
    let mut failed = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        failed.push(serde_json::from_str(&line)?);
    }
    Ok(failed)
}
