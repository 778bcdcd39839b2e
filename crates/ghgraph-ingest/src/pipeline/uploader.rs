//! Bounded-concurrency upload of interactions into the graph store.
//!
//! Each interaction runs the same four-step protocol, every step an
//! independent "if newly claimed, then mutate" check:
//!
//! 1. claim the user → create its vertex
//! 2. claim the repository owner → create its vertex
//! 3. claim the repository → create its vertex, then `owns` / `owned by`
//! 4. claim `(user, type, repo)` → create the verb pair edges
//!
//! Steps run strictly in order within one interaction; interactions run
//! concurrently, at most `concurrency` at a time. A step that fails does not
//! stop the steps after it, and never releases its claim; the failure goes to
//! the [`RepairQueue`] and is retried by the repair pass once every
//! interaction has completed.

use super::dedupe::{DedupeIndex, DedupeStats};
use super::repair::{Applied, FailedMutation, RepairQueue, RetryPolicy, record_applied, replay};
use super::telemetry::{Telemetry, TelemetrySnapshot};
use crate::store::{GraphStore, Mutation};
use crate::{Error, Result};
use ghgraph_core::{Interaction, OWNERSHIP_VERBS, REPO_LABEL, USER_LABEL};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of interactions uploaded concurrently.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// Configuration for the uploader.
#[derive(Debug, Clone, Copy)]
pub struct UploaderConfig {
    /// Maximum interactions in flight at once.
    pub concurrency: usize,

    /// Retry behaviour for individual mutations.
    pub retry: RetryPolicy,

    /// Replay failed mutations once all interactions are done.
    pub repair: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            repair: true,
        }
    }
}

/// What one interaction's upload attempt did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub vertices_created: u32,
    pub edges_created: u32,
    /// Vertices and edges the store already had.
    pub already_present: u32,
    /// Mutations that failed or were deferred.
    pub failures: u32,
}

/// Summary of an upload run.
#[derive(Debug, Clone)]
pub struct UploadReport {
    /// Interactions processed.
    pub attempts: usize,

    /// Attempts in which at least one mutation failed.
    pub attempts_with_failures: usize,

    /// Attempts whose task panicked.
    pub attempts_panicked: usize,

    /// Mutations queued for repair during the upload.
    pub failed_mutations: usize,

    /// Queued mutations the repair pass managed to apply.
    pub repaired: usize,

    /// Mutations that are still missing from the store.
    pub unrepaired: Vec<FailedMutation>,

    /// Vertices and edges the store had before this run sent them.
    pub already_present: u64,

    /// Claimed entities.
    pub dedupe: DedupeStats,

    /// Counters when the run finished.
    pub telemetry: TelemetrySnapshot,
}

/// State shared by every upload task.
struct UploadContext {
    store: Arc<dyn GraphStore>,
    dedupe: Arc<DedupeIndex>,
    telemetry: Arc<Telemetry>,
    repairs: RepairQueue,
    retry: RetryPolicy,
}

/// Drives interactions through the upload protocol.
pub struct Uploader {
    ctx: Arc<UploadContext>,
    config: UploaderConfig,
}

impl Uploader {
    /// Create an uploader over explicitly owned run state.
    pub fn new(
        store: Arc<dyn GraphStore>,
        dedupe: Arc<DedupeIndex>,
        telemetry: Arc<Telemetry>,
        config: UploaderConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(UploadContext {
                store,
                dedupe,
                telemetry,
                repairs: RepairQueue::new(),
                retry: config.retry,
            }),
            config,
        }
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.ctx.telemetry
    }

    pub fn dedupe(&self) -> &Arc<DedupeIndex> {
        &self.ctx.dedupe
    }

    /// Upload every interaction, then run the repair pass.
    ///
    /// Returns once every attempt has completed, successfully or not.
    pub async fn run<I>(&self, interactions: I) -> Result<UploadReport>
    where
        I: IntoIterator<Item = Interaction>,
    {
        let width = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(width));
        let mut join_set = JoinSet::new();
        let mut tally = Tally::default();

        tracing::info!(
            "Uploading interactions to {} store with concurrency {}",
            self.ctx.store.name(),
            width
        );

        for interaction in interactions {
            // Acquire before spawning so no more than `width` tasks exist.
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::Task(format!("upload semaphore closed: {e}")))?;
            let ctx = Arc::clone(&self.ctx);

            join_set.spawn(async move {
                let _permit = permit;
                ctx.upload(&interaction).await
            });

            while let Some(joined) = join_set.try_join_next() {
                tally.add(joined);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            tally.add(joined);
        }

        let failed = self.ctx.repairs.drain();
        let failed_mutations = failed.len();
        let unrepaired = if self.config.repair && !failed.is_empty() {
            tracing::info!("Repairing {} failed mutations", failed.len());
            replay(
                self.ctx.store.as_ref(),
                failed,
                &self.ctx.retry,
                &self.ctx.telemetry,
            )
            .await
        } else {
            failed
        };

        Ok(UploadReport {
            attempts: tally.attempts,
            attempts_with_failures: tally.with_failures,
            attempts_panicked: tally.panicked,
            failed_mutations,
            repaired: failed_mutations - unrepaired.len(),
            unrepaired,
            already_present: self.ctx.telemetry.existing(),
            dedupe: self.ctx.dedupe.stats(),
            telemetry: self.ctx.telemetry.snapshot(),
        })
    }
}

impl UploadContext {
    async fn upload(&self, interaction: &Interaction) -> AttemptOutcome {
        let mut outcome = AttemptOutcome::default();
        let Interaction {
            user,
            repo_owner,
            repo,
            kind,
        } = interaction;

        if self.dedupe.claim_user(user) {
            self.vertex(USER_LABEL, user, interaction, &mut outcome)
                .await;
        }

        if self.dedupe.claim_user(repo_owner) {
            self.vertex(USER_LABEL, repo_owner, interaction, &mut outcome)
                .await;
        }

        if self.dedupe.claim_repo(repo_owner, repo) {
            let created = self.vertex(REPO_LABEL, repo, interaction, &mut outcome).await;
            let owns = Mutation::edge(repo_owner, repo, OWNERSHIP_VERBS.forward);
            let owned_by = Mutation::edge(repo, repo_owner, OWNERSHIP_VERBS.inverse);

            if created {
                self.edge(owns, interaction, &mut outcome).await;
                self.edge(owned_by, interaction, &mut outcome).await;
            } else {
                let cause = Error::DependencyFailed(format!("repo vertex '{repo}'"));
                self.defer(owns, interaction, &cause, &mut outcome);
                self.defer(owned_by, interaction, &cause, &mut outcome);
            }
        }

        if self.dedupe.claim_interaction(user, *kind, repo) {
            let verbs = kind.verbs();
            self.edge(Mutation::edge(user, repo, verbs.forward), interaction, &mut outcome)
                .await;
            self.edge(Mutation::edge(repo, user, verbs.inverse), interaction, &mut outcome)
                .await;
        }

        tracing::trace!("Uploaded {}: {:?}", interaction, outcome);
        outcome
    }

    async fn vertex(
        &self,
        label: &str,
        id: &str,
        interaction: &Interaction,
        outcome: &mut AttemptOutcome,
    ) -> bool {
        let mutation = Mutation::vertex(label, id);
        match self.retry.apply(self.store.as_ref(), &mutation).await {
            Ok(applied) => {
                record_applied(&self.telemetry, &mutation, applied);
                match applied {
                    Applied::Created(_) => outcome.vertices_created += 1,
                    Applied::AlreadyPresent => outcome.already_present += 1,
                }
                true
            }
            Err((attempts, err)) => {
                self.fail(mutation, interaction, attempts, &err, outcome);
                false
            }
        }
    }

    async fn edge(&self, mutation: Mutation, interaction: &Interaction, outcome: &mut AttemptOutcome) {
        let missing = match &mutation {
            Mutation::Edge { from, to, .. } => [from, to]
                .into_iter()
                .find(|id| self.repairs.vertex_failed(id))
                .cloned(),
            Mutation::Vertex { .. } => None,
        };
        if let Some(missing) = missing {
            let cause = Error::DependencyFailed(format!("vertex '{missing}'"));
            self.defer(mutation, interaction, &cause, outcome);
            return;
        }

        match self.retry.apply(self.store.as_ref(), &mutation).await {
            Ok(applied) => {
                record_applied(&self.telemetry, &mutation, applied);
                match applied {
                    Applied::Created(_) => outcome.edges_created += 1,
                    Applied::AlreadyPresent => outcome.already_present += 1,
                }
            }
            Err((attempts, err)) => self.fail(mutation, interaction, attempts, &err, outcome),
        }
    }

    fn fail(
        &self,
        mutation: Mutation,
        interaction: &Interaction,
        attempts: u32,
        err: &Error,
        outcome: &mut AttemptOutcome,
    ) {
        tracing::warn!(
            user = %interaction.user,
            repo = %interaction.repo,
            kind = %interaction.kind,
            attempts,
            "Failed to create {}: {}",
            mutation,
            err
        );
        self.repairs
            .push(FailedMutation::new(mutation, Some(interaction), attempts, err));
        outcome.failures += 1;
    }

    /// Queue a mutation without sending it.
    fn defer(
        &self,
        mutation: Mutation,
        interaction: &Interaction,
        cause: &Error,
        outcome: &mut AttemptOutcome,
    ) {
        tracing::debug!("Deferring {}: {}", mutation, cause);
        self.repairs
            .push(FailedMutation::new(mutation, Some(interaction), 0, cause));
        outcome.failures += 1;
    }
}

#[derive(Default)]
struct Tally {
    attempts: usize,
    with_failures: usize,
    panicked: usize,
}

impl Tally {
    fn add(&mut self, joined: std::result::Result<AttemptOutcome, tokio::task::JoinError>) {
        self.attempts += 1;
        match joined {
            Ok(outcome) if outcome.failures > 0 => self.with_failures += 1,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Upload task failed: {}", e);
                self.panicked += 1;
            }
        }
    }
}
