//! End-to-end behaviour of the upload pipeline against in-process stores.

use async_trait::async_trait;
use ghgraph_core::{Interaction, InteractionType, OWNERSHIP_VERBS};
use ghgraph_ingest::pipeline::{DedupeIndex, RetryPolicy, Telemetry, Uploader, UploaderConfig};
use ghgraph_ingest::store::{GraphStore, MemoryGraphStore, MutationReceipt};
use ghgraph_ingest::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a [`MemoryGraphStore`], tracking concurrent calls. Selected
/// vertices can be failed or slowed down, and selected edges can be applied
/// with their response lost.
struct InstrumentedStore {
    inner: MemoryGraphStore,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    vertex_faults: Mutex<HashMap<String, (u16, u32)>>,
    vertex_delays: Mutex<HashMap<String, Duration>>,
    lost_edge_responses: Mutex<HashMap<String, u32>>,
}

impl InstrumentedStore {
    fn new() -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            vertex_faults: Mutex::new(HashMap::new()),
            vertex_delays: Mutex::new(HashMap::new()),
            lost_edge_responses: Mutex::new(HashMap::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject creating vertex `id` with `status` for the next `times` calls.
    fn fail_vertex(self, id: &str, status: u16, times: u32) -> Self {
        self.vertex_faults
            .lock()
            .insert(id.to_string(), (status, times));
        self
    }

    /// Hold back creating vertex `id` by `delay`.
    fn delay_vertex(self, id: &str, delay: Duration) -> Self {
        self.vertex_delays.lock().insert(id.to_string(), delay);
        self
    }

    /// Apply the next `times` edges labelled `label`, then answer 503 as if
    /// the response never arrived.
    fn lose_edge_response(self, label: &str, times: u32) -> Self {
        self.lost_edge_responses
            .lock()
            .insert(label.to_string(), times);
        self
    }

    fn take_lost_response(&self, label: &str) -> bool {
        let mut lost = self.lost_edge_responses.lock();
        match lost.get_mut(label) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn injected_fault(&self, id: &str) -> Option<Error> {
        let mut faults = self.vertex_faults.lock();
        let (status, left) = faults.get_mut(id)?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        Some(Error::Store {
            status: *status,
            message: "injected".to_string(),
        })
    }
}

#[async_trait]
impl GraphStore for InstrumentedStore {
    fn name(&self) -> &'static str {
        "instrumented"
    }

    async fn create_vertex(&self, label: &str, id: &str) -> Result<MutationReceipt> {
        self.enter().await;
        let delay = self.vertex_delays.lock().get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.injected_fault(id) {
            Some(err) => Err(err),
            None => self.inner.create_vertex(label, id).await,
        };
        self.exit();
        result
    }

    async fn create_edge(&self, from: &str, to: &str, label: &str) -> Result<MutationReceipt> {
        self.enter().await;
        let result = match self.inner.create_edge(from, to, label).await {
            Ok(_) if self.take_lost_response(label) => Err(Error::Store {
                status: 503,
                message: "connection reset".to_string(),
            }),
            other => other,
        };
        self.exit();
        result
    }

    async fn reset(&self) -> Result<MutationReceipt> {
        self.inner.reset().await
    }
}

fn config(concurrency: usize) -> UploaderConfig {
    UploaderConfig {
        concurrency,
        retry: RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
        },
        repair: true,
    }
}

fn uploader(store: Arc<dyn GraphStore>, concurrency: usize) -> Uploader {
    Uploader::new(
        store,
        Arc::new(DedupeIndex::new()),
        Arc::new(Telemetry::new()),
        config(concurrency),
    )
}

fn watch(user: &str) -> Interaction {
    Interaction::new(user, "bob", "bob-repo1", InteractionType::WatchRepo)
}

#[tokio::test]
async fn test_duplicate_watch_creates_one_edge_pair() {
    let store = Arc::new(MemoryGraphStore::new());
    let report = uploader(store.clone(), 32)
        .run(vec![watch("alice"), watch("alice")])
        .await
        .unwrap();

    let verbs = InteractionType::WatchRepo.verbs();
    assert_eq!(store.edge_labels("alice", "bob-repo1"), vec![verbs.forward]);
    assert_eq!(store.edge_labels("bob-repo1", "alice"), vec![verbs.inverse]);

    assert_eq!(store.vertex_count(), 3);
    assert_eq!(store.vertex_label("alice").as_deref(), Some("user"));
    assert_eq!(store.vertex_label("bob").as_deref(), Some("user"));
    assert_eq!(store.vertex_label("bob-repo1").as_deref(), Some("repo"));
    assert_eq!(store.edge_count(), 4);

    assert_eq!(report.attempts, 2);
    assert_eq!(report.dedupe.interactions, 1);
}

#[tokio::test]
async fn test_fork_then_watch_shares_repo_and_ownership() {
    let store = Arc::new(MemoryGraphStore::new());
    uploader(store.clone(), 32)
        .run(vec![
            Interaction::new("alice", "bob", "bob-repo1", InteractionType::ForkRepo),
            watch("carol"),
        ])
        .await
        .unwrap();

    assert_eq!(store.vertex_count(), 4);
    assert_eq!(store.count_edges_labelled(OWNERSHIP_VERBS.forward), 1);
    assert_eq!(store.count_edges_labelled(OWNERSHIP_VERBS.inverse), 1);
    assert_eq!(store.edge_labels("alice", "bob-repo1"), vec!["forked"]);
    assert_eq!(
        store.edge_labels("carol", "bob-repo1"),
        vec![InteractionType::WatchRepo.verbs().forward]
    );
    assert_eq!(store.edge_count(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_create_each_entity_once() {
    // MemoryGraphStore rejects duplicate vertices, so any double create
    // would surface as a failure in the report.
    let store = Arc::new(MemoryGraphStore::new());
    let interactions: Vec<_> = (0..500)
        .map(|i| {
            let user = format!("user{}", i % 10);
            let owner = format!("owner{}", i % 3);
            let repo = format!("{owner}-repo{}", i % 5);
            let kind = InteractionType::ALL[i % InteractionType::ALL.len()];
            Interaction::new(&user, &owner, &repo, kind)
        })
        .collect();

    let report = uploader(store.clone(), 32).run(interactions).await.unwrap();

    assert_eq!(report.attempts, 500);
    assert_eq!(report.failed_mutations, 0);
    assert_eq!(report.dedupe.users, 13);
    assert_eq!(report.dedupe.repos, 15);

    assert_eq!(store.vertex_count(), 13 + 15);
    let triples = report.dedupe.interactions;
    assert_eq!(store.edge_count(), 2 * 15 + 2 * triples);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_attempts_are_bounded() {
    let store = Arc::new(InstrumentedStore::new().with_delay(Duration::from_millis(2)));
    let interactions: Vec<_> = (0..64)
        .map(|i| {
            Interaction::new(
                &format!("user{i}"),
                &format!("owner{i}"),
                &format!("owner{i}-repo"),
                InteractionType::OpenIssue,
            )
        })
        .collect();

    let report = uploader(store.clone(), 4).run(interactions).await.unwrap();

    assert_eq!(report.attempts, 64);
    let max = store.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 4, "saw {max} concurrent store calls");
    assert!(max >= 2, "uploads never overlapped");
}

#[tokio::test]
async fn test_telemetry_matches_store() {
    let store = Arc::new(MemoryGraphStore::with_charge(2.5));
    let telemetry = Arc::new(Telemetry::new());
    let uploader = Uploader::new(
        store.clone(),
        Arc::new(DedupeIndex::new()),
        telemetry.clone(),
        config(8),
    );

    uploader
        .run(vec![
            watch("alice"),
            watch("carol"),
            Interaction::new("alice", "erin", "erin-tool", InteractionType::PullRequest),
            Interaction::new("erin", "erin", "erin-tool", InteractionType::CommentIssue),
        ])
        .await
        .unwrap();

    assert_eq!(telemetry.vertices(), store.vertex_count() as u64);
    assert_eq!(telemetry.edges(), store.edge_count() as u64);
    let mutations = (store.vertex_count() + store.edge_count()) as f64;
    assert!((telemetry.consumption() - 2.5 * mutations).abs() < 1e-9);
}

#[tokio::test]
async fn test_failed_repo_vertex_is_repaired() {
    // Three upload attempts fail (one try plus two retries), the repair pass succeeds
    let store = Arc::new(InstrumentedStore::new().fail_vertex("bob-repo1", 503, 3));
    let report = uploader(store.clone(), 4)
        .run(vec![watch("alice")])
        .await
        .unwrap();

    // Repo vertex, both ownership edges and both interaction edges
    assert_eq!(report.failed_mutations, 5);
    assert_eq!(report.attempts_with_failures, 1);
    assert_eq!(report.repaired, 5);
    assert!(report.unrepaired.is_empty());

    assert_eq!(store.inner.vertex_count(), 3);
    assert_eq!(store.inner.edge_count(), 4);
    assert_eq!(report.telemetry.vertices, 3);
    assert_eq!(report.telemetry.edges, 4);
}

#[tokio::test]
async fn test_permanent_failure_is_reported_not_fatal() {
    let store = Arc::new(InstrumentedStore::new().fail_vertex("bob-repo1", 400, u32::MAX));
    let report = uploader(store.clone(), 4)
        .run(vec![watch("alice"), watch("carol")])
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert_eq!(report.repaired, 0);
    // Repo vertex, its two ownership edges, then two edges per interaction
    assert_eq!(report.unrepaired.len(), 7);
    assert!(report.unrepaired[0].mutation.is_vertex());
    assert!(report.unrepaired.iter().all(|f| f.interaction.is_some()));

    // Everything that does not touch the repo still landed
    assert_eq!(store.inner.vertex_count(), 3);
    assert_eq!(store.inner.edge_count(), 0);
    assert_eq!(report.dedupe.repos, 1);
}

#[tokio::test]
async fn test_lost_edge_response_creates_one_edge() {
    let verbs = InteractionType::WatchRepo.verbs();
    let store = Arc::new(InstrumentedStore::new().lose_edge_response(verbs.forward, 1));
    let report = uploader(store.clone(), 4)
        .run(vec![watch("alice"), watch("alice")])
        .await
        .unwrap();

    assert_eq!(store.inner.edge_labels("alice", "bob-repo1"), vec![verbs.forward]);
    assert_eq!(store.inner.edge_count(), 4);
    assert_eq!(report.failed_mutations, 0);
    assert_eq!(report.already_present, 0);
    assert_eq!(report.telemetry.edges, 4);
}

#[tokio::test]
async fn test_edge_racing_its_user_vertex_is_repaired() {
    // The first interaction claims alice and stalls creating her vertex; the
    // fork then reaches the store with edges whose user endpoint is missing.
    let store = Arc::new(InstrumentedStore::new().delay_vertex("alice", Duration::from_millis(50)));
    let report = uploader(store.clone(), 4)
        .run(vec![
            watch("alice"),
            Interaction::new("alice", "bob", "bob-repo1", InteractionType::ForkRepo),
        ])
        .await
        .unwrap();

    assert_eq!(report.failed_mutations, 2);
    assert_eq!(report.repaired, 2);
    assert!(report.unrepaired.is_empty());

    assert_eq!(store.inner.vertex_count(), 3);
    assert_eq!(store.inner.edge_count(), 6);
    let watch_verbs = InteractionType::WatchRepo.verbs();
    let fork_verbs = InteractionType::ForkRepo.verbs();
    for label in [
        OWNERSHIP_VERBS.forward,
        OWNERSHIP_VERBS.inverse,
        watch_verbs.forward,
        watch_verbs.inverse,
        fork_verbs.forward,
        fork_verbs.inverse,
    ] {
        assert_eq!(store.inner.count_edges_labelled(label), 1, "{label}");
    }
    assert_eq!(report.telemetry.edges, 6);
}

#[test]
fn test_concurrent_claims_have_one_winner() {
    let index = DedupeIndex::new();
    let winners = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                for user in ["alice", "bob", "carol"] {
                    if index.claim_user(user) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                }
                if index.claim_interaction("alice", InteractionType::ForkRepo, "bob-repo1") {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 4);
}
