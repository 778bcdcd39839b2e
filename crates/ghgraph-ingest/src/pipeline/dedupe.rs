//! In-memory deduplication index for graph entities.
//!
//! The [`DedupeIndex`] decides which entities an interaction introduces for
//! the first time. Every `claim_*` call is a "first caller wins" check-and-set:
//! it returns `true` exactly once per distinct key for the lifetime of the
//! index, no matter how many workers race on it.
//!
//! # Key Design
//!
//! - `owned_repos`: user login → repo ids known to be owned by that user. The
//!   keys double as the set of known users and owners.
//! - `interactions`: user login → `(type, repo)` pairs already materialized.
//!
//! Both maps are sharded [`DashMap`]s and each value carries its own mutex, so
//! claims on unrelated keys never contend on a single global lock. A set is
//! only ever mutated while its owner's mutex is held and its shard is
//! read-locked.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use ghgraph_core::InteractionType;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::hash::Hash;

type Guarded<T> = Mutex<HashSet<T>>;

/// Deduplication index shared by all upload workers of one pipeline run.
///
/// Thread-safe: share it across tasks via `Arc<DedupeIndex>`.
#[derive(Debug, Default)]
pub struct DedupeIndex {
    owned_repos: DashMap<String, Guarded<String>>,
    interactions: DashMap<String, Guarded<(InteractionType, String)>>,
}

impl DedupeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a user (or repository owner) vertex.
    ///
    /// Returns `true` exactly once per distinct `id`.
    pub fn claim_user(&self, id: &str) -> bool {
        if self.owned_repos.contains_key(id) {
            return false;
        }

        match self.owned_repos.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Mutex::default());
                true
            }
        }
    }

    /// Claim a repository vertex under its owner.
    ///
    /// Returns `true` exactly once per distinct `repo`. The owner's entry is
    /// created on demand if absent, which also marks the owner as a known
    /// user; the uploader therefore always claims the owner first.
    pub fn claim_repo(&self, owner: &str, repo: &str) -> bool {
        let repos = get_or_insert(&self.owned_repos, owner);
        let claimed = repos.lock().insert(repo.to_string());
        claimed
    }

    /// Claim the interaction edge pair for `(user, kind, repo)`.
    ///
    /// Returns `true` exactly once per distinct triple.
    pub fn claim_interaction(&self, user: &str, kind: InteractionType, repo: &str) -> bool {
        let seen = get_or_insert(&self.interactions, user);
        let claimed = seen.lock().insert((kind, repo.to_string()));
        claimed
    }

    /// Snapshot of how many entities have been claimed so far.
    pub fn stats(&self) -> DedupeStats {
        DedupeStats {
            users: self.owned_repos.len(),
            repos: total_len(&self.owned_repos),
            interactions: total_len(&self.interactions),
        }
    }
}

/// Read-lock the entry for `key`, inserting an empty set first if needed.
fn get_or_insert<'a, T>(map: &'a DashMap<String, Guarded<T>>, key: &str) -> Ref<'a, String, Guarded<T>>
where
    T: Eq + Hash,
{
    match map.get(key) {
        Some(existing) => existing,
        None => map.entry(key.to_string()).or_default().downgrade(),
    }
}

fn total_len<T>(map: &DashMap<String, Guarded<T>>) -> usize {
    map.iter().map(|entry| entry.value().lock().len()).sum()
}

/// Counts of claimed entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupeStats {
    /// Distinct users and repository owners.
    pub users: usize,
    /// Distinct repositories.
    pub repos: usize,
    /// Distinct `(user, type, repo)` triples.
    pub interactions: usize,
}
