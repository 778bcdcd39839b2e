//! Graph store adapters.
//!
//! The pipeline only needs three operations from a store: create a vertex,
//! create an edge, and wipe everything. None of them is assumed to be
//! idempotent; the [`DedupeIndex`](crate::DedupeIndex) is what guarantees each
//! entity is requested once.
//!
//! # Available Stores
//!
//! - [`GremlinStore`] - Gremlin Server HTTP endpoint
//! - [`MemoryGraphStore`] - In-process graph for dry runs and tests

mod gremlin;
mod memory;

pub use gremlin::{GremlinConfig, GremlinStore};
pub use memory::MemoryGraphStore;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the store reported for one successful mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MutationReceipt {
    /// Resource units the store charged for the call.
    pub request_charge: f64,
}

/// A remote graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Human-readable name for this store (used in logs).
    fn name(&self) -> &'static str;

    /// Create a vertex with the given label and id.
    async fn create_vertex(&self, label: &str, id: &str) -> Result<MutationReceipt>;

    /// Create a directed edge `from → to` with the given label.
    async fn create_edge(&self, from: &str, to: &str, label: &str) -> Result<MutationReceipt>;

    /// Remove every vertex and edge.
    async fn reset(&self) -> Result<MutationReceipt>;
}

/// A single store mutation, precise enough to be replayed later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Vertex { label: String, id: String },
    Edge { from: String, to: String, label: String },
}

impl Mutation {
    pub fn vertex(label: &str, id: &str) -> Self {
        Mutation::Vertex {
            label: label.to_string(),
            id: id.to_string(),
        }
    }

    pub fn edge(from: &str, to: &str, label: &str) -> Self {
        Mutation::Edge {
            from: from.to_string(),
            to: to.to_string(),
            label: label.to_string(),
        }
    }

    pub fn is_vertex(&self) -> bool {
        matches!(self, Mutation::Vertex { .. })
    }

    /// Send this mutation to `store`.
    pub async fn apply(&self, store: &dyn GraphStore) -> Result<MutationReceipt> {
        match self {
            Mutation::Vertex { label, id } => store.create_vertex(label, id).await,
            Mutation::Edge { from, to, label } => store.create_edge(from, to, label).await,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Vertex { label, id } => write!(f, "{label} vertex '{id}'"),
            Mutation::Edge { from, to, label } => write!(f, "edge '{from}' -[{label}]-> '{to}'"),
        }
    }
}
