//! In-process graph store.
//!
//! Behaves like a strict remote store: creating a vertex or an edge that
//! already exists answers 409, and an edge whose endpoints do not exist
//! answers 404. Nothing is silently ignored.

use super::{GraphStore, MutationReceipt};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Charge reported for every mutation unless configured otherwise.
const DEFAULT_CHARGE: f64 = 1.0;

#[derive(Debug, Default)]
struct Graph {
    /// vertex id → label
    vertices: HashMap<String, String>,
    /// (from, to, label) in creation order
    edges: Vec<(String, String, String)>,
    edge_index: HashSet<(String, String, String)>,
}

/// In-memory [`GraphStore`].
#[derive(Debug)]
pub struct MemoryGraphStore {
    graph: Mutex<Graph>,
    charge: f64,
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::with_charge(DEFAULT_CHARGE)
    }

    /// Report `charge` resource units for every mutation.
    pub fn with_charge(charge: f64) -> Self {
        Self {
            graph: Mutex::new(Graph::default()),
            charge,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.lock().vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.lock().edges.len()
    }

    /// Label of the vertex with `id`, if it exists.
    pub fn vertex_label(&self, id: &str) -> Option<String> {
        self.graph.lock().vertices.get(id).cloned()
    }

    /// Labels of all edges `from → to`, in creation order.
    pub fn edge_labels(&self, from: &str, to: &str) -> Vec<String> {
        self.graph
            .lock()
            .edges
            .iter()
            .filter(|(f, t, _)| f == from && t == to)
            .map(|(_, _, label)| label.clone())
            .collect()
    }

    /// Number of edges carrying `label`.
    pub fn count_edges_labelled(&self, label: &str) -> usize {
        self.graph
            .lock()
            .edges
            .iter()
            .filter(|(_, _, l)| l == label)
            .count()
    }

    fn receipt(&self) -> MutationReceipt {
        MutationReceipt {
            request_charge: self.charge,
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_vertex(&self, label: &str, id: &str) -> Result<MutationReceipt> {
        let mut graph = self.graph.lock();
        if graph.vertices.contains_key(id) {
            return Err(Error::Store {
                status: 409,
                message: format!("vertex '{id}' already exists"),
            });
        }
        graph.vertices.insert(id.to_string(), label.to_string());
        Ok(self.receipt())
    }

    async fn create_edge(&self, from: &str, to: &str, label: &str) -> Result<MutationReceipt> {
        let mut graph = self.graph.lock();
        for endpoint in [from, to] {
            if !graph.vertices.contains_key(endpoint) {
                return Err(Error::Store {
                    status: 404,
                    message: format!("vertex '{endpoint}' not found"),
                });
            }
        }
        let edge = (from.to_string(), to.to_string(), label.to_string());
        if !graph.edge_index.insert(edge.clone()) {
            return Err(Error::Store {
                status: 409,
                message: format!("edge '{from}' -[{label}]-> '{to}' already exists"),
            });
        }
        graph.edges.push(edge);
        Ok(self.receipt())
    }

    async fn reset(&self) -> Result<MutationReceipt> {
        let mut graph = self.graph.lock();
        graph.vertices.clear();
        graph.edges.clear();
        graph.edge_index.clear();
        Ok(self.receipt())
    }
}
