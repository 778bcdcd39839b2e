//! Prometheus metrics helpers for ghgraph.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ghgraph_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("graph_vertices_created_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`archive_`, `graph_`, `ingest_`)
//! - Suffix: unit or type (`_total`, `_per_second`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Start the Prometheus metrics HTTP server on `0.0.0.0:<port>/metrics`.
///
/// The listener is bound before returning so bind errors surface to the
/// caller; serving happens on a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded by the pipeline.
fn register_common_metrics() {
    // =========================================================================
    // Decode phase
    // =========================================================================

    describe_counter!(
        "archive_shards_decoded_total",
        "Archive shards fully decoded into interactions"
    );
    describe_counter!(
        "archive_shards_failed_total",
        "Archive shards that failed to fetch or decompress"
    );
    describe_counter!(
        "archive_interactions_total",
        "Interactions extracted from archive shards"
    );
    describe_counter!(
        "archive_lines_malformed_total",
        "Archive lines skipped because they could not be decoded"
    );

    // =========================================================================
    // Upload phase
    // =========================================================================

    describe_counter!(
        "graph_vertices_created_total",
        "Vertices created in the graph store"
    );
    describe_counter!("graph_edges_created_total", "Edges created in the graph store");
    describe_counter!(
        "graph_mutations_existing_total",
        "Vertices and edges already present in the graph store"
    );
    describe_counter!(
        "graph_mutation_failures_total",
        "Store mutations that failed after all retries"
    );
    describe_gauge!(
        "graph_request_charge_total",
        "Cumulative resource units charged by the graph store"
    );
    describe_gauge!(
        "graph_request_charge_per_second",
        "Resource units charged per second since the upload phase started"
    );
    describe_gauge!(
        "ingest_running",
        "Whether an ingestion run is in progress (1=yes, 0=no)"
    );
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

/// Hold gauge `name` at 1 while `work` runs, and at 0 once it finishes,
/// whatever it returns.
pub async fn while_running<F: Future>(name: &'static str, work: F) -> F::Output {
    set_gauge(name, 1.0);
    let output = work.await;
    set_gauge(name, 0.0);
    output
}
