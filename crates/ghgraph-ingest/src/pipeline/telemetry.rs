//! Throughput accounting for the upload phase.
//!
//! [`Telemetry`] holds lock-free running totals that every upload worker folds
//! its results into. [`ProgressReporter`] renders them as a single,
//! continuously refreshed line until it is explicitly stopped.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running totals for one pipeline run.
#[derive(Debug)]
pub struct Telemetry {
    vertices: AtomicU64,
    edges: AtomicU64,
    /// Mutations the store already had, not counted as created.
    existing: AtomicU64,
    /// `f64` bit pattern, updated with a compare-and-swap loop.
    consumption: AtomicU64,
    started: Instant,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Start a new clock with all counters at zero.
    pub fn new() -> Self {
        Self {
            vertices: AtomicU64::new(0),
            edges: AtomicU64::new(0),
            existing: AtomicU64::new(0),
            consumption: AtomicU64::new(0f64.to_bits()),
            started: Instant::now(),
        }
    }

    /// Record a created vertex and the charge it cost.
    pub fn record_vertex(&self, charge: f64) {
        self.vertices.fetch_add(1, Ordering::Relaxed);
        self.add_consumption(charge);
        metrics::counter!("graph_vertices_created_total").increment(1);
    }

    /// Record a created edge and the charge it cost.
    pub fn record_edge(&self, charge: f64) {
        self.edges.fetch_add(1, Ordering::Relaxed);
        self.add_consumption(charge);
        metrics::counter!("graph_edges_created_total").increment(1);
    }

    /// Record a vertex or edge that was already in the store.
    pub fn record_existing(&self) {
        self.existing.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("graph_mutations_existing_total").increment(1);
    }

    /// Fold a store charge into the cumulative consumption.
    pub fn add_consumption(&self, charge: f64) {
        if charge == 0.0 {
            return;
        }
        // fetch_update retries until no other worker raced the update
        let _ = self
            .consumption
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + charge).to_bits())
            });
    }

    pub fn vertices(&self) -> u64 {
        self.vertices.load(Ordering::Relaxed)
    }

    pub fn edges(&self) -> u64 {
        self.edges.load(Ordering::Relaxed)
    }

    pub fn existing(&self) -> u64 {
        self.existing.load(Ordering::Relaxed)
    }

    pub fn consumption(&self) -> f64 {
        f64::from_bits(self.consumption.load(Ordering::Acquire))
    }

    /// Read all counters at once, computing the rate against elapsed time.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::new(
            self.vertices(),
            self.edges(),
            self.consumption(),
            self.started.elapsed(),
        )
    }
}

/// Point-in-time view of [`Telemetry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub vertices: u64,
    pub edges: u64,
    /// Cumulative resource units charged by the store.
    pub consumption: f64,
    pub elapsed: Duration,
    /// Resource units per second; zero before any time has elapsed.
    pub rate: f64,
}

impl TelemetrySnapshot {
    pub fn new(vertices: u64, edges: u64, consumption: f64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { consumption / secs } else { 0.0 };
        Self {
            vertices,
            edges,
            consumption,
            elapsed,
            rate,
        }
    }

    /// The single-line progress display.
    pub fn progress_line(&self) -> String {
        format!(
            "Vertices: {} Edges: {} RU/s: {:.2}",
            self.vertices, self.edges, self.rate
        )
    }

    fn publish(&self) {
        metrics::gauge!("graph_request_charge_total").set(self.consumption);
        metrics::gauge!("graph_request_charge_per_second").set(self.rate);
    }
}

/// Periodic progress display running alongside the upload workers.
///
/// Stopping cancels the ticking task and waits for it, so the final line is
/// always written after the last tick.
pub struct ProgressReporter {
    cancel: CancellationToken,
    handle: JoinHandle<TelemetrySnapshot>,
}

impl ProgressReporter {
    /// Spawn a reporter that writes to stderr every `interval`.
    pub fn spawn(telemetry: Arc<Telemetry>, interval: Duration) -> Self {
        Self::spawn_with(telemetry, interval, |line| {
            let mut stderr = std::io::stderr().lock();
            // Padding clears leftovers from a longer previous line.
            let _ = write!(stderr, "\r{line:<72}");
            let _ = stderr.flush();
        })
    }

    /// Spawn a reporter that hands each rendered line to `sink`.
    pub fn spawn_with<F>(telemetry: Arc<Telemetry>, interval: Duration, mut sink: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = telemetry.snapshot();
                        snapshot.publish();
                        sink(&snapshot.progress_line());
                    }
                }
            }

            let last = telemetry.snapshot();
            last.publish();
            sink(&last.progress_line());
            last
        });

        Self { cancel, handle }
    }

    /// Stop reporting and return the final snapshot.
    pub async fn stop(self) -> TelemetrySnapshot {
        self.cancel.cancel();
        match self.handle.await {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!("Progress reporter task failed: {}", e);
                TelemetrySnapshot::new(0, 0, 0.0, Duration::ZERO)
            }
        }
    }
}
