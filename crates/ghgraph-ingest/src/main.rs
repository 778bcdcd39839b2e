//! Ghgraph archive ingestion.
//!
//! Loads GitHub archive interactions into a Gremlin graph in two phases:
//! every shard is fetched and decoded first, then the decoded interactions
//! are uploaded with bounded concurrency while a progress line is printed
//! to stderr.
//!
//! # Usage
//!
//! ```bash
//! # The original five day window against a local Gremlin server
//! ghgraph-ingest --gremlin-url http://localhost:8182/gremlin
//!
//! # One hour, no store, just to see the numbers
//! ghgraph-ingest --days 1 --hours 0..1 --dry-run
//!
//! # Keep the existing graph and save anything that could not be written
//! ghgraph-ingest --skip-reset --failures-out failures.jsonl
//! ```
//!
//! Every option can also be set through the environment (`GHGRAPH_*`) or a
//! `.env` file in the working directory.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::Parser;
use ghgraph_core::metrics::{init_metrics, start_metrics_server, while_running};
use ghgraph_ingest::pipeline::write_failures;
use ghgraph_ingest::{
    ArchiveConfig, ArchiveSource, DecodeStats, DedupeIndex, GraphStore, GremlinConfig,
    GremlinStore, InteractionLog, MemoryGraphStore, ProgressReporter, RetryPolicy, ShardId,
    Telemetry, UploadReport, Uploader, UploaderConfig,
};
use std::fs::File;
use std::io::BufWriter;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Ghgraph archive ingestion.
#[derive(Parser, Debug)]
#[command(name = "ghgraph-ingest")]
#[command(about = "Load GitHub archive interactions into a Gremlin graph")]
#[command(version)]
struct Args {
    /// Directory shards are cached in
    #[arg(long, env = "GHGRAPH_CACHE_DIR", default_value = "./data")]
    cache_dir: PathBuf,

    /// Base URL missing shards are downloaded from
    #[arg(long, env = "GHGRAPH_ARCHIVE_URL", default_value = ghgraph_core::DEFAULT_ARCHIVE_URL)]
    archive_url: String,

    /// Only use shards already in the cache
    #[arg(long)]
    offline: bool,

    /// First day of the archive window
    #[arg(long, env = "GHGRAPH_START_DATE", default_value = "2017-06-01")]
    start_date: NaiveDate,

    /// Number of days in the archive window
    #[arg(long, env = "GHGRAPH_DAYS", default_value = "5")]
    days: u32,

    /// Hours of each day to load, as `START..END` or a single hour
    #[arg(long, env = "GHGRAPH_HOURS", default_value = "0..24", value_parser = parse_hours)]
    hours: Range<u8>,

    /// Gremlin server endpoint
    #[arg(long, env = "GHGRAPH_GREMLIN_URL", default_value = "http://localhost:8182/gremlin")]
    gremlin_url: String,

    /// Gremlin user name
    #[arg(long, env = "GHGRAPH_GREMLIN_USER")]
    gremlin_user: Option<String>,

    /// Gremlin password or key
    #[arg(long, env = "GHGRAPH_GREMLIN_PASSWORD", hide_env_values = true)]
    gremlin_password: Option<String>,

    /// Upload into an in-memory graph instead of the Gremlin server
    #[arg(long)]
    dry_run: bool,

    /// Keep the existing graph instead of dropping every vertex first
    #[arg(long)]
    skip_reset: bool,

    /// Maximum interactions uploaded at once
    #[arg(long, env = "GHGRAPH_CONCURRENCY", default_value = "32")]
    concurrency: usize,

    /// Retries per mutation before it is queued for repair
    #[arg(long, env = "GHGRAPH_MAX_RETRIES", default_value = "3")]
    max_retries: u32,

    /// Progress line interval in milliseconds
    #[arg(long, default_value = "1000")]
    report_interval_ms: u64,

    /// Write mutations that could not be repaired to this JSON lines file
    #[arg(long)]
    failures_out: Option<PathBuf>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "GHGRAPH_METRICS_PORT", default_value = "0")]
    metrics_port: u16,
}

fn parse_hours(value: &str) -> std::result::Result<Range<u8>, String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u8>()
            .map_err(|e| format!("invalid hour '{s}': {e}"))
    };

    let range = match value.split_once("..") {
        Some((start, end)) => parse(start)?..parse(end)?,
        None => {
            let hour = parse(value)?;
            hour..hour.saturating_add(1)
        }
    };

    if range.start >= range.end || range.end > 24 {
        return Err(format!("hour range {value} must be non-empty and within 0..24"));
    }
    Ok(range)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so env fallbacks see it
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("ghgraph_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Ghgraph ingestion starting...");

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle)
            .await
            .context("Failed to start metrics server")?;
    }

    while_running("ingest_running", run(&args)).await
}

async fn run(args: &Args) -> Result<()> {
    let store = init_store(args).await?;

    tracing::info!("Configuration:");
    tracing::info!("  Cache: {}", args.cache_dir.display());
    tracing::info!(
        "  Archive: {}",
        if args.offline { "offline" } else { args.archive_url.as_str() }
    );
    tracing::info!(
        "  Window: {} + {} days, hours {}..{}",
        args.start_date,
        args.days,
        args.hours.start,
        args.hours.end
    );
    tracing::info!("  Store: {}", store.name());
    tracing::info!("  Concurrency: {}", args.concurrency);

    // Decode phase
    let shards = ShardId::range(args.start_date, args.days, args.hours.clone())
        .context("Invalid archive window")?;
    let source = ArchiveSource::new(ArchiveConfig {
        cache_dir: args.cache_dir.clone(),
        archive_url: (!args.offline).then(|| args.archive_url.clone()),
        ..Default::default()
    })
    .context("Failed to create archive source")?;

    let decode_started = Instant::now();
    let log = Arc::new(InteractionLog::new());
    let decode_stats = source.decode_all(shards, &log).await;
    let decode_elapsed = decode_started.elapsed();

    if decode_stats.shards_decoded == 0 && decode_stats.shards_failed > 0 {
        bail!("No archive shards could be decoded");
    }
    let interactions = log.take();
    tracing::info!(
        "Decoded {} interactions from {} shards in {:.1}s",
        interactions.len(),
        decode_stats.shards_decoded,
        decode_elapsed.as_secs_f64()
    );

    // Upload phase
    if args.skip_reset {
        tracing::info!("Keeping existing graph");
    } else {
        tracing::info!("Dropping existing graph");
        store.reset().await.context("Failed to reset graph store")?;
    }

    let telemetry = Arc::new(Telemetry::new());
    let uploader = Uploader::new(
        Arc::clone(&store),
        Arc::new(DedupeIndex::new()),
        Arc::clone(&telemetry),
        UploaderConfig {
            concurrency: args.concurrency,
            retry: RetryPolicy {
                max_retries: args.max_retries,
                ..Default::default()
            },
            repair: true,
        },
    );

    let reporter = ProgressReporter::spawn(
        Arc::clone(&telemetry),
        Duration::from_millis(args.report_interval_ms.max(1)),
    );
    let result = uploader.run(interactions).await;
    reporter.stop().await;
    eprintln!();

    let report = result.context("Upload failed")?;

    if let Some(path) = &args.failures_out {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_failures(BufWriter::new(file), &report.unrepaired)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(
            "Wrote {} unrepaired mutations to {}",
            report.unrepaired.len(),
            path.display()
        );
    }

    print_summary(args, &decode_stats, &report);

    Ok(())
}

async fn init_store(args: &Args) -> Result<Arc<dyn GraphStore>> {
    if args.dry_run {
        tracing::info!("Dry run: uploading into an in-memory graph");
        return Ok(Arc::new(MemoryGraphStore::new()));
    }

    let store = GremlinStore::new(GremlinConfig {
        url: args.gremlin_url.clone(),
        username: args.gremlin_user.clone(),
        password: args.gremlin_password.clone(),
        ..Default::default()
    })
    .context("Failed to create Gremlin client")?;

    if !store.health_check().await.unwrap_or(false) {
        tracing::warn!("Gremlin server at {} did not answer a health check", args.gremlin_url);
    }

    Ok(Arc::new(store))
}

fn print_summary(args: &Args, decode: &DecodeStats, report: &UploadReport) {
    println!("\n══════════════════════════════════════════════════════════════════");
    println!("SUMMARY");
    println!("══════════════════════════════════════════════════════════════════\n");

    println!("Cache:       {}", args.cache_dir.display());
    if args.dry_run {
        println!("Store:       in-memory (dry run)");
    } else {
        println!("Store:       {}", args.gremlin_url);
    }
    println!();
    println!("Shards decoded:     {:>12}", decode.shards_decoded);
    println!("Shards failed:      {:>12}", decode.shards_failed);
    for failed in decode.failures() {
        println!("  - {}: {}", failed.shard, failed.error.as_deref().unwrap_or(""));
    }
    println!("Events read:        {:>12}", decode.total_events);
    println!("Malformed lines:    {:>12}", decode.malformed_lines);
    println!("Interactions:       {:>12}", decode.interactions);
    println!();
    println!("Users:              {:>12}", report.dedupe.users);
    println!("Repositories:       {:>12}", report.dedupe.repos);
    println!("Unique interactions:{:>12}", report.dedupe.interactions);
    println!();
    println!("Vertices created:   {:>12}", report.telemetry.vertices);
    println!("Edges created:      {:>12}", report.telemetry.edges);
    println!("Already present:    {:>12}", report.already_present);
    println!("Request charge:     {:>12.2}", report.telemetry.consumption);
    println!("Charge per second:  {:>12.2}", report.telemetry.rate);
    println!(
        "Upload time:        {:>11.1}s",
        report.telemetry.elapsed.as_secs_f64()
    );
    println!();
    println!("Failed attempts:    {:>12}", report.attempts_with_failures);
    if report.attempts_panicked > 0 {
        println!("Panicked attempts:  {:>12}", report.attempts_panicked);
    }
    println!("Failed mutations:   {:>12}", report.failed_mutations);
    println!("  - repaired:       {:>12}", report.repaired);
    println!("  - unrepaired:     {:>12}", report.unrepaired.len());
    for failed in report.unrepaired.iter().take(10) {
        println!("    {}: {}", failed.mutation, failed.error);
    }
    if report.unrepaired.len() > 10 {
        println!("    ... and {} more", report.unrepaired.len() - 10);
    }
}
