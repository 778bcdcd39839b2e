//! Replay mutations an ingestion run could not write.
//!
//! Reads the JSON lines file written by `ghgraph-ingest --failures-out` and
//! applies each mutation again, vertices before edges.
//!
//! # Usage
//!
//! ```bash
//! # Replay against the Gremlin server, keep what still fails
//! replay-failures --input failures.jsonl --remaining-out still-failing.jsonl
//!
//! # Just list what is in the file
//! replay-failures --input failures.jsonl --list
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ghgraph_ingest::pipeline::{FailedMutation, read_failures, replay, write_failures};
use ghgraph_ingest::{GremlinConfig, GremlinStore, RetryPolicy, Telemetry};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "replay-failures")]
#[command(about = "Replay failed graph mutations from a JSON lines file")]
struct Args {
    /// Failures file written by ghgraph-ingest
    #[arg(long, short)]
    input: PathBuf,

    /// Gremlin server endpoint
    #[arg(long, env = "GHGRAPH_GREMLIN_URL", default_value = "http://localhost:8182/gremlin")]
    gremlin_url: String,

    /// Gremlin user name
    #[arg(long, env = "GHGRAPH_GREMLIN_USER")]
    gremlin_user: Option<String>,

    /// Gremlin password or key
    #[arg(long, env = "GHGRAPH_GREMLIN_PASSWORD", hide_env_values = true)]
    gremlin_password: Option<String>,

    /// Retries per mutation
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Write mutations that still fail to this file
    #[arg(long)]
    remaining_out: Option<PathBuf>,

    /// Print the mutations without sending them
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();

    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let failed = read_failures(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    println!("Loaded {} failed mutations from {}", failed.len(), args.input.display());

    if args.list {
        list_failures(&failed);
        return Ok(());
    }

    if failed.is_empty() {
        println!("Nothing to replay");
        return Ok(());
    }

    let store = GremlinStore::new(GremlinConfig {
        url: args.gremlin_url.clone(),
        username: args.gremlin_user.clone(),
        password: args.gremlin_password.clone(),
        ..Default::default()
    })
    .context("Failed to create Gremlin client")?;

    let policy = RetryPolicy {
        max_retries: args.max_retries,
        base_backoff: Duration::from_millis(200),
    };
    let telemetry = Telemetry::new();
    let total = failed.len();
    let remaining = replay(&store, failed, &policy, &telemetry).await;

    println!();
    println!("Replayed:        {:>8}", total);
    println!("  - vertices:    {:>8}", telemetry.vertices());
    println!("  - edges:       {:>8}", telemetry.edges());
    println!("  - present:     {:>8}", telemetry.existing());
    println!("Still failing:   {:>8}", remaining.len());
    println!("Request charge:  {:>8.2}", telemetry.consumption());

    if !remaining.is_empty() {
        println!();
        list_failures(&remaining);
    }

    if let Some(path) = &args.remaining_out {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_failures(BufWriter::new(file), &remaining)?;
        println!("✓ Wrote {} mutations to {}", remaining.len(), path.display());
    }

    Ok(())
}

fn list_failures(failed: &[FailedMutation]) {
    for entry in failed {
        match &entry.interaction {
            Some(interaction) => println!(
                "  {} (from {}, {} attempts): {}",
                entry.mutation, interaction, entry.attempts, entry.error
            ),
            None => println!(
                "  {} ({} attempts): {}",
                entry.mutation, entry.attempts, entry.error
            ),
        }
    }
}
