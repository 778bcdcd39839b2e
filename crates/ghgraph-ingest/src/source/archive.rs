//! Parallel decoding of archive shards.
//!
//! Each shard is gzip-compressed newline-delimited JSON. Lines are decoded
//! one at a time with [`ghgraph_core::decode_event`]; a line that does not
//! decode is counted and skipped, while an I/O or decompression error fails
//! the whole shard.

use super::cache::ShardCache;
use super::shard::ShardId;
use super::{DecodeStats, InteractionLog, ShardReport};
use crate::{Error, Result};
use flate2::read::GzDecoder;
use ghgraph_core::Interaction;
use metrics::counter;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Configuration for the archive source.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Directory holding cached shards.
    pub cache_dir: PathBuf,

    /// Base URL missing shards are downloaded from (none: cache only).
    pub archive_url: Option<String>,

    /// Shards decompressed and parsed at the same time.
    pub decode_parallelism: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./data"),
            archive_url: Some(ghgraph_core::DEFAULT_ARCHIVE_URL.to_string()),
            decode_parallelism: num_cpus::get(),
        }
    }
}

/// Interactions decoded from one shard file.
#[derive(Debug, Default)]
pub struct ShardDecode {
    pub interactions: Vec<Interaction>,
    pub events: usize,
    pub malformed: usize,
}

/// Decode every line of a gzip-compressed NDJSON shard.
pub fn decode_shard(path: &Path) -> Result<ShardDecode> {
    let file = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(BufReader::new(file)));
    let mut decoded = ShardDecode::default();

    for (line_num, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        decoded.events += 1;

        let result = std::str::from_utf8(&line)
            .map_err(|e| ghgraph_core::Error::InvalidField {
                field: "line",
                reason: e.to_string(),
            })
            .and_then(ghgraph_core::decode_event);

        match result {
            Ok(Some(interaction)) => decoded.interactions.push(interaction),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("{}:{}: skipping line: {}", path.display(), line_num + 1, e);
                decoded.malformed += 1;
            }
        }
    }

    Ok(decoded)
}

/// Decodes a set of shards into an [`InteractionLog`].
pub struct ArchiveSource {
    cache: Arc<ShardCache>,
    config: ArchiveConfig,
}

impl ArchiveSource {
    /// Create a new archive source with the given configuration.
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        let cache = ShardCache::new(&config.cache_dir, config.archive_url.clone())?;
        Ok(Self {
            cache: Arc::new(cache),
            config,
        })
    }

    /// Fetch and decode every shard, one task per shard.
    ///
    /// A shard's interactions are appended to `log` only if the whole shard
    /// decoded. Failed shards are reported, never propagated.
    pub async fn decode_all(&self, shards: Vec<ShardId>, log: &Arc<InteractionLog>) -> DecodeStats {
        let decoders = Arc::new(Semaphore::new(self.config.decode_parallelism.max(1)));
        let mut join_set = JoinSet::new();

        tracing::info!(
            "Decoding {} shards from {} ({} at a time)",
            shards.len(),
            self.cache.dir().display(),
            self.config.decode_parallelism.max(1)
        );

        let pending: BTreeSet<ShardId> = shards.iter().copied().collect();
        for shard in shards {
            let cache = Arc::clone(&self.cache);
            let decoders = Arc::clone(&decoders);
            let log = Arc::clone(log);

            join_set.spawn(async move {
                let result = decode_one(&cache, &decoders, shard).await;
                finish_shard(shard, result, &log)
            });
        }

        DecodeStats::from_reports(collect_reports(join_set, pending).await)
    }
}

/// Join every shard task. A shard whose task never produced a report is
/// reported as failed.
async fn collect_reports(
    mut join_set: JoinSet<ShardReport>,
    mut pending: BTreeSet<ShardId>,
) -> Vec<ShardReport> {
    let mut reports = Vec::with_capacity(pending.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(report) => {
                pending.remove(&report.shard);
                reports.push(report);
            }
            Err(e) => tracing::error!("Shard task failed: {}", e),
        }
    }

    for shard in pending {
        counter!("archive_shards_failed_total").increment(1);
        reports.push(failed_report(shard, "decode task panicked".to_string()));
    }
    reports
}

fn failed_report(shard: ShardId, error: String) -> ShardReport {
    ShardReport {
        shard,
        events: 0,
        interactions: 0,
        malformed: 0,
        error: Some(error),
    }
}

async fn decode_one(cache: &ShardCache, decoders: &Semaphore, shard: ShardId) -> Result<ShardDecode> {
    let path = cache.fetch(&shard).await?;

    let _permit = decoders
        .acquire()
        .await
        .map_err(|e| Error::Task(format!("decode semaphore closed: {e}")))?;

    tokio::task::spawn_blocking(move || decode_shard(&path))
        .await
        .map_err(|e| Error::Task(format!("decode task for {shard} failed: {e}")))?
}

fn finish_shard(shard: ShardId, result: Result<ShardDecode>, log: &InteractionLog) -> ShardReport {
    match result {
        Ok(decoded) => {
            let interactions = decoded.interactions.len();
            log.extend(decoded.interactions);

            counter!("archive_shards_decoded_total").increment(1);
            counter!("archive_interactions_total").increment(interactions as u64);
            counter!("archive_lines_malformed_total").increment(decoded.malformed as u64);
            tracing::info!(
                "{} complete: {} events, {} interactions",
                shard,
                decoded.events,
                interactions
            );

            ShardReport {
                shard,
                events: decoded.events,
                interactions,
                malformed: decoded.malformed,
                error: None,
            }
        }
        Err(e) => {
            counter!("archive_shards_failed_total").increment(1);
            tracing::error!("{} failed: {}", shard, e);
            failed_report(shard, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use ghgraph_core::InteractionType;
    use std::io::Write;
    use tempfile::TempDir;

    fn shard(hour: u8) -> ShardId {
        ShardId::new(NaiveDate::from_ymd_opt(2017, 6, 1).unwrap(), hour).unwrap()
    }

    fn event(kind: &str, actor: &str, repo: &str, action: &str) -> String {
        format!(
            r#"{{"type":"{kind}","actor":{{"login":"{actor}"}},"repo":{{"name":"{repo}"}},"payload":{{"action":"{action}"}}}}"#
        )
    }

    fn write_shard(dir: &Path, shard: ShardId, lines: &[String]) {
        let file = File::create(dir.join(shard.file_name())).unwrap();
        let mut gz = GzEncoder::new(file, Compression::fast());
        for line in lines {
            writeln!(gz, "{line}").unwrap();
        }
        gz.finish().unwrap();
    }

    fn source(dir: &Path) -> ArchiveSource {
        ArchiveSource::new(ArchiveConfig {
            cache_dir: dir.to_path_buf(),
            archive_url: None,
            decode_parallelism: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_decode_shard_counts() {
        let tmp = TempDir::new().unwrap();
        write_shard(
            tmp.path(),
            shard(0),
            &[
                event("WatchEvent", "alice", "bob/repo1", "started"),
                event("PushEvent", "alice", "bob/repo1", ""),
                "{broken".to_string(),
                String::new(),
                event("IssuesEvent", "carol", "bob/repo1", "opened"),
            ],
        );

        let decoded = decode_shard(&tmp.path().join(shard(0).file_name())).unwrap();

        assert_eq!(decoded.events, 4);
        assert_eq!(decoded.malformed, 1);
        assert_eq!(decoded.interactions.len(), 2);
        assert_eq!(decoded.interactions[0].kind, InteractionType::WatchRepo);
        assert_eq!(decoded.interactions[1].user, "carol");
    }

    #[test]
    fn test_decode_shard_not_gzip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(shard(0).file_name());
        std::fs::write(&path, event("WatchEvent", "alice", "bob/repo1", "started")).unwrap();

        assert!(decode_shard(&path).is_err());
    }

    #[tokio::test]
    async fn test_failed_shard_does_not_abort_siblings() {
        let tmp = TempDir::new().unwrap();
        write_shard(
            tmp.path(),
            shard(0),
            &[event("ForkEvent", "alice", "bob/repo1", "")],
        );
        std::fs::write(tmp.path().join(shard(1).file_name()), b"not gzip").unwrap();
        write_shard(
            tmp.path(),
            shard(2),
            &[
                event("WatchEvent", "carol", "bob/repo1", "started"),
                event("PullRequestEvent", "dave", "erin/tool", "opened"),
            ],
        );
        // shard(3) is missing and there is no archive URL

        let log = Arc::new(InteractionLog::new());
        let stats = source(tmp.path())
            .decode_all((0..4).map(shard).collect(), &log)
            .await;

        assert_eq!(stats.shards_decoded, 2);
        assert_eq!(stats.shards_failed, 2);
        assert_eq!(stats.interactions, 3);
        assert_eq!(log.len(), 3);

        let failed: Vec<_> = stats.failures().map(|r| r.shard.hour()).collect();
        assert_eq!(failed, vec![1, 3]);
    }

    fn explode() -> ShardReport {
        panic!("decoder bug")
    }

    #[tokio::test]
    async fn test_panicked_shard_task_is_reported() {
        let mut join_set = JoinSet::new();
        join_set.spawn(async {
            ShardReport {
                shard: shard(0),
                events: 3,
                interactions: 2,
                malformed: 0,
                error: None,
            }
        });
        join_set.spawn(async { explode() });

        let pending = [shard(0), shard(1)].into_iter().collect();
        let stats = DecodeStats::from_reports(collect_reports(join_set, pending).await);

        assert_eq!(stats.shards_decoded, 1);
        assert_eq!(stats.shards_failed, 1);
        assert_eq!(stats.interactions, 2);
        let failed: Vec<_> = stats.failures().map(|r| r.shard).collect();
        assert_eq!(failed, vec![shard(1)]);
    }
}
