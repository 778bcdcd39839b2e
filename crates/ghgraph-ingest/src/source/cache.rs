//! Local cache of archive shards.
//!
//! Shards are fetched once and kept on disk. A download is streamed into a
//! hidden `.part` file next to its destination and renamed into place when
//! complete, so an interrupted run never leaves a truncated shard behind.

use super::shard::ShardId;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Resolves shards to local files, downloading them on a miss.
pub struct ShardCache {
    dir: PathBuf,
    archive_url: Option<String>,
    client: reqwest::Client,
}

impl ShardCache {
    /// Create a cache rooted at `dir`.
    ///
    /// Without an `archive_url` the cache is read-only: missing shards are
    /// errors.
    pub fn new(dir: impl Into<PathBuf>, archive_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            dir: dir.into(),
            archive_url: archive_url.map(|url| url.trim_end_matches('/').to_string()),
            client,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `shard` lives in the cache.
    pub fn path_for(&self, shard: &ShardId) -> PathBuf {
        self.dir.join(shard.file_name())
    }

    /// Return the local path of `shard`, downloading it first if needed.
    pub async fn fetch(&self, shard: &ShardId) -> Result<PathBuf> {
        let path = self.path_for(shard);
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let Some(base) = &self.archive_url else {
            return Err(Error::Fetch(format!(
                "{} not cached and no archive URL configured",
                path.display()
            )));
        };

        let url = format!("{}/{}", base, shard.file_name());
        tracing::info!("Downloading {}", url);

        tokio::fs::create_dir_all(&self.dir).await?;
        let part = self.dir.join(format!(".{}.part", shard.file_name()));

        match self.download(&url, &part).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, &path).await?;
                tracing::debug!("Cached {} ({} bytes)", path.display(), bytes);
                Ok(path)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!("GET {} returned {}", url, response.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}
