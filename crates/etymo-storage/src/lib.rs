//! Persistence and HTTP plumbing: posted/failure history in SQLite, atomic
//! corpus snapshots on disk, and the shared retrying HTTP fetcher.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use etymo_core::{IngestStats, RootCorpus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

pub mod fetch;
pub mod history;

pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};
pub use history::{
    HistoryState, HistoryStats, HistoryStore, MemoryHistoryStore, SqliteHistoryStore, StoreError,
};

pub const CRATE_NAME: &str = "etymo-storage";

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// On-disk form of a finalized corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub schema_version: u32,
    pub built_at: DateTime<Utc>,
    pub stats: IngestStats,
    pub roots: RootCorpus,
}

impl CorpusSnapshot {
    pub fn new(roots: RootCorpus, stats: IngestStats, built_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            built_at,
            stats,
            roots,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotReceipt {
    pub content_hash: String,
    pub path: PathBuf,
    pub byte_size: usize,
}

/// Reads and atomically replaces the corpus snapshot file.
#[derive(Debug, Clone)]
pub struct CorpusSnapshotStore {
    path: PathBuf,
}

impl CorpusSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub async fn exists(&self) -> anyhow::Result<bool> {
        fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking snapshot path {}", self.path.display()))
    }

    /// Write the snapshot through a temp file in the same directory and
    /// rename it over the previous one, so readers never see a partial file.
    pub async fn write(&self, snapshot: &CorpusSnapshot) -> anyhow::Result<SnapshotReceipt> {
        let bytes = serde_json::to_vec_pretty(snapshot).context("serializing corpus snapshot")?;
        let content_hash = Self::sha256_hex(&bytes);

        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(&parent)
                .await
                .with_context(|| format!("creating snapshot directory {}", parent.display()))?;
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp snapshot file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing temp snapshot file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp snapshot {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }

        info!(
            path = %self.path.display(),
            roots = snapshot.roots.len(),
            hash = %content_hash,
            "corpus snapshot written"
        );
        Ok(SnapshotReceipt {
            content_hash,
            path: self.path.clone(),
            byte_size: bytes.len(),
        })
    }

    pub async fn read(&self) -> anyhow::Result<CorpusSnapshot> {
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("reading corpus snapshot {}", self.path.display()))?;
        let snapshot: CorpusSnapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing corpus snapshot {}", self.path.display()))?;
        if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
            bail!(
                "corpus snapshot {} has schema version {}, newest supported is {}",
                self.path.display(),
                snapshot.schema_version,
                SNAPSHOT_SCHEMA_VERSION
            );
        }
        Ok(snapshot)
    }
}
