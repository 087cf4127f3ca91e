//! Posted-pair history and word failure bookkeeping.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etymo_core::{
    normalize_word, CanonicalRootId, FailedWordRecord, FailedWords, PostedHistory, PostedRecord,
};
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("pair {pair_key} is already in the posted history")]
    DuplicatePair { pair_key: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt history row: {0}")]
    Corrupt(String),
}

/// Everything the selector needs from history, loaded in one call.
#[derive(Debug, Clone, Default)]
pub struct HistoryState {
    pub posted: PostedHistory,
    pub failed: FailedWords,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub posted_total: u64,
    pub posts_last_24h: u64,
    pub failed_words: u64,
    /// Words at or above the failure threshold.
    pub excluded_words: u64,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Cheap round trip proving the store answers queries.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn load(&self) -> Result<HistoryState, StoreError>;

    /// Durably append a posted record. Appending the same pair key twice
    /// fails with [`StoreError::DuplicatePair`].
    async fn append(&self, record: &PostedRecord) -> Result<(), StoreError>;

    /// Bump the failure count for a word and return the new count.
    async fn record_failure(&self, word: &str) -> Result<u32, StoreError>;

    /// Delete failure records last touched before `older_than`. Posted
    /// history is never pruned.
    async fn cleanup_failures(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Posts with `start <= posted_at < end`.
    async fn posts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn stats(&self, now: DateTime<Utc>, failure_threshold: u32)
        -> Result<HistoryStats, StoreError>;
}

#[derive(Debug, FromRow)]
struct PostedRow {
    word1: String,
    word2: String,
    root_id: String,
    external_post_id: String,
    posted_at: i64,
}

impl TryFrom<PostedRow> for PostedRecord {
    type Error = StoreError;

    fn try_from(row: PostedRow) -> Result<Self, Self::Error> {
        Ok(PostedRecord {
            posted_at: timestamp(row.posted_at)?,
            word1: row.word1,
            word2: row.word2,
            root_id: CanonicalRootId::from_stored(row.root_id),
            external_post_id: row.external_post_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct FailedRow {
    word: String,
    failure_count: i64,
    last_failure: i64,
}

impl TryFrom<FailedRow> for FailedWordRecord {
    type Error = StoreError;

    fn try_from(row: FailedRow) -> Result<Self, Self::Error> {
        let failure_count = u32::try_from(row.failure_count).map_err(|_| {
            StoreError::Corrupt(format!(
                "failure_count {} for word {}",
                row.failure_count, row.word
            ))
        })?;
        Ok(FailedWordRecord {
            last_failure: timestamp(row.last_failure)?,
            word: row.word,
            failure_count,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {secs} out of range")))
}

/// SQLite-backed store. One pooled connection, WAL journal and full
/// synchronous commits so an acknowledged append survives a crash.
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (creating if missing) and migrate the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;
        info!(path = %path.display(), "history database ready");
        Ok(Self { pool })
    }

    /// Number of applied schema migrations.
    pub async fn applied_migrations(&self) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn count(&self, sql: &str, bind: Option<i64>) -> Result<u64, StoreError> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn load(&self) -> Result<HistoryState, StoreError> {
        let posted_rows = sqlx::query_as::<_, PostedRow>(
            "SELECT word1, word2, root_id, external_post_id, posted_at FROM posted ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        let failed_rows = sqlx::query_as::<_, FailedRow>(
            "SELECT word, failure_count, last_failure FROM failed_words",
        )
        .fetch_all(&self.pool)
        .await?;

        let posted = posted_rows
            .into_iter()
            .map(PostedRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let failed = failed_rows
            .into_iter()
            .map(FailedWordRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            posted = posted.len(),
            failed = failed.len(),
            "history loaded"
        );
        Ok(HistoryState {
            posted: posted.into_iter().collect(),
            failed: failed.into_iter().collect(),
        })
    }

    async fn append(&self, record: &PostedRecord) -> Result<(), StoreError> {
        let pair_key = record.pair_key().storage_key();
        let result = sqlx::query(
            "INSERT INTO posted (pair_key, word1, word2, root_id, external_post_id, posted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&pair_key)
        .bind(normalize_word(&record.word1))
        .bind(normalize_word(&record.word2))
        .bind(record.root_id.as_str())
        .bind(&record.external_post_id)
        .bind(record.posted_at.timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(
                    pair_key = %pair_key,
                    post_id = %record.external_post_id,
                    "posted pair recorded"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicatePair { pair_key })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn record_failure(&self, word: &str) -> Result<u32, StoreError> {
        let word = normalize_word(word);
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO failed_words (word, failure_count, last_failure)
             VALUES (?1, 1, ?2)
             ON CONFLICT(word) DO UPDATE SET
                 failure_count = failure_count + 1,
                 last_failure = excluded.last_failure
             RETURNING failure_count",
        )
        .bind(&word)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        debug!(word = %word, failure_count = count, "word failure recorded");
        u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("failure_count {count} for word {word}")))
    }

    async fn cleanup_failures(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM failed_words WHERE last_failure < ?1")
            .bind(older_than.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn posts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posted WHERE posted_at >= ?1 AND posted_at < ?2",
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn stats(
        &self,
        now: DateTime<Utc>,
        failure_threshold: u32,
    ) -> Result<HistoryStats, StoreError> {
        Ok(HistoryStats {
            posted_total: self.count("SELECT COUNT(*) FROM posted", None).await?,
            posts_last_24h: self
                .posts_between(now - chrono::Duration::hours(24), now)
                .await?,
            failed_words: self.count("SELECT COUNT(*) FROM failed_words", None).await?,
            excluded_words: self
                .count(
                    "SELECT COUNT(*) FROM failed_words WHERE failure_count >= ?1",
                    Some(i64::from(failure_threshold)),
                )
                .await?,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    posted: Vec<PostedRecord>,
    failed: HashMap<String, FailedWordRecord>,
}

/// In-process store for tests and dry runs without a database file.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn posted_records(&self) -> Vec<PostedRecord> {
        self.state.lock().await.posted.clone()
    }

    /// Seed a failure record with an explicit timestamp.
    pub async fn insert_failure(&self, record: FailedWordRecord) {
        let mut state = self.state.lock().await;
        state.failed.insert(normalize_word(&record.word), record);
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self) -> Result<HistoryState, StoreError> {
        let state = self.state.lock().await;
        Ok(HistoryState {
            posted: state.posted.iter().collect(),
            failed: state.failed.values().cloned().collect(),
        })
    }

    async fn append(&self, record: &PostedRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = record.pair_key();
        if state.posted.iter().any(|r| r.pair_key() == key) {
            return Err(StoreError::DuplicatePair {
                pair_key: key.storage_key(),
            });
        }
        state.posted.push(record.clone());
        Ok(())
    }

    async fn record_failure(&self, word: &str) -> Result<u32, StoreError> {
        let word = normalize_word(word);
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let record = state
            .failed
            .entry(word.clone())
            .or_insert_with(|| FailedWordRecord {
                word,
                failure_count: 0,
                last_failure: now,
            });
        record.failure_count += 1;
        record.last_failure = now;
        Ok(record.failure_count)
    }

    async fn cleanup_failures(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.failed.len();
        state.failed.retain(|_, r| r.last_failure >= older_than);
        Ok((before - state.failed.len()) as u64)
    }

    async fn posts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .posted
            .iter()
            .filter(|r| r.posted_at >= start && r.posted_at < end)
            .count() as u64)
    }

    async fn stats(
        &self,
        now: DateTime<Utc>,
        failure_threshold: u32,
    ) -> Result<HistoryStats, StoreError> {
        let posts_last_24h = self
            .posts_between(now - chrono::Duration::hours(24), now)
            .await?;
        let state = self.state.lock().await;
        Ok(HistoryStats {
            posted_total: state.posted.len() as u64,
            posts_last_24h,
            failed_words: state.failed.len() as u64,
            excluded_words: state
                .failed
                .values()
                .filter(|r| r.failure_count >= failure_threshold)
                .count() as u64,
        })
    }
}
