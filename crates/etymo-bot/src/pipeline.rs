//! Corpus building and maintenance commands.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use etymo_core::{candidate_pool, IngestStats, RootCorpusBuilder, SelectionPolicy};
use etymo_sources::{EtymologySource, FeedReport, SourceContext};
use etymo_storage::{
    CorpusSnapshot, CorpusSnapshotStore, HistoryStats, HistoryStore, SnapshotReceipt,
};
use serde::Serialize;
use tracing::{info, warn};

/// What one source contributed to a build.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source_id: String,
    pub report: Option<FeedReport>,
    /// Set when the source stopped early on a transient error.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub sources: Vec<SourceRun>,
    pub ingest: IngestStats,
    pub roots: usize,
    pub pairable_roots: usize,
    pub receipt: SnapshotReceipt,
}

/// Run every source into one aggregator, finalize, and replace the snapshot.
///
/// A transient source failure (rate limiting) is logged and the build moves
/// on; any other source error aborts the build and leaves the previous
/// snapshot in place.
pub async fn build_corpus(
    sources: &[Box<dyn EtymologySource>],
    history: &dyn HistoryStore,
    failure_threshold: u32,
    snapshots: &CorpusSnapshotStore,
) -> Result<BuildReport> {
    let state = history.load().await.context("loading history")?;
    let ctx = SourceContext {
        history,
        failed: &state.failed,
        failure_threshold,
    };

    let mut builder = RootCorpusBuilder::new();
    let mut runs = Vec::with_capacity(sources.len());
    for source in sources {
        let source_id = source.source_id().to_string();
        match source.facts(&ctx, &mut builder).await {
            Ok(report) => {
                info!(
                    source_id = %source_id,
                    facts = report.facts_emitted,
                    skipped = report.skipped,
                    "source finished"
                );
                runs.push(SourceRun {
                    source_id,
                    report: Some(report),
                    error: None,
                });
            }
            Err(err) if err.is_transient() => {
                warn!(source_id = %source_id, error = %err, "source stopped early");
                runs.push(SourceRun {
                    source_id,
                    report: None,
                    error: Some(err.to_string()),
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading source {source_id}"));
            }
        }
    }

    let corpus = builder.finalize();
    let ingest = builder.stats();
    info!(
        facts = ingest.facts_seen,
        rejected_roots = ingest.rejected_root,
        pending_roots = builder.pending_roots(),
        roots = corpus.len(),
        "corpus finalized"
    );

    let roots = corpus.len();
    let pairable_roots = corpus.pairable_roots();
    let snapshot = CorpusSnapshot::new(corpus, ingest, Utc::now());
    let receipt = snapshots
        .write(&snapshot)
        .await
        .with_context(|| format!("writing corpus snapshot {}", snapshots.path().display()))?;

    Ok(BuildReport {
        sources: runs,
        ingest,
        roots,
        pairable_roots,
        receipt,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStats {
    pub snapshot_built_at: Option<DateTime<Utc>>,
    pub corpus_roots: usize,
    pub pairable_roots: usize,
    pub corpus_words: usize,
    pub candidate_pool: usize,
    pub history: HistoryStats,
}

/// Corpus and history counters. A missing snapshot counts as an empty corpus.
pub async fn collect_stats(
    snapshots: &CorpusSnapshotStore,
    history: &dyn HistoryStore,
    policy: &SelectionPolicy,
    now: DateTime<Utc>,
) -> Result<BotStats> {
    let snapshot = if snapshots.exists().await? {
        Some(snapshots.read().await?)
    } else {
        None
    };
    let state = history.load().await.context("loading history")?;
    let history_stats = history
        .stats(now, policy.failure_threshold)
        .await
        .context("reading history stats")?;

    let (built_at, roots, pairable, words, pool) = match &snapshot {
        Some(s) => (
            Some(s.built_at),
            s.roots.len(),
            s.roots.pairable_roots(),
            s.roots.total_words(),
            candidate_pool(&s.roots, &state.posted, &state.failed, policy).len(),
        ),
        None => (None, 0, 0, 0, 0),
    };

    Ok(BotStats {
        snapshot_built_at: built_at,
        corpus_roots: roots,
        pairable_roots: pairable,
        corpus_words: words,
        candidate_pool: pool,
        history: history_stats,
    })
}

/// Forget word failures older than `retention_days`.
pub async fn cleanup_failures(
    history: &dyn HistoryStore,
    retention_days: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let cutoff = now - TimeDelta::days(retention_days.max(0));
    let removed = history
        .cleanup_failures(cutoff)
        .await
        .context("deleting old failure records")?;
    info!(removed, cutoff = %cutoff, "failure records cleaned up");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etymo_core::{canonicalize, FailedWordRecord};
    use etymo_sources::{FactsFileSource, LegacyImportSource};
    use etymo_storage::MemoryHistoryStore;
    use std::io::Write;

    fn facts_file(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        path
    }

    #[tokio::test]
    async fn sources_combine_into_one_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = facts_file(
            &dir,
            "a.jsonl",
            &[r#"{"word": "guest", "raw_root": "*ghos-ti-", "source_id": "wiktionary", "gloss": "stranger"}"#],
        );
        let b = facts_file(
            &dir,
            "b.jsonl",
            &[r#"{"word": "hostile", "raw_root": "ghosti", "source_id": "etymonline"}"#],
        );
        let sources: Vec<Box<dyn EtymologySource>> = vec![
            Box::new(FactsFileSource::new(&a)),
            Box::new(FactsFileSource::new(&b)),
        ];
        let history = MemoryHistoryStore::new();
        let snapshots = CorpusSnapshotStore::new(dir.path().join("corpus.json"));

        let report = build_corpus(&sources, &history, 3, &snapshots)
            .await
            .expect("build");
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.roots, 1);
        assert_eq!(report.pairable_roots, 1);

        let stored = snapshots.read().await.expect("snapshot");
        let entry = stored
            .roots
            .get(&canonicalize("GHOSTI").expect("root"))
            .expect("entry");
        assert_eq!(entry.words.len(), 2);
        assert_eq!(entry.gloss.as_deref(), Some("stranger"));
    }

    #[tokio::test]
    async fn hard_source_errors_keep_the_old_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshots = CorpusSnapshotStore::new(dir.path().join("corpus.json"));
        let sources: Vec<Box<dyn EtymologySource>> =
            vec![Box::new(LegacyImportSource::new(dir.path().join("missing.json")))];

        let err = build_corpus(&sources, &MemoryHistoryStore::new(), 3, &snapshots)
            .await
            .expect_err("missing legacy file");
        assert!(format!("{err:#}").contains("legacy"));
        assert!(!snapshots.exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn stats_without_a_snapshot_are_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshots = CorpusSnapshotStore::new(dir.path().join("corpus.json"));
        let stats = collect_stats(
            &snapshots,
            &MemoryHistoryStore::new(),
            &SelectionPolicy::default(),
            Utc::now(),
        )
        .await
        .expect("stats");
        assert!(stats.snapshot_built_at.is_none());
        assert_eq!(stats.candidate_pool, 0);
        assert_eq!(stats.history.posted_total, 0);
    }

    #[tokio::test]
    async fn cleanup_drops_only_stale_failures() {
        let history = MemoryHistoryStore::new();
        let now = Utc::now();
        for (word, age_days) in [("zyzzyva", 45), ("quokka", 2)] {
            history
                .insert_failure(FailedWordRecord {
                    word: word.into(),
                    failure_count: 1,
                    last_failure: now - TimeDelta::days(age_days),
                })
                .await;
        }

        let removed = cleanup_failures(&history, 30, now).await.expect("cleanup");
        assert_eq!(removed, 1);
        let failed = history.load().await.expect("load").failed;
        assert_eq!(failed.failure_count("zyzzyva"), 0);
        assert_eq!(failed.failure_count("quokka"), 1);
    }
}
