//! One posting cycle: select, verify, generate, publish, record.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use etymo_core::{select_next, CandidatePair, PostedRecord, RootCorpus, SelectionPolicy};
use etymo_storage::{HistoryStore, StoreError};
use rand::Rng;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::collaborators::{
    finalize_text, template_text, CollaboratorError, ContentGenerator, Publisher, Verifier,
};
use crate::config::{DEFAULT_MIN_CONFIDENCE, MAX_POST_LEN};
use crate::schedule::{PostingWindow, WindowClosed};

/// Step of a cycle, carried on errors so logs say how far a run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadHistory,
    CheckWindow,
    Verify,
    Generate,
    Publish,
    RecordPost,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadHistory => "load-history",
            Self::CheckWindow => "check-window",
            Self::Verify => "verify",
            Self::Generate => "generate",
            Self::Publish => "publish",
            Self::RecordPost => "record-post",
        })
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{stage} failed: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },
    #[error("{stage} failed for {pair}: {source}")]
    Upstream {
        stage: Stage,
        pair: CandidatePair,
        #[source]
        source: CollaboratorError,
    },
}

impl DriverError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Store { stage, .. } | Self::Upstream { stage, .. } => *stage,
        }
    }

    pub fn pair(&self) -> Option<&CandidatePair> {
        match self {
            Self::Upstream { pair, .. } => Some(pair),
            Self::Store { .. } => None,
        }
    }
}

/// How a cycle ended when nothing went wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Posted {
        pair: CandidatePair,
        post_id: String,
        text: String,
    },
    DryRun {
        pair: CandidatePair,
        text: String,
    },
    NothingEligible,
    LowConfidence {
        pair: CandidatePair,
        confidence: f64,
    },
    Skipped(WindowClosed),
}

#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub policy: SelectionPolicy,
    pub min_confidence: f64,
    pub dry_run: bool,
    pub max_post_len: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::default(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            dry_run: false,
            max_post_len: MAX_POST_LEN,
        }
    }
}

pub struct PostingDriver {
    store: Arc<dyn HistoryStore>,
    generator: Box<dyn ContentGenerator>,
    verifier: Option<Box<dyn Verifier>>,
    publisher: Option<Box<dyn Publisher>>,
    settings: DriverSettings,
}

impl PostingDriver {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        generator: Box<dyn ContentGenerator>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            store,
            generator,
            verifier: None,
            publisher: None,
            settings,
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Select a pair from `corpus` and take it through to publication.
    pub async fn run_cycle<R>(
        &self,
        corpus: &RootCorpus,
        rng: &mut R,
    ) -> Result<CycleOutcome, DriverError>
    where
        R: Rng + ?Sized + Send,
    {
        let state = self.store.load().await.map_err(|source| DriverError::Store {
            stage: Stage::LoadHistory,
            source,
        })?;

        let Some(pair) = select_next(
            corpus,
            &state.posted,
            &state.failed,
            &self.settings.policy,
            rng,
        ) else {
            info!(
                roots = corpus.len(),
                posted = state.posted.len(),
                "nothing eligible to post"
            );
            return Ok(CycleOutcome::NothingEligible);
        };

        self.post_pair(pair).await
    }

    /// [`PostingDriver::run_cycle`] gated on the posting window at `now`.
    pub async fn run_scheduled<R>(
        &self,
        corpus: &RootCorpus,
        window: &PostingWindow,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<CycleOutcome, DriverError>
    where
        R: Rng + ?Sized + Send,
    {
        let closed = window
            .check(self.store.as_ref(), now)
            .await
            .map_err(|source| DriverError::Store {
                stage: Stage::CheckWindow,
                source,
            })?;
        if let Some(reason) = closed {
            info!(?reason, "outside posting window");
            return Ok(CycleOutcome::Skipped(reason));
        }
        self.run_cycle(corpus, rng).await
    }

    pub async fn post_pair(&self, pair: CandidatePair) -> Result<CycleOutcome, DriverError> {
        let span = info_span!("posting_cycle", pair = %pair, dry_run = self.settings.dry_run);
        self.post_pair_inner(pair).instrument(span).await
    }

    async fn post_pair_inner(&self, pair: CandidatePair) -> Result<CycleOutcome, DriverError> {
        if let Some(verifier) = &self.verifier {
            let confidence = match verifier.confidence(&pair).await {
                Ok(confidence) => confidence,
                Err(source) => return Err(upstream(Stage::Verify, pair, source)),
            };
            if confidence < self.settings.min_confidence {
                info!(
                    confidence,
                    min_confidence = self.settings.min_confidence,
                    "confidence below threshold, not posting"
                );
                return Ok(CycleOutcome::LowConfidence { pair, confidence });
            }
        }

        let raw = match self.generator.generate(&pair).await {
            Ok(raw) => raw,
            Err(source) => return Err(upstream(Stage::Generate, pair, source)),
        };
        let text = match finalize_text(&raw, &pair, self.settings.max_post_len) {
            Some(text) => text,
            None => {
                warn!(raw = %raw, "generated text unusable, falling back to template");
                template_text(&pair)
            }
        };

        if self.settings.dry_run {
            info!(text = %text, "dry run, not publishing");
            return Ok(CycleOutcome::DryRun { pair, text });
        }

        let Some(publisher) = &self.publisher else {
            return Err(upstream(
                Stage::Publish,
                pair,
                CollaboratorError::NotConfigured {
                    service: "publisher",
                    missing: "TWITTER_BEARER_TOKEN",
                },
            ));
        };
        let post_id = match publisher.publish(&text).await {
            Ok(id) => id,
            Err(source) => return Err(upstream(Stage::Publish, pair, source)),
        };

        let record = PostedRecord::for_pair(&pair, post_id.clone(), Utc::now());
        self.store
            .append(&record)
            .await
            .map_err(|source| DriverError::Store {
                stage: Stage::RecordPost,
                source,
            })?;
        info!(post_id = %post_id, "post recorded");

        Ok(CycleOutcome::Posted {
            pair,
            post_id,
            text,
        })
    }
}

fn upstream(stage: Stage, pair: CandidatePair, source: CollaboratorError) -> DriverError {
    DriverError::Upstream {
        stage,
        pair,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etymo_core::{canonicalize, RawEtymologyFact, RootCorpusBuilder};
    use etymo_storage::MemoryHistoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl ContentGenerator for FixedGenerator {
        async fn generate(&self, _pair: &CandidatePair) -> Result<String, CollaboratorError> {
            Ok(self.0.to_string())
        }
    }

    struct FixedVerifier(f64);

    #[async_trait]
    impl Verifier for FixedVerifier {
        async fn confidence(&self, _pair: &CandidatePair) -> Result<f64, CollaboratorError> {
            Ok(self.0)
        }
    }

    #[derive(Clone, Default)]
    struct CountingPublisher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn publish(&self, _text: &str) -> Result<String, CollaboratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(CollaboratorError::RateLimited {
                    service: "test",
                    retry_after_secs: Some(60),
                });
            }
            Ok(format!("post-{n}"))
        }
    }

    fn guest_corpus() -> RootCorpus {
        let mut builder = RootCorpusBuilder::new();
        for (word, source) in [("guest", "A"), ("hostile", "B")] {
            builder.ingest(RawEtymologyFact::new(word, "*ghos-ti-", source).with_gloss("stranger"));
        }
        builder.finalize()
    }

    fn driver(
        store: Arc<MemoryHistoryStore>,
        generator: &'static str,
        publisher: &CountingPublisher,
        dry_run: bool,
    ) -> PostingDriver {
        PostingDriver::new(
            store,
            Box::new(FixedGenerator(generator)),
            DriverSettings {
                dry_run,
                ..DriverSettings::default()
            },
        )
        .with_publisher(Box::new(publisher.clone()))
    }

    #[tokio::test]
    async fn posts_and_records_once() {
        let store = Arc::new(MemoryHistoryStore::new());
        let publisher = CountingPublisher::default();
        let driver = driver(
            Arc::clone(&store),
            "guest and hostile: one opens the door, one bars it.",
            &publisher,
            false,
        );
        let corpus = guest_corpus();
        let mut rng = StdRng::seed_from_u64(7);

        let outcome = driver.run_cycle(&corpus, &mut rng).await.expect("cycle");
        let (pair, post_id, text) = match outcome {
            CycleOutcome::Posted {
                pair,
                post_id,
                text,
            } => (pair, post_id, text),
            other => panic!("expected a post, got {other:?}"),
        };
        assert_eq!(post_id, "post-1");
        assert_eq!(pair.root_id, canonicalize("GHOSTI").expect("root"));
        assert!(text.starts_with("guest and hostile"));

        let records = store.posted_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_post_id, "post-1");

        let again = driver.run_cycle(&corpus, &mut rng).await.expect("cycle");
        assert_eq!(again, CycleOutcome::NothingEligible);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dry_run_never_publishes_or_records() {
        let store = Arc::new(MemoryHistoryStore::new());
        let publisher = CountingPublisher::default();
        let driver = driver(Arc::clone(&store), "\"*ABORT*\"", &publisher, true);

        let outcome = driver
            .run_cycle(&guest_corpus(), &mut StdRng::seed_from_u64(1))
            .await
            .expect("cycle");
        let (pair, text) = match outcome {
            CycleOutcome::DryRun { pair, text } => (pair, text),
            other => panic!("expected a dry run, got {other:?}"),
        };
        assert_eq!(text, template_text(&pair));
        assert!(store.posted_records().await.is_empty());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn low_confidence_aborts_quietly() {
        let store = Arc::new(MemoryHistoryStore::new());
        let publisher = CountingPublisher::default();
        let driver = driver(Arc::clone(&store), "guest and hostile", &publisher, false)
            .with_verifier(Box::new(FixedVerifier(0.4)));

        let outcome = driver
            .run_cycle(&guest_corpus(), &mut StdRng::seed_from_u64(3))
            .await
            .expect("cycle");
        assert!(matches!(
            outcome,
            CycleOutcome::LowConfidence { confidence, .. } if confidence == 0.4
        ));
        assert!(store.posted_records().await.is_empty());
        assert!(store.load().await.expect("load").failed.is_empty());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn publish_failure_leaves_history_untouched() {
        let store = Arc::new(MemoryHistoryStore::new());
        let publisher = CountingPublisher {
            fail: true,
            ..CountingPublisher::default()
        };
        let driver = driver(Arc::clone(&store), "guest and hostile", &publisher, false)
            .with_verifier(Box::new(FixedVerifier(0.95)));

        let err = driver
            .run_cycle(&guest_corpus(), &mut StdRng::seed_from_u64(5))
            .await
            .expect_err("publisher fails");
        assert_eq!(err.stage(), Stage::Publish);
        assert_eq!(err.pair().map(|p| p.word1.as_str()), Some("guest"));
        assert!(matches!(
            err,
            DriverError::Upstream { ref source, .. } if source.is_rate_limited()
        ));
        assert!(store.posted_records().await.is_empty());
        assert!(store.load().await.expect("load").failed.is_empty());
    }

    #[tokio::test]
    async fn missing_publisher_is_a_publish_failure() {
        let store = Arc::new(MemoryHistoryStore::new());
        let driver = PostingDriver::new(
            store,
            Box::new(FixedGenerator("guest and hostile")),
            DriverSettings::default(),
        );
        let err = driver
            .run_cycle(&guest_corpus(), &mut StdRng::seed_from_u64(9))
            .await
            .expect_err("no publisher");
        assert_eq!(err.stage(), Stage::Publish);
    }

    #[tokio::test]
    async fn empty_corpus_is_nothing_to_do() {
        let store = Arc::new(MemoryHistoryStore::new());
        let publisher = CountingPublisher::default();
        let driver = driver(store, "unused", &publisher, false);
        let outcome = driver
            .run_cycle(&RootCorpus::default(), &mut StdRng::seed_from_u64(0))
            .await
            .expect("cycle");
        assert_eq!(outcome, CycleOutcome::NothingEligible);
    }
}
