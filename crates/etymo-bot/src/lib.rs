//! Posting orchestration: configuration, external collaborators, the posting
//! driver, the posting window and corpus maintenance.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use etymo_core::{RootCorpus, SelectionPolicy};
use etymo_storage::{
    BackoffPolicy, CorpusSnapshotStore, HistoryStore, HttpClientConfig, HttpFetcher,
};
use tracing::{info, warn};

pub mod collaborators;
pub mod config;
pub mod driver;
pub mod openai;
pub mod pipeline;
pub mod schedule;
pub mod twitter;
pub mod validate;

pub use collaborators::{
    finalize_text, template_text, CollaboratorError, ContentGenerator, CredentialCheck,
    Publisher, TemplateGenerator, Verifier,
};
pub use config::{BotConfig, MAX_POST_LEN};
pub use driver::{CycleOutcome, DriverError, DriverSettings, PostingDriver, Stage};
pub use openai::{parse_confidence, OpenAiClient, OpenAiGenerator, OpenAiVerifier, PromptStyle};
pub use pipeline::{
    build_corpus, cleanup_failures, collect_stats, BotStats, BuildReport, SourceRun,
};
pub use schedule::{build_scheduler, PostingWindow, WindowClosed};
pub use twitter::TwitterPublisher;
pub use validate::{validate_system, ComponentCheck, ValidationReport};

pub const CRATE_NAME: &str = "etymo-bot";

/// Per-invocation switches that sit on top of [`BotConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub allow_trivial: bool,
}

pub fn shared_fetcher(config: &BotConfig) -> Result<Arc<HttpFetcher>> {
    Ok(Arc::new(HttpFetcher::new(config.http_client_config())?))
}

/// Fetcher for etymology page lookups, spaced by the configured delay.
pub fn lookup_fetcher(config: &BotConfig) -> Result<Arc<HttpFetcher>> {
    Ok(Arc::new(HttpFetcher::new(config.lookup_http_client_config())?))
}

pub fn posting_window(config: &BotConfig) -> PostingWindow {
    PostingWindow::new(config.posting_hours_utc.iter().copied())
}

/// Wire collaborators from config. Without an OpenAI key the template
/// generator is used and verification is skipped; publishing without a
/// bearer token is refused unless this is a dry run.
pub fn build_driver(
    config: &BotConfig,
    store: Arc<dyn HistoryStore>,
    options: RunOptions,
) -> Result<PostingDriver> {
    let settings = DriverSettings {
        policy: SelectionPolicy {
            allow_trivial: options.allow_trivial,
            failure_threshold: config.max_word_failures,
        },
        min_confidence: config.min_confidence,
        dry_run: options.dry_run,
        max_post_len: MAX_POST_LEN,
    };
    let fetcher = shared_fetcher(config)?;

    let mut driver = match &config.openai_api_key {
        Some(key) => {
            let client = OpenAiClient::new(
                Arc::clone(&fetcher),
                &config.openai_base_url,
                key,
                &config.openai_model,
            );
            PostingDriver::new(
                store,
                Box::new(OpenAiGenerator::new(client.clone())),
                settings,
            )
            .with_verifier(Box::new(OpenAiVerifier::new(client)))
        }
        None => {
            warn!("OPENAI_API_KEY unset, using template text without verification");
            PostingDriver::new(store, Box::new(TemplateGenerator), settings)
        }
    };

    match &config.twitter_bearer_token {
        Some(token) => {
            // Posts are not idempotent; a failed publish waits for the next run.
            let publish_fetcher = Arc::new(HttpFetcher::new(HttpClientConfig {
                backoff: BackoffPolicy::none(),
                ..config.http_client_config()
            })?);
            driver = driver.with_publisher(Box::new(TwitterPublisher::new(
                publish_fetcher,
                &config.twitter_api_base,
                token,
            )));
        }
        None if options.dry_run => info!("TWITTER_BEARER_TOKEN unset, dry run only"),
        None => bail!("TWITTER_BEARER_TOKEN is required to publish; use --dry-run to preview"),
    }

    Ok(driver)
}

/// Read the corpus snapshot at `config.corpus_path`.
pub async fn load_corpus(config: &BotConfig) -> Result<RootCorpus> {
    let store = CorpusSnapshotStore::new(&config.corpus_path);
    if !store.exists().await? {
        bail!(
            "no corpus snapshot at {}; run `etymo build-corpus` first",
            config.corpus_path.display()
        );
    }
    let snapshot = store
        .read()
        .await
        .with_context(|| format!("loading corpus {}", config.corpus_path.display()))?;
    info!(
        roots = snapshot.roots.len(),
        built_at = %snapshot.built_at,
        "corpus loaded"
    );
    Ok(snapshot.roots)
}
