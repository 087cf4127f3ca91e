//! Etymology source contracts and the concrete sources that feed the corpus
//! builder: Wiktionary JSONL dumps, Etymonline word pages, JSON-lines fact
//! files and legacy root-corpus exports.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use etymo_core::{FailedWords, RawEtymologyFact, RootCorpusBuilder};
use etymo_storage::{FetchError, HistoryStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use async_compression::tokio::bufread::GzipDecoder;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader, Lines};

pub mod etymonline;
pub mod extract;
pub mod facts_file;
pub mod legacy;
pub mod wiktionary;

pub use etymonline::{html_etymology_text, EtymonlineSource, ETYMONLINE_BASE_URL};
pub use extract::{is_valid_word, RootMention, RootMentionExtractor};
pub use facts_file::FactsFileSource;
pub use legacy::{legacy_facts, LegacyImportSource};
pub use wiktionary::WiktionaryDumpSource;

pub const CRATE_NAME: &str = "etymo-sources";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
    #[error("rate limited by {url}")]
    RateLimited { url: String },
    #[error(transparent)]
    Fetch(FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SourceError {
    /// Errors after which the remaining sources can still run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<FetchError> for SourceError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::RateLimited { url, .. } => Self::RateLimited { url },
            other => Self::Fetch(other),
        }
    }
}

/// Receiver for facts as a source produces them.
pub trait FactSink: Send {
    fn accept(&mut self, fact: RawEtymologyFact);
}

impl FactSink for RootCorpusBuilder {
    fn accept(&mut self, fact: RawEtymologyFact) {
        self.ingest(fact);
    }
}

impl FactSink for Vec<RawEtymologyFact> {
    fn accept(&mut self, fact: RawEtymologyFact) {
        self.push(fact);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    /// Input records (lines, pages, map entries) looked at.
    pub records_read: usize,
    pub facts_emitted: usize,
    /// Records dropped as malformed, invalid or already failing.
    pub skipped: usize,
}

/// Run-scoped collaborators a source may consult.
pub struct SourceContext<'a> {
    pub history: &'a dyn HistoryStore,
    pub failed: &'a FailedWords,
    pub failure_threshold: u32,
}

/// A finite, restartable producer of etymology facts. Each call to
/// [`EtymologySource::facts`] starts from the beginning of the input.
#[async_trait]
pub trait EtymologySource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn facts(
        &self,
        ctx: &SourceContext<'_>,
        sink: &mut dyn FactSink,
    ) -> Result<FeedReport, SourceError>;
}

/// Decompressed reader over a file; `.gz` paths are gunzipped on the fly.
pub(crate) type InputReader = Box<dyn AsyncRead + Send + Unpin>;

pub(crate) fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

pub(crate) async fn open_input(path: &Path) -> Result<InputReader, SourceError> {
    let file = File::open(path)
        .await
        .map_err(|e| SourceError::io(path, e))?;
    if is_gzip(path) {
        let mut decoder = GzipDecoder::new(BufReader::new(file));
        decoder.multiple_members(true);
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(file))
    }
}

pub(crate) async fn open_lines(
    path: &Path,
) -> Result<Lines<BufReader<InputReader>>, SourceError> {
    Ok(BufReader::new(open_input(path).await?).lines())
}

pub(crate) async fn next_line(
    lines: &mut Lines<BufReader<InputReader>>,
    path: &Path,
) -> Result<Option<String>, SourceError> {
    lines
        .next_line()
        .await
        .map_err(|e| SourceError::io(path, e))
}

pub(crate) async fn read_input_to_string(path: &Path) -> Result<String, SourceError> {
    let mut text = String::new();
    open_input(path)
        .await?
        .read_to_string(&mut text)
        .await
        .map_err(|e| SourceError::io(path, e))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_are_transient_other_fetch_errors_are_not() {
        let limited: SourceError = FetchError::RateLimited {
            url: "https://www.etymonline.com/word/salt".into(),
            retry_after_secs: Some(30),
        }
        .into();
        assert!(limited.is_transient());

        let missing: SourceError = FetchError::HttpStatus {
            status: 404,
            url: "https://www.etymonline.com/word/zzz".into(),
        }
        .into();
        assert!(!missing.is_transient());
    }

    #[test]
    fn builder_is_a_fact_sink() {
        let mut builder = RootCorpusBuilder::new();
        {
            let sink: &mut dyn FactSink = &mut builder;
            sink.accept(RawEtymologyFact::new("salary", "*sal-", "A"));
            sink.accept(RawEtymologyFact::new("salad", "*sal-", "B"));
        }
        assert_eq!(builder.stats().accepted, 2);
        assert_eq!(builder.finalize().len(), 1);
    }
}
