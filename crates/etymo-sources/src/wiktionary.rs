use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use etymo_core::{normalize_word, RawEtymologyFact};
use serde::Deserialize;
use tracing::{debug, info};

use crate::extract::{is_valid_word, RootMentionExtractor};
use crate::{
    next_line, open_lines, EtymologySource, FactSink, FeedReport, SourceContext, SourceError,
};

const PROGRESS_EVERY: usize = 100_000;

/// One line of a kaikki.org-style Wiktionary extraction.
#[derive(Debug, Deserialize)]
struct DumpEntry {
    #[serde(default)]
    word: String,
    #[serde(default)]
    etymology_text: Option<String>,
    #[serde(default)]
    etymology_texts: Vec<String>,
    #[serde(default)]
    senses: Vec<DumpSense>,
}

#[derive(Debug, Deserialize)]
struct DumpSense {
    #[serde(default)]
    etymology: Option<String>,
}

impl DumpEntry {
    fn etymology_texts(&self) -> impl Iterator<Item = &str> {
        self.etymology_text
            .as_deref()
            .into_iter()
            .chain(self.senses.iter().filter_map(|s| s.etymology.as_deref()))
            .chain(self.etymology_texts.iter().map(String::as_str))
    }
}

/// Reads a JSON-lines Wiktionary dump from disk, plain or `.jsonl.gz`.
pub struct WiktionaryDumpSource {
    path: PathBuf,
    source_id: String,
    max_entries: Option<usize>,
    extractor: RootMentionExtractor,
}

impl WiktionaryDumpSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        Ok(Self {
            path: path.into(),
            source_id: "wiktionary".to_string(),
            max_entries: None,
            extractor: RootMentionExtractor::new()?,
        })
    }

    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    fn facts_for_entry(&self, entry: &DumpEntry) -> Vec<RawEtymologyFact> {
        let word = normalize_word(&entry.word);
        if !is_valid_word(&word) {
            return Vec::new();
        }

        let mut roots: BTreeMap<String, Option<String>> = BTreeMap::new();
        for text in entry.etymology_texts() {
            for mention in self.extractor.mentions(text) {
                let slot = roots.entry(mention.raw_root).or_default();
                if slot.is_none() {
                    *slot = mention.gloss;
                }
            }
        }

        roots
            .into_iter()
            .map(|(raw_root, gloss)| RawEtymologyFact {
                word: word.clone(),
                raw_root,
                source_id: self.source_id.clone(),
                gloss,
            })
            .collect()
    }
}

#[async_trait]
impl EtymologySource for WiktionaryDumpSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn facts(
        &self,
        _ctx: &SourceContext<'_>,
        sink: &mut dyn FactSink,
    ) -> Result<FeedReport, SourceError> {
        let mut lines = open_lines(&self.path).await?;
        let mut report = FeedReport::default();
        let mut line_no = 0usize;

        while let Some(line) = next_line(&mut lines, &self.path).await? {
            line_no += 1;
            if self.max_entries.is_some_and(|max| report.records_read >= max) {
                info!(max_entries = report.records_read, "wiktionary entry limit reached");
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            report.records_read += 1;
            if report.records_read % PROGRESS_EVERY == 0 {
                info!(
                    entries = report.records_read,
                    facts = report.facts_emitted,
                    "wiktionary dump progress"
                );
            }

            let entry: DumpEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(line = line_no, error = %err, "skipping malformed dump line");
                    report.skipped += 1;
                    continue;
                }
            };

            let facts = self.facts_for_entry(&entry);
            if facts.is_empty() {
                report.skipped += 1;
                continue;
            }
            report.facts_emitted += facts.len();
            for fact in facts {
                sink.accept(fact);
            }
        }

        info!(
            source_id = %self.source_id,
            path = %self.path.display(),
            entries = report.records_read,
            facts = report.facts_emitted,
            skipped = report.skipped,
            "wiktionary dump processed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etymo_core::FailedWords;
    use etymo_storage::MemoryHistoryStore;
    use std::io::Write;

    fn dump(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    #[tokio::test]
    async fn reads_every_etymology_field() {
        let file = dump(&[
            r#"{"word": "Salary", "etymology_text": "From Latin salārium, from sal, from Proto-Indo-European *seh₂l- (\"salt\")."}"#,
            r#"{"word": "heave", "senses": [{"etymology": "From Proto-Germanic *habjaną"}]}"#,
            r#"{"word": "wallop", "etymology_texts": ["from Old North French waloper, from Frankish *wala hlaupan"]}"#,
            r#"{"word": "the", "etymology_text": "from PIE *so-"}"#,
            "not json at all",
            "",
        ]);
        let source = WiktionaryDumpSource::new(file.path()).expect("source");
        let history = MemoryHistoryStore::new();
        let failed = FailedWords::new();
        let ctx = SourceContext {
            history: &history,
            failed: &failed,
            failure_threshold: 3,
        };

        let mut facts: Vec<RawEtymologyFact> = Vec::new();
        let report = source.facts(&ctx, &mut facts).await.expect("feed");

        assert_eq!(report.records_read, 5);
        assert_eq!(report.skipped, 2);
        assert!(facts.iter().all(|f| f.source_id == "wiktionary"));

        let salary = facts
            .iter()
            .find(|f| f.word == "salary" && f.raw_root == "seh₂l")
            .expect("salary fact");
        assert_eq!(salary.gloss.as_deref(), Some("salt"));
        assert!(facts.iter().any(|f| f.word == "heave" && f.raw_root == "habjaną"));
        assert!(facts.iter().any(|f| f.word == "wallop" && f.raw_root == "wala"));
    }

    #[tokio::test]
    async fn rerunning_the_source_starts_over() {
        let file = dump(&[r#"{"word": "guest", "etymology_text": "from PIE *ghos-ti-"}"#]);
        let source = WiktionaryDumpSource::new(file.path())
            .expect("source")
            .with_max_entries(Some(10));
        let history = MemoryHistoryStore::new();
        let failed = FailedWords::new();
        let ctx = SourceContext {
            history: &history,
            failed: &failed,
            failure_threshold: 3,
        };

        let mut first: Vec<RawEtymologyFact> = Vec::new();
        let mut second: Vec<RawEtymologyFact> = Vec::new();
        source.facts(&ctx, &mut first).await.expect("first pass");
        source.facts(&ctx, &mut second).await.expect("second pass");
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn missing_dump_is_an_io_error() {
        let source = WiktionaryDumpSource::new("/nonexistent/dump.jsonl").expect("source");
        let history = MemoryHistoryStore::new();
        let failed = FailedWords::new();
        let ctx = SourceContext {
            history: &history,
            failed: &failed,
            failure_threshold: 3,
        };
        let mut facts: Vec<RawEtymologyFact> = Vec::new();
        let err = source.facts(&ctx, &mut facts).await.expect_err("missing file");
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
