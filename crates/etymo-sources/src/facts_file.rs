use std::path::PathBuf;

use async_trait::async_trait;
use etymo_core::RawEtymologyFact;
use tracing::{info, warn};

use crate::{
    next_line, open_lines, EtymologySource, FactSink, FeedReport, SourceContext, SourceError,
};

/// JSON lines of [`RawEtymologyFact`]; each line names its own source id.
pub struct FactsFileSource {
    path: PathBuf,
    label: String,
}

impl FactsFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path
            .file_stem()
            .map(|s| format!("facts:{}", s.to_string_lossy()))
            .unwrap_or_else(|| "facts".to_string());
        Self { path, label }
    }
}

#[async_trait]
impl EtymologySource for FactsFileSource {
    fn source_id(&self) -> &str {
        &self.label
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
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            report.records_read += 1;
            match serde_json::from_str::<RawEtymologyFact>(line) {
                Ok(fact) => {
                    sink.accept(fact);
                    report.facts_emitted += 1;
                }
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_no,
                        error = %err,
                        "skipping malformed fact"
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            path = %self.path.display(),
            facts = report.facts_emitted,
            skipped = report.skipped,
            "facts file read"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etymo_core::{canonicalize, FailedWords, RootCorpusBuilder};
    use etymo_storage::MemoryHistoryStore;
    use std::io::Write;

    #[tokio::test]
    async fn facts_flow_into_the_builder() {
        let mut file = tempfile::Builder::new()
            .suffix(".jsonl")
            .tempfile()
            .expect("temp file");
        writeln!(file, "# curated pairs").expect("write");
        writeln!(file, r#"{{"word": "salary", "raw_root": "*sal-", "source_id": "A", "gloss": "salt"}}"#).expect("write");
        writeln!(file, r#"{{"word": "salad", "raw_root": "*sal-", "source_id": "B"}}"#).expect("write");
        writeln!(file, r#"{{"word": "salad"}}"#).expect("write");
        writeln!(file).expect("write");

        let source = FactsFileSource::new(file.path());
        assert!(source.source_id().starts_with("facts:"));

        let history = MemoryHistoryStore::new();
        let failed = FailedWords::new();
        let ctx = SourceContext {
            history: &history,
            failed: &failed,
            failure_threshold: 3,
        };
        let mut builder = RootCorpusBuilder::new();
        let report = source.facts(&ctx, &mut builder).await.expect("feed");

        assert_eq!(report.records_read, 3);
        assert_eq!(report.facts_emitted, 2);
        assert_eq!(report.skipped, 1);

        let corpus = builder.finalize();
        let entry = corpus
            .get(&canonicalize("*sal-").expect("root"))
            .expect("SAL entry");
        assert_eq!(entry.gloss.as_deref(), Some("salt"));
        assert_eq!(entry.words.len(), 2);
    }
}
