//! One-shot migration of legacy root-corpus exports into facts.
//!
//! Two shapes exist in the wild, both keyed by root:
//! `{"root": ["word", ...]}` and
//! `{"root": {"words": [...], "gloss": "...", "sources": 2}}`.
//! A numeric `sources` count becomes synthetic source ids (`legacy-1`,
//! `legacy-2`, ...), capped at the consensus minimum, so the aggregator can
//! re-check consensus. Exports ending in `.gz` are read gzipped.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use etymo_core::{RawEtymologyFact, MIN_CONSENSUS_SOURCES};
use serde::Deserialize;
use tracing::info;

use crate::{
    read_input_to_string, EtymologySource, FactSink, FeedReport, SourceContext, SourceError,
};

pub const LEGACY_SOURCE_ID: &str = "legacy";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyRootValue {
    Words(Vec<String>),
    Entry {
        #[serde(default)]
        words: Vec<String>,
        #[serde(default)]
        gloss: Option<String>,
        #[serde(default)]
        sources: Option<LegacySources>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacySources {
    Count(u32),
    Named(Vec<String>),
}

impl LegacySources {
    fn source_ids(self) -> Vec<String> {
        match self {
            Self::Count(0) => vec![LEGACY_SOURCE_ID.to_string()],
            Self::Count(n) => (1..=n.min(MIN_CONSENSUS_SOURCES as u32))
                .map(|i| format!("{LEGACY_SOURCE_ID}-{i}"))
                .collect(),
            Self::Named(names) if names.is_empty() => vec![LEGACY_SOURCE_ID.to_string()],
            Self::Named(names) => names,
        }
    }
}

/// Flatten a legacy export into facts, one per word and source id.
pub fn legacy_facts(json: &str) -> Result<Vec<RawEtymologyFact>, serde_json::Error> {
    let roots: BTreeMap<String, LegacyRootValue> = serde_json::from_str(json)?;
    let mut facts = Vec::new();

    for (raw_root, value) in roots {
        let (words, gloss, source_ids) = match value {
            LegacyRootValue::Words(words) => (words, None, vec![LEGACY_SOURCE_ID.to_string()]),
            LegacyRootValue::Entry {
                words,
                gloss,
                sources,
            } => (
                words,
                gloss,
                sources
                    .map(LegacySources::source_ids)
                    .unwrap_or_else(|| vec![LEGACY_SOURCE_ID.to_string()]),
            ),
        };

        for word in &words {
            for source_id in &source_ids {
                facts.push(RawEtymologyFact {
                    word: word.clone(),
                    raw_root: raw_root.clone(),
                    source_id: source_id.clone(),
                    gloss: gloss.clone(),
                });
            }
        }
    }
    Ok(facts)
}

pub struct LegacyImportSource {
    path: PathBuf,
}

impl LegacyImportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EtymologySource for LegacyImportSource {
    fn source_id(&self) -> &str {
        LEGACY_SOURCE_ID
    }

    async fn facts(
        &self,
        _ctx: &SourceContext<'_>,
        sink: &mut dyn FactSink,
    ) -> Result<FeedReport, SourceError> {
        let text = read_input_to_string(&self.path).await?;
        let facts = legacy_facts(&text).map_err(|source| SourceError::Json {
            path: self.path.clone(),
            source,
        })?;

        let report = FeedReport {
            records_read: facts.len(),
            facts_emitted: facts.len(),
            skipped: 0,
        };
        for fact in facts {
            sink.accept(fact);
        }
        info!(path = %self.path.display(), facts = report.facts_emitted, "legacy corpus imported");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etymo_core::{canonicalize, RootCorpusBuilder};

    #[test]
    fn plain_word_lists_carry_a_single_source() {
        let facts = legacy_facts(r#"{"sal": ["salary", "salad"]}"#).expect("parse");
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|f| f.source_id == LEGACY_SOURCE_ID));

        let mut builder = RootCorpusBuilder::new();
        builder.ingest_all(facts);
        assert!(builder.finalize().is_empty());
    }

    #[test]
    fn counted_sources_expand_to_synthetic_ids() {
        let json = r#"{
            "HABJAN": {"words": ["have", "heave"], "gloss": "to have", "sources": 2},
            "*wer-(2)": {"words": ["warn", "ward"], "sources": ["wiktionary", "etymonline"]},
            "BHEL": {"words": ["bowl", "belly"]}
        }"#;
        let facts = legacy_facts(json).expect("parse");
        assert_eq!(facts.len(), 2 * 2 + 2 * 2 + 2);

        let mut builder = RootCorpusBuilder::new();
        builder.ingest_all(facts);
        let corpus = builder.finalize();

        let habjan = corpus
            .get(&canonicalize("HABJAN").expect("root"))
            .expect("HABJAN");
        assert_eq!(habjan.gloss.as_deref(), Some("to have"));
        assert_eq!(
            habjan.source_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["legacy-1".to_string(), "legacy-2".to_string()]
        );
        assert!(corpus.get(&canonicalize("*wer-(2)").expect("root")).is_some());
        assert!(corpus.get(&canonicalize("BHEL").expect("root")).is_none());
    }

    #[test]
    fn huge_source_counts_stop_at_the_consensus_minimum() {
        let json = r#"{"*ghos-ti-": {"words": ["guest", "host"], "sources": 2000000}}"#;
        let facts = legacy_facts(json).expect("parse");
        assert_eq!(facts.len(), 2 * MIN_CONSENSUS_SOURCES);

        let mut builder = RootCorpusBuilder::new();
        builder.ingest_all(facts);
        let corpus = builder.finalize();
        let ghosti = corpus
            .get(&canonicalize("*ghos-ti-").expect("root"))
            .expect("GHOSTI");
        assert_eq!(ghosti.source_ids.len(), MIN_CONSENSUS_SOURCES);
    }

    #[test]
    fn non_object_exports_are_rejected() {
        assert!(legacy_facts("[1, 2, 3]").is_err());
    }
}
