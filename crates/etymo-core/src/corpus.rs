//! Source aggregation: facts in, consensus-filtered root corpus out.
//!
//! [`RootCorpusBuilder`] is the only mutable phase. [`RootCorpusBuilder::finalize`]
//! hands back an immutable [`RootCorpus`] in which every entry is corroborated
//! by at least [`MIN_CONSENSUS_SOURCES`] distinct sources.

use std::collections::btree_map::{self, BTreeMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical::{canonicalize, CanonicalRootId};
use crate::{normalize_word, RawEtymologyFact, RootEntry};

pub const MIN_CONSENSUS_SOURCES: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub facts_seen: usize,
    pub accepted: usize,
    /// Root text rejected by the canonicalizer.
    pub rejected_root: usize,
    /// Fact missing a word or a source id.
    pub rejected_fact: usize,
}

#[derive(Debug, Default)]
pub struct RootCorpusBuilder {
    entries: BTreeMap<CanonicalRootId, RootEntry>,
    stats: IngestStats,
}

impl RootCorpusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, fact: RawEtymologyFact) {
        self.stats.facts_seen += 1;

        let word = normalize_word(&fact.word);
        let source_id = fact.source_id.trim();
        if word.is_empty() || source_id.is_empty() {
            self.stats.rejected_fact += 1;
            return;
        }

        let Some(root_id) = canonicalize(&fact.raw_root) else {
            debug!(word = %word, raw_root = %fact.raw_root, "root filtered out");
            self.stats.rejected_root += 1;
            return;
        };

        let entry = self.entries.entry(root_id).or_default();
        entry.words.insert(word);
        entry.source_ids.insert(source_id.to_string());
        if entry.gloss.is_none() {
            entry.gloss = fact
                .gloss
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty());
        }
        self.stats.accepted += 1;
    }

    pub fn ingest_all<I>(&mut self, facts: I)
    where
        I: IntoIterator<Item = RawEtymologyFact>,
    {
        for fact in facts {
            self.ingest(fact);
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Roots seen so far, before the consensus filter.
    pub fn pending_roots(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of the consensus-filtered corpus. Repeated calls on the same
    /// ingested facts return equal corpora.
    pub fn finalize(&self) -> RootCorpus {
        let corpus = RootCorpus::from_entries(
            self.entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone())),
        );
        debug!(
            pending = self.entries.len(),
            kept = corpus.len(),
            "root corpus finalized"
        );
        corpus
    }
}

/// Read-only corpus shared with the selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<CanonicalRootId, RootEntry>",
    into = "BTreeMap<CanonicalRootId, RootEntry>"
)]
pub struct RootCorpus {
    entries: BTreeMap<CanonicalRootId, RootEntry>,
}

impl RootCorpus {
    /// Builds a corpus, dropping every entry that lacks source consensus.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (CanonicalRootId, RootEntry)>,
    {
        Self {
            entries: entries
                .into_iter()
                .filter(|(_, entry)| entry.has_consensus())
                .collect(),
        }
    }

    pub fn get(&self, root_id: &CanonicalRootId) -> Option<&RootEntry> {
        self.entries.get(root_id)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, CanonicalRootId, RootEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with at least two words, i.e. able to produce a pair.
    pub fn pairable_roots(&self) -> usize {
        self.entries.values().filter(|e| e.is_pairable()).count()
    }

    pub fn total_words(&self) -> usize {
        self.entries.values().map(|e| e.words.len()).sum()
    }
}

impl From<BTreeMap<CanonicalRootId, RootEntry>> for RootCorpus {
    fn from(entries: BTreeMap<CanonicalRootId, RootEntry>) -> Self {
        Self::from_entries(entries)
    }
}

impl From<RootCorpus> for BTreeMap<CanonicalRootId, RootEntry> {
    fn from(corpus: RootCorpus) -> Self {
        corpus.entries
    }
}

impl<'a> IntoIterator for &'a RootCorpus {
    type Item = (&'a CanonicalRootId, &'a RootEntry);
    type IntoIter = btree_map::Iter<'a, CanonicalRootId, RootEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(word: &str, root: &str, source: &str) -> RawEtymologyFact {
        RawEtymologyFact::new(word, root, source)
    }

    fn id(raw: &str) -> CanonicalRootId {
        canonicalize(raw).expect("canonical")
    }

    #[test]
    fn single_source_roots_are_dropped() {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest(fact("wallop", "*wal-", "A"));
        builder.ingest(fact("gallop", "*walhan-", "A"));
        builder.ingest(fact("well", "*wel-(2)", "A"));
        assert!(builder.finalize().is_empty());
    }

    #[test]
    fn same_source_twice_is_not_consensus() {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest(fact("salary", "*sal-", "wiktionary"));
        builder.ingest(fact("salad", "*sal-", " wiktionary "));
        let corpus = builder.finalize();
        assert!(corpus.get(&id("*sal-")).is_none());
    }

    #[test]
    fn spelling_variants_pool_their_sources() {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest(fact("have", "*habjan-", "wiktionary"));
        builder.ingest(fact("heave", "*hebban-", "etymonline"));
        let corpus = builder.finalize();
        let entry = corpus.get(&id("*habjan-")).expect("HABJAN entry");
        assert_eq!(entry.source_ids.len(), 2);
        assert!(entry.words.contains("have") && entry.words.contains("heave"));
    }

    #[test]
    fn first_non_empty_gloss_wins() {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest(fact("salary", "*sal-", "A").with_gloss("   "));
        builder.ingest(fact("salad", "*sal-", "B").with_gloss("salt"));
        builder.ingest(fact("saline", "*sal-", "C").with_gloss("sea"));
        let corpus = builder.finalize();
        assert_eq!(
            corpus.get(&id("*sal-")).and_then(|e| e.gloss.as_deref()),
            Some("salt")
        );
    }

    #[test]
    fn rejected_facts_are_counted_not_raised() {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest(fact("latin", "Latin", "A"));
        builder.ingest(fact("", "*sal-", "A"));
        builder.ingest(fact("salad", "*sal-", ""));
        builder.ingest(fact("Salary", "*sal-", "A"));
        let stats = builder.stats();
        assert_eq!(stats.facts_seen, 4);
        assert_eq!(stats.rejected_root, 1);
        assert_eq!(stats.rejected_fact, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(builder.pending_roots(), 1);
    }

    #[test]
    fn words_are_normalized_to_lowercase() {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest(fact(" Salary", "*sal-", "A"));
        builder.ingest(fact("salary ", "*sal-", "B"));
        let corpus = builder.finalize();
        let entry = corpus.get(&id("*sal-")).expect("entry");
        assert_eq!(entry.words.len(), 1);
        assert!(!entry.is_pairable());
        assert_eq!(corpus.pairable_roots(), 0);
    }

    #[test]
    fn deserialized_corpus_enforces_consensus() {
        let json = r#"{
            "SAL": {"words": ["salad", "salary"], "source_ids": ["A", "B"], "gloss": "salt"},
            "WAL": {"words": ["wallop", "gallop"], "source_ids": ["A"]}
        }"#;
        let corpus: RootCorpus = serde_json::from_str(json).expect("corpus json");
        assert_eq!(corpus.len(), 1);
        assert!(corpus.get(&CanonicalRootId::from_stored("SAL")).is_some());

        let round = serde_json::to_string(&corpus).expect("serialize");
        let again: RootCorpus = serde_json::from_str(&round).expect("reparse");
        assert_eq!(corpus, again);
    }
}
