//! Core domain model for the etymology pair bot: canonical roots, the
//! multi-source consensus corpus, trivial-pair filtering and pair selection.
//!
//! Nothing in this crate performs I/O. Collaborators hand it resolved data
//! (facts, posted history, failure counts) and get plain values back.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod canonical;
pub mod corpus;
pub mod quality;
pub mod select;

pub use canonical::{canonicalize, CanonicalRootId, MIN_ROOT_LEN};
pub use corpus::{IngestStats, RootCorpus, RootCorpusBuilder, MIN_CONSENSUS_SOURCES};
pub use quality::is_trivial;
pub use select::{
    candidate_pool, select_next, FailedWords, PostedHistory, SelectionPolicy,
    DEFAULT_FAILURE_THRESHOLD,
};

pub const CRATE_NAME: &str = "etymo-core";

/// One observation handed over by an etymology source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEtymologyFact {
    pub word: String,
    pub raw_root: String,
    pub source_id: String,
    #[serde(default)]
    pub gloss: Option<String>,
}

impl RawEtymologyFact {
    pub fn new(
        word: impl Into<String>,
        raw_root: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            word: word.into(),
            raw_root: raw_root.into(),
            source_id: source_id.into(),
            gloss: None,
        }
    }

    pub fn with_gloss(mut self, gloss: impl Into<String>) -> Self {
        self.gloss = Some(gloss.into());
        self
    }
}

/// Aggregated state for one canonical root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootEntry {
    pub words: BTreeSet<String>,
    pub source_ids: BTreeSet<String>,
    #[serde(default)]
    pub gloss: Option<String>,
}

impl RootEntry {
    /// Whether enough independent sources corroborate this root.
    pub fn has_consensus(&self) -> bool {
        self.source_ids.len() >= MIN_CONSENSUS_SOURCES
    }

    pub fn is_pairable(&self) -> bool {
        self.words.len() >= 2
    }
}

/// Deduplication identity of a pair: the unordered words plus the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    first: String,
    second: String,
    root_id: CanonicalRootId,
}

impl PairKey {
    pub fn new(word_a: &str, word_b: &str, root_id: CanonicalRootId) -> Self {
        let a = normalize_word(word_a);
        let b = normalize_word(word_b);
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first,
            second,
            root_id,
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    pub fn root_id(&self) -> &CanonicalRootId {
        &self.root_id
    }

    /// Flat string form used as a unique column by persisted stores.
    pub fn storage_key(&self) -> String {
        format!("{}|{}|{}", self.first, self.second, self.root_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub word1: String,
    pub word2: String,
    pub root_id: CanonicalRootId,
    pub shared_gloss: Option<String>,
}

impl CandidatePair {
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.word1, &self.word2, self.root_id.clone())
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.word1, self.word2, self.root_id)
    }
}

/// Append-only history entry for a published pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedRecord {
    pub word1: String,
    pub word2: String,
    pub root_id: CanonicalRootId,
    pub posted_at: DateTime<Utc>,
    pub external_post_id: String,
}

impl PostedRecord {
    pub fn for_pair(
        pair: &CandidatePair,
        external_post_id: impl Into<String>,
        posted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            word1: pair.word1.clone(),
            word2: pair.word2.clone(),
            root_id: pair.root_id.clone(),
            posted_at,
            external_post_id: external_post_id.into(),
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.word1, &self.word2, self.root_id.clone())
    }
}

/// Failure bookkeeping for words whose etymology lookup keeps failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWordRecord {
    pub word: String,
    pub failure_count: u32,
    pub last_failure: DateTime<Utc>,
}

/// Lowercase + trim; the single word normalization used across the workspace.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}
