//! Pair selection over a finalized corpus.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::corpus::RootCorpus;
use crate::quality::is_trivial;
use crate::{normalize_word, CandidatePair, FailedWordRecord, PairKey, PostedRecord};

/// Failure count at which a word stops being offered.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub allow_trivial: bool,
    pub failure_threshold: u32,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            allow_trivial: false,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Posted pairs keyed by unordered words + root.
#[derive(Debug, Clone, Default)]
pub struct PostedHistory {
    keys: HashSet<PairKey>,
}

impl PostedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: &PostedRecord) {
        self.keys.insert(record.pair_key());
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<'a> FromIterator<&'a PostedRecord> for PostedHistory {
    fn from_iter<I: IntoIterator<Item = &'a PostedRecord>>(iter: I) -> Self {
        let mut history = Self::new();
        for record in iter {
            history.insert(record);
        }
        history
    }
}

impl FromIterator<PostedRecord> for PostedHistory {
    fn from_iter<I: IntoIterator<Item = PostedRecord>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(|r| r.pair_key()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailedWords {
    records: HashMap<String, FailedWordRecord>,
}

impl FailedWords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: FailedWordRecord) {
        self.records.insert(normalize_word(&record.word), record);
    }

    pub fn failure_count(&self, word: &str) -> u32 {
        self.records
            .get(&normalize_word(word))
            .map(|r| r.failure_count)
            .unwrap_or(0)
    }

    pub fn is_excluded(&self, word: &str, threshold: u32) -> bool {
        self.failure_count(word) >= threshold
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailedWordRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<FailedWordRecord> for FailedWords {
    fn from_iter<I: IntoIterator<Item = FailedWordRecord>>(iter: I) -> Self {
        let mut failed = Self::new();
        for record in iter {
            failed.insert(record);
        }
        failed
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    considered: usize,
    failed_word: usize,
    already_posted: usize,
    trivial: usize,
}

/// Every pair that survives the failure, history and triviality filters, in
/// corpus order.
pub fn candidate_pool(
    corpus: &RootCorpus,
    history: &PostedHistory,
    failed: &FailedWords,
    policy: &SelectionPolicy,
) -> Vec<CandidatePair> {
    let mut pool = Vec::new();
    let mut counters = PoolCounters::default();

    for (root_id, entry) in corpus.iter().filter(|(_, e)| e.is_pairable()) {
        let words: Vec<&String> = entry.words.iter().collect();
        for (i, word1) in words.iter().enumerate() {
            for word2 in &words[i + 1..] {
                counters.considered += 1;

                if failed.is_excluded(word1, policy.failure_threshold)
                    || failed.is_excluded(word2, policy.failure_threshold)
                {
                    counters.failed_word += 1;
                    continue;
                }
                if history.contains(&PairKey::new(word1, word2, root_id.clone())) {
                    counters.already_posted += 1;
                    continue;
                }
                if !policy.allow_trivial && is_trivial(root_id, word1, word2) {
                    counters.trivial += 1;
                    continue;
                }

                pool.push(CandidatePair {
                    word1: (*word1).clone(),
                    word2: (*word2).clone(),
                    root_id: root_id.clone(),
                    shared_gloss: entry.gloss.clone(),
                });
            }
        }
    }

    debug!(
        considered = counters.considered,
        failed_word = counters.failed_word,
        already_posted = counters.already_posted,
        trivial = counters.trivial,
        surviving = pool.len(),
        "candidate pool built"
    );
    pool
}

/// Uniform random pick from [`candidate_pool`]. `None` means nothing is
/// eligible this cycle.
pub fn select_next<R>(
    corpus: &RootCorpus,
    history: &PostedHistory,
    failed: &FailedWords,
    policy: &SelectionPolicy,
    rng: &mut R,
) -> Option<CandidatePair>
where
    R: Rng + ?Sized,
{
    let pool = candidate_pool(corpus, history, failed, policy);
    pool.choose(rng).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{canonicalize, RawEtymologyFact, RootCorpusBuilder};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn corpus(facts: &[(&str, &str, &str)]) -> RootCorpus {
        let mut builder = RootCorpusBuilder::new();
        builder.ingest_all(
            facts
                .iter()
                .map(|(w, r, s)| RawEtymologyFact::new(*w, *r, *s)),
        );
        builder.finalize()
    }

    fn failure(word: &str, count: u32) -> FailedWordRecord {
        FailedWordRecord {
            word: word.to_string(),
            failure_count: count,
            last_failure: Utc::now(),
        }
    }

    fn posted(word1: &str, word2: &str, root: &str) -> PostedRecord {
        PostedRecord {
            word1: word1.to_string(),
            word2: word2.to_string(),
            root_id: canonicalize(root).expect("root"),
            posted_at: Utc::now(),
            external_post_id: "1".into(),
        }
    }

    fn guest_host() -> RootCorpus {
        corpus(&[
            ("guest", "*ghos-ti-", "A"),
            ("host", "*ghos-ti-", "B"),
            ("hostile", "*ghos-ti-", "B"),
        ])
    }

    #[test]
    fn enumerates_unordered_pairs_once() {
        let pool = candidate_pool(
            &guest_host(),
            &PostedHistory::new(),
            &FailedWords::new(),
            &SelectionPolicy::default(),
        );
        let pairs: Vec<(&str, &str)> = pool
            .iter()
            .map(|p| (p.word1.as_str(), p.word2.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("guest", "host"), ("guest", "hostile"), ("host", "hostile")]
        );
    }

    #[test]
    fn failed_words_at_threshold_are_skipped() {
        let failed: FailedWords = [failure("HOSTILE", 3), failure("guest", 2)]
            .into_iter()
            .collect();
        let pool = candidate_pool(
            &guest_host(),
            &PostedHistory::new(),
            &failed,
            &SelectionPolicy::default(),
        );
        assert_eq!(pool.len(), 1);
        assert_eq!((pool[0].word1.as_str(), pool[0].word2.as_str()), ("guest", "host"));
    }

    #[test]
    fn posted_pairs_are_excluded_in_either_order() {
        let history: PostedHistory = [posted("host", "guest", "*ghos-ti-")].into_iter().collect();
        let pool = candidate_pool(
            &guest_host(),
            &history,
            &FailedWords::new(),
            &SelectionPolicy::default(),
        );
        assert!(pool
            .iter()
            .all(|p| !(p.word1 == "guest" && p.word2 == "host")));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn same_words_under_another_root_stay_eligible() {
        let corpus = corpus(&[
            ("guest", "*ghos-ti-", "A"),
            ("host", "*ghos-ti-", "B"),
            ("guest", "*ghes-", "A"),
            ("host", "*ghes-", "B"),
        ]);
        let history: PostedHistory = [posted("guest", "host", "*ghos-ti-")].into_iter().collect();
        let pool = candidate_pool(
            &corpus,
            &history,
            &FailedWords::new(),
            &SelectionPolicy::default(),
        );
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].root_id.as_str(), "GHES");
    }

    #[test]
    fn trivial_pairs_need_the_override() {
        let pool_default = candidate_pool(
            &guest_host(),
            &PostedHistory::new(),
            &FailedWords::new(),
            &SelectionPolicy::default(),
        );
        assert_eq!(pool_default.len(), 3);

        let corpus = corpus(&[("pedal", "*ped-", "A"), ("pedestrian", "*ped-", "B")]);
        let strict = SelectionPolicy::default();
        let lenient = SelectionPolicy {
            allow_trivial: true,
            ..SelectionPolicy::default()
        };
        assert!(
            candidate_pool(&corpus, &PostedHistory::new(), &FailedWords::new(), &strict).is_empty()
        );
        assert_eq!(
            candidate_pool(&corpus, &PostedHistory::new(), &FailedWords::new(), &lenient).len(),
            1
        );
    }

    #[test]
    fn selection_is_seeded_random_over_the_pool() {
        let corpus = guest_host();
        let mut seen = HashSet::new();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let pair = select_next(
                &corpus,
                &PostedHistory::new(),
                &FailedWords::new(),
                &SelectionPolicy::default(),
                &mut rng,
            )
            .expect("pair");
            seen.insert((pair.word1, pair.word2));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let selected = select_next(
            &RootCorpus::default(),
            &PostedHistory::new(),
            &FailedWords::new(),
            &SelectionPolicy::default(),
            &mut rng,
        );
        assert!(selected.is_none());
    }
}
