use chrono::Utc;
use etymo_core::{
    canonicalize, is_trivial, select_next, FailedWordRecord, FailedWords, PostedHistory,
    PostedRecord, RawEtymologyFact, RootCorpusBuilder, SelectionPolicy,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn builder_with(facts: &[(&str, &str, &str)]) -> RootCorpusBuilder {
    let mut builder = RootCorpusBuilder::new();
    for (word, root, source) in facts {
        builder.ingest(RawEtymologyFact::new(*word, *root, *source));
    }
    builder
}

#[test]
fn salary_and_salad_share_sal_but_read_as_trivial() {
    let corpus = builder_with(&[("salary", "*sal-", "A"), ("salad", "*sal-", "B")]).finalize();
    let sal = canonicalize("*sal-").expect("SAL");
    let entry = corpus.get(&sal).expect("SAL entry");
    assert_eq!(sal.as_str(), "SAL");
    assert!(entry.words.contains("salary") && entry.words.contains("salad"));
    assert_eq!(entry.source_ids.len(), 2);
    assert!(is_trivial(&sal, "salary", "salad"));

    let mut rng = StdRng::seed_from_u64(42);
    let strict = select_next(
        &corpus,
        &PostedHistory::new(),
        &FailedWords::new(),
        &SelectionPolicy::default(),
        &mut rng,
    );
    assert!(strict.is_none());

    let lenient = SelectionPolicy {
        allow_trivial: true,
        ..SelectionPolicy::default()
    };
    let pair = select_next(
        &corpus,
        &PostedHistory::new(),
        &FailedWords::new(),
        &lenient,
        &mut rng,
    )
    .expect("pair with override");
    assert_eq!(pair.root_id, sal);
}

#[test]
fn single_source_root_never_selected() {
    let corpus =
        builder_with(&[("wallop", "*walhan-", "A"), ("gallop", "*walhan-", "A")]).finalize();
    assert!(corpus.is_empty());

    let mut rng = StdRng::seed_from_u64(3);
    let picked = select_next(
        &corpus,
        &PostedHistory::new(),
        &FailedWords::new(),
        &SelectionPolicy::default(),
        &mut rng,
    );
    assert!(picked.is_none());
}

#[test]
fn posted_pair_is_not_offered_again() {
    let corpus = builder_with(&[
        ("guest", "*ghos-ti-", "wiktionary"),
        ("host", "*ghos-ti-", "etymonline"),
    ])
    .finalize();
    let mut history = PostedHistory::new();
    let mut rng = StdRng::seed_from_u64(9);

    let first = select_next(
        &corpus,
        &history,
        &FailedWords::new(),
        &SelectionPolicy::default(),
        &mut rng,
    )
    .expect("first pick");
    history.insert(&PostedRecord::for_pair(&first, "1001", Utc::now()));

    for _ in 0..20 {
        let next = select_next(
            &corpus,
            &history,
            &FailedWords::new(),
            &SelectionPolicy::default(),
            &mut rng,
        );
        assert!(next.is_none());
    }
}

#[test]
fn finalize_is_idempotent() {
    let builder = builder_with(&[
        ("have", "*habjan-", "A"),
        ("heave", "*haftan-", "B"),
        ("wallop", "*walhan-", "A"),
    ]);
    let once = builder.finalize();
    let twice = builder.finalize();
    assert_eq!(once, twice);
    assert_eq!(once.len(), 1);
}

#[test]
fn words_over_the_failure_threshold_are_excluded() {
    let corpus = builder_with(&[
        ("guest", "*ghos-ti-", "A"),
        ("host", "*ghos-ti-", "B"),
    ])
    .finalize();
    let failed: FailedWords = [FailedWordRecord {
        word: "host".into(),
        failure_count: 3,
        last_failure: Utc::now(),
    }]
    .into_iter()
    .collect();
    let mut rng = StdRng::seed_from_u64(5);

    let picked = select_next(
        &corpus,
        &PostedHistory::new(),
        &failed,
        &SelectionPolicy::default(),
        &mut rng,
    );
    assert!(picked.is_none());

    let raised = SelectionPolicy {
        failure_threshold: 4,
        ..SelectionPolicy::default()
    };
    assert!(select_next(&corpus, &PostedHistory::new(), &failed, &raised, &mut rng).is_some());
}
