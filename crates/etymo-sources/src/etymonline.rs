use std::sync::Arc;

use async_trait::async_trait;
use etymo_core::{normalize_word, RawEtymologyFact};
use etymo_storage::HttpFetcher;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::extract::{is_valid_word, RootMentionExtractor};
use crate::{EtymologySource, FactSink, FeedReport, SourceContext, SourceError};

pub const ETYMONLINE_BASE_URL: &str = "https://www.etymonline.com";

const MIN_TEXT_LEN: usize = 50;

/// Tried in order; the first element with enough text wins.
const TEXT_SELECTORS: &[&str] = &[
    "section[class*='word__defination']",
    "div[class*='word__defination-content']",
    "[class*='etymon']",
    "[class*='definition']",
    "[class*='content']",
    "body",
];

const ETYMOLOGY_KEYWORDS: &[&str] = &[
    "from",
    "latin",
    "greek",
    "sanskrit",
    "root",
    "origin",
    "derived",
    "etymology",
    "meaning",
    "sense",
    "related",
];

/// Looks up a fixed word list on Etymonline through the shared fetcher.
pub struct EtymonlineSource {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    words: Vec<String>,
    source_id: String,
    extractor: RootMentionExtractor,
}

impl EtymonlineSource {
    pub fn new(fetcher: Arc<HttpFetcher>, words: Vec<String>) -> Result<Self, SourceError> {
        Ok(Self {
            fetcher,
            base_url: ETYMONLINE_BASE_URL.to_string(),
            words,
            source_id: "etymonline".to_string(),
            extractor: RootMentionExtractor::new()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn word_url(&self, word: &str) -> String {
        format!("{}/word/{}", self.base_url.trim_end_matches('/'), word)
    }
}

/// Etymology prose from an Etymonline word page, or `None` when the page has
/// no usable text.
pub fn html_etymology_text(html: &str) -> Result<Option<String>, SourceError> {
    let document = Html::parse_document(html);
    for selector in TEXT_SELECTORS {
        let sel = Selector::parse(selector).map_err(|e| SourceError::Selector {
            selector: (*selector).to_string(),
            message: e.to_string(),
        })?;
        let Some(element) = document.select(&sel).next() else {
            continue;
        };
        let text = element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        if text.chars().count() >= MIN_TEXT_LEN {
            return Ok(looks_like_etymology(&text).then_some(text));
        }
    }
    Ok(None)
}

fn looks_like_etymology(text: &str) -> bool {
    let lower = text.to_lowercase();
    ETYMOLOGY_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[async_trait]
impl EtymologySource for EtymonlineSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn facts(
        &self,
        ctx: &SourceContext<'_>,
        sink: &mut dyn FactSink,
    ) -> Result<FeedReport, SourceError> {
        let mut report = FeedReport::default();

        for raw_word in &self.words {
            let word = normalize_word(raw_word);
            if !is_valid_word(&word) {
                report.skipped += 1;
                continue;
            }
            if ctx.failed.is_excluded(&word, ctx.failure_threshold) {
                debug!(word = %word, "skipping word over the failure threshold");
                report.skipped += 1;
                continue;
            }
            report.records_read += 1;

            let url = self.word_url(&word);
            let page = match self.fetcher.get_bytes(&self.source_id, &url).await {
                Ok(page) => page,
                Err(err) if err.is_not_found() => {
                    let count = ctx.history.record_failure(&word).await?;
                    info!(word = %word, failure_count = count, "no etymonline entry");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    let err = SourceError::from(err);
                    if err.is_transient() {
                        return Err(err);
                    }
                    let count = ctx.history.record_failure(&word).await?;
                    warn!(
                        word = %word,
                        failure_count = count,
                        error = %err,
                        "etymology lookup failed"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let Some(text) = html_etymology_text(&page.text())? else {
                debug!(word = %word, "no usable etymology text");
                report.skipped += 1;
                continue;
            };

            for mention in self.extractor.mentions(&text) {
                let mut fact = RawEtymologyFact::new(&word, mention.raw_root, &self.source_id);
                fact.gloss = mention.gloss;
                sink.accept(fact);
                report.facts_emitted += 1;
            }
        }

        info!(
            source_id = %self.source_id,
            words = report.records_read,
            facts = report.facts_emitted,
            skipped = report.skipped,
            "etymonline lookups finished"
        );
        Ok(report)
    }
}
