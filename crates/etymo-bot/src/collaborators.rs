//! Seams to the outside world used by the posting driver.

use async_trait::async_trait;
use etymo_core::CandidatePair;
use etymo_storage::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} rate limit hit")]
    RateLimited {
        service: &'static str,
        retry_after_secs: Option<u64>,
    },
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: FetchError,
    },
    #[error("{service} returned an unusable response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
    #[error("{service} is not configured: {missing} is unset")]
    NotConfigured {
        service: &'static str,
        missing: &'static str,
    },
}

impl CollaboratorError {
    pub fn from_fetch(service: &'static str, err: FetchError) -> Self {
        match err {
            FetchError::RateLimited {
                retry_after_secs, ..
            } => Self::RateLimited {
                service,
                retry_after_secs,
            },
            other => Self::Http {
                service,
                source: other,
            },
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Writes the prose for a pair. Output is cleaned and validated by the
/// driver, so implementations may return raw model text.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, pair: &CandidatePair) -> Result<String, CollaboratorError>;
}

/// Independent check that both words really descend from the root.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Confidence in `0.0..=1.0`.
    async fn confidence(&self, pair: &CandidatePair) -> Result<f64, CollaboratorError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `text` and return the external post id.
    async fn publish(&self, text: &str) -> Result<String, CollaboratorError>;
}

/// Cheap authenticated call proving a service accepts the configured
/// credentials.
#[async_trait]
pub trait CredentialCheck: Send + Sync {
    fn service(&self) -> &'static str;

    /// Who or what the credentials resolved to.
    async fn check(&self) -> Result<String, CollaboratorError>;
}

/// Deterministic fallback prose.
pub fn template_text(pair: &CandidatePair) -> String {
    let root = pair.root_id.surface_form();
    match pair.shared_gloss.as_deref() {
        Some(gloss) => format!(
            "{} and {} share the ancient root {root} (\"{gloss}\"). Words wander but roots remain.",
            pair.word1, pair.word2
        ),
        None => format!(
            "{} and {} share the ancient root {root}. Words wander but roots remain.",
            pair.word1, pair.word2
        ),
    }
}

/// Generator that needs no network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateGenerator;

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, pair: &CandidatePair) -> Result<String, CollaboratorError> {
        Ok(template_text(pair))
    }
}

/// A model reply of just `ABORT`, optionally with closing punctuation.
fn is_abort_sentinel(text: &str) -> bool {
    text.trim_end_matches(['.', '!'])
        .trim_end()
        .eq_ignore_ascii_case("ABORT")
}

/// Clean generated prose and check it is publishable: surrounding quotes and
/// asterisks removed, non-empty, at most `max_len` characters, mentions both
/// words. `None` means the caller should fall back to [`template_text`].
pub fn finalize_text(raw: &str, pair: &CandidatePair, max_len: usize) -> Option<String> {
    let mut text = raw.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
            break;
        }
    }
    let text = text.replace('*', "");
    let text = text.trim();

    if text.is_empty() || is_abort_sentinel(text) {
        return None;
    }
    if text.chars().count() > max_len {
        return None;
    }
    let lower = text.to_lowercase();
    if !lower.contains(&pair.word1.to_lowercase()) || !lower.contains(&pair.word2.to_lowercase()) {
        return None;
    }
    Some(text.to_string())
}
