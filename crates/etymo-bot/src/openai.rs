//! Chat-completions backed generator and verifier.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use etymo_core::CandidatePair;
use etymo_storage::HttpFetcher;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::collaborators::{CollaboratorError, ContentGenerator, CredentialCheck, Verifier};
use crate::config::MAX_POST_LEN;

const SERVICE: &str = "openai";

static CONFIDENCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:[01](?:\.\d+)?|\.\d+)$").ok());

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn complete(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CollaboratorError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .fetcher
            .post_json(SERVICE, &url, Some(&self.api_key), &body)
            .await
            .map_err(|err| CollaboratorError::from_fetch(SERVICE, err))?;
        let completion: ChatCompletion =
            response
                .json()
                .map_err(|err| CollaboratorError::InvalidResponse {
                    service: SERVICE,
                    message: err.to_string(),
                })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CollaboratorError::InvalidResponse {
                service: SERVICE,
                message: "completion has no content".to_string(),
            })
    }
}

/// Looks up the configured model, which needs a valid key but spends no
/// tokens.
#[async_trait]
impl CredentialCheck for OpenAiClient {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn check(&self) -> Result<String, CollaboratorError> {
        let url = format!("{}/models/{}", self.base_url.trim_end_matches('/'), self.model);
        let response = self
            .fetcher
            .get_with_bearer(SERVICE, &url, &self.api_key)
            .await
            .map_err(|err| CollaboratorError::from_fetch(SERVICE, err))?;
        let model: ModelInfo =
            response
                .json()
                .map_err(|err| CollaboratorError::InvalidResponse {
                    service: SERVICE,
                    message: err.to_string(),
                })?;
        Ok(format!("model {}", model.id))
    }
}

/// Narrative shapes the generator rotates through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    StatementTwist,
    QuestionHook,
    MiniAnecdote,
    FragmentAside,
    OneLiner,
}

impl PromptStyle {
    pub const ALL: [PromptStyle; 5] = [
        PromptStyle::StatementTwist,
        PromptStyle::QuestionHook,
        PromptStyle::MiniAnecdote,
        PromptStyle::FragmentAside,
        PromptStyle::OneLiner,
    ];

    fn shape(self, w1: &str, w2: &str, root: &str) -> (String, &'static str) {
        match self {
            Self::StatementTwist => (
                format!("{w1} born of {root} (\"<gloss>\"). <How the words drifted apart>. <Closing twist>."),
                "Open with a plain statement of origin, show the divergence with one vivid image, end on a twist.",
            ),
            Self::QuestionHook => (
                format!("Ever wondered why {w1} and {w2} both echo {root}? <Divergence as a concrete image>. <Invitation to ponder>."),
                "Open with a question, answer it with a sensory image, close by inviting the reader to wonder.",
            ),
            Self::MiniAnecdote => (
                format!("In ancient times, {root} meant \"<gloss>\", the seed of {w1} and {w2}. <Contrast>. <Aphoristic close>."),
                "Set the historical scene, contrast the two modern senses, finish with a short aphorism.",
            ),
            Self::FragmentAside => (
                format!("{w1} & {w2}, rooted in {root} (\"<gloss>\"). One <metaphor>, the other <metaphor> (<sensory aside>). <Insight>."),
                "Use fragments, parallel metaphors and one parenthetical aside; vary phrase length.",
            ),
            Self::OneLiner => (
                format!("{w1}/{w2}: <gloss>. <One sentence distilling the divergence or irony>."),
                "Compress the whole story into one quotable sentence.",
            ),
        }
    }
}

/// Prompt for one pair in one style.
pub fn generation_prompt(pair: &CandidatePair, style: PromptStyle) -> String {
    let root = pair.root_id.surface_form().to_uppercase();
    let (template, guidance) = style.shape(&pair.word1, &pair.word2, &root);
    let gloss = pair
        .shared_gloss
        .as_deref()
        .map(|g| format!("Root meaning: {g}\n"))
        .unwrap_or_default();
    format!(
        "Write a post using this shape:\n\n{template}\n\n{guidance}\n\
         Mention both words. Keep it under {MAX_POST_LEN} characters. \
         No emojis, no hashtags, no surrounding quotes, no asterisks.\n\n\
         Words: {}, {}\nRoot: {root}\n{gloss}",
        pair.word1, pair.word2
    )
}

pub struct OpenAiGenerator {
    client: OpenAiClient,
}

impl OpenAiGenerator {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, pair: &CandidatePair) -> Result<String, CollaboratorError> {
        let style = *PromptStyle::ALL
            .choose(&mut rand::thread_rng())
            .unwrap_or(&PromptStyle::StatementTwist);
        debug!(?style, pair = %pair, "requesting generated post");
        let prompt = generation_prompt(pair, style);
        self.client.complete(None, &prompt, 0.8, 100).await
    }
}

const VERIFIER_SYSTEM_PROMPT: &str = "You are a strict etymology fact-checker. \
Rate from 0.0 to 1.0 how confident you are that both words genuinely descend \
from the given root. Similar spelling across unrelated language families, or a \
missing historical path from root to modern word, scores 0.4 or lower. \
Respond with only the number.";

/// Parse a bare confidence such as `0.85`, `1` or `.9`. Anything else,
/// including prose around the number, is rejected.
pub fn parse_confidence(reply: &str) -> Option<f64> {
    let reply = reply.trim();
    let re = CONFIDENCE_RE.as_ref()?;
    if !re.is_match(reply) {
        return None;
    }
    reply.parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0))
}

pub struct OpenAiVerifier {
    client: OpenAiClient,
}

impl OpenAiVerifier {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Verifier for OpenAiVerifier {
    async fn confidence(&self, pair: &CandidatePair) -> Result<f64, CollaboratorError> {
        let root = pair.root_id.surface_form().to_uppercase();
        let gloss = pair
            .shared_gloss
            .as_deref()
            .map(|g| format!(" (\"{g}\")"))
            .unwrap_or_default();
        let claim = format!(
            "CLAIM: \"{}\" and \"{}\" share the etymological root {root}{gloss}.",
            pair.word1, pair.word2
        );
        let reply = self
            .client
            .complete(Some(VERIFIER_SYSTEM_PROMPT), &claim, 0.0, 10)
            .await?;
        parse_confidence(&reply).ok_or_else(|| {
            warn!(reply = %reply, "verifier reply is not a bare confidence");
            CollaboratorError::InvalidResponse {
                service: SERVICE,
                message: format!("expected a number between 0 and 1, got {reply:?}"),
            }
        })
    }
}
