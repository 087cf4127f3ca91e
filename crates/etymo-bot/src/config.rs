use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use etymo_core::DEFAULT_FAILURE_THRESHOLD;
use etymo_storage::{HttpClientConfig, TokenBucketConfig};

/// 09:00, 13:00 and 15:00 US Eastern (standard time).
pub const DEFAULT_POSTING_HOURS_UTC: &[u32] = &[14, 18, 20];
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.8;
pub const MAX_POST_LEN: usize = 280;
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub db_path: PathBuf,
    pub corpus_path: PathBuf,
    pub max_word_failures: u32,
    pub min_confidence: f64,
    pub posting_hours_utc: Vec<u32>,
    /// Six-field cron expression (seconds first) for the daemon.
    pub schedule_cron: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub twitter_bearer_token: Option<String>,
    pub twitter_api_base: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Minimum spacing between etymology page lookups; 0 disables it.
    pub rate_limit_delay_ms: u64,
    pub failure_retention_days: i64,
}

impl BotConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            db_path: lookup("ETYMO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./etymobot.sqlite")),
            corpus_path: lookup("ETYMO_CORPUS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/root_corpus.json")),
            max_word_failures: lookup("ETYMO_MAX_WORD_FAILURES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            min_confidence: lookup("ETYMO_MIN_CONFIDENCE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            posting_hours_utc: lookup("ETYMO_POSTING_HOURS_UTC")
                .and_then(|v| parse_hours(&v))
                .unwrap_or_else(|| DEFAULT_POSTING_HOURS_UTC.to_vec()),
            schedule_cron: lookup("ETYMO_SCHEDULE_CRON")
                .unwrap_or_else(|| "0 5 * * * *".to_string()),
            openai_api_key: secret("OPENAI_API_KEY"),
            openai_model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            twitter_bearer_token: secret("TWITTER_BEARER_TOKEN"),
            twitter_api_base: lookup("TWITTER_API_BASE")
                .unwrap_or_else(|| "https://api.twitter.com".to_string()),
            user_agent: lookup("ETYMO_USER_AGENT")
                .unwrap_or_else(|| "etymo-bot/0.1".to_string()),
            http_timeout_secs: lookup("ETYMO_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            rate_limit_delay_ms: lookup("ETYMO_RATE_LIMIT_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS),
            failure_retention_days: lookup("ETYMO_FAILURE_RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_word_failures == 0 {
            bail!("ETYMO_MAX_WORD_FAILURES must be positive");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!(
                "ETYMO_MIN_CONFIDENCE must be between 0.0 and 1.0, got {}",
                self.min_confidence
            );
        }
        if self.posting_hours_utc.is_empty() {
            bail!("ETYMO_POSTING_HOURS_UTC must name at least one hour");
        }
        if let Some(hour) = self.posting_hours_utc.iter().find(|h| **h > 23) {
            bail!("posting hour {hour} is outside 0-23");
        }
        if self.failure_retention_days < 0 {
            bail!("ETYMO_FAILURE_RETENTION_DAYS must not be negative");
        }
        Ok(())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    /// Client settings for etymology page lookups: at most one request per
    /// `rate_limit_delay_ms`.
    pub fn lookup_http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            token_bucket: (self.rate_limit_delay_ms > 0).then(|| TokenBucketConfig {
                capacity: 1,
                refill_every: Duration::from_millis(self.rate_limit_delay_ms),
            }),
            ..self.http_client_config()
        }
    }
}

/// Comma-separated hours, e.g. `14,18,20`. Any bad entry rejects the list.
pub fn parse_hours(value: &str) -> Option<Vec<u32>> {
    let hours = value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    (!hours.is_empty()).then_some(hours)
}
