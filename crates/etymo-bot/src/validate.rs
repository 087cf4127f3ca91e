//! Readiness checks: history database, OpenAI key and Twitter token.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use etymo_storage::{HistoryStore, SqliteHistoryStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::collaborators::{CollaboratorError, CredentialCheck};
use crate::config::BotConfig;
use crate::openai::OpenAiClient;
use crate::twitter::TwitterPublisher;

pub const DATABASE_COMPONENT: &str = "database";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub component: String,
    pub ok: bool,
    pub detail: String,
}

impl ComponentCheck {
    pub fn passed(component: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(component: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<ComponentCheck>,
}

impl ValidationReport {
    pub fn all_ok(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComponentCheck> {
        self.checks.iter().filter(|c| !c.ok)
    }
}

/// Stands in for a service whose credential is not configured.
pub struct MissingCredential {
    pub service: &'static str,
    pub env_var: &'static str,
}

#[async_trait]
impl CredentialCheck for MissingCredential {
    fn service(&self) -> &'static str {
        self.service
    }

    async fn check(&self) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::NotConfigured {
            service: self.service,
            missing: self.env_var,
        })
    }
}

pub async fn check_store(store: &dyn HistoryStore) -> ComponentCheck {
    match store.ping().await {
        Ok(()) => ComponentCheck::passed(DATABASE_COMPONENT, "reachable"),
        Err(err) => ComponentCheck::failed(DATABASE_COMPONENT, err.to_string()),
    }
}

/// Runs every check in order; a failure never stops the remaining checks.
pub async fn check_credentials(checks: &[Box<dyn CredentialCheck>]) -> Vec<ComponentCheck> {
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        results.push(match check.check().await {
            Ok(identity) => ComponentCheck::passed(check.service(), identity),
            Err(err) => ComponentCheck::failed(check.service(), err.to_string()),
        });
    }
    results
}

/// Check everything a publishing run depends on, as configured.
pub async fn validate_system(config: &BotConfig) -> Result<ValidationReport> {
    let fetcher = crate::shared_fetcher(config)?;
    let openai: Box<dyn CredentialCheck> = match &config.openai_api_key {
        Some(key) => Box::new(OpenAiClient::new(
            Arc::clone(&fetcher),
            &config.openai_base_url,
            key,
            &config.openai_model,
        )),
        None => Box::new(MissingCredential {
            service: "openai",
            env_var: "OPENAI_API_KEY",
        }),
    };
    let twitter: Box<dyn CredentialCheck> = match &config.twitter_bearer_token {
        Some(token) => Box::new(TwitterPublisher::new(
            Arc::clone(&fetcher),
            &config.twitter_api_base,
            token,
        )),
        None => Box::new(MissingCredential {
            service: "twitter",
            env_var: "TWITTER_BEARER_TOKEN",
        }),
    };
    let credentials = vec![openai, twitter];

    let database = match SqliteHistoryStore::open(&config.db_path).await {
        Ok(store) => {
            let check = check_store(&store).await;
            store.close().await;
            check
        }
        Err(err) => ComponentCheck::failed(DATABASE_COMPONENT, err.to_string()),
    };

    let mut report = ValidationReport {
        checks: vec![database],
    };
    report.checks.extend(check_credentials(&credentials).await);

    for failure in report.failures() {
        warn!(component = %failure.component, detail = %failure.detail, "check failed");
    }
    info!(
        checks = report.checks.len(),
        all_ok = report.all_ok(),
        "system validation finished"
    );
    Ok(report)
}
