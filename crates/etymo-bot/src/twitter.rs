use std::sync::Arc;

use async_trait::async_trait;
use etymo_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::collaborators::{CollaboratorError, CredentialCheck, Publisher};

const SERVICE: &str = "twitter";

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: Option<CreatedTweet>,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    data: Option<Me>,
}

#[derive(Debug, Deserialize)]
struct Me {
    username: String,
}

/// Posts through the v2 `POST /2/tweets` endpoint with a user-context
/// OAuth 2.0 bearer token.
pub struct TwitterPublisher {
    fetcher: Arc<HttpFetcher>,
    api_base: String,
    bearer_token: String,
}

impl TwitterPublisher {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        api_base: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            api_base: api_base.into(),
            bearer_token: bearer_token.into(),
        }
    }
}

/// Id of the created post in a `POST /2/tweets` response body.
pub fn created_post_id(body: &[u8]) -> Result<String, CollaboratorError> {
    let parsed: CreateTweetResponse =
        serde_json::from_slice(body).map_err(|err| CollaboratorError::InvalidResponse {
            service: SERVICE,
            message: err.to_string(),
        })?;
    parsed
        .data
        .map(|d| d.id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CollaboratorError::InvalidResponse {
            service: SERVICE,
            message: "response carries no post id".to_string(),
        })
}

#[async_trait]
impl Publisher for TwitterPublisher {
    async fn publish(&self, text: &str) -> Result<String, CollaboratorError> {
        let url = format!("{}/2/tweets", self.api_base.trim_end_matches('/'));
        let response = self
            .fetcher
            .post_json(SERVICE, &url, Some(&self.bearer_token), &json!({ "text": text }))
            .await
            .map_err(|err| CollaboratorError::from_fetch(SERVICE, err))?;
        let id = created_post_id(&response.body)?;
        info!(post_id = %id, chars = text.chars().count(), "post published");
        Ok(id)
    }
}

/// Account handle in a `GET /2/users/me` response body.
pub fn account_username(body: &[u8]) -> Result<String, CollaboratorError> {
    let parsed: MeResponse =
        serde_json::from_slice(body).map_err(|err| CollaboratorError::InvalidResponse {
            service: SERVICE,
            message: err.to_string(),
        })?;
    parsed
        .data
        .map(|me| me.username)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CollaboratorError::InvalidResponse {
            service: SERVICE,
            message: "response carries no account".to_string(),
        })
}

#[async_trait]
impl CredentialCheck for TwitterPublisher {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn check(&self) -> Result<String, CollaboratorError> {
        let url = format!("{}/2/users/me", self.api_base.trim_end_matches('/'));
        let response = self
            .fetcher
            .get_with_bearer(SERVICE, &url, &self.bearer_token)
            .await
            .map_err(|err| CollaboratorError::from_fetch(SERVICE, err))?;
        Ok(format!("@{}", account_username(&response.body)?))
    }
}
