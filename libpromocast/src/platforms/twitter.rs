//! Twitter / X provider
//!
//! Publishes through the v2 `POST /2/tweets` endpoint with an OAuth 2.0 user
//! access token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{classify_status, classify_transport, Provider, ProviderResult};
use crate::error::PlatformError;
use crate::types::{AccessToken, Product};

pub struct TwitterClient {
    http: reqwest::Client,
    endpoint: String,
    token: AccessToken,
}

#[derive(Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

impl TwitterClient {
    pub fn new(http: reqwest::Client, api_base: String, token: AccessToken) -> Self {
        Self {
            http,
            endpoint: format!("{}/2/tweets", api_base.trim_end_matches('/')),
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Provider for TwitterClient {
    fn name(&self) -> &str {
        "twitter"
    }

    fn is_configured(&self) -> bool {
        !self.token.expose().is_empty()
    }

    async fn publish(&self, text: &str, _product: &Product) -> ProviderResult<String> {
        if text.trim().is_empty() {
            return Err(PlatformError::Validation("tweet text cannot be empty".to_string()));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.token.expose())
            .json(&CreateTweet { text })
            .send()
            .await
            .map_err(|e| classify_transport(e, "twitter"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, "twitter", &body));
        }

        let created: CreateTweetResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(e, "twitter"))?;

        tracing::debug!(remote_id = %created.data.id, "Tweet created");
        Ok(created.data.id)
    }
}
