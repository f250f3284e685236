//! Facebook page provider
//!
//! Publishes to a page feed through the Graph API with a page access token.
//! The affiliate link travels as `link` so Facebook renders a preview card.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{classify_status, classify_transport, Provider, ProviderResult};
use crate::error::PlatformError;
use crate::types::{AccessToken, Product};

pub struct FacebookClient {
    http: reqwest::Client,
    endpoint: String,
    page_id: String,
    token: AccessToken,
}

#[derive(Serialize)]
struct FeedPost<'a> {
    message: &'a str,
    link: &'a str,
}

#[derive(Deserialize)]
struct FeedPostResponse {
    id: String,
}

impl FacebookClient {
    pub fn new(http: reqwest::Client, graph_base: String, page_id: String, token: AccessToken) -> Self {
        Self {
            http,
            endpoint: format!("{}/{}/feed", graph_base.trim_end_matches('/'), page_id),
            page_id,
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Provider for FacebookClient {
    fn name(&self) -> &str {
        "facebook"
    }

    fn is_configured(&self) -> bool {
        !self.page_id.trim().is_empty() && !self.token.expose().is_empty()
    }

    async fn publish(&self, text: &str, product: &Product) -> ProviderResult<String> {
        if !self.is_configured() {
            return Err(PlatformError::NotConfigured(
                "facebook page id or token missing".to_string(),
            ));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.token.expose())
            .json(&FeedPost {
                message: text,
                link: &product.affiliate_link,
            })
            .send()
            .await
            .map_err(|e| classify_transport(e, "facebook"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, "facebook", &body));
        }

        let created: FeedPostResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(e, "facebook"))?;

        Ok(created.id)
    }
}
