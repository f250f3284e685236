//! Mastodon provider
//!
//! Publishes statuses through megalodon, which also speaks to Pleroma,
//! Akkoma and GoToSocial instances that implement the Mastodon API.

use async_trait::async_trait;
use megalodon::{Megalodon, SNS};

use super::{Provider, ProviderResult};
use crate::error::PlatformError;
use crate::types::{AccessToken, Product};

pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
}

impl MastodonClient {
    /// `instance` may omit the scheme; `https://` is assumed
    pub fn new(instance: &str, token: AccessToken) -> ProviderResult<Self> {
        let instance_url = normalize_instance_url(instance);

        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(token.expose().to_string()),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
        })
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }
}

fn normalize_instance_url(instance: &str) -> String {
    let trimmed = instance.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[async_trait]
impl Provider for MastodonClient {
    fn name(&self) -> &str {
        "mastodon"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn publish(&self, text: &str, _product: &Product) -> ProviderResult<String> {
        if text.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()));
        }

        let response = self
            .client
            .post_status(text.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let status_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => status.id,
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(status_id)
    }
}

/// Map megalodon errors onto the platform error taxonomy.
///
/// megalodon only exposes errors as text, so the HTTP status is recovered
/// from the message when present.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    classify_message(&error_str, context)
}

fn classify_message(error_str: &str, context: &str) -> PlatformError {
    let lower = error_str.to_lowercase();

    match extract_http_status(error_str) {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon rejected the token ({}): {}",
            context, error_str
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon rejected the status ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(_) => PlatformError::Posting(format!("Mastodon HTTP error ({}): {}", context, error_str)),
        None if lower.contains("unauthorized") || lower.contains("forbidden") => {
            PlatformError::Authentication(format!(
                "Mastodon authentication failed ({}): {}",
                context, error_str
            ))
        }
        None if lower.contains("rate limit") || lower.contains("too many requests") => {
            PlatformError::RateLimit(format!("Mastodon rate limit exceeded ({}): {}", context, error_str))
        }
        None if lower.contains("parse") || lower.contains("deserialize") => PlatformError::Posting(
            format!("Unexpected Mastodon response ({}): {}", context, error_str),
        ),
        None => PlatformError::Network(format!("Mastodon error ({}): {}", context, error_str)),
    }
}

/// Find an HTTP status code in an error message such as "HTTP 401" or "status 503"
fn extract_http_status(error_str: &str) -> Option<u16> {
    for prefix in ["HTTP ", "status ", "code: ", "status_code: "] {
        if let Some(pos) = error_str.find(prefix) {
            let code = error_str
                .get(pos + prefix.len()..pos + prefix.len() + 3)
                .and_then(|s| s.parse::<u16>().ok())
                .filter(|c| (100..=599).contains(c));
            if code.is_some() {
                return code;
            }
        }
    }

    // Bare "503:" or "401 " not preceded by another digit
    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let digits = window[..3].iter().all(u8::is_ascii_digit);
        let terminated = window[3] == b':' || window[3] == b' ';
        let standalone = i == 0 || !bytes[i - 1].is_ascii_digit();
        if digits && terminated && standalone {
            let code = std::str::from_utf8(&window[..3])
                .ok()
                .and_then(|s| s.parse::<u16>().ok())
                .filter(|c| (100..=599).contains(c));
            if code.is_some() {
                return code;
            }
        }
    }

    None
}
