//! Platform registry and provider clients
//!
//! Two seams live here:
//!
//! - [`PlatformProfile`]: pure, per-platform knowledge (limits, how a post body
//!   is laid out, what engagement looks like). [`PlatformRegistry::resolve`] is
//!   the only place a [`PlatformKind`] is turned into behaviour.
//! - [`Provider`]: a client that actually publishes text to a platform's API.
//!   [`ProviderFactory`] builds one from configuration and account credentials,
//!   or reports [`PlatformError::NotConfigured`] so the executor can simulate.
//!
//! ```no_run
//! use libpromocast::platforms::PlatformRegistry;
//! use libpromocast::types::PlatformKind;
//!
//! let registry = PlatformRegistry::new();
//! let twitter = registry.resolve(&PlatformKind::Twitter);
//! assert_eq!(twitter.descriptor().max_chars, 280);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::PlatformError;
use crate::types::{EngagementShape, PlatformKind, Product, SocialAccount};

pub mod facebook;
pub mod mastodon;
pub mod profiles;
pub mod twitter;

// Available outside tests so integration tests can inject it
pub mod mock;

pub type ProviderResult<T> = std::result::Result<T, PlatformError>;

/// Hard limits of a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformDescriptor {
    /// Maximum post length in characters (not bytes)
    pub max_chars: usize,
    pub max_hashtags: usize,
    pub supports_images: bool,
}

impl PlatformDescriptor {
    /// Used for platforms the registry does not know
    pub const CONSERVATIVE: PlatformDescriptor = PlatformDescriptor {
        max_chars: 280,
        max_hashtags: 5,
        supports_images: false,
    };
}

/// Everything a profile needs to lay out a post body
#[derive(Debug, Clone)]
pub struct ComposeContext<'a> {
    pub product: &'a Product,
    /// Formatted price, currency included
    pub price: &'a str,
    /// `"35% OFF"`, or `None` when there is no discount
    pub discount: Option<&'a str>,
    /// Space-separated hashtag block, possibly empty
    pub hashtags: &'a str,
    /// Lead emoji picked by the generator
    pub emoji: &'a str,
}

/// Per-platform content and engagement knowledge.
///
/// Implementations are stateless; the registry hands out shared instances.
pub trait PlatformProfile: Send + Sync {
    fn descriptor(&self) -> &PlatformDescriptor;

    /// Number of hashtags the generator should sample.
    ///
    /// Never more than `descriptor().max_hashtags`; the generator clamps it anyway.
    fn hashtag_budget(&self) -> usize {
        self.descriptor().max_hashtags
    }

    fn engagement_shape(&self) -> EngagementShape;

    /// Lay out the post body.
    ///
    /// May exceed the character limit; the generator truncates. Returns
    /// `PlatformError::Validation` when the product lacks something this
    /// layout needs, in which case the generator falls back to the minimal
    /// template.
    fn compose(&self, ctx: &ComposeContext<'_>) -> ProviderResult<String>;
}

/// Maps platform identifiers to their profiles
#[derive(Clone)]
pub struct PlatformRegistry {
    profiles: HashMap<PlatformKind, Arc<dyn PlatformProfile>>,
    fallback: Arc<dyn PlatformProfile>,
}

impl PlatformRegistry {
    /// Registry with every built-in platform
    pub fn new() -> Self {
        let mut by_kind: HashMap<PlatformKind, Arc<dyn PlatformProfile>> = HashMap::new();
        by_kind.insert(PlatformKind::Instagram, Arc::new(profiles::InstagramProfile::new()));
        by_kind.insert(PlatformKind::Facebook, Arc::new(profiles::FacebookProfile::new()));
        by_kind.insert(PlatformKind::Twitter, Arc::new(profiles::TwitterProfile::new()));
        by_kind.insert(PlatformKind::Mastodon, Arc::new(profiles::MastodonProfile::new()));

        Self {
            profiles: by_kind,
            fallback: Arc::new(profiles::DefaultProfile::new()),
        }
    }

    /// Profile for `platform`, or the conservative default
    pub fn resolve(&self, platform: &PlatformKind) -> Arc<dyn PlatformProfile> {
        self.profiles
            .get(platform)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn descriptor(&self, platform: &PlatformKind) -> PlatformDescriptor {
        *self.resolve(platform).descriptor()
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A client that publishes to a real platform API
#[async_trait]
pub trait Provider: Send + Sync {
    /// Lowercase platform identifier, e.g. "twitter"
    fn name(&self) -> &str;

    /// Whether credentials and endpoints are present.
    ///
    /// An unconfigured provider is never called; the executor simulates instead.
    fn is_configured(&self) -> bool;

    /// Publish `text` and return the platform's id for the new post.
    ///
    /// # Errors
    ///
    /// - `NotConfigured` when credentials are missing
    /// - `Authentication` for rejected tokens
    /// - `Network`, `Timeout` or `RateLimit` for transient failures worth a retry
    /// - `Posting` / `Validation` for permanent rejections
    async fn publish(&self, text: &str, product: &Product) -> ProviderResult<String>;
}

/// Builds providers from configuration and account credentials
#[derive(Clone)]
pub struct ProviderFactory {
    config: Option<Arc<Config>>,
    overrides: HashMap<PlatformKind, Arc<dyn Provider>>,
    http: reqwest::Client,
}

impl ProviderFactory {
    pub fn from_config(config: Arc<Config>) -> Self {
        Self {
            config: Some(config),
            overrides: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// No integrations at all; every platform simulates
    pub fn simulation_only() -> Self {
        Self {
            config: None,
            overrides: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Use `provider` for `platform` regardless of configuration
    pub fn with_provider(mut self, platform: PlatformKind, provider: Arc<dyn Provider>) -> Self {
        self.overrides.insert(platform, provider);
        self
    }

    /// Provider for `platform` using the account's token, or the token file
    /// named in configuration when the account carries none.
    pub fn resolve(
        &self,
        platform: &PlatformKind,
        account: &SocialAccount,
    ) -> ProviderResult<Arc<dyn Provider>> {
        if let Some(provider) = self.overrides.get(platform) {
            return Ok(Arc::clone(provider));
        }

        let config = self.config.as_deref();
        match platform {
            PlatformKind::Twitter => {
                let settings = config.and_then(|c| c.twitter.as_ref()).ok_or_else(|| {
                    PlatformError::NotConfigured("twitter is not configured".to_string())
                })?;
                let token = account_or_file_token(account, settings.token_file.as_deref())?;
                Ok(Arc::new(twitter::TwitterClient::new(
                    self.http.clone(),
                    settings.api_base.clone(),
                    token,
                )))
            }
            PlatformKind::Facebook => {
                let settings = config.and_then(|c| c.facebook.as_ref()).ok_or_else(|| {
                    PlatformError::NotConfigured("facebook page is not configured".to_string())
                })?;
                let token = account_or_file_token(account, settings.token_file.as_deref())?;
                Ok(Arc::new(facebook::FacebookClient::new(
                    self.http.clone(),
                    settings.graph_base.clone(),
                    settings.page_id.clone(),
                    token,
                )))
            }
            PlatformKind::Mastodon => {
                let settings = config.and_then(|c| c.mastodon.as_ref()).ok_or_else(|| {
                    PlatformError::NotConfigured("mastodon instance is not configured".to_string())
                })?;
                let token = account_or_file_token(account, settings.token_file.as_deref())?;
                Ok(Arc::new(mastodon::MastodonClient::new(&settings.instance, token)?))
            }
            PlatformKind::Instagram | PlatformKind::Other(_) => Err(PlatformError::NotConfigured(
                format!("{} has no publishing integration", platform),
            )),
        }
    }
}

fn account_or_file_token(
    account: &SocialAccount,
    token_file: Option<&str>,
) -> ProviderResult<crate::types::AccessToken> {
    if let Some(token) = &account.access_token {
        return Ok(token.clone());
    }

    let path = token_file.ok_or_else(|| {
        PlatformError::NotConfigured(format!("no access token for {}", account.platform))
    })?;
    read_token_file(path)
}

/// Read a token file, trimming whitespace. Missing or empty files count as
/// "not configured" rather than an error.
pub fn read_token_file(path: &str) -> ProviderResult<crate::types::AccessToken> {
    let expanded = shellexpand::full(path)
        .map_err(|e| PlatformError::NotConfigured(format!("cannot expand {}: {}", path, e)))?;

    let token = std::fs::read_to_string(expanded.as_ref())
        .map_err(|e| PlatformError::NotConfigured(format!("cannot read {}: {}", path, e)))?;
    let token = token.trim();

    if token.is_empty() {
        return Err(PlatformError::NotConfigured(format!("token file {} is empty", path)));
    }
    Ok(token.into())
}

/// Map an HTTP status from a platform API to the error taxonomy
pub(crate) fn classify_status(status: reqwest::StatusCode, platform: &str, body: &str) -> PlatformError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.chars().take(300).collect::<String>())
    };

    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(format!("{} rejected the token ({})", platform, detail)),
        400 | 422 => PlatformError::Validation(format!("{} rejected the post ({})", platform, detail)),
        429 => PlatformError::RateLimit(format!("{} rate limit exceeded ({})", platform, detail)),
        500..=599 => PlatformError::Network(format!("{} server error ({})", platform, detail)),
        _ => PlatformError::Posting(format!("{} returned {}", platform, detail)),
    }
}

/// Map a transport-level reqwest failure
pub(crate) fn classify_transport(error: reqwest::Error, platform: &str) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Network(format!("{} request timed out: {}", platform, error))
    } else if error.is_decode() {
        PlatformError::Posting(format!("{} returned an unexpected response: {}", platform, error))
    } else {
        PlatformError::Network(format!("{} request failed: {}", platform, error))
    }
}
