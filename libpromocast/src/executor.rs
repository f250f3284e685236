//! Posting executor
//!
//! Turns rendered content into a [`PublishOutcome`]. A real provider is used
//! when the platform has an integration and credentials exist; otherwise the
//! executor runs in simulation mode, which succeeds with a configurable
//! probability and synthesizes an engagement snapshot.
//!
//! Transient provider errors are retried with exponential backoff. Once the
//! provider has failed for good, [`ProviderFailurePolicy`] decides between a
//! simulated publish and a recorded failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{ProviderFailurePolicy, PublishingConfig};
use crate::error::PlatformError;
use crate::platforms::{PlatformRegistry, Provider, ProviderFactory, ProviderResult};
use crate::random::RandomSource;
use crate::types::{Engagement, EngagementShape, PlatformKind, Product, PublishOutcome, SocialAccount};

pub const SIMULATED_FAILURE: &str = "Simulated posting failure";

#[derive(Clone)]
pub struct PostingExecutor {
    providers: ProviderFactory,
    registry: PlatformRegistry,
    rng: Arc<dyn RandomSource>,
    settings: PublishingConfig,
}

impl PostingExecutor {
    pub fn new(
        providers: ProviderFactory,
        registry: PlatformRegistry,
        rng: Arc<dyn RandomSource>,
        settings: PublishingConfig,
    ) -> Self {
        Self {
            providers,
            registry,
            rng,
            settings,
        }
    }

    /// Publish `content` for `product` on `platform` using `account`'s credentials.
    ///
    /// Never returns an error: every path ends in exactly one of
    /// `Posted` (with engagement) or `Failed` (with a message).
    pub async fn publish(
        &self,
        content: &str,
        product: &Product,
        platform: &PlatformKind,
        account: &SocialAccount,
    ) -> PublishOutcome {
        let provider = match self.providers.resolve(platform, account) {
            Ok(provider) if provider.is_configured() => provider,
            Ok(_) | Err(PlatformError::NotConfigured(_)) => {
                debug!(platform = %platform, "No live integration, simulating publish");
                return self.simulate(platform);
            }
            Err(e) => return self.after_provider_failure(platform, e),
        };

        match self.publish_with_retry(provider.as_ref(), content, product).await {
            Ok(remote_id) => {
                info!(platform = %platform, remote_id = %remote_id, "Published to provider");
                PublishOutcome::Posted {
                    remote_id,
                    posted_at: chrono::Utc::now().timestamp(),
                    engagement: Engagement::zeroed(self.shape_of(platform)),
                    simulated: false,
                }
            }
            Err(PlatformError::NotConfigured(reason)) => {
                debug!(platform = %platform, reason = %reason, "Provider reported missing credentials, simulating");
                self.simulate(platform)
            }
            Err(e) => self.after_provider_failure(platform, e),
        }
    }

    /// Simulation mode: succeed with the configured probability
    pub fn simulate(&self, platform: &PlatformKind) -> PublishOutcome {
        if !self.rng.chance(self.settings.simulation_success_rate) {
            info!(platform = %platform, "Simulated publish failed");
            return PublishOutcome::Failed {
                error: SIMULATED_FAILURE.to_string(),
            };
        }

        let remote_id = format!("{}_{}", platform, self.rng.range(1_000_000..=9_999_999));
        info!(platform = %platform, remote_id = %remote_id, "Simulated publish succeeded");
        PublishOutcome::Posted {
            remote_id,
            posted_at: chrono::Utc::now().timestamp(),
            engagement: simulated_engagement(self.shape_of(platform), self.rng.as_ref()),
            simulated: true,
        }
    }

    fn shape_of(&self, platform: &PlatformKind) -> EngagementShape {
        self.registry.resolve(platform).engagement_shape()
    }

    fn after_provider_failure(&self, platform: &PlatformKind, error: PlatformError) -> PublishOutcome {
        match self.settings.on_provider_failure {
            ProviderFailurePolicy::Simulate => {
                warn!(platform = %platform, error = %error, "Provider failed, falling back to simulation");
                self.simulate(platform)
            }
            ProviderFailurePolicy::Fail => {
                warn!(platform = %platform, error = %error, "Provider failed");
                PublishOutcome::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    /// Call the provider, retrying transient errors with exponential backoff
    /// (`retry_backoff`, then doubled each attempt). Each call is bounded by
    /// `provider_timeout`.
    async fn publish_with_retry(
        &self,
        provider: &dyn Provider,
        content: &str,
        product: &Product,
    ) -> ProviderResult<String> {
        let max_attempts = self.settings.max_attempts.max(1);
        let limit = self.settings.provider_timeout;

        let mut attempt = 1;
        loop {
            let result = match timeout(limit, provider.publish(content, product)).await {
                Ok(result) => result,
                Err(_) => Err(PlatformError::Timeout(limit)),
            };

            match result {
                Ok(remote_id) => {
                    if attempt > 1 {
                        info!(
                            "Published to {} on attempt {}/{}",
                            provider.name(),
                            attempt,
                            max_attempts
                        );
                    }
                    return Ok(remote_id);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    warn!(
                        "Transient error posting to {} (attempt {}/{}): {}. Retrying in {:?}",
                        provider.name(),
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `base * 2^(attempt - 1)`, saturating
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Random engagement snapshot of the given shape
pub fn simulated_engagement(shape: EngagementShape, rng: &dyn RandomSource) -> Engagement {
    match shape {
        EngagementShape::Instagram => Engagement::Instagram {
            likes: rng.range(10..=500),
            comments: rng.range(0..=25),
            shares: rng.range(0..=15),
            saves: rng.range(0..=30),
        },
        EngagementShape::Facebook => Engagement::Facebook {
            likes: rng.range(5..=200),
            comments: rng.range(0..=15),
            shares: rng.range(0..=50),
            reactions: rng.range(0..=30),
        },
        EngagementShape::Twitter => Engagement::Twitter {
            likes: rng.range(0..=100),
            retweets: rng.range(0..=25),
            replies: rng.range(0..=10),
            clicks: rng.range(5..=100),
        },
        EngagementShape::Mastodon => Engagement::Mastodon {
            favourites: rng.range(0..=80),
            boosts: rng.range(0..=20),
            replies: rng.range(0..=10),
        },
        EngagementShape::Generic => Engagement::Generic {
            counters: [
                ("likes", rng.range(0..=50)),
                ("shares", rng.range(0..=10)),
                ("comments", rng.range(0..=5)),
            ]
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
        },
    }
}
