//! Core types for Promocast

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Platforms
// ============================================================================

/// Identifier of a social platform.
///
/// Names outside the known set are carried as `Other` so that configuration
/// for new platforms still flows through the scheduler with conservative
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlatformKind {
    Instagram,
    Facebook,
    Twitter,
    Mastodon,
    Other(String),
}

impl PlatformKind {
    pub fn as_str(&self) -> &str {
        match self {
            PlatformKind::Instagram => "instagram",
            PlatformKind::Facebook => "facebook",
            PlatformKind::Twitter => "twitter",
            PlatformKind::Mastodon => "mastodon",
            PlatformKind::Other(name) => name,
        }
    }

    pub fn known() -> [PlatformKind; 4] {
        [
            PlatformKind::Instagram,
            PlatformKind::Facebook,
            PlatformKind::Twitter,
            PlatformKind::Mastodon,
        ]
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    /// Names are case-insensitive and limited to `[a-z0-9_-]`, since they end
    /// up in synthetic remote ids and database keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if name.is_empty() {
            return Err("platform name cannot be empty".to_string());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("invalid platform name: '{}'", s));
        }

        Ok(match name.as_str() {
            "instagram" => PlatformKind::Instagram,
            "facebook" => PlatformKind::Facebook,
            "twitter" | "x" => PlatformKind::Twitter,
            "mastodon" => PlatformKind::Mastodon,
            _ => PlatformKind::Other(name),
        })
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlatformKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlatformKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Posts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Posted,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the status machine allows moving from `self` to `next`.
    ///
    /// `failed -> posted` and `failed -> failed` are only reachable through
    /// the explicit retry sweep. `Database::record_outcome` refuses anything
    /// else.
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        matches!(
            (self, next),
            (PostStatus::Scheduled, PostStatus::Posted)
                | (PostStatus::Scheduled, PostStatus::Failed)
                | (PostStatus::Scheduled, PostStatus::Cancelled)
                | (PostStatus::Failed, PostStatus::Posted)
                | (PostStatus::Failed, PostStatus::Failed)
        )
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Ok(PostStatus::Scheduled),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" | "canceled" => Ok(PostStatus::Cancelled),
            other => Err(format!("unknown post status: '{}'", other)),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub product_id: i64,
    pub platform: PlatformKind,
    pub content: String,
    pub status: PostStatus,
    pub created_at: i64,
    pub scheduled_at: Option<i64>,
    pub posted_at: Option<i64>,
    pub remote_id: Option<String>,
    pub engagement: Option<Engagement>,
    pub error_message: Option<String>,
    pub simulated: bool,
}

impl Post {
    /// A fresh post in `scheduled` state, not yet published
    pub fn new(product_id: i64, platform: PlatformKind, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            product_id,
            platform,
            content,
            status: PostStatus::Scheduled,
            created_at: chrono::Utc::now().timestamp(),
            scheduled_at: None,
            posted_at: None,
            remote_id: None,
            engagement: None,
            error_message: None,
            simulated: false,
        }
    }

    pub fn scheduled_for(mut self, at: i64) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Keep an id reserved before the post was built, such as a publish claim
    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    /// Fold a publish outcome into the record.
    ///
    /// Engagement is present exactly when the post ends up `posted`.
    pub fn apply_outcome(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Posted {
                remote_id,
                posted_at,
                engagement,
                simulated,
            } => {
                self.status = PostStatus::Posted;
                self.remote_id = Some(remote_id);
                self.posted_at = Some(posted_at);
                self.engagement = Some(engagement);
                self.simulated = simulated;
                self.error_message = None;
            }
            PublishOutcome::Failed { error } => {
                self.status = PostStatus::Failed;
                self.error_message = Some(error);
                self.engagement = None;
            }
        }
    }
}

/// What the executor reports back for one publish attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Posted {
        remote_id: String,
        posted_at: i64,
        engagement: Engagement,
        simulated: bool,
    },
    Failed {
        error: String,
    },
}

impl PublishOutcome {
    pub fn is_posted(&self) -> bool {
        matches!(self, PublishOutcome::Posted { .. })
    }
}

// ============================================================================
// Engagement
// ============================================================================

/// Which counters a platform reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementShape {
    Instagram,
    Facebook,
    Twitter,
    Mastodon,
    Generic,
}

/// Engagement snapshot, shaped per platform.
///
/// Stored as JSON in the `posts.engagement` column, tagged by `platform`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum Engagement {
    Instagram {
        likes: u32,
        comments: u32,
        shares: u32,
        saves: u32,
    },
    Facebook {
        likes: u32,
        comments: u32,
        shares: u32,
        reactions: u32,
    },
    Twitter {
        likes: u32,
        retweets: u32,
        replies: u32,
        clicks: u32,
    },
    Mastodon {
        favourites: u32,
        boosts: u32,
        replies: u32,
    },
    Generic {
        counters: BTreeMap<String, u32>,
    },
}

impl Engagement {
    /// All counters at zero, as recorded after a live publish
    pub fn zeroed(shape: EngagementShape) -> Self {
        match shape {
            EngagementShape::Instagram => Engagement::Instagram {
                likes: 0,
                comments: 0,
                shares: 0,
                saves: 0,
            },
            EngagementShape::Facebook => Engagement::Facebook {
                likes: 0,
                comments: 0,
                shares: 0,
                reactions: 0,
            },
            EngagementShape::Twitter => Engagement::Twitter {
                likes: 0,
                retweets: 0,
                replies: 0,
                clicks: 0,
            },
            EngagementShape::Mastodon => Engagement::Mastodon {
                favourites: 0,
                boosts: 0,
                replies: 0,
            },
            EngagementShape::Generic => Engagement::Generic {
                counters: ["likes", "shares", "comments"]
                    .iter()
                    .map(|name| (name.to_string(), 0))
                    .collect(),
            },
        }
    }

    pub fn shape(&self) -> EngagementShape {
        match self {
            Engagement::Instagram { .. } => EngagementShape::Instagram,
            Engagement::Facebook { .. } => EngagementShape::Facebook,
            Engagement::Twitter { .. } => EngagementShape::Twitter,
            Engagement::Mastodon { .. } => EngagementShape::Mastodon,
            Engagement::Generic { .. } => EngagementShape::Generic,
        }
    }

    /// Mutable access to every counter, in a stable order
    pub fn counters_mut(&mut self) -> Vec<&mut u32> {
        match self {
            Engagement::Instagram {
                likes,
                comments,
                shares,
                saves,
            } => vec![likes, comments, shares, saves],
            Engagement::Facebook {
                likes,
                comments,
                shares,
                reactions,
            } => vec![likes, comments, shares, reactions],
            Engagement::Twitter {
                likes,
                retweets,
                replies,
                clicks,
            } => vec![likes, retweets, replies, clicks],
            Engagement::Mastodon {
                favourites,
                boosts,
                replies,
            } => vec![favourites, boosts, replies],
            Engagement::Generic { counters } => counters.values_mut().collect(),
        }
    }

    pub fn total(&self) -> u64 {
        let mut copy = self.clone();
        copy.counters_mut().into_iter().map(|c| u64::from(*c)).sum()
    }
}

// ============================================================================
// Products
// ============================================================================

/// Product as stored by the catalog collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: f64,
    pub original_price: Option<f64>,
    /// Discount in whole percent
    pub discount: i64,
    pub rating: f64,
    pub sold_count: i64,
    pub affiliate_link: String,
    pub image_url: Option<String>,
    pub active: bool,
    pub created_at: i64,
}

impl Product {
    /// Product with the given catalog fields and id 0, to be assigned on insert
    pub fn new(title: impl Into<String>, price: f64, affiliate_link: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            description: None,
            category: None,
            price,
            original_price: None,
            discount: 0,
            rating: 0.0,
            sold_count: 0,
            affiliate_link: affiliate_link.into(),
            image_url: None,
            active: true,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

// ============================================================================
// Scheduling configuration and accounts
// ============================================================================

pub const DEFAULT_INTERVAL_HOURS: u32 = 6;
pub const DEFAULT_MAX_POSTS_PER_DAY: u32 = 4;
pub const DEFAULT_POSTING_TIMES: [&str; 4] = ["09:00", "14:00", "18:00", "21:00"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub platform: PlatformKind,
    pub interval_hours: u32,
    pub max_posts_per_day: u32,
    /// Preferred `HH:MM` slots. Informational; firing follows `interval_hours`.
    pub posting_times: Vec<String>,
    pub active: bool,
    pub updated_at: i64,
}

impl ScheduleConfig {
    pub fn default_for(platform: PlatformKind) -> Self {
        Self {
            platform,
            interval_hours: DEFAULT_INTERVAL_HOURS,
            max_posts_per_day: DEFAULT_MAX_POSTS_PER_DAY,
            posting_times: DEFAULT_POSTING_TIMES.iter().map(|t| t.to_string()).collect(),
            active: true,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Access token that never shows up in `Debug` or `Display` output
pub struct AccessToken(SecretBox<str>);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call at the HTTP boundary
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for AccessToken {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for AccessToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone)]
pub struct SocialAccount {
    pub platform: PlatformKind,
    pub username: String,
    pub access_token: Option<AccessToken>,
    pub active: bool,
    pub updated_at: i64,
}

impl SocialAccount {
    pub fn new(platform: PlatformKind, username: impl Into<String>) -> Self {
        Self {
            platform,
            username: username.into(),
            access_token: None,
            active: true,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_token(mut self, token: impl Into<AccessToken>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}
