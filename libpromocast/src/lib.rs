//! Promocast - scheduled affiliate posting for social platforms
//!
//! This library decides when to post, picks a product worth promoting,
//! renders platform-tailored copy and publishes it, either through a real
//! provider or in simulation mode. The `promo-send` daemon and the
//! `promo-queue` CLI are thin layers over [`Orchestrator`] and [`Database`].

pub mod config;
pub mod content;
pub mod db;
pub mod engagement;
pub mod error;
pub mod events;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod platforms;
pub mod random;
pub mod scheduling;
pub mod selector;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, PlatformStats, PostQuery, ProductFilter};
pub use error::{PromocastError, Result};
pub use events::{Event, EventBus};
pub use orchestrator::{CycleOutcome, Orchestrator};
pub use types::{
    Engagement, PlatformKind, Post, PostStatus, Product, PublishOutcome, ScheduleConfig,
    SocialAccount,
};
