//! Engagement refresher
//!
//! Periodically nudges the engagement counters of recent `posted` posts
//! upward, standing in for metrics polled from the platforms. Each counter
//! independently has a 30% chance of growing by 1 to 5. Status and provider
//! ids are never touched.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::db::Database;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::random::RandomSource;
use crate::types::Engagement;

/// Only posts published within this many days are refreshed
pub const REFRESH_WINDOW_DAYS: i64 = 30;

const BUMP_PROBABILITY: f64 = 0.3;

/// Result of one refresher pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub skipped: usize,
}

pub struct EngagementRefresher {
    db: Database,
    rng: Arc<dyn RandomSource>,
    events: EventBus,
}

impl EngagementRefresher {
    pub fn new(db: Database, rng: Arc<dyn RandomSource>, events: EventBus) -> Self {
        Self { db, rng, events }
    }

    /// One pass over recent `posted` posts.
    ///
    /// Posts whose ids are in `in_flight` are left alone. A failed write is
    /// logged and counted as skipped; the pass carries on.
    pub async fn refresh_once(&self, in_flight: &HashSet<String>) -> Result<RefreshSummary> {
        let since = (Utc::now() - ChronoDuration::days(REFRESH_WINDOW_DAYS)).timestamp();
        let posts = self.db.recent_posted(since).await?;

        let mut summary = RefreshSummary::default();
        for post in posts {
            if in_flight.contains(&post.id) {
                summary.skipped += 1;
                continue;
            }
            let Some(mut engagement) = post.engagement else {
                summary.skipped += 1;
                continue;
            };
            if !drift(&mut engagement, self.rng.as_ref()) {
                continue;
            }

            match self.db.update_engagement(&post.id, &engagement).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(post_id = %post.id, error = %e, "Failed to store engagement");
                    summary.skipped += 1;
                }
            }
        }

        tracing::debug!(
            updated = summary.updated,
            skipped = summary.skipped,
            "Engagement refresh finished"
        );
        self.events.emit(Event::EngagementRefreshed {
            updated: summary.updated,
            skipped: summary.skipped,
        });
        Ok(summary)
    }
}

/// Bump each counter with probability 0.3 by `1..=5`. Returns whether
/// anything changed.
pub fn drift(engagement: &mut Engagement, rng: &dyn RandomSource) -> bool {
    let mut changed = false;
    for counter in engagement.counters_mut() {
        if rng.chance(BUMP_PROBABILITY) {
            *counter = counter.saturating_add(rng.range(1..=5));
            changed = true;
        }
    }
    changed
}
