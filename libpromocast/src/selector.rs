//! Candidate selection
//!
//! Picks the product a cycle promotes: a random choice among the best
//! sellers that clear the rating and sales floors, skipping products already
//! posted to the platform recently.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::db::{Database, ProductFilter};
use crate::error::Result;
use crate::random::RandomSource;
use crate::types::{PlatformKind, Product};

pub struct CandidateSelector {
    db: Database,
    rng: Arc<dyn RandomSource>,
    filter: ProductFilter,
    repeat_window: ChronoDuration,
}

impl CandidateSelector {
    pub fn new(
        db: Database,
        rng: Arc<dyn RandomSource>,
        filter: ProductFilter,
        repeat_window_days: u32,
    ) -> Self {
        Self {
            db,
            rng,
            filter,
            repeat_window: ChronoDuration::days(i64::from(repeat_window_days)),
        }
    }

    /// Choose a product for `platform` from the top `pool_size` eligible ones.
    ///
    /// Products with any post on the platform inside the repeat window are
    /// excluded, unless that would leave nothing, in which case the exclusion
    /// is waived for this call. `None` means no product is eligible at all.
    pub async fn select(&self, platform: &PlatformKind, pool_size: u32) -> Result<Option<Product>> {
        let pool = self.db.eligible_products(&self.filter, pool_size).await?;
        if pool.is_empty() {
            tracing::info!(platform = %platform, "No eligible products");
            return Ok(None);
        }

        let since = (Utc::now() - self.repeat_window).timestamp();
        let mut fresh = Vec::with_capacity(pool.len());
        for product in &pool {
            if !self.db.has_post_since(product.id, platform, since).await? {
                fresh.push(product.clone());
            }
        }

        let candidates = if fresh.is_empty() {
            tracing::debug!(
                platform = %platform,
                pool = pool.len(),
                "Every candidate was posted recently; waiving the repeat window"
            );
            pool
        } else {
            fresh
        };

        let chosen = candidates[self.rng.index(candidates.len())].clone();
        tracing::debug!(
            platform = %platform,
            product_id = chosen.id,
            candidates = candidates.len(),
            "Selected product"
        );
        Ok(Some(chosen))
    }
}
