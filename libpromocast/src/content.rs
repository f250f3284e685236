//! Post content generation
//!
//! Renders a product into platform-ready text: lead emoji, offer line, trust
//! signals, affiliate link and a sampled hashtag block, laid out by the
//! platform's [`PlatformProfile`](crate::platforms::PlatformProfile) and cut to
//! its character limit.

use std::sync::Arc;

use crate::error::PlatformError;
use crate::platforms::{ComposeContext, PlatformProfile, PlatformRegistry};
use crate::random::RandomSource;
use crate::types::{PlatformKind, Product};

pub const LEAD_EMOJIS: [&str; 8] = ["🔥", "⚡", "💎", "✨", "🎯", "🛍️", "💯", "🚀"];

/// Campaign tags added to every pool
pub const CAMPAIGN_TAGS: [&str; 5] = ["#deals", "#sale", "#discount", "#shopping", "#onlinedeals"];

const ELLIPSIS: &str = "...";

/// Category tags, keyed by lowercase category name
fn category_tags(category: &str) -> &'static [&'static str] {
    match category.trim().to_lowercase().as_str() {
        "electronics" => &["#electronics", "#tech", "#technology", "#gadgets", "#smartphone", "#techdeals"],
        "women's fashion" | "womens fashion" => {
            &["#womensfashion", "#fashion", "#style", "#ootd", "#lookoftheday", "#outfit"]
        }
        "men's fashion" | "mens fashion" => {
            &["#mensfashion", "#menswear", "#style", "#fashion", "#mensstyle", "#streetwear"]
        }
        "home & garden" | "home and garden" => {
            &["#homedecor", "#home", "#decor", "#interiors", "#garden", "#organization"]
        }
        "beauty" | "beauty & care" | "beauty and care" => {
            &["#beauty", "#skincare", "#makeup", "#selfcare", "#cosmetics", "#beautytips"]
        }
        "sports" => &["#sports", "#fitness", "#training", "#gym", "#sport", "#workout"],
        "toys" => &["#toys", "#kids", "#children", "#playtime", "#toystore", "#fun"],
        "pets" => &["#pets", "#dogs", "#cats", "#petshop", "#animals", "#petlovers"],
        _ => &[],
    }
}

pub struct ContentGenerator {
    registry: PlatformRegistry,
    rng: Arc<dyn RandomSource>,
    currency: String,
}

impl ContentGenerator {
    pub fn new(registry: PlatformRegistry, rng: Arc<dyn RandomSource>, currency: impl Into<String>) -> Self {
        Self {
            registry,
            rng,
            currency: currency.into(),
        }
    }

    /// Render `product` for `platform`.
    ///
    /// Never fails and never exceeds the platform's character limit. Products
    /// the platform layout cannot handle get the minimal title/price/link
    /// template instead.
    pub fn render(&self, product: &Product, platform: &PlatformKind) -> String {
        let profile = self.registry.resolve(platform);
        let limit = profile.descriptor().max_chars;

        let body = match self.compose(product, profile.as_ref()) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    platform = %platform,
                    product_id = product.id,
                    error = %e,
                    "Falling back to minimal template"
                );
                self.minimal(product)
            }
        };

        truncate_chars(&body, limit)
    }

    fn compose(&self, product: &Product, profile: &dyn PlatformProfile) -> Result<String, PlatformError> {
        if product.title.trim().is_empty() {
            return Err(PlatformError::Validation(format!("product {} has an empty title", product.id)));
        }
        if !product.price.is_finite() {
            return Err(PlatformError::Validation(format!(
                "product {} has a non-finite price",
                product.id
            )));
        }

        let price = self.format_price(product.price);
        let discount = (product.discount > 0).then(|| format!("{}% OFF", product.discount));
        let budget = profile.hashtag_budget().min(profile.descriptor().max_hashtags);
        let hashtags = self.sample_hashtags(product.category.as_deref(), budget).join(" ");
        let emoji = LEAD_EMOJIS[self.rng.index(LEAD_EMOJIS.len())];

        profile.compose(&ComposeContext {
            product,
            price: &price,
            discount: discount.as_deref(),
            hashtags: &hashtags,
            emoji,
        })
    }

    fn minimal(&self, product: &Product) -> String {
        format!(
            "{}\n{}\n{}",
            product.title.trim(),
            self.format_price(product.price),
            product.affiliate_link
        )
    }

    fn format_price(&self, price: f64) -> String {
        format!("{} {:.2}", self.currency, price)
    }

    /// Up to `budget` distinct tags from the category and campaign pools,
    /// in random order. The count is `min(pool size, budget)`.
    pub fn sample_hashtags(&self, category: Option<&str>, budget: usize) -> Vec<&'static str> {
        let mut pool: Vec<&'static str> = Vec::new();
        for tag in category.map(category_tags).unwrap_or(&[]).iter().chain(CAMPAIGN_TAGS.iter()) {
            if !pool.contains(tag) {
                pool.push(*tag);
            }
        }

        let take = budget.min(pool.len());
        // Partial Fisher-Yates: the first `take` slots end up a uniform sample
        for i in 0..take {
            let j = i + self.rng.index(pool.len() - i);
            pool.swap(i, j);
        }
        pool.truncate(take);
        pool
    }
}

/// Cut `text` to at most `limit` characters, ending in `...` when shortened.
/// Works on `char` boundaries, so multi-byte characters are never split.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit < ELLIPSIS.len() {
        return text.chars().take(limit).collect();
    }

    let mut out: String = text.chars().take(limit - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}
