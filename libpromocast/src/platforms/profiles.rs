//! Built-in platform profiles

use super::{ComposeContext, PlatformDescriptor, PlatformProfile, ProviderResult};
use crate::error::PlatformError;
use crate::types::EngagementShape;

/// Short-form platforms sample only a few tags, long-form ones use their limit
const SHORT_FORM_HASHTAGS: usize = 3;

fn offer_line(ctx: &ComposeContext<'_>) -> String {
    match ctx.discount {
        Some(discount) => format!("{} {}", discount, ctx.price),
        None => ctx.price.to_string(),
    }
}

/// Drop a trailing empty hashtag block so bodies do not end in blank lines
fn finish(body: String) -> String {
    body.trim_end().to_string()
}

pub struct InstagramProfile {
    descriptor: PlatformDescriptor,
}

impl InstagramProfile {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                max_chars: 2200,
                max_hashtags: 30,
                supports_images: true,
            },
        }
    }
}

impl PlatformProfile for InstagramProfile {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn engagement_shape(&self) -> EngagementShape {
        EngagementShape::Instagram
    }

    fn compose(&self, ctx: &ComposeContext<'_>) -> ProviderResult<String> {
        let p = ctx.product;
        let offer = match ctx.discount {
            Some(discount) => format!("{} for only {}!", discount, ctx.price),
            None => format!("For only {}!", ctx.price),
        };

        Ok(finish(format!(
            "{emoji} {title}\n\n{offer}\n\n📦 Fast delivery\n⭐ Rating: {rating:.1}/5.0\n👥 Over {sold} sold\n\n{link}\n\n{tags}",
            emoji = ctx.emoji,
            title = p.title,
            offer = offer,
            rating = p.rating,
            sold = p.sold_count,
            link = p.affiliate_link,
            tags = ctx.hashtags,
        )))
    }
}

pub struct FacebookProfile {
    descriptor: PlatformDescriptor,
}

impl FacebookProfile {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                max_chars: 63206,
                max_hashtags: 5,
                supports_images: true,
            },
        }
    }
}

impl PlatformProfile for FacebookProfile {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn hashtag_budget(&self) -> usize {
        SHORT_FORM_HASHTAGS
    }

    fn engagement_shape(&self) -> EngagementShape {
        EngagementShape::Facebook
    }

    /// Long-form layout; needs the product description
    fn compose(&self, ctx: &ComposeContext<'_>) -> ProviderResult<String> {
        let p = ctx.product;
        let description = p
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                PlatformError::Validation(format!("product {} has no description", p.id))
            })?;

        Ok(finish(format!(
            "🛍️ SPECIAL OFFER: {title}\n\n{headline}: {price}\n\n✅ {description}\n\n\
             ⭐ Customer rating: {rating:.1}/5.0\n📊 Over {sold} people already bought it\n\n\
             🚚 Free shipping available\n💳 Interest-free installments\n\n\
             Grab it while it lasts! 👇\n{link}\n\n{tags}",
            title = p.title,
            headline = ctx.discount.unwrap_or("Unbeatable price"),
            price = ctx.price,
            description = description,
            rating = p.rating,
            sold = p.sold_count,
            link = p.affiliate_link,
            tags = ctx.hashtags,
        )))
    }
}

pub struct TwitterProfile {
    descriptor: PlatformDescriptor,
}

impl TwitterProfile {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                max_chars: 280,
                max_hashtags: 10,
                supports_images: true,
            },
        }
    }
}

impl PlatformProfile for TwitterProfile {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn hashtag_budget(&self) -> usize {
        SHORT_FORM_HASHTAGS
    }

    fn engagement_shape(&self) -> EngagementShape {
        EngagementShape::Twitter
    }

    fn compose(&self, ctx: &ComposeContext<'_>) -> ProviderResult<String> {
        let p = ctx.product;
        // Long titles are left whole; the generator cuts the body to 280
        Ok(finish(format!(
            "{} {}\n{}\n⭐ {:.1}/5 · {} sold\n{}\n{}",
            ctx.emoji,
            p.title.trim(),
            offer_line(ctx),
            p.rating,
            p.sold_count,
            p.affiliate_link,
            ctx.hashtags
        )))
    }
}

pub struct MastodonProfile {
    descriptor: PlatformDescriptor,
}

impl MastodonProfile {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                max_chars: 500,
                max_hashtags: 10,
                supports_images: true,
            },
        }
    }
}

impl PlatformProfile for MastodonProfile {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn engagement_shape(&self) -> EngagementShape {
        EngagementShape::Mastodon
    }

    fn compose(&self, ctx: &ComposeContext<'_>) -> ProviderResult<String> {
        let p = ctx.product;
        Ok(finish(format!(
            "{} {}\n{}\n⭐ {:.1}/5 · {} sold\n{}\n\n{}",
            ctx.emoji,
            p.title,
            offer_line(ctx),
            p.rating,
            p.sold_count,
            p.affiliate_link,
            ctx.hashtags
        )))
    }
}

/// Profile for platforms without a dedicated layout
pub struct DefaultProfile {
    descriptor: PlatformDescriptor,
}

impl DefaultProfile {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor::CONSERVATIVE,
        }
    }
}

impl PlatformProfile for DefaultProfile {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn engagement_shape(&self) -> EngagementShape {
        EngagementShape::Generic
    }

    fn compose(&self, ctx: &ComposeContext<'_>) -> ProviderResult<String> {
        Ok(finish(format!(
            "{}\n{}\n{}\n{}",
            ctx.product.title,
            offer_line(ctx),
            ctx.product.affiliate_link,
            ctx.hashtags
        )))
    }
}
