//! Database operations for Promocast
//!
//! The scheduler owns the SQLite schema. Products are written by the catalog
//! collaborator (and by tests); accounts and schedules by `promo-queue`; posts
//! by the orchestrator. Every write runs in its own transaction.

use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, PromocastError, Result};
use crate::types::{
    AccessToken, Engagement, PlatformKind, Post, PostStatus, Product, ScheduleConfig,
    SocialAccount,
};

const POST_COLUMNS: &str = "id, product_id, platform, content, status, created_at, scheduled_at, \
     posted_at, remote_id, engagement, error_message, simulated";

const PRODUCT_COLUMNS: &str = "id, title, description, category, price, original_price, discount, \
     rating, sold_count, affiliate_link, image_url, active, created_at";

/// Eligibility floors for candidate products
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductFilter {
    pub min_rating: f64,
    pub min_sold_count: i64,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            min_rating: 4.0,
            min_sold_count: 100,
        }
    }
}

impl From<&crate::config::SelectionConfig> for ProductFilter {
    fn from(selection: &crate::config::SelectionConfig) -> Self {
        Self {
            min_rating: selection.min_rating,
            min_sold_count: selection.min_sold_count,
        }
    }
}

/// Filters for listing posts. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub platform: Option<PlatformKind>,
    pub status: Option<PostStatus>,
    /// Lower bound on `created_at`, inclusive
    pub since: Option<i64>,
    /// Upper bound on `created_at`, inclusive
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

/// Per-platform post counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlatformStats {
    pub platform: String,
    pub scheduled: i64,
    pub posted: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Posted through simulation mode
    pub simulated: i64,
}

/// Claims older than this were left behind by a process that died mid-publish
pub const CLAIM_TTL_SECS: i64 = 3600;

/// Answer to [`Database::claim_publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The slot is held until the outcome is stored or the claim released
    Granted,
    /// `posted` today plus live claims already meet the cap
    CapReached,
    /// Another publish holds the post, or it left the expected status
    Taken,
}

/// What [`Database::claim_publish`] checks before reserving a slot
#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    pub post_id: &'a str,
    pub platform: &'a PlatformKind,
    /// Required stored status of the post; `None` for posts not inserted yet
    pub expected: Option<PostStatus>,
    pub cap: u32,
    /// Calendar day the cap applies to, as `[start, end)`
    pub day: (i64, i64),
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // The daemon and the CLI share the file; WAL lets readers run during writes
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            expanded_path.replace('\\', "/")
        ))
        .map_err(DbError::SqlxError)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ------------------------------------------------------------------
    // Products
    // ------------------------------------------------------------------

    /// Insert a product (id 0) or replace the one with the same id.
    /// Returns the stored id.
    pub async fn upsert_product(&self, product: &Product) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let id = if product.id == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO products (title, description, category, price, original_price,
                    discount, rating, sold_count, affiliate_link, image_url, active, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&product.title)
            .bind(&product.description)
            .bind(&product.category)
            .bind(product.price)
            .bind(product.original_price)
            .bind(product.discount)
            .bind(product.rating)
            .bind(product.sold_count)
            .bind(&product.affiliate_link)
            .bind(&product.image_url)
            .bind(product.active)
            .bind(product.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
            result.last_insert_rowid()
        } else {
            sqlx::query(
                r#"
                INSERT INTO products (id, title, description, category, price, original_price,
                    discount, rating, sold_count, affiliate_link, image_url, active, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    category = excluded.category,
                    price = excluded.price,
                    original_price = excluded.original_price,
                    discount = excluded.discount,
                    rating = excluded.rating,
                    sold_count = excluded.sold_count,
                    affiliate_link = excluded.affiliate_link,
                    image_url = excluded.image_url,
                    active = excluded.active
                "#,
            )
            .bind(product.id)
            .bind(&product.title)
            .bind(&product.description)
            .bind(&product.category)
            .bind(product.price)
            .bind(product.original_price)
            .bind(product.discount)
            .bind(product.rating)
            .bind(product.sold_count)
            .bind(&product.affiliate_link)
            .bind(&product.image_url)
            .bind(product.active)
            .bind(product.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
            product.id
        };

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(id)
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(row_to_product))
    }

    /// Active products above the floors, best sellers first
    pub async fn eligible_products(&self, filter: &ProductFilter, limit: u32) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM products
            WHERE active = 1 AND rating >= ? AND sold_count >= ?
            ORDER BY sold_count DESC, rating DESC, id ASC
            LIMIT ?
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(filter.min_rating)
        .bind(filter.min_sold_count)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_product).collect())
    }

    /// Whether any post for the product on the platform was created at or after `since`
    pub async fn has_post_since(
        &self,
        product_id: i64,
        platform: &PlatformKind,
        since: i64,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM posts
            WHERE product_id = ? AND platform = ? AND created_at >= ?
            "#,
        )
        .bind(product_id)
        .bind(platform.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    pub async fn upsert_account(&self, account: &SocialAccount) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO social_accounts (platform, username, access_token, active, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(platform) DO UPDATE SET
                username = excluded.username,
                access_token = excluded.access_token,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account.platform.as_str())
        .bind(&account.username)
        .bind(account.access_token.as_ref().map(|t| t.expose().to_string()))
        .bind(account.active)
        .bind(account.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_account(&self, platform: &PlatformKind) -> Result<Option<SocialAccount>> {
        let row = sqlx::query(
            "SELECT platform, username, access_token, active, updated_at FROM social_accounts WHERE platform = ?",
        )
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// The platform's account, only if it is active
    pub async fn active_account(&self, platform: &PlatformKind) -> Result<Option<SocialAccount>> {
        Ok(self.get_account(platform).await?.filter(|a| a.active))
    }

    pub async fn list_accounts(&self) -> Result<Vec<SocialAccount>> {
        let rows = sqlx::query(
            "SELECT platform, username, access_token, active, updated_at FROM social_accounts ORDER BY platform",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_account).collect()
    }

    // ------------------------------------------------------------------
    // Schedule configuration
    // ------------------------------------------------------------------

    pub async fn upsert_schedule(&self, config: &ScheduleConfig) -> Result<()> {
        let posting_times = serde_json::to_string(&config.posting_times).map_err(|e| {
            DbError::CorruptRow {
                table: "schedule_configs",
                reason: e.to_string(),
            }
        })?;

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO schedule_configs (platform, interval_hours, max_posts_per_day,
                posting_times, active, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(platform) DO UPDATE SET
                interval_hours = excluded.interval_hours,
                max_posts_per_day = excluded.max_posts_per_day,
                posting_times = excluded.posting_times,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.platform.as_str())
        .bind(i64::from(config.interval_hours))
        .bind(i64::from(config.max_posts_per_day))
        .bind(posting_times)
        .bind(config.active)
        .bind(config.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_schedule(&self, platform: &PlatformKind) -> Result<Option<ScheduleConfig>> {
        let row = sqlx::query(
            r#"
            SELECT platform, interval_hours, max_posts_per_day, posting_times, active, updated_at
            FROM schedule_configs WHERE platform = ?
            "#,
        )
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_schedule).transpose()
    }

    /// The platform's schedule, only if it is active
    pub async fn active_schedule(&self, platform: &PlatformKind) -> Result<Option<ScheduleConfig>> {
        Ok(self.get_schedule(platform).await?.filter(|s| s.active))
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT platform, interval_hours, max_posts_per_day, posting_times, active, updated_at
            FROM schedule_configs ORDER BY platform
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_schedule).collect()
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    pub async fn insert_post(&self, post: &Post) -> Result<()> {
        let engagement = encode_engagement(post.engagement.as_ref())?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(&format!(
            "INSERT INTO posts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            POST_COLUMNS
        ))
        .bind(&post.id)
        .bind(post.product_id)
        .bind(post.platform.as_str())
        .bind(&post.content)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.scheduled_at)
        .bind(post.posted_at)
        .bind(&post.remote_id)
        .bind(engagement)
        .bind(&post.error_message)
        .bind(post.simulated)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        drop_claim(&mut *tx, &post.id).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    /// Persist the result of a publish attempt, provided the stored status is
    /// still `expected`. Returns `false` when another path changed it first.
    /// Releases the post's claim either way.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `expected -> post.status` is not a legal transition.
    pub async fn record_outcome(&self, post: &Post, expected: PostStatus) -> Result<bool> {
        if !expected.can_transition_to(post.status) {
            return Err(PromocastError::InvalidInput(format!(
                "post {} cannot move from {} to {}",
                post.id, expected, post.status
            )));
        }

        let engagement = encode_engagement(post.engagement.as_ref())?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, content = ?, posted_at = ?, remote_id = ?, engagement = ?,
                error_message = ?, simulated = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(post.status.as_str())
        .bind(&post.content)
        .bind(post.posted_at)
        .bind(&post.remote_id)
        .bind(engagement)
        .bind(&post.error_message)
        .bind(post.simulated)
        .bind(&post.id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        drop_claim(&mut *tx, &post.id).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }

    /// `scheduled -> cancelled`. Returns `false` for any other current status
    /// and for a post whose publish has been claimed by any process.
    pub async fn mark_cancelled(&self, post_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'cancelled'
            WHERE id = ? AND status = 'scheduled'
              AND NOT EXISTS (
                  SELECT 1 FROM publish_claims c
                  WHERE c.post_id = posts.id AND c.claimed_at >= ?
              )
            "#,
        )
        .bind(post_id)
        .bind(claim_cutoff())
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Publish claims
    // ------------------------------------------------------------------

    /// Reserve a publish slot under `BEGIN IMMEDIATE`, so daemon and CLI
    /// processes sharing the file serialize on the same cap count.
    ///
    /// The count is today's `posted` posts plus live claims on the platform.
    /// A granted claim lasts until [`insert_post`](Self::insert_post) or
    /// [`record_outcome`](Self::record_outcome) stores the result, or
    /// [`release_claim`](Self::release_claim) drops it.
    pub async fn claim_publish(&self, request: &ClaimRequest<'_>) -> Result<ClaimOutcome> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        let result = claim_in(&mut *conn, request).await;
        let finish = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };

        if let Err(e) = sqlx::query(finish).execute(&mut *conn).await {
            // Never hand a connection stuck in a transaction back to the pool
            conn.close_on_drop();
            return Err(DbError::SqlxError(e).into());
        }
        result
    }

    /// Drop the claim for `post_id`, if any
    pub async fn release_claim(&self, post_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM publish_claims WHERE post_id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Whether a live claim holds `post_id`
    pub async fn is_claimed(&self, post_id: &str) -> Result<bool> {
        let held: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM publish_claims WHERE post_id = ? AND claimed_at >= ?")
                .bind(post_id)
                .bind(claim_cutoff())
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;
        Ok(held.is_some())
    }

    /// Overwrite the engagement snapshot of a `posted` post. Touches nothing else.
    pub async fn update_engagement(&self, post_id: &str, engagement: &Engagement) -> Result<bool> {
        let encoded = encode_engagement(Some(engagement))?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let result = sqlx::query("UPDATE posts SET engagement = ? WHERE id = ? AND status = 'posted'")
            .bind(encoded)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }

    /// Number of `posted` posts for the platform with `posted_at` in `[start, end)`
    pub async fn count_posted_between(
        &self,
        platform: &PlatformKind,
        start: i64,
        end: i64,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM posts
            WHERE platform = ? AND status = 'posted' AND posted_at >= ? AND posted_at < ?
            "#,
        )
        .bind(platform.as_str())
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Posts matching the query, newest first
    pub async fn query_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let mut where_clauses = vec!["1=1"];

        if query.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if query.status.is_some() {
            where_clauses.push("status = ?");
        }
        if query.since.is_some() {
            where_clauses.push("created_at >= ?");
        }
        if query.until.is_some() {
            where_clauses.push("created_at <= ?");
        }

        let sql = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY created_at DESC, id LIMIT ?",
            POST_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut q = sqlx::query(&sql);
        if let Some(platform) = &query.platform {
            q = q.bind(platform.as_str());
        }
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        if let Some(since) = query.since {
            q = q.bind(since);
        }
        if let Some(until) = query.until {
            q = q.bind(until);
        }
        // SQLite treats a negative LIMIT as "no limit"
        q = q.bind(query.limit.map(|l| l as i64).unwrap_or(-1));

        let rows = q.fetch_all(&self.pool).await.map_err(DbError::SqlxError)?;
        rows.iter().map(row_to_post).collect()
    }

    /// Every `scheduled` post, earliest fire time first
    pub async fn scheduled_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE status = 'scheduled' ORDER BY scheduled_at ASC, created_at ASC",
            POST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// Every `failed` post, oldest first
    pub async fn failed_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE status = 'failed' ORDER BY created_at ASC",
            POST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// `posted` posts whose `posted_at` is at or after `since`
    pub async fn recent_posted(&self, since: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE status = 'posted' AND posted_at >= ? ORDER BY posted_at ASC",
            POST_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// Counts per platform and status for posts created at or after `since`
    pub async fn platform_stats(&self, since: Option<i64>) -> Result<Vec<PlatformStats>> {
        let rows = sqlx::query(
            r#"
            SELECT platform,
                SUM(CASE WHEN status = 'scheduled' THEN 1 ELSE 0 END) AS scheduled,
                SUM(CASE WHEN status = 'posted' THEN 1 ELSE 0 END) AS posted,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END) AS cancelled,
                SUM(CASE WHEN status = 'posted' AND simulated = 1 THEN 1 ELSE 0 END) AS simulated
            FROM posts
            WHERE created_at >= ?
            GROUP BY platform
            ORDER BY platform
            "#,
        )
        .bind(since.unwrap_or(i64::MIN))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| PlatformStats {
                platform: r.get("platform"),
                scheduled: r.get("scheduled"),
                posted: r.get("posted"),
                failed: r.get("failed"),
                cancelled: r.get("cancelled"),
                simulated: r.get("simulated"),
            })
            .collect())
    }
}

fn claim_cutoff() -> i64 {
    chrono::Utc::now().timestamp() - CLAIM_TTL_SECS
}

async fn drop_claim(conn: &mut SqliteConnection, post_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM publish_claims WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;
    Ok(())
}

/// Body of [`Database::claim_publish`]; runs inside the immediate transaction
async fn claim_in(conn: &mut SqliteConnection, request: &ClaimRequest<'_>) -> Result<ClaimOutcome> {
    sqlx::query("DELETE FROM publish_claims WHERE claimed_at < ?")
        .bind(claim_cutoff())
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    let held: Option<i64> = sqlx::query_scalar("SELECT 1 FROM publish_claims WHERE post_id = ?")
        .bind(request.post_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;
    if held.is_some() {
        return Ok(ClaimOutcome::Taken);
    }

    if let Some(expected) = request.expected {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM posts WHERE id = ?")
            .bind(request.post_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;
        if status.as_deref() != Some(expected.as_str()) {
            return Ok(ClaimOutcome::Taken);
        }
    }

    let (start, end) = request.day;
    let used: i64 = sqlx::query_scalar(
        r#"
        SELECT
            (SELECT COUNT(*) FROM posts
             WHERE platform = ? AND status = 'posted' AND posted_at >= ? AND posted_at < ?)
          + (SELECT COUNT(*) FROM publish_claims WHERE platform = ?)
        "#,
    )
    .bind(request.platform.as_str())
    .bind(start)
    .bind(end)
    .bind(request.platform.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;
    if used >= i64::from(request.cap) {
        return Ok(ClaimOutcome::CapReached);
    }

    sqlx::query("INSERT INTO publish_claims (post_id, platform, claimed_at) VALUES (?, ?, ?)")
        .bind(request.post_id)
        .bind(request.platform.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(ClaimOutcome::Granted)
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> DbError {
    DbError::CorruptRow {
        table,
        reason: reason.into(),
    }
}

fn encode_engagement(engagement: Option<&Engagement>) -> Result<Option<String>> {
    engagement
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| corrupt("posts", e.to_string()).into())
}

fn parse_platform(raw: &str, table: &'static str) -> std::result::Result<PlatformKind, DbError> {
    raw.parse().map_err(|e: String| corrupt(table, e))
}

fn row_to_post(r: &SqliteRow) -> Result<Post> {
    let status: String = r.get("status");
    let engagement: Option<String> = r.get("engagement");

    Ok(Post {
        id: r.get("id"),
        product_id: r.get("product_id"),
        platform: parse_platform(&r.get::<String, _>("platform"), "posts")?,
        content: r.get("content"),
        status: status.parse().map_err(|e: String| corrupt("posts", e))?,
        created_at: r.get("created_at"),
        scheduled_at: r.get("scheduled_at"),
        posted_at: r.get("posted_at"),
        remote_id: r.get("remote_id"),
        engagement: engagement
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt("posts", format!("engagement: {}", e)))?,
        error_message: r.get("error_message"),
        simulated: r.get::<i64, _>("simulated") != 0,
    })
}

fn row_to_product(r: &SqliteRow) -> Product {
    Product {
        id: r.get("id"),
        title: r.get("title"),
        description: r.get("description"),
        category: r.get("category"),
        price: r.get("price"),
        original_price: r.get("original_price"),
        discount: r.get("discount"),
        rating: r.get("rating"),
        sold_count: r.get("sold_count"),
        affiliate_link: r.get("affiliate_link"),
        image_url: r.get("image_url"),
        active: r.get::<i64, _>("active") != 0,
        created_at: r.get("created_at"),
    }
}

fn row_to_account(r: &SqliteRow) -> Result<SocialAccount> {
    Ok(SocialAccount {
        platform: parse_platform(&r.get::<String, _>("platform"), "social_accounts")?,
        username: r.get("username"),
        access_token: r
            .get::<Option<String>, _>("access_token")
            .filter(|t| !t.is_empty())
            .map(AccessToken::from),
        active: r.get::<i64, _>("active") != 0,
        updated_at: r.get("updated_at"),
    })
}

fn row_to_schedule(r: &SqliteRow) -> Result<ScheduleConfig> {
    let to_u32 = |column: &str| -> std::result::Result<u32, DbError> {
        let value: i64 = r.get(column);
        u32::try_from(value).map_err(|_| corrupt("schedule_configs", format!("{} = {}", column, value)))
    };
    let posting_times: String = r.get("posting_times");

    Ok(ScheduleConfig {
        platform: parse_platform(&r.get::<String, _>("platform"), "schedule_configs")?,
        interval_hours: to_u32("interval_hours")?,
        max_posts_per_day: to_u32("max_posts_per_day")?,
        posting_times: serde_json::from_str(&posting_times)
            .map_err(|e| corrupt("schedule_configs", format!("posting_times: {}", e)))?,
        active: r.get::<i64, _>("active") != 0,
        updated_at: r.get("updated_at"),
    })
}
