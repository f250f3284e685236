//! promo-queue - Manage promotions, schedules and accounts
//!
//! Unix-style tool over the database shared with promo-send. Changes to
//! schedules, accounts and one-shot posts are picked up by the daemon on its
//! next poll.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use libpromocast::content::{truncate_chars, ContentGenerator};
use libpromocast::error::SchedulingError;
use libpromocast::logging::{LogFormat, LoggingConfig};
use libpromocast::platforms::{read_token_file, PlatformRegistry};
use libpromocast::random::ThreadRandom;
use libpromocast::scheduling::{parse_interval_hours, parse_posting_time, parse_schedule};
use libpromocast::{
    Config, Database, Orchestrator, PlatformKind, PlatformStats, Post, PostQuery, PostStatus,
    PromocastError, Result, ScheduleConfig, SocialAccount,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "promo-queue")]
#[command(version)]
#[command(about = "Manage promotions, schedules and accounts")]
#[command(long_about = "\
promo-queue - Manage promotions, schedules and accounts

DESCRIPTION:
    promo-queue is a Unix-style tool over the Promocast database. Use it to
    inspect posts, schedule or cancel one-shot promotions, retry failures,
    and configure platforms and accounts for the promo-send daemon.

COMMANDS:
    list        List posts
    schedule    Schedule a promotion for a product at a given time
    now         Promote a product right away on every active account
    cancel      Cancel a scheduled post
    retry       Retry every failed post
    stats       Show per-platform post counts
    configure   Set a platform's interval, daily cap and posting times
    account     Manage platform accounts

USAGE EXAMPLES:
    # Scheduled posts as JSON
    promo-queue list --status scheduled --format json

    # Promote product 42 on twitter tomorrow afternoon
    promo-queue schedule 42 twitter \"tomorrow 3pm\"

    # Somewhere in the next two hours
    promo-queue schedule 42 instagram random:10m-2h

    # Post every 4 hours, at most 6 times a day
    promo-queue configure twitter --interval 4h --max-per-day 6

    # Register an account with a token file
    promo-queue account set twitter my_store --token-file ~/.config/promocast/twitter.token

CONFIGURATION:
    Configuration file: ~/.config/promocast/config.toml
    (override with --config or PROMOCAST_CONFIG)

EXIT CODES:
    0 - Success
    1 - Operation failed (unknown post, product, ...)
    2 - Configuration or authentication error
    3 - Invalid input (bad platform, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, env = "PROMOCAST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List posts, newest first
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Filter by status: scheduled, posted, failed or cancelled
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of posts
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Schedule a promotion
    Schedule {
        /// Product to promote
        product_id: i64,

        /// Target platform
        platform: String,

        /// When to publish (e.g. "2h", "tomorrow 3pm", "random:10m-2h")
        when: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Promote a product now on every active account
    Now {
        /// Product to promote
        product_id: i64,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel a scheduled post
    Cancel {
        /// Post ID to cancel
        post_id: String,
    },

    /// Retry every failed post
    Retry {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-platform post counts
    Stats {
        /// Only count posts created within this long (e.g. "7d", "24h")
        #[arg(long)]
        since: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Configure a platform's posting schedule
    Configure {
        /// Platform to configure
        platform: String,

        /// Hours between posts (e.g. "6h" or "6")
        #[arg(long)]
        interval: Option<String>,

        /// Daily cap on published posts
        #[arg(long)]
        max_per_day: Option<u32>,

        /// Comma-separated HH:MM posting times
        #[arg(long, value_delimiter = ',')]
        times: Option<Vec<String>>,

        /// Turn the schedule on
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Turn the schedule off
        #[arg(long)]
        disable: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage platform accounts
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Subcommand, Debug)]
enum AccountAction {
    /// Create or update an account and activate it
    Set {
        platform: String,
        username: String,

        /// File holding the access token
        #[arg(long)]
        token_file: Option<String>,
    },

    /// Deactivate an account
    Disable { platform: String },

    /// List accounts (tokens are never printed)
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "error".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::List {
            format,
            platform,
            status,
            limit,
        } => cmd_list(&db, &format, platform.as_deref(), status.as_deref(), limit).await?,
        Commands::Schedule {
            product_id,
            platform,
            when,
            format,
        } => cmd_schedule(&db, &config, product_id, &platform, &when, &format).await?,
        Commands::Now { product_id, format } => {
            cmd_now(&db, config, product_id, &format).await?;
        }
        Commands::Cancel { post_id } => cmd_cancel(&db, &post_id).await?,
        Commands::Retry { format } => cmd_retry(&db, config, &format).await?,
        Commands::Stats { since, format } => cmd_stats(&db, since.as_deref(), &format).await?,
        Commands::Configure {
            platform,
            interval,
            max_per_day,
            times,
            enable,
            disable,
            format,
        } => {
            let changes = ScheduleChanges {
                interval,
                max_per_day,
                times,
                active: if enable {
                    Some(true)
                } else if disable {
                    Some(false)
                } else {
                    None
                },
            };
            cmd_configure(&db, &platform, changes, &format).await?;
        }
        Commands::Account { action } => cmd_account(&db, action).await?,
    }

    db.close().await;
    Ok(())
}

// ============================================================================
// Posts
// ============================================================================

/// List posts
async fn cmd_list(
    db: &Database,
    format: &str,
    platform: Option<&str>,
    status: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    validate_format(format)?;

    let query = PostQuery {
        platform: platform.map(parse_platform).transpose()?,
        status: status
            .map(|s| s.parse::<PostStatus>().map_err(PromocastError::InvalidInput))
            .transpose()?,
        limit,
        ..Default::default()
    };
    let posts = db.query_posts(&query).await?;

    if format == "json" {
        print_json(&posts)
    } else {
        output_posts_text(&posts);
        Ok(())
    }
}

/// Store a rendered promotion as `scheduled`; the daemon arms it on its next poll
async fn cmd_schedule(
    db: &Database,
    config: &Config,
    product_id: i64,
    platform: &str,
    when: &str,
    format: &str,
) -> Result<()> {
    validate_format(format)?;
    let platform = parse_platform(platform)?;
    let rng = Arc::new(ThreadRandom);
    let at = parse_schedule(when, rng.as_ref())?;

    let product = db
        .get_product(product_id)
        .await?
        .ok_or_else(|| SchedulingError::NotFound {
            entity: "product",
            id: product_id.to_string(),
        })?;

    let generator = ContentGenerator::new(PlatformRegistry::new(), rng, config.content.currency.clone());
    let content = generator.render(&product, &platform);
    let post = Post::new(product.id, platform, content).scheduled_for(at.timestamp());
    db.insert_post(&post).await?;

    tracing::info!(post_id = %post.id, at = %at, "Post scheduled");

    if format == "json" {
        print_json(&post)
    } else {
        println!("{} | {} | {}", post.id, post.platform, format_timestamp(at.timestamp()));
        Ok(())
    }
}

/// Publish right away, claiming slots against the same cap as the daemon
async fn cmd_now(db: &Database, config: Config, product_id: i64, format: &str) -> Result<()> {
    validate_format(format)?;
    let orchestrator = Orchestrator::new(db.clone(), Arc::new(config));
    let posts = orchestrator.post_now(product_id).await?;

    if format == "json" {
        print_json(&posts)
    } else {
        if posts.is_empty() {
            println!("No active account below its daily cap");
        }
        output_posts_text(&posts);
        Ok(())
    }
}

/// Cancel a scheduled post
async fn cmd_cancel(db: &Database, post_id: &str) -> Result<()> {
    if db.mark_cancelled(post_id).await? {
        println!("Cancelled {}", post_id);
        return Ok(());
    }

    let Some(post) = db.get_post(post_id).await? else {
        return Err(SchedulingError::NotFound {
            entity: "post",
            id: post_id.to_string(),
        }
        .into());
    };

    if post.status == PostStatus::Scheduled && db.is_claimed(post_id).await? {
        return Err(PromocastError::InvalidInput(format!(
            "Post {} is already being published and cannot be cancelled",
            post_id
        )));
    }
    Err(PromocastError::InvalidInput(format!(
        "Post {} is {} and cannot be cancelled",
        post_id, post.status
    )))
}

/// Retry every failed post
async fn cmd_retry(db: &Database, config: Config, format: &str) -> Result<()> {
    validate_format(format)?;
    let orchestrator = Orchestrator::new(db.clone(), Arc::new(config));
    let summary = orchestrator.retry_failed_posts().await?;

    if format == "json" {
        print_json(&summary)
    } else {
        println!(
            "Attempted: {}  Recovered: {}  Skipped: {}",
            summary.attempted, summary.recovered, summary.skipped
        );
        Ok(())
    }
}

/// Per-platform post counts
async fn cmd_stats(db: &Database, since: Option<&str>, format: &str) -> Result<()> {
    validate_format(format)?;

    let since = since
        .map(|s| {
            let duration = humantime_duration(s)?;
            Ok::<i64, PromocastError>((Utc::now() - duration).timestamp())
        })
        .transpose()?;
    let stats = db.platform_stats(since).await?;

    if format == "json" {
        print_json(&stats)
    } else {
        output_stats_text(&stats);
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Default)]
struct ScheduleChanges {
    interval: Option<String>,
    max_per_day: Option<u32>,
    times: Option<Vec<String>>,
    active: Option<bool>,
}

/// Create or update a platform schedule
async fn cmd_configure(
    db: &Database,
    platform: &str,
    changes: ScheduleChanges,
    format: &str,
) -> Result<()> {
    validate_format(format)?;
    let platform = parse_platform(platform)?;

    let existing = db.get_schedule(&platform).await?;
    let previous_update = existing.as_ref().map(|s| s.updated_at);
    let mut schedule = existing.unwrap_or_else(|| ScheduleConfig::default_for(platform));

    if let Some(interval) = changes.interval {
        schedule.interval_hours = parse_interval_hours(&interval)?;
    }
    if let Some(cap) = changes.max_per_day {
        schedule.max_posts_per_day = cap;
    }
    if let Some(times) = changes.times {
        schedule.posting_times = times
            .iter()
            .map(|t| parse_posting_time(t))
            .collect::<Result<Vec<_>>>()?;
    }
    if let Some(active) = changes.active {
        schedule.active = active;
    }
    schedule.updated_at = next_revision(previous_update);

    db.upsert_schedule(&schedule).await?;

    if format == "json" {
        print_json(&schedule)
    } else {
        println!(
            "{}: every {}h, at most {} per day, times {} ({})",
            schedule.platform,
            schedule.interval_hours,
            schedule.max_posts_per_day,
            schedule.posting_times.join(","),
            if schedule.active { "active" } else { "inactive" }
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct AccountView {
    platform: String,
    username: String,
    active: bool,
    has_token: bool,
    updated_at: i64,
}

impl From<&SocialAccount> for AccountView {
    fn from(account: &SocialAccount) -> Self {
        Self {
            platform: account.platform.to_string(),
            username: account.username.clone(),
            active: account.active,
            has_token: account.access_token.is_some(),
            updated_at: account.updated_at,
        }
    }
}

async fn cmd_account(db: &Database, action: AccountAction) -> Result<()> {
    match action {
        AccountAction::Set {
            platform,
            username,
            token_file,
        } => {
            let platform = parse_platform(&platform)?;
            let previous = db.get_account(&platform).await?;

            let mut account = SocialAccount::new(platform, username);
            account.access_token = match token_file {
                Some(path) => Some(read_token_file(&path)?),
                None => previous.as_ref().and_then(|a| a.access_token.clone()),
            };
            account.updated_at = next_revision(previous.map(|a| a.updated_at));

            db.upsert_account(&account).await?;
            println!(
                "{} account {} active{}",
                account.platform,
                account.username,
                if account.access_token.is_some() {
                    ""
                } else {
                    " (no token, posts will be simulated)"
                }
            );
        }
        AccountAction::Disable { platform } => {
            let platform = parse_platform(&platform)?;
            let mut account = db.get_account(&platform).await?.ok_or_else(|| {
                SchedulingError::NotFound {
                    entity: "account",
                    id: platform.to_string(),
                }
            })?;
            account.active = false;
            account.updated_at = next_revision(Some(account.updated_at));
            db.upsert_account(&account).await?;
            println!("{} account {} disabled", account.platform, account.username);
        }
        AccountAction::List { format } => {
            validate_format(&format)?;
            let accounts = db.list_accounts().await?;
            let views: Vec<AccountView> = accounts.iter().map(AccountView::from).collect();

            if format == "json" {
                print_json(&views)?;
            } else {
                for view in &views {
                    println!(
                        "{} | {} | {} | {}",
                        view.platform,
                        view.username,
                        if view.active { "active" } else { "inactive" },
                        if view.has_token { "token" } else { "simulated" }
                    );
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(PromocastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn parse_platform(name: &str) -> Result<PlatformKind> {
    name.parse().map_err(PromocastError::InvalidInput)
}

fn humantime_duration(input: &str) -> Result<ChronoDuration> {
    let duration = humantime::parse_duration(input.trim())
        .map_err(|e| PromocastError::InvalidInput(format!("Invalid duration '{}': {}", input, e)))?;
    ChronoDuration::from_std(duration)
        .map_err(|_| PromocastError::InvalidInput(format!("Duration '{}' is too large", input)))
}

/// Strictly increasing `updated_at`, so the daemon sees every change even
/// when two edits land in the same second
fn next_revision(previous: Option<i64>) -> i64 {
    let now = Utc::now().timestamp();
    match previous {
        Some(previous) if previous >= now => previous + 1,
        _ => now,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PromocastError::InvalidInput(format!("Failed to encode JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Output posts as human-readable text
fn output_posts_text(posts: &[Post]) {
    let now = Utc::now().timestamp();

    for post in posts {
        let when = match post.status {
            PostStatus::Scheduled => post
                .scheduled_at
                .map(|ts| format_time_until(now, ts))
                .unwrap_or_else(|| "unscheduled".to_string()),
            PostStatus::Posted => post
                .posted_at
                .map(format_timestamp)
                .unwrap_or_else(|| "unknown".to_string()),
            _ => format_timestamp(post.created_at),
        };
        let preview = truncate_chars(&post.content.replace('\n', " "), 50);

        println!(
            "{} | {} | {} | {} | {}",
            post.id, post.platform, post.status, when, preview
        );
    }
}

fn output_stats_text(stats: &[PlatformStats]) {
    if stats.is_empty() {
        println!("No posts");
        return;
    }

    println!(
        "{:<12} {:>9} {:>7} {:>7} {:>9} {:>9}",
        "PLATFORM", "SCHEDULED", "POSTED", "FAILED", "CANCELLED", "SIMULATED"
    );
    for row in stats {
        println!(
            "{:<12} {:>9} {:>7} {:>7} {:>9} {:>9}",
            row.platform, row.scheduled, row.posted, row.failed, row.cancelled, row.simulated
        );
    }
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
