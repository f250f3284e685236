//! Schedule orchestrator
//!
//! [`Orchestrator`] owns every timer: one recurring task per armed platform,
//! one one-shot task per scheduled post and one recurring task for the
//! engagement refresher. It is a cheaply cloneable handle; all clones share
//! the same timer registry.
//!
//! Every path that can produce a `posted` record for a platform (cycle,
//! one-shot, retry sweep, post-now) first reserves a slot with
//! [`Database::claim_publish`]. Claims live in the database, so the daily cap
//! holds across the daemon and any CLI process sharing the file, and a
//! claimed one-shot can no longer be cancelled.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libpromocast::{Config, Database, Orchestrator, PlatformKind};
//!
//! # async fn example() -> libpromocast::Result<()> {
//! let config = Arc::new(Config::load()?);
//! let db = Database::new(&config.database.path).await?;
//! let orchestrator = Orchestrator::new(db, config);
//!
//! orchestrator.initialize_schedules(&[PlatformKind::Twitter]).await?;
//! orchestrator.restore_scheduled_posts().await?;
//! orchestrator.start_engagement_refresher().await;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::content::ContentGenerator;
use crate::db::{ClaimOutcome, ClaimRequest, Database, ProductFilter};
use crate::engagement::{EngagementRefresher, RefreshSummary};
use crate::error::{PromocastError, Result, SchedulingError};
use crate::events::{Event, EventBus, SkipReason};
use crate::executor::PostingExecutor;
use crate::platforms::{PlatformRegistry, ProviderFactory};
use crate::random::{RandomSource, ThreadRandom};
use crate::scheduling::day_window;
use crate::selector::CandidateSelector;
use crate::types::{
    PlatformKind, Post, PostStatus, Product, PublishOutcome, ScheduleConfig, SocialAccount,
    DEFAULT_MAX_POSTS_PER_DAY,
};

/// Identifies a timer in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    Platform(PlatformKind),
    Post(String),
    EngagementRefresh,
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKey::Platform(platform) => write!(f, "platform:{}", platform),
            TimerKey::Post(id) => write!(f, "post:{}", id),
            TimerKey::EngagementRefresh => f.write_str("engagement_refresh"),
        }
    }
}

/// Snapshot of one timer, as reported by [`Orchestrator::scheduled_jobs`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub key: String,
    pub next_run: Option<DateTime<Utc>>,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformState {
    Unconfigured,
    Armed,
    Suspended,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Today's posted count already meets the cap
    CapReached,
    /// No eligible product
    NoCandidate,
    /// No active schedule or no active account
    Unconfigured,
    /// A publish was attempted; the post is `posted` or `failed`
    Attempted(Post),
}

/// Result of [`Orchestrator::retry_failed_posts`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub recovered: usize,
    pub skipped: usize,
}

type NextRun = Arc<std::sync::Mutex<Option<DateTime<Utc>>>>;

struct TimerEntry {
    handle: JoinHandle<()>,
    paused: Arc<AtomicBool>,
    next_run: NextRun,
    /// Schedule and account revision the platform timer was armed with
    revision: Option<Revision>,
}

impl TimerEntry {
    fn info(&self, key: &TimerKey) -> JobInfo {
        JobInfo {
            key: key.to_string(),
            next_run: *self.next_run.lock().unwrap_or_else(|p| p.into_inner()),
            paused: self.paused.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Revision {
    schedule_updated_at: i64,
    interval_hours: u32,
    account_updated_at: i64,
}

impl Revision {
    fn of(schedule: &ScheduleConfig, account: &SocialAccount) -> Self {
        Self {
            schedule_updated_at: schedule.updated_at,
            interval_hours: schedule.interval_hours,
            account_updated_at: account.updated_at,
        }
    }
}

#[derive(Default)]
struct Registry {
    timers: HashMap<TimerKey, TimerEntry>,
    /// Posts whose one-shot (or retry) publish is running right now
    in_flight: HashSet<String>,
}

struct Inner {
    db: Database,
    config: Arc<Config>,
    content: ContentGenerator,
    selector: CandidateSelector,
    executor: PostingExecutor,
    refresher: EngagementRefresher,
    events: EventBus,
    registry: Mutex<Registry>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Orchestrator with real providers and thread-local randomness
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        let providers = ProviderFactory::from_config(Arc::clone(&config));
        Self::with_components(db, config, providers, Arc::new(ThreadRandom))
    }

    /// Orchestrator with explicit providers and random source
    pub fn with_components(
        db: Database,
        config: Arc<Config>,
        providers: ProviderFactory,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        let registry = PlatformRegistry::new();
        let events = EventBus::default();

        let content = ContentGenerator::new(
            registry.clone(),
            Arc::clone(&rng),
            config.content.currency.clone(),
        );
        let selector = CandidateSelector::new(
            db.clone(),
            Arc::clone(&rng),
            ProductFilter::from(&config.selection),
            config.selection.repeat_window_days,
        );
        let executor = PostingExecutor::new(
            providers,
            registry,
            Arc::clone(&rng),
            config.publishing.clone(),
        );
        let refresher = EngagementRefresher::new(db.clone(), rng, events.clone());

        Self {
            inner: Arc::new(Inner {
                db,
                config,
                content,
                selector,
                executor,
                refresher,
                events,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    // ------------------------------------------------------------------
    // Platform timers
    // ------------------------------------------------------------------

    /// (Re-)arm the recurring timer for `platform`.
    ///
    /// The old timer is always removed. A new one is installed only when the
    /// platform has both an active schedule and an active account; its first
    /// fire comes after the grace period, then every `interval_hours`. A
    /// suspended platform stays suspended.
    pub async fn arm_platform(&self, platform: &PlatformKind) -> Result<PlatformState> {
        let mut registry = self.inner.registry.lock().await;
        self.arm_locked(&mut registry, platform).await
    }

    async fn arm_locked(&self, registry: &mut Registry, platform: &PlatformKind) -> Result<PlatformState> {
        let key = TimerKey::Platform(platform.clone());
        let was_paused = match registry.timers.remove(&key) {
            Some(old) => {
                old.handle.abort();
                old.paused.load(Ordering::SeqCst)
            }
            None => false,
        };

        let schedule = self.inner.db.active_schedule(platform).await?;
        let account = self.inner.db.active_account(platform).await?;
        let (schedule, account) = match (schedule, account) {
            (Some(schedule), Some(account)) => (schedule, account),
            (schedule, account) => {
                warn!(
                    platform = %platform,
                    has_schedule = schedule.is_some(),
                    has_account = account.is_some(),
                    "Platform not armed: needs an active schedule and an active account"
                );
                return Ok(PlatformState::Unconfigured);
            }
        };

        let grace = self.inner.config.scheduler.grace_period;
        let interval = Duration::from_secs(u64::from(schedule.interval_hours.max(1)) * 3600);
        let paused = Arc::new(AtomicBool::new(was_paused));
        let next_run: NextRun = Arc::new(std::sync::Mutex::new(None));

        let handle = tokio::spawn(platform_timer(
            Arc::downgrade(&self.inner),
            platform.clone(),
            grace,
            interval,
            Arc::clone(&paused),
            Arc::clone(&next_run),
        ));

        registry.timers.insert(
            key,
            TimerEntry {
                handle,
                paused,
                next_run,
                revision: Some(Revision::of(&schedule, &account)),
            },
        );

        info!(
            platform = %platform,
            interval_hours = schedule.interval_hours,
            max_posts_per_day = schedule.max_posts_per_day,
            "Platform armed"
        );

        Ok(if was_paused {
            PlatformState::Suspended
        } else {
            PlatformState::Armed
        })
    }

    /// Remove the platform's recurring timer, if any
    fn disarm_locked(registry: &mut Registry, platform: &PlatformKind) -> bool {
        match registry.timers.remove(&TimerKey::Platform(platform.clone())) {
            Some(entry) => {
                entry.handle.abort();
                info!(platform = %platform, "Platform disarmed");
                true
            }
            None => false,
        }
    }

    /// Store `config` and re-arm its platform
    pub async fn configure_platform(&self, config: &ScheduleConfig) -> Result<PlatformState> {
        if config.interval_hours == 0 {
            return Err(PromocastError::InvalidInput(
                "interval_hours must be at least 1".to_string(),
            ));
        }

        let mut registry = self.inner.registry.lock().await;
        self.inner.db.upsert_schedule(config).await?;
        self.arm_locked(&mut registry, &config.platform).await
    }

    /// Pause the platform's timer without dropping it. `false` when the
    /// platform has no timer.
    pub async fn suspend_platform(&self, platform: &PlatformKind) -> bool {
        self.set_paused(platform, true).await
    }

    /// Undo [`suspend_platform`](Self::suspend_platform). `false` when the
    /// platform has no timer.
    pub async fn resume_platform(&self, platform: &PlatformKind) -> bool {
        self.set_paused(platform, false).await
    }

    async fn set_paused(&self, platform: &PlatformKind, paused: bool) -> bool {
        let registry = self.inner.registry.lock().await;
        match registry.timers.get(&TimerKey::Platform(platform.clone())) {
            Some(entry) => {
                entry.paused.store(paused, Ordering::SeqCst);
                info!(platform = %platform, paused, "Platform timer state changed");
                true
            }
            None => false,
        }
    }

    pub async fn platform_state(&self, platform: &PlatformKind) -> PlatformState {
        let registry = self.inner.registry.lock().await;
        match registry.timers.get(&TimerKey::Platform(platform.clone())) {
            Some(entry) if entry.paused.load(Ordering::SeqCst) => PlatformState::Suspended,
            Some(_) => PlatformState::Armed,
            None => PlatformState::Unconfigured,
        }
    }

    /// Insert default schedules for platforms that have none, then arm each
    pub async fn initialize_schedules(
        &self,
        platforms: &[PlatformKind],
    ) -> Result<Vec<(PlatformKind, PlatformState)>> {
        let mut states = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if self.inner.db.get_schedule(platform).await?.is_none() {
                self.inner
                    .db
                    .upsert_schedule(&ScheduleConfig::default_for(platform.clone()))
                    .await?;
                info!(platform = %platform, "Created default schedule");
            }
            states.push((platform.clone(), self.arm_platform(platform).await?));
        }
        Ok(states)
    }

    /// Align timers with the database.
    ///
    /// Platforms whose schedule or account changed are re-armed, platforms
    /// that lost either are disarmed, one-shot timers whose post is no longer
    /// `scheduled` are dropped and new `scheduled` posts get timers.
    /// Suspension is kept.
    pub async fn reconcile(&self) -> Result<()> {
        let mut platforms: BTreeSet<PlatformKind> =
            self.inner.config.scheduler.platforms.iter().cloned().collect();
        for schedule in self.inner.db.list_schedules().await? {
            platforms.insert(schedule.platform);
        }

        let mut registry = self.inner.registry.lock().await;
        for key in registry.timers.keys() {
            if let TimerKey::Platform(platform) = key {
                platforms.insert(platform.clone());
            }
        }

        for platform in &platforms {
            let schedule = self.inner.db.active_schedule(platform).await?;
            let account = self.inner.db.active_account(platform).await?;
            let key = TimerKey::Platform(platform.clone());
            let current = registry.timers.get(&key).and_then(|entry| entry.revision);

            match (schedule, account) {
                (Some(schedule), Some(account)) => {
                    if current != Some(Revision::of(&schedule, &account)) {
                        debug!(platform = %platform, "Schedule or account changed, re-arming");
                        self.arm_locked(&mut registry, platform).await?;
                    }
                }
                _ => {
                    if Self::disarm_locked(&mut registry, platform) {
                        debug!(platform = %platform, "Platform no longer configured");
                    }
                }
            }
        }

        let post_keys: Vec<String> = registry
            .timers
            .keys()
            .filter_map(|key| match key {
                TimerKey::Post(id) => Some(id.clone()),
                _ => None,
            })
            .collect();
        for id in post_keys {
            let still_scheduled = matches!(
                self.inner.db.get_post(&id).await?,
                Some(post) if post.status == PostStatus::Scheduled
            );
            if !still_scheduled {
                if let Some(entry) = registry.timers.remove(&TimerKey::Post(id.clone())) {
                    entry.handle.abort();
                    debug!(post_id = %id, "Dropped timer for post that is no longer scheduled");
                }
            }
        }

        self.restore_locked(&mut registry).await?;
        Ok(())
    }

    /// Every timer with its next fire time, ordered by key
    pub async fn scheduled_jobs(&self) -> Vec<JobInfo> {
        let registry = self.inner.registry.lock().await;
        let mut keys: Vec<&TimerKey> = registry.timers.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| registry.timers.get(key).map(|entry| entry.info(key)))
            .collect()
    }

    /// Abort every timer. Publishes already running finish on their own.
    pub async fn shutdown(&self) {
        let mut registry = self.inner.registry.lock().await;
        let count = registry.timers.len();
        for (_, entry) in registry.timers.drain() {
            entry.handle.abort();
        }
        info!(timers = count, "Orchestrator shut down");
    }

    // ------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------

    /// One posting cycle for `platform`: cap check, selection, render,
    /// publish, persist. Exactly one post is stored per attempted publish.
    pub async fn run_cycle(&self, platform: &PlatformKind) -> Result<CycleOutcome> {
        let schedule = self.inner.db.active_schedule(platform).await?;
        let account = self.inner.db.active_account(platform).await?;
        let (schedule, account) = match (schedule, account) {
            (Some(schedule), Some(account)) => (schedule, account),
            _ => {
                warn!(platform = %platform, "Skipping cycle: platform is not configured");
                self.skipped(platform, SkipReason::Unconfigured);
                return Ok(CycleOutcome::Unconfigured);
            }
        };

        let post_id = Uuid::new_v4().to_string();
        let cap = schedule.max_posts_per_day;
        if self.claim(&post_id, platform, None, cap).await? != ClaimOutcome::Granted {
            let posted_today = self.posted_today(platform).await?;
            info!(platform = %platform, posted_today, cap, "Daily cap reached, skipping cycle");
            self.skipped(platform, SkipReason::CapReached);
            return Ok(CycleOutcome::CapReached);
        }

        let result = self.select_and_publish(post_id.clone(), platform, &account).await;
        if !matches!(result, Ok(CycleOutcome::Attempted(_))) {
            self.release(&post_id).await;
        }
        result
    }

    async fn select_and_publish(
        &self,
        post_id: String,
        platform: &PlatformKind,
        account: &SocialAccount,
    ) -> Result<CycleOutcome> {
        let pool_size = self.inner.config.scheduler.candidate_pool_size;
        let Some(product) = self.inner.selector.select(platform, pool_size).await? else {
            info!(platform = %platform, "No candidate product, skipping cycle");
            self.skipped(platform, SkipReason::NoCandidate);
            return Ok(CycleOutcome::NoCandidate);
        };

        let post = self.publish_new(post_id, &product, platform, account).await?;
        Ok(CycleOutcome::Attempted(post))
    }

    /// Render, publish and insert a fresh post under the claim `post_id`.
    /// The insert drops the claim.
    async fn publish_new(
        &self,
        post_id: String,
        product: &Product,
        platform: &PlatformKind,
        account: &SocialAccount,
    ) -> Result<Post> {
        let content = self.inner.content.render(product, platform);
        let mut post = Post::new(product.id, platform.clone(), content).with_id(post_id);

        let outcome = self
            .inner
            .executor
            .publish(&post.content, product, platform, account)
            .await;
        post.apply_outcome(outcome);

        self.inner.db.insert_post(&post).await?;
        self.announce(&post);
        Ok(post)
    }

    /// Publish `product` right away on every platform with an active
    /// account. Platforms at their daily cap are skipped.
    pub async fn post_now(&self, product_id: i64) -> Result<Vec<Post>> {
        let product = self.require_product(product_id).await?;

        let mut posts = Vec::new();
        for account in self.inner.db.list_accounts().await? {
            if !account.active {
                continue;
            }
            let platform = account.platform.clone();

            let post_id = Uuid::new_v4().to_string();
            let cap = self.cap_for(&platform).await?;
            if self.claim(&post_id, &platform, None, cap).await? != ClaimOutcome::Granted {
                info!(platform = %platform, cap, "Daily cap reached, not posting now");
                self.skipped(&platform, SkipReason::CapReached);
                continue;
            }

            match self.publish_new(post_id.clone(), &product, &platform, &account).await {
                Ok(post) => posts.push(post),
                Err(e) => {
                    self.release(&post_id).await;
                    return Err(e);
                }
            }
        }
        Ok(posts)
    }

    // ------------------------------------------------------------------
    // One-shot posts
    // ------------------------------------------------------------------

    /// Render a post for `product_id` now and publish it at `at`.
    ///
    /// The post is stored as `scheduled` immediately. Past times fire at once.
    pub async fn schedule_specific_post(
        &self,
        product_id: i64,
        platform: &PlatformKind,
        at: DateTime<Utc>,
    ) -> Result<Post> {
        let product = self.require_product(product_id).await?;
        let content = self.inner.content.render(&product, platform);
        let post = Post::new(product.id, platform.clone(), content).scheduled_for(at.timestamp());

        let mut registry = self.inner.registry.lock().await;
        self.inner.db.insert_post(&post).await?;
        self.arm_one_shot(&mut registry, &post.id, at);
        drop(registry);

        info!(post_id = %post.id, platform = %platform, at = %at, "Post scheduled");
        self.inner.events.emit(Event::PostScheduled {
            post_id: post.id.clone(),
            platform: platform.clone(),
            scheduled_at: at.timestamp(),
        });
        Ok(post)
    }

    /// Cancel a `scheduled` post.
    ///
    /// Returns `false` when the post is not `scheduled` (already cancelled,
    /// published, failed, unknown) or its publish is already running.
    pub async fn cancel_scheduled_post(&self, post_id: &str) -> Result<bool> {
        let mut registry = self.inner.registry.lock().await;
        if registry.in_flight.contains(post_id) {
            debug!(post_id = %post_id, "Publish already in flight, cannot cancel");
            return Ok(false);
        }

        if let Some(entry) = registry.timers.remove(&TimerKey::Post(post_id.to_string())) {
            entry.handle.abort();
        }
        let cancelled = self.inner.db.mark_cancelled(post_id).await?;
        drop(registry);

        if cancelled {
            info!(post_id = %post_id, "Scheduled post cancelled");
            self.inner.events.emit(Event::PostCancelled {
                post_id: post_id.to_string(),
            });
        }
        Ok(cancelled)
    }

    /// Arm timers for every stored `scheduled` post that has none.
    /// Returns how many were armed.
    pub async fn restore_scheduled_posts(&self) -> Result<usize> {
        let mut registry = self.inner.registry.lock().await;
        self.restore_locked(&mut registry).await
    }

    async fn restore_locked(&self, registry: &mut Registry) -> Result<usize> {
        let mut armed = 0;
        for post in self.inner.db.scheduled_posts().await? {
            let key = TimerKey::Post(post.id.clone());
            if registry.timers.contains_key(&key) || registry.in_flight.contains(&post.id) {
                continue;
            }
            let at = post
                .scheduled_at
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now);
            self.arm_one_shot(registry, &post.id, at);
            armed += 1;
        }
        if armed > 0 {
            info!(count = armed, "Restored scheduled posts");
        }
        Ok(armed)
    }

    fn arm_one_shot(&self, registry: &mut Registry, post_id: &str, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let next_run: NextRun = Arc::new(std::sync::Mutex::new(Some(at)));

        let handle = tokio::spawn(one_shot_timer(
            Arc::downgrade(&self.inner),
            post_id.to_string(),
            delay,
        ));

        registry.timers.insert(
            TimerKey::Post(post_id.to_string()),
            TimerEntry {
                handle,
                paused: Arc::new(AtomicBool::new(false)),
                next_run,
                revision: None,
            },
        );
    }

    /// Run a due one-shot post. Called from its timer.
    async fn fire_scheduled_post(&self, post_id: &str) -> Result<()> {
        {
            let mut registry = self.inner.registry.lock().await;
            // A missing entry means the post was cancelled after the timer woke up
            if registry.timers.remove(&TimerKey::Post(post_id.to_string())).is_none() {
                return Ok(());
            }
            registry.in_flight.insert(post_id.to_string());
        }

        let result = self.publish_scheduled(post_id).await;

        self.inner.registry.lock().await.in_flight.remove(post_id);
        result
    }

    async fn publish_scheduled(&self, post_id: &str) -> Result<()> {
        let Some(mut post) = self.inner.db.get_post(post_id).await? else {
            warn!(post_id = %post_id, "Scheduled post vanished");
            return Ok(());
        };
        if post.status != PostStatus::Scheduled {
            debug!(post_id = %post_id, status = %post.status, "Post no longer scheduled, skipping");
            return Ok(());
        }
        let platform = post.platform.clone();

        let Some(account) = self.inner.db.active_account(&platform).await? else {
            return self
                .fail_scheduled(post, format!("No active account for platform {}", platform))
                .await;
        };
        let Some(product) = self.inner.db.get_product(post.product_id).await? else {
            let reason = format!("Product {} no longer exists", post.product_id);
            return self.fail_scheduled(post, reason).await;
        };

        let cap = self.cap_for(&platform).await?;
        match self.claim(&post.id, &platform, Some(PostStatus::Scheduled), cap).await? {
            ClaimOutcome::Granted => {}
            ClaimOutcome::CapReached => {
                let reason = format!("Daily cap of {} posts reached for {}", cap, platform);
                return self.fail_scheduled(post, reason).await;
            }
            ClaimOutcome::Taken => {
                debug!(post_id = %post_id, "Post cancelled or claimed by another process, skipping");
                return Ok(());
            }
        }

        let outcome = self
            .inner
            .executor
            .publish(&post.content, &product, &platform, &account)
            .await;
        post.apply_outcome(outcome);

        // The claim kept the stored status at `scheduled`
        match self.inner.db.record_outcome(&post, PostStatus::Scheduled).await {
            Ok(true) => self.announce(&post),
            Ok(false) => warn!(post_id = %post_id, "Post changed while publishing; outcome discarded"),
            Err(e) => {
                self.release(&post.id).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn fail_scheduled(&self, mut post: Post, reason: String) -> Result<()> {
        warn!(post_id = %post.id, platform = %post.platform, reason = %reason, "Scheduled post failed");
        post.apply_outcome(PublishOutcome::Failed { error: reason });
        if self.inner.db.record_outcome(&post, PostStatus::Scheduled).await? {
            self.announce(&post);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retry sweep
    // ------------------------------------------------------------------

    /// Try every `failed` post again through the executor, claiming a slot
    /// against the same cap as a cycle. The only path from `failed` to `posted`.
    pub async fn retry_failed_posts(&self) -> Result<RetrySummary> {
        let mut summary = RetrySummary::default();

        for post in self.inner.db.failed_posts().await? {
            {
                let mut registry = self.inner.registry.lock().await;
                if !registry.in_flight.insert(post.id.clone()) {
                    summary.skipped += 1;
                    continue;
                }
            }

            let result = self.retry_one(post.clone()).await;
            self.inner.registry.lock().await.in_flight.remove(&post.id);

            match result? {
                Some(true) => {
                    summary.attempted += 1;
                    summary.recovered += 1;
                }
                Some(false) => summary.attempted += 1,
                None => summary.skipped += 1,
            }
        }

        info!(
            attempted = summary.attempted,
            recovered = summary.recovered,
            skipped = summary.skipped,
            "Retry sweep finished"
        );
        Ok(summary)
    }

    /// `None` when the retry was not attempted
    async fn retry_one(&self, mut post: Post) -> Result<Option<bool>> {
        let platform = post.platform.clone();
        let Some(account) = self.inner.db.active_account(&platform).await? else {
            debug!(post_id = %post.id, "No active account, not retrying");
            return Ok(None);
        };
        let Some(product) = self.inner.db.get_product(post.product_id).await? else {
            debug!(post_id = %post.id, "Product gone, not retrying");
            return Ok(None);
        };

        let cap = self.cap_for(&platform).await?;
        match self.claim(&post.id, &platform, Some(PostStatus::Failed), cap).await? {
            ClaimOutcome::Granted => {}
            ClaimOutcome::CapReached => {
                debug!(post_id = %post.id, platform = %platform, "Daily cap reached, not retrying");
                return Ok(None);
            }
            ClaimOutcome::Taken => {
                debug!(post_id = %post.id, "Already being retried, skipping");
                return Ok(None);
            }
        }

        let outcome = self
            .inner
            .executor
            .publish(&post.content, &product, &platform, &account)
            .await;
        let recovered = outcome.is_posted();
        post.apply_outcome(outcome);

        match self.inner.db.record_outcome(&post, PostStatus::Failed).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                self.release(&post.id).await;
                return Err(e);
            }
        }
        self.announce(&post);
        Ok(Some(recovered))
    }

    // ------------------------------------------------------------------
    // Engagement
    // ------------------------------------------------------------------

    /// Install the recurring engagement refresher timer. Replaces any
    /// existing one.
    pub async fn start_engagement_refresher(&self) {
        let first_run = self.inner.config.scheduler.engagement_first_run;
        let interval = self.inner.config.scheduler.engagement_refresh_interval;
        let paused = Arc::new(AtomicBool::new(false));
        let next_run: NextRun = Arc::new(std::sync::Mutex::new(None));

        let mut registry = self.inner.registry.lock().await;
        if let Some(old) = registry.timers.remove(&TimerKey::EngagementRefresh) {
            old.handle.abort();
        }

        let handle = tokio::spawn(refresher_timer(
            Arc::downgrade(&self.inner),
            first_run,
            interval,
            Arc::clone(&paused),
            Arc::clone(&next_run),
        ));
        registry.timers.insert(
            TimerKey::EngagementRefresh,
            TimerEntry {
                handle,
                paused,
                next_run,
                revision: None,
            },
        );
        info!(?first_run, ?interval, "Engagement refresher started");
    }

    /// One refresher pass, skipping posts that are being published
    pub async fn refresh_engagement(&self) -> Result<RefreshSummary> {
        let in_flight = self.inner.registry.lock().await.in_flight.clone();
        self.inner.refresher.refresh_once(&in_flight).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Reserve a publish slot for `post_id` against today's cap
    async fn claim(
        &self,
        post_id: &str,
        platform: &PlatformKind,
        expected: Option<PostStatus>,
        cap: u32,
    ) -> Result<ClaimOutcome> {
        let day = day_window(Utc::now(), self.inner.config.scheduler.utc_offset_hours);
        self.inner
            .db
            .claim_publish(&ClaimRequest {
                post_id,
                platform,
                expected,
                cap,
                day,
            })
            .await
    }

    /// Drop a claim whose publish will not be stored. A claim that cannot be
    /// dropped expires after `CLAIM_TTL_SECS`.
    async fn release(&self, post_id: &str) {
        if let Err(e) = self.inner.db.release_claim(post_id).await {
            warn!(post_id = %post_id, error = %e, "Failed to release publish claim");
        }
    }

    /// `posted` posts for the platform in the current calendar day. Live
    /// claims are not included.
    pub async fn posted_today(&self, platform: &PlatformKind) -> Result<u32> {
        let (start, end) = day_window(Utc::now(), self.inner.config.scheduler.utc_offset_hours);
        self.inner.db.count_posted_between(platform, start, end).await
    }

    async fn cap_for(&self, platform: &PlatformKind) -> Result<u32> {
        Ok(self
            .inner
            .db
            .get_schedule(platform)
            .await?
            .map(|schedule| schedule.max_posts_per_day)
            .unwrap_or(DEFAULT_MAX_POSTS_PER_DAY))
    }

    async fn require_product(&self, product_id: i64) -> Result<Product> {
        self.inner.db.get_product(product_id).await?.ok_or_else(|| {
            SchedulingError::NotFound {
                entity: "product",
                id: product_id.to_string(),
            }
            .into()
        })
    }

    fn skipped(&self, platform: &PlatformKind, reason: SkipReason) {
        self.inner.events.emit(Event::CycleSkipped {
            platform: platform.clone(),
            reason,
        });
    }

    fn announce(&self, post: &Post) {
        match post.status {
            PostStatus::Posted => {
                info!(
                    post_id = %post.id,
                    platform = %post.platform,
                    remote_id = post.remote_id.as_deref().unwrap_or_default(),
                    simulated = post.simulated,
                    "Post published"
                );
                self.inner.events.emit(Event::PostPublished {
                    post_id: post.id.clone(),
                    platform: post.platform.clone(),
                    remote_id: post.remote_id.clone().unwrap_or_default(),
                    simulated: post.simulated,
                });
            }
            PostStatus::Failed => {
                let error = post.error_message.clone().unwrap_or_default();
                warn!(post_id = %post.id, platform = %post.platform, error = %error, "Post failed");
                self.inner.events.emit(Event::PostFailed {
                    post_id: post.id.clone(),
                    platform: post.platform.clone(),
                    error,
                });
            }
            PostStatus::Scheduled | PostStatus::Cancelled => {}
        }
    }
}

fn set_next_run(next_run: &NextRun, delay: Duration) {
    let at = chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d));
    *next_run.lock().unwrap_or_else(|p| p.into_inner()) = at;
}

async fn platform_timer(
    inner: Weak<Inner>,
    platform: PlatformKind,
    grace: Duration,
    interval: Duration,
    paused: Arc<AtomicBool>,
    next_run: NextRun,
) {
    let mut delay = grace;
    loop {
        set_next_run(&next_run, delay);
        tokio::time::sleep(delay).await;
        delay = interval;

        if paused.load(Ordering::SeqCst) {
            debug!(platform = %platform, "Platform suspended, skipping fire");
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let orchestrator = Orchestrator { inner };
        let platform = platform.clone();

        // Detached so that re-arming or shutdown never interrupts a publish
        let cycle = tokio::spawn(async move {
            match orchestrator.run_cycle(&platform).await {
                Ok(outcome) => debug!(platform = %platform, ?outcome, "Cycle finished"),
                Err(e) => error!(platform = %platform, error = %e, "Cycle failed"),
            }
        });
        let _ = cycle.await;
    }
}

async fn one_shot_timer(inner: Weak<Inner>, post_id: String, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let orchestrator = Orchestrator { inner };

    tokio::spawn(async move {
        if let Err(e) = orchestrator.fire_scheduled_post(&post_id).await {
            error!(post_id = %post_id, error = %e, "Scheduled post failed to run");
        }
    });
}

async fn refresher_timer(
    inner: Weak<Inner>,
    first_run: Duration,
    interval: Duration,
    paused: Arc<AtomicBool>,
    next_run: NextRun,
) {
    let mut delay = first_run;
    loop {
        set_next_run(&next_run, delay);
        tokio::time::sleep(delay).await;
        delay = interval;

        if paused.load(Ordering::SeqCst) {
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let orchestrator = Orchestrator { inner };
        if let Err(e) = orchestrator.refresh_engagement().await {
            error!(error = %e, "Engagement refresh failed");
        }
    }
}
