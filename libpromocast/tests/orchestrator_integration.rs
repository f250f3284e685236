//! Integration tests for the schedule orchestrator
//!
//! Every test runs against a fresh SQLite file with simulation-only
//! providers and a scripted random source, so outcomes are deterministic.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use libpromocast::config::Config;
use libpromocast::events::{Event, SkipReason};
use libpromocast::orchestrator::PlatformState;
use libpromocast::platforms::mock::MockProvider;
use libpromocast::platforms::ProviderFactory;
use libpromocast::random::ScriptedRandom;
use libpromocast::types::{Engagement, EngagementShape, PublishOutcome};
use libpromocast::{
    CycleOutcome, Database, Orchestrator, PlatformKind, Post, PostQuery, PostStatus, Product,
    ScheduleConfig, SocialAccount,
};
use tempfile::TempDir;

struct Harness {
    orchestrator: Orchestrator,
    db: Database,
    temp_dir: TempDir,
}

fn test_config(db_path: &str, grace: Duration, success_rate: f64) -> Config {
    let mut config = Config::default_config();
    config.database.path = db_path.to_string();
    config.scheduler.grace_period = grace;
    config.scheduler.platforms = vec![PlatformKind::Twitter, PlatformKind::Facebook];
    config.publishing.simulation_success_rate = success_rate;
    config.publishing.retry_backoff = Duration::from_millis(1);
    config
}

/// Orchestrator on its own pool, as a separate process would open it
async fn open_orchestrator(config: Config, providers: ProviderFactory) -> (Orchestrator, Database) {
    let db = Database::new(&config.database.path).await.unwrap();
    let orchestrator = Orchestrator::with_components(
        db.clone(),
        Arc::new(config),
        providers,
        Arc::new(ScriptedRandom::constant(0.0)),
    );
    (orchestrator, db)
}

async fn setup_with_providers(
    grace: Duration,
    success_rate: f64,
    providers: ProviderFactory,
) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let config = test_config(db_path.to_str().unwrap(), grace, success_rate);
    let (orchestrator, db) = open_orchestrator(config, providers).await;

    Harness {
        orchestrator,
        db,
        temp_dir,
    }
}

/// Orchestrator whose simulated publishes succeed at `success_rate`
async fn setup_with(grace: Duration, success_rate: f64) -> Harness {
    setup_with_providers(grace, success_rate, ProviderFactory::simulation_only()).await
}

/// Twitter publishes go through a mock that answers after `delay`
fn slow_twitter(delay: Duration) -> (Arc<MockProvider>, ProviderFactory) {
    let mock = Arc::new(MockProvider::slow("twitter", delay));
    let providers =
        ProviderFactory::simulation_only().with_provider(PlatformKind::Twitter, mock.clone());
    (mock, providers)
}

/// Poll until the mock has been called, or give up after ~3s
async fn wait_for_call(mock: &MockProvider) {
    for _ in 0..150 {
        if mock.call_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("provider was never called");
}

async fn setup() -> Harness {
    setup_with(Duration::from_secs(3600), 0.9).await
}

async fn seed_product(db: &Database, title: &str) -> i64 {
    let mut product = Product::new(title, 149.9, format!("https://shop.example/{}", title));
    product.rating = 4.6;
    product.sold_count = 1200;
    product.discount = 25;
    product.category = Some("Electronics".to_string());
    product.description = Some("Bluetooth 5.3, 40h battery".to_string());
    db.upsert_product(&product).await.unwrap()
}

async fn configure(db: &Database, platform: PlatformKind, cap: u32) {
    let mut schedule = ScheduleConfig::default_for(platform.clone());
    schedule.max_posts_per_day = cap;
    db.upsert_schedule(&schedule).await.unwrap();
    db.upsert_account(&SocialAccount::new(platform, "promo_store"))
        .await
        .unwrap();
}

async fn insert_posted(db: &Database, product_id: i64, platform: PlatformKind) -> Post {
    let mut post = Post::new(product_id, platform, "already out".to_string());
    post.apply_outcome(PublishOutcome::Posted {
        remote_id: "earlier".to_string(),
        posted_at: Utc::now().timestamp(),
        engagement: Engagement::zeroed(EngagementShape::Twitter),
        simulated: true,
    });
    db.insert_post(&post).await.unwrap();
    post
}

async fn posts_for(db: &Database, platform: PlatformKind) -> Vec<Post> {
    db.query_posts(&PostQuery {
        platform: Some(platform),
        ..Default::default()
    })
    .await
    .unwrap()
}

/// Poll until the post leaves `scheduled`, or give up after ~3s
async fn wait_until_settled(db: &Database, post_id: &str) -> Post {
    for _ in 0..150 {
        let post = db.get_post(post_id).await.unwrap().unwrap();
        if post.status != PostStatus::Scheduled {
            return post;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("post {} never left scheduled", post_id);
}

// ============================================================================
// Cycles
// ============================================================================

#[tokio::test]
async fn test_cycle_publishes_and_persists_one_post() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "earbuds").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    let outcome = h.orchestrator.run_cycle(&PlatformKind::Twitter).await.unwrap();

    let post = match outcome {
        CycleOutcome::Attempted(post) => post,
        other => panic!("expected an attempt, got {:?}", other),
    };
    assert_eq!(post.status, PostStatus::Posted);
    assert_eq!(post.product_id, product_id);
    assert!(post.simulated);
    assert!(post.engagement.is_some());
    assert!(post.remote_id.as_deref().unwrap().starts_with("twitter_"));
    assert!(post.content.chars().count() <= 280);

    let stored = posts_for(&h.db, PlatformKind::Twitter).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], post);
}

#[tokio::test]
async fn test_failed_publish_is_still_persisted() {
    let h = setup_with(Duration::from_secs(3600), 0.0).await;
    seed_product(&h.db, "lamp").await;
    configure(&h.db, PlatformKind::Facebook, 4).await;

    let outcome = h.orchestrator.run_cycle(&PlatformKind::Facebook).await.unwrap();

    match outcome {
        CycleOutcome::Attempted(post) => {
            assert_eq!(post.status, PostStatus::Failed);
            assert!(post.engagement.is_none());
            assert_eq!(post.error_message.as_deref(), Some("Simulated posting failure"));
        }
        other => panic!("expected an attempt, got {:?}", other),
    }
    assert_eq!(posts_for(&h.db, PlatformKind::Facebook).await.len(), 1);
}

#[tokio::test]
async fn test_cycle_at_cap_is_a_noop() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "kettle").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;
    for _ in 0..4 {
        insert_posted(&h.db, product_id, PlatformKind::Twitter).await;
    }

    let mut events = h.orchestrator.events().subscribe();
    let outcome = h.orchestrator.run_cycle(&PlatformKind::Twitter).await.unwrap();

    assert_eq!(outcome, CycleOutcome::CapReached);
    assert_eq!(posts_for(&h.db, PlatformKind::Twitter).await.len(), 4);
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::CycleSkipped {
            reason: SkipReason::CapReached,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cap_holds_under_concurrent_cycles() {
    let h = setup().await;
    seed_product(&h.db, "mug").await;
    configure(&h.db, PlatformKind::Instagram, 2).await;

    let cycles = (0..6).map(|_| h.orchestrator.run_cycle(&PlatformKind::Instagram));
    let outcomes: Vec<CycleOutcome> = join_all(cycles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let attempted = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Attempted(_)))
        .count();
    assert_eq!(attempted, 2);
    assert_eq!(
        h.orchestrator.posted_today(&PlatformKind::Instagram).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_cap_holds_across_processes_sharing_the_database() {
    let (_mock, providers) = slow_twitter(Duration::from_millis(300));
    let h = setup_with_providers(Duration::from_secs(3600), 0.9, providers).await;
    let product_id = seed_product(&h.db, "headset").await;
    configure(&h.db, PlatformKind::Twitter, 1).await;

    // Second handle with its own pool, like promo-queue next to the daemon
    let (_cli_mock, cli_providers) = slow_twitter(Duration::from_millis(300));
    let cli_config = test_config(
        h.temp_dir.path().join("test.db").to_str().unwrap(),
        Duration::from_secs(3600),
        0.9,
    );
    let (cli, cli_db) = open_orchestrator(cli_config, cli_providers).await;

    let (cycle, now) = tokio::join!(
        h.orchestrator.run_cycle(&PlatformKind::Twitter),
        cli.post_now(product_id),
    );
    let cycle = cycle.unwrap();
    let now = now.unwrap();

    let published = usize::from(matches!(cycle, CycleOutcome::Attempted(_))) + now.len();
    assert_eq!(published, 1);
    assert_eq!(
        h.orchestrator.posted_today(&PlatformKind::Twitter).await.unwrap(),
        1
    );
    assert_eq!(posts_for(&cli_db, PlatformKind::Twitter).await.len(), 1);
}

#[tokio::test]
async fn test_failed_insert_leaves_no_post_and_timer_keeps_running() {
    let (mock, providers) = slow_twitter(Duration::from_millis(300));
    let h = setup_with_providers(Duration::from_millis(50), 0.9, providers).await;
    let product_id = seed_product(&h.db, "tripod").await;
    configure(&h.db, PlatformKind::Twitter, 1).await;

    h.orchestrator.arm_platform(&PlatformKind::Twitter).await.unwrap();
    wait_for_call(&mock).await;

    // Remove the product while the publish is in flight so the insert trips the FK
    let db_path = h.temp_dir.path().join("test.db");
    let raw = sqlx::SqlitePool::connect(&format!("sqlite://{}", db_path.display()))
        .await
        .unwrap();
    sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(product_id)
        .execute(&raw)
        .await
        .unwrap();
    raw.close().await;

    // Once the failed cycle returns, the timer loop schedules its next fire
    let mut rescheduled = false;
    for _ in 0..150 {
        let jobs = h.orchestrator.scheduled_jobs().await;
        let horizon = Utc::now() + chrono::Duration::minutes(30);
        if jobs.iter().any(|job| job.next_run.is_some_and(|at| at > horizon)) {
            rescheduled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rescheduled);
    assert!(posts_for(&h.db, PlatformKind::Twitter).await.is_empty());

    // The abandoned slot was released, so the next cycle still fits under a cap of 1
    seed_product(&h.db, "tripod-v2").await;
    match h.orchestrator.run_cycle(&PlatformKind::Twitter).await.unwrap() {
        CycleOutcome::Attempted(post) => assert_eq!(post.status, PostStatus::Posted),
        other => panic!("expected an attempt, got {:?}", other),
    }
    assert_eq!(posts_for(&h.db, PlatformKind::Twitter).await.len(), 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cycle_without_account_is_unconfigured() {
    let h = setup().await;
    seed_product(&h.db, "tent").await;
    h.db.upsert_schedule(&ScheduleConfig::default_for(PlatformKind::Twitter))
        .await
        .unwrap();

    let outcome = h.orchestrator.run_cycle(&PlatformKind::Twitter).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Unconfigured);
    assert!(posts_for(&h.db, PlatformKind::Twitter).await.is_empty());
}

#[tokio::test]
async fn test_cycle_without_products_has_no_candidate() {
    let h = setup().await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    let mut events = h.orchestrator.events().subscribe();
    let outcome = h.orchestrator.run_cycle(&PlatformKind::Twitter).await.unwrap();

    assert_eq!(outcome, CycleOutcome::NoCandidate);
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::CycleSkipped {
            reason: SkipReason::NoCandidate,
            ..
        }
    ));
}

// ============================================================================
// Platform timers
// ============================================================================

#[tokio::test]
async fn test_arming_twice_keeps_a_single_timer() {
    let h = setup().await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    assert_eq!(
        h.orchestrator.arm_platform(&PlatformKind::Twitter).await.unwrap(),
        PlatformState::Armed
    );
    h.orchestrator.arm_platform(&PlatformKind::Twitter).await.unwrap();

    let jobs = h.orchestrator.scheduled_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].key, "platform:twitter");
    assert!(!jobs[0].paused);
}

#[tokio::test]
async fn test_unconfigured_platform_is_not_armed() {
    let h = setup().await;
    h.db.upsert_account(&SocialAccount::new(PlatformKind::Facebook, "page"))
        .await
        .unwrap();

    let state = h.orchestrator.arm_platform(&PlatformKind::Facebook).await.unwrap();
    assert_eq!(state, PlatformState::Unconfigured);
    assert!(h.orchestrator.scheduled_jobs().await.is_empty());
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let h = setup().await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    assert!(!h.orchestrator.suspend_platform(&PlatformKind::Twitter).await);

    h.orchestrator.arm_platform(&PlatformKind::Twitter).await.unwrap();
    assert!(h.orchestrator.suspend_platform(&PlatformKind::Twitter).await);
    assert_eq!(
        h.orchestrator.platform_state(&PlatformKind::Twitter).await,
        PlatformState::Suspended
    );

    // Reconfiguring keeps the suspension
    let mut schedule = ScheduleConfig::default_for(PlatformKind::Twitter);
    schedule.interval_hours = 2;
    assert_eq!(
        h.orchestrator.configure_platform(&schedule).await.unwrap(),
        PlatformState::Suspended
    );
    assert!(h.orchestrator.scheduled_jobs().await[0].paused);

    assert!(h.orchestrator.resume_platform(&PlatformKind::Twitter).await);
    assert_eq!(
        h.orchestrator.platform_state(&PlatformKind::Twitter).await,
        PlatformState::Armed
    );
}

#[tokio::test]
async fn test_configure_rejects_zero_interval() {
    let h = setup().await;
    let mut schedule = ScheduleConfig::default_for(PlatformKind::Twitter);
    schedule.interval_hours = 0;

    let err = h.orchestrator.configure_platform(&schedule).await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_armed_platform_fires_after_grace_period() {
    let h = setup_with(Duration::from_millis(50), 0.9).await;
    seed_product(&h.db, "backpack").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    h.orchestrator.arm_platform(&PlatformKind::Twitter).await.unwrap();

    let mut posts = Vec::new();
    for _ in 0..150 {
        posts = posts_for(&h.db, PlatformKind::Twitter).await;
        if !posts.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].status, PostStatus::Posted);

    h.orchestrator.shutdown().await;
    assert!(h.orchestrator.scheduled_jobs().await.is_empty());
}

#[tokio::test]
async fn test_initialize_schedules_creates_defaults() {
    let h = setup().await;
    h.db.upsert_account(&SocialAccount::new(PlatformKind::Twitter, "bot"))
        .await
        .unwrap();

    let states = h
        .orchestrator
        .initialize_schedules(&[PlatformKind::Twitter, PlatformKind::Instagram])
        .await
        .unwrap();

    assert_eq!(
        states,
        vec![
            (PlatformKind::Twitter, PlatformState::Armed),
            (PlatformKind::Instagram, PlatformState::Unconfigured),
        ]
    );

    let schedule = h.db.get_schedule(&PlatformKind::Instagram).await.unwrap().unwrap();
    assert_eq!(schedule.interval_hours, 6);
    assert_eq!(schedule.max_posts_per_day, 4);
    assert_eq!(schedule.posting_times, vec!["09:00", "14:00", "18:00", "21:00"]);
}

#[tokio::test]
async fn test_reconcile_follows_account_changes() {
    let h = setup().await;
    configure(&h.db, PlatformKind::Twitter, 4).await;
    h.orchestrator.reconcile().await.unwrap();
    assert_eq!(
        h.orchestrator.platform_state(&PlatformKind::Twitter).await,
        PlatformState::Armed
    );

    let mut account = SocialAccount::new(PlatformKind::Twitter, "promo_store");
    account.active = false;
    h.db.upsert_account(&account).await.unwrap();
    h.orchestrator.reconcile().await.unwrap();
    assert_eq!(
        h.orchestrator.platform_state(&PlatformKind::Twitter).await,
        PlatformState::Unconfigured
    );

    account.active = true;
    h.db.upsert_account(&account).await.unwrap();
    h.orchestrator.reconcile().await.unwrap();
    assert_eq!(
        h.orchestrator.platform_state(&PlatformKind::Twitter).await,
        PlatformState::Armed
    );
}

// ============================================================================
// One-shot posts
// ============================================================================

#[tokio::test]
async fn test_schedule_then_cancel_twice() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "sneakers").await;
    let at = Utc::now() + chrono::Duration::hours(1);

    let post = h
        .orchestrator
        .schedule_specific_post(product_id, &PlatformKind::Instagram, at)
        .await
        .unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert_eq!(post.scheduled_at, Some(at.timestamp()));
    assert!(!post.content.is_empty());

    let jobs = h.orchestrator.scheduled_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].key, format!("post:{}", post.id));

    assert!(h.orchestrator.cancel_scheduled_post(&post.id).await.unwrap());
    assert!(!h.orchestrator.cancel_scheduled_post(&post.id).await.unwrap());

    let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Cancelled);
    assert!(h.orchestrator.scheduled_jobs().await.is_empty());
}

#[tokio::test]
async fn test_schedule_unknown_product_fails() {
    let h = setup().await;
    let err = h
        .orchestrator
        .schedule_specific_post(404, &PlatformKind::Twitter, Utc::now())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("product not found"));
}

#[tokio::test]
async fn test_past_one_shot_fires_immediately() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "watch").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    let post = h
        .orchestrator
        .schedule_specific_post(product_id, &PlatformKind::Twitter, Utc::now() - chrono::Duration::seconds(5))
        .await
        .unwrap();

    let settled = wait_until_settled(&h.db, &post.id).await;
    assert_eq!(settled.status, PostStatus::Posted);
    assert_eq!(settled.content, post.content);
    assert!(settled.posted_at.is_some());

    // Posted posts cannot be cancelled
    assert!(!h.orchestrator.cancel_scheduled_post(&post.id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_from_another_process_loses_to_in_flight_publish() {
    let (mock, providers) = slow_twitter(Duration::from_millis(300));
    let h = setup_with_providers(Duration::from_secs(3600), 0.9, providers).await;
    let product_id = seed_product(&h.db, "monitor").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    let post = h
        .orchestrator
        .schedule_specific_post(product_id, &PlatformKind::Twitter, Utc::now())
        .await
        .unwrap();
    wait_for_call(&mock).await;

    let cli_db = Database::new(h.temp_dir.path().join("test.db").to_str().unwrap())
        .await
        .unwrap();
    assert!(cli_db.is_claimed(&post.id).await.unwrap());
    assert!(!cli_db.mark_cancelled(&post.id).await.unwrap());
    assert!(!h.orchestrator.cancel_scheduled_post(&post.id).await.unwrap());

    let settled = wait_until_settled(&h.db, &post.id).await;
    assert_eq!(settled.status, PostStatus::Posted);
    assert_eq!(settled.remote_id.as_deref(), Some("twitter-remote-1"));
    assert!(!settled.simulated);
    assert!(!cli_db.is_claimed(&post.id).await.unwrap());
}

#[tokio::test]
async fn test_one_shot_without_active_account_fails() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "blender").await;

    let post = h
        .orchestrator
        .schedule_specific_post(product_id, &PlatformKind::Facebook, Utc::now())
        .await
        .unwrap();

    let settled = wait_until_settled(&h.db, &post.id).await;
    assert_eq!(settled.status, PostStatus::Failed);
    assert!(settled
        .error_message
        .unwrap()
        .contains("No active account for platform facebook"));
    assert!(settled.engagement.is_none());
}

#[tokio::test]
async fn test_one_shot_at_cap_fails_with_explanation() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "pillow").await;
    configure(&h.db, PlatformKind::Twitter, 1).await;
    insert_posted(&h.db, product_id, PlatformKind::Twitter).await;

    let post = h
        .orchestrator
        .schedule_specific_post(product_id, &PlatformKind::Twitter, Utc::now())
        .await
        .unwrap();

    let settled = wait_until_settled(&h.db, &post.id).await;
    assert_eq!(settled.status, PostStatus::Failed);
    assert!(settled.error_message.unwrap().contains("Daily cap of 1"));
    assert_eq!(
        h.orchestrator.posted_today(&PlatformKind::Twitter).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_restore_arms_persisted_posts_once() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "speaker").await;
    let at = (Utc::now() + chrono::Duration::hours(2)).timestamp();
    let post = Post::new(product_id, PlatformKind::Twitter, "later".to_string()).scheduled_for(at);
    h.db.insert_post(&post).await.unwrap();

    assert_eq!(h.orchestrator.restore_scheduled_posts().await.unwrap(), 1);
    assert_eq!(h.orchestrator.restore_scheduled_posts().await.unwrap(), 0);

    let jobs = h.orchestrator.scheduled_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].next_run.map(|t| t.timestamp()), Some(at));
}

#[tokio::test]
async fn test_reconcile_drops_timers_of_externally_cancelled_posts() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "chair").await;
    let post = h
        .orchestrator
        .schedule_specific_post(product_id, &PlatformKind::Twitter, Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();

    // Another process cancels through the database
    assert!(h.db.mark_cancelled(&post.id).await.unwrap());
    h.orchestrator.reconcile().await.unwrap();

    assert!(h
        .orchestrator
        .scheduled_jobs()
        .await
        .iter()
        .all(|job| !job.key.starts_with("post:")));
}

// ============================================================================
// Retry sweep, post-now, engagement
// ============================================================================

#[tokio::test]
async fn test_retry_sweep_recovers_failed_posts() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "drone").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    let mut failed = Post::new(product_id, PlatformKind::Twitter, "try again".to_string());
    failed.apply_outcome(PublishOutcome::Failed {
        error: "Simulated posting failure".to_string(),
    });
    h.db.insert_post(&failed).await.unwrap();

    let summary = h.orchestrator.retry_failed_posts().await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.recovered, 1);

    let stored = h.db.get_post(&failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Posted);
    assert!(stored.error_message.is_none());
    assert!(stored.engagement.is_some());
}

#[tokio::test]
async fn test_retry_sweep_respects_cap() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "router").await;
    configure(&h.db, PlatformKind::Twitter, 1).await;
    insert_posted(&h.db, product_id, PlatformKind::Twitter).await;

    let mut failed = Post::new(product_id, PlatformKind::Twitter, "again".to_string());
    failed.apply_outcome(PublishOutcome::Failed {
        error: "boom".to_string(),
    });
    h.db.insert_post(&failed).await.unwrap();

    let summary = h.orchestrator.retry_failed_posts().await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.skipped, 1);

    let stored = h.db.get_post(&failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Failed);
}

#[tokio::test]
async fn test_post_now_uses_every_active_account() {
    let h = setup().await;
    let product_id = seed_product(&h.db, "camera").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;
    configure(&h.db, PlatformKind::Facebook, 4).await;
    let mut inactive = SocialAccount::new(PlatformKind::Instagram, "paused");
    inactive.active = false;
    h.db.upsert_account(&inactive).await.unwrap();

    let posts = h.orchestrator.post_now(product_id).await.unwrap();

    let mut platforms: Vec<String> = posts.iter().map(|p| p.platform.to_string()).collect();
    platforms.sort();
    assert_eq!(platforms, vec!["facebook", "twitter"]);
    assert!(posts.iter().all(|p| p.status == PostStatus::Posted));
}

#[tokio::test]
async fn test_refresh_grows_engagement_of_posted_posts() {
    let h = setup().await;
    seed_product(&h.db, "scooter").await;
    configure(&h.db, PlatformKind::Twitter, 4).await;

    let post = match h.orchestrator.run_cycle(&PlatformKind::Twitter).await.unwrap() {
        CycleOutcome::Attempted(post) => post,
        other => panic!("expected an attempt, got {:?}", other),
    };
    let before = post.engagement.as_ref().unwrap().total();

    let summary = h.orchestrator.refresh_engagement().await.unwrap();
    assert_eq!(summary.updated, 1);

    let stored = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.engagement.unwrap().total(), before + 4);
    assert_eq!(stored.status, PostStatus::Posted);
    assert_eq!(stored.remote_id, post.remote_id);
}
