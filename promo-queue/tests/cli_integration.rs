//! Integration tests for promo-queue commands

use assert_cmd::Command;
use libpromocast::db::{ClaimOutcome, ClaimRequest};
use libpromocast::types::PublishOutcome;
use libpromocast::{Database, PlatformKind, Post, PostStatus, Product, SocialAccount};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// Config and database in a temp dir; returns (dir, config path, db path)
fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("promocast.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[publishing]
simulation_success_rate = 1.0

[content]
currency = "$"
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    fs::write(&config_path, config_content).unwrap();

    (
        temp_dir,
        config_path.to_string_lossy().to_string(),
        db_path.to_string_lossy().to_string(),
    )
}

fn queue(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("promo-queue").unwrap();
    cmd.env("PROMOCAST_CONFIG", config_path);
    cmd
}

async fn seed_product(db_path: &str) -> i64 {
    let db = Database::new(db_path).await.unwrap();
    let mut product = Product::new("Air fryer", 349.0, "https://shop.example/fryer");
    product.rating = 4.8;
    product.sold_count = 5000;
    product.discount = 20;
    let id = db.upsert_product(&product).await.unwrap();
    db.close().await;
    id
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ============================================================================
// schedule / list / cancel
// ============================================================================

#[tokio::test]
async fn test_schedule_then_list_as_json() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    let output = queue(&config_path)
        .args(["schedule", &product_id.to_string(), "twitter", "2h", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let scheduled = stdout_json(&output);
    assert_eq!(scheduled["status"], "scheduled");
    assert_eq!(scheduled["platform"], "twitter");
    assert!(scheduled["content"].as_str().unwrap().contains("Air fryer"));

    let output = queue(&config_path)
        .args(["list", "--status", "scheduled", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let posts = stdout_json(&output);
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["id"], scheduled["id"]);
}

#[tokio::test]
async fn test_list_text_shows_time_until() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    queue(&config_path)
        .args(["schedule", &product_id.to_string(), "facebook", "3h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("facebook"));

    queue(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("scheduled"))
        .stdout(predicate::str::contains("in 2 hours").or(predicate::str::contains("in 3 hours")));
}

#[tokio::test]
async fn test_schedule_rejects_bad_input() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    queue(&config_path)
        .args(["schedule", &product_id.to_string(), "my platform!", "2h"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("invalid platform name"));

    queue(&config_path)
        .args(["schedule", &product_id.to_string(), "twitter", "random:5s-1m"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("at least 30 seconds"));

    queue(&config_path)
        .args(["schedule", "999", "twitter", "2h"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("product not found: 999"));
}

#[tokio::test]
async fn test_cancel_twice() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    let output = queue(&config_path)
        .args(["schedule", &product_id.to_string(), "instagram", "1h", "-f", "json"])
        .output()
        .unwrap();
    let id = stdout_json(&output)["id"].as_str().unwrap().to_string();

    queue(&config_path)
        .args(["cancel", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled"));

    queue(&config_path)
        .args(["cancel", &id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("is cancelled and cannot be cancelled"));

    queue(&config_path)
        .args(["cancel", "no-such-post"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("post not found"));
}

#[tokio::test]
async fn test_cancel_refuses_post_being_published() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    let output = queue(&config_path)
        .args(["schedule", &product_id.to_string(), "twitter", "1h", "-f", "json"])
        .output()
        .unwrap();
    let id = stdout_json(&output)["id"].as_str().unwrap().to_string();

    // The daemon claims a one-shot right before calling the provider
    let db = Database::new(&db_path).await.unwrap();
    let claimed = db
        .claim_publish(&ClaimRequest {
            post_id: &id,
            platform: &PlatformKind::Twitter,
            expected: Some(PostStatus::Scheduled),
            cap: 4,
            day: (0, i64::MAX),
        })
        .await
        .unwrap();
    assert_eq!(claimed, ClaimOutcome::Granted);

    queue(&config_path)
        .args(["cancel", &id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already being published"));

    let stored = db.get_post(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Scheduled);
}

#[test]
fn test_invalid_format_is_rejected() {
    let (_dir, config_path, _db) = setup_test_env();

    queue(&config_path)
        .args(["list", "--format", "yaml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[test]
fn test_missing_config_is_a_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    queue(missing.to_str().unwrap())
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

// ============================================================================
// configure / account
// ============================================================================

#[tokio::test]
async fn test_configure_updates_schedule() {
    let (_dir, config_path, db_path) = setup_test_env();

    let output = queue(&config_path)
        .args([
            "configure",
            "twitter",
            "--interval",
            "4h",
            "--max-per-day",
            "6",
            "--times",
            "08:30,20:00",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["interval_hours"], 4);
    assert_eq!(json["max_posts_per_day"], 6);

    let db = Database::new(&db_path).await.unwrap();
    let schedule = db.get_schedule(&PlatformKind::Twitter).await.unwrap().unwrap();
    assert_eq!(schedule.interval_hours, 4);
    assert_eq!(schedule.max_posts_per_day, 6);
    assert_eq!(schedule.posting_times, vec!["08:30", "20:00"]);
    assert!(schedule.active);

    queue(&config_path)
        .args(["configure", "twitter", "--disable"])
        .assert()
        .success()
        .stdout(predicate::str::contains("inactive"));
    let schedule = db.get_schedule(&PlatformKind::Twitter).await.unwrap().unwrap();
    assert!(!schedule.active);
    assert_eq!(schedule.interval_hours, 4);
}

#[test]
fn test_configure_rejects_partial_hours() {
    let (_dir, config_path, _db) = setup_test_env();

    queue(&config_path)
        .args(["configure", "twitter", "--interval", "90m"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("whole number of hours"));
}

#[tokio::test]
async fn test_account_set_list_disable_never_prints_token() {
    let (dir, config_path, db_path) = setup_test_env();
    let token_path = dir.path().join("twitter.token");
    fs::write(&token_path, "super-secret-token\n").unwrap();

    queue(&config_path)
        .args(["account", "set", "twitter", "store_bot", "--token-file"])
        .arg(&token_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("super-secret-token").not());

    let output = queue(&config_path)
        .args(["account", "list", "--format", "json"])
        .output()
        .unwrap();
    assert!(!String::from_utf8_lossy(&output.stdout).contains("super-secret-token"));
    let accounts = stdout_json(&output);
    assert_eq!(accounts[0]["platform"], "twitter");
    assert_eq!(accounts[0]["has_token"], true);
    assert_eq!(accounts[0]["active"], true);

    queue(&config_path)
        .args(["account", "disable", "twitter"])
        .assert()
        .success();

    let db = Database::new(&db_path).await.unwrap();
    let account = db.get_account(&PlatformKind::Twitter).await.unwrap().unwrap();
    assert!(!account.active);
    assert_eq!(account.access_token.unwrap().expose(), "super-secret-token");
}

// ============================================================================
// now / retry / stats
// ============================================================================

#[tokio::test]
async fn test_now_posts_on_active_accounts() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    let db = Database::new(&db_path).await.unwrap();
    db.upsert_account(&SocialAccount::new(PlatformKind::Instagram, "insta"))
        .await
        .unwrap();
    db.close().await;

    let output = queue(&config_path)
        .args(["now", &product_id.to_string(), "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let posts = stdout_json(&output);
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["platform"], "instagram");
    assert_eq!(posts[0]["status"], "posted");
    assert_eq!(posts[0]["simulated"], true);
}

#[tokio::test]
async fn test_retry_recovers_failed_posts_and_stats_count_them() {
    let (_dir, config_path, db_path) = setup_test_env();
    let product_id = seed_product(&db_path).await;

    let db = Database::new(&db_path).await.unwrap();
    db.upsert_account(&SocialAccount::new(PlatformKind::Facebook, "page"))
        .await
        .unwrap();
    let mut failed = Post::new(product_id, PlatformKind::Facebook, "retry me".to_string());
    failed.apply_outcome(PublishOutcome::Failed {
        error: "Simulated posting failure".to_string(),
    });
    db.insert_post(&failed).await.unwrap();
    db.close().await;

    let output = queue(&config_path)
        .args(["retry", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary = stdout_json(&output);
    assert_eq!(summary["attempted"], 1);
    assert_eq!(summary["recovered"], 1);

    let db = Database::new(&db_path).await.unwrap();
    let stored = db.get_post(&failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Posted);

    let output = queue(&config_path)
        .args(["stats", "--since", "1d", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats = stdout_json(&output);
    assert_eq!(stats[0]["platform"], "facebook");
    assert_eq!(stats[0]["posted"], 1);
    assert_eq!(stats[0]["failed"], 0);
    assert_eq!(stats[0]["simulated"], 1);
}

#[test]
fn test_stats_on_empty_database() {
    let (_dir, config_path, _db) = setup_test_env();

    queue(&config_path)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("No posts"));
}
