//! promo-send - Background daemon for scheduled promotions
//!
//! Arms a posting timer for every configured platform, restores pending
//! one-shot posts, runs the engagement refresher and keeps its timers in
//! line with the database until it receives SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use libpromocast::logging::{LogFormat, LoggingConfig};
use libpromocast::orchestrator::PlatformState;
use libpromocast::{Config, CycleOutcome, Database, Orchestrator, PromocastError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "promo-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled affiliate promotions")]
#[command(long_about = "\
promo-send - Background daemon for scheduled affiliate promotions

DESCRIPTION:
    promo-send is a long-running daemon that picks best-selling products,
    renders a promotion for each platform and publishes it on a fixed
    interval, never exceeding a platform's daily cap.

    Platforms without real credentials are simulated: the post is recorded
    with a synthetic id and engagement so the pipeline can be exercised
    end to end. Changes made with promo-queue (schedules, accounts,
    one-shot posts, cancellations) are picked up on every poll.

USAGE:
    # Run in foreground (logs to stderr)
    promo-send

    # Reconcile with the database every 30 seconds
    promo-send --poll-interval 30

    # Verbose logging as JSON
    promo-send --verbose --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (running publishes finish)

CONFIGURATION:
    Configuration file: ~/.config/promocast/config.toml
    (override with --config or PROMOCAST_CONFIG)

    [scheduler]
    platforms = [\"instagram\", \"facebook\", \"twitter\"]
    grace_period = \"1m\"
    poll_interval = \"60s\"

    [publishing]
    simulation_success_rate = 0.9
    on_provider_failure = \"simulate\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "PROMOCAST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to reconcile timers with the database")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging, including every scheduler event")]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    #[arg(help = "Log format: text, json or pretty")]
    log_format: LogFormat,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Run one cycle per configured platform and one refresh, then exit")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<PromocastError>()
        .map(PromocastError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;
    let config = Arc::new(config);
    let orchestrator = Orchestrator::new(db.clone(), Arc::clone(&config));

    if cli.verbose {
        tokio::spawn(log_events(orchestrator.clone()));
    }

    info!("promo-send starting");

    if cli.once {
        run_once(&orchestrator, &config).await?;
        db.close().await;
        info!("promo-send: ran once, exiting");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    setup_signal_handlers(shutdown_tx).context("Signal setup failed")?;

    let states = orchestrator
        .initialize_schedules(&config.scheduler.platforms)
        .await?;
    for (platform, state) in &states {
        match state {
            PlatformState::Unconfigured => {
                warn!(platform = %platform, "No active account yet; will arm once one is added")
            }
            _ => info!(platform = %platform, state = ?state, "Platform ready"),
        }
    }

    let restored = orchestrator.restore_scheduled_posts().await?;
    info!(count = restored, "Pending one-shot posts restored");

    orchestrator.start_engagement_refresher().await;

    let poll_interval = cli
        .poll_interval
        .map(Duration::from_secs)
        .unwrap_or(config.scheduler.poll_interval);
    info!(?poll_interval, "Reconciling with the database");

    run_daemon_loop(&orchestrator, poll_interval, shutdown_rx).await;

    orchestrator.shutdown().await;
    db.close().await;
    info!("promo-send stopped");
    Ok(())
}

/// One cycle for every configured platform followed by one engagement pass
async fn run_once(orchestrator: &Orchestrator, config: &Config) -> anyhow::Result<()> {
    for platform in &config.scheduler.platforms {
        match orchestrator.run_cycle(platform).await? {
            CycleOutcome::Attempted(post) => info!(
                platform = %platform,
                post_id = %post.id,
                status = %post.status,
                "Cycle attempted a post"
            ),
            other => info!(platform = %platform, outcome = ?other, "Cycle skipped"),
        }
    }

    let summary = orchestrator.refresh_engagement().await?;
    info!(updated = summary.updated, skipped = summary.skipped, "Engagement refreshed");
    Ok(())
}

/// Reconcile on every tick until shutdown is requested
async fn run_daemon_loop(
    orchestrator: &Orchestrator,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = orchestrator.reconcile().await {
                    error!(error = %e, "Error reconciling timers");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown requested, stopping daemon loop");
                    break;
                }
            }
        }
    }
}

/// Log every scheduler event at debug level
async fn log_events(orchestrator: Orchestrator) {
    use tokio::sync::broadcast::error::RecvError;

    let mut events = orchestrator.events().subscribe();
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(event = %json, "Scheduler event"),
                Err(e) => debug!(error = %e, "Unserializable scheduler event"),
            },
            Err(RecvError::Lagged(missed)) => debug!(missed, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Flip `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    tokio::spawn(async move {
        while let Some(sig) = signals.next().await {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    let _ = shutdown.send(true);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
