//! Channel Crew - Main Entry Point
//!
//! Loads configuration, opens the account store and serves the REST API
//! until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use channel_crew::accounts::{AccountStore, LoginFlow, PendingLogins};
use channel_crew::actions::ActionExecutor;
use channel_crew::api::{self, AppState};
use channel_crew::config::{ServerSettings, TelegramConfig};
use channel_crew::scheduler::{JobRunner, JobTable};
use channel_crew::telegram::{GrammersProvider, MessagingProvider};

/// How often abandoned logins are looked for.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Backend for automating a pool of Telegram accounts.
#[derive(Parser, Debug)]
#[command(name = "channel_crew")]
#[command(about = "Drive a pool of Telegram accounts through a REST API")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Address to listen on (overrides BIND_ADDR).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let mut settings = ServerSettings::from_env_with_defaults();
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    let provider: Arc<dyn MessagingProvider> = Arc::new(
        GrammersProvider::new(tg_config)
            .await
            .context("Failed to prepare Telegram provider")?,
    );

    let store = Arc::new(
        AccountStore::open(&settings.accounts_path)
            .await
            .context("Failed to open account store")?,
    );

    let pending = Arc::new(PendingLogins::new(settings.pending_login_ttl()));
    let login = LoginFlow::new(Arc::clone(&provider), Arc::clone(&store), Arc::clone(&pending));
    let executor = Arc::new(ActionExecutor::new(provider, settings.action_timeout()));
    let runner = JobRunner::new(
        Arc::new(JobTable::new(settings.max_finished_jobs)),
        Arc::clone(&executor),
    );

    // Spawn reaper task
    let (reaper_tx, reaper_rx) = mpsc::channel::<()>(1);
    let reaper_handle = tokio::spawn(async move {
        pending.run_reaper(REAPER_INTERVAL, reaper_rx).await;
    });

    let app = api::router(AppState {
        store,
        login,
        runner,
        executor,
        static_dir: settings.static_dir.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;

    info!("Server started on {}", settings.bind_addr);
    info!(
        "Accounts file: {}, action timeout: {}s",
        settings.accounts_path.display(),
        settings.action_timeout_secs
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await
        .context("Server error")?;

    // Cleanup
    let _ = reaper_tx.send(()).await;
    let _ = reaper_handle.await;
    info!("Scheduled jobs that have not fired are dropped");

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
