//! Tachibana Client - Main Entry Point
//!
//! Logs in through the configured session policy, reports the granted
//! endpoint URLs, and keeps the session alive until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tachibana_client::config::load_config;
use tachibana_client::tachibana::auth::AuthClient;
use tachibana_client::tachibana::session_manager::{
    create_session_manager, Credentials, SessionPolicy,
};
use tachibana_client::tachibana::transport::Transport;

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Session policy override: "time" or "date"
    #[arg(long)]
    session_policy: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Tachibana client");
    info!("Configuration file: {}", args.config);

    dotenvy::dotenv().ok();
    let config = load_config(Some(&args.config))?;

    let credentials = Credentials {
        user_id: config
            .tachibana
            .user_id
            .clone()
            .context("tachibana.user_id is not configured")?,
        password: config
            .tachibana
            .password
            .clone()
            .context("tachibana.password is not configured")?,
        second_password: config.tachibana.second_password.clone().unwrap_or_default(),
    };

    let transport = Transport::new(
        config.settings.max_attempts,
        Duration::from_millis(config.settings.retry_delay_ms),
        Duration::from_secs(config.settings.request_timeout_seconds),
    );
    let auth = AuthClient::new(&config.tachibana.base_url, transport);

    let policy_name = args
        .session_policy
        .unwrap_or_else(|| config.session.policy.clone());
    let policy = match policy_name.as_str() {
        "date" => SessionPolicy::Date {
            session_dir: PathBuf::from(&config.session.record_dir),
        },
        _ => SessionPolicy::Time {
            timeout: Duration::from_secs(config.session.timeout_seconds),
        },
    };

    let manager = create_session_manager(policy, auth, credentials);
    manager.ensure_authenticated().await?;
    let session = manager.get_session().await?;
    info!(
        request_url = %session.request_url,
        master_url = %session.master_url,
        event_url = %session.event_url,
        "session established"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, logging out...");
    manager.logout().await?;

    Ok(())
}
