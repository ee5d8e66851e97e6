//! repo-history - a terminal front end for the repository import history.
//!
//! Every run loads the local history, reconciles with the backend when a
//! saved session exists, runs one command, and waits for the changes to
//! reach the backend before exiting.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repo_history_core::config::{Config, APP_NAME};
use repo_history_core::{
    ApiClient, CapacityGovernor, FileStorage, HistoryStore, Session, SessionData,
};

use commands::Command;

/// Overrides the saved session token
const TOKEN_ENV: &str = "REPO_HISTORY_TOKEN";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug). When
/// file logging is enabled the returned guard must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    let log_dir = config
        .cache_dir()
        .ok()
        .filter(|_| config.log_to_file)
        .map(|dir| dir.join("logs"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", APP_NAME));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, commands::USAGE);
            std::process::exit(2);
        }
    };
    if let Command::Help = command {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config ({}), using defaults", e);
            Config::default()
        }
    };
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "repo-history starting");

    let cache_dir = config.cache_dir()?;
    let session = Arc::new(Session::new(cache_dir.clone()));
    if let Err(e) = session.load() {
        warn!(error = %e, "Failed to load saved session");
    }
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            session.update(SessionData::new(token, None));
        }
    }

    let mut api = ApiClient::new(&config.api_base_url)?;
    if let Some(token) = session.token() {
        api.set_token(token);
    }

    let store = HistoryStore::new(
        Arc::new(FileStorage::new(cache_dir)?),
        Arc::new(api),
        session.clone(),
        CapacityGovernor::new(config.max_entries),
    );

    let result = commands::run(command, &store, &session).await;

    // Give queued changes a chance to reach the backend before exiting
    store.flush().await;
    info!("repo-history shutting down");
    result
}
