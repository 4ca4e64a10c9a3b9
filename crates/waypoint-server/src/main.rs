use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use waypoint_core::rate_limit::{RateLimitConfig, RateLimiter};
use waypoint_core::registry::{ConnectionRegistry, RegistryConfig};
use waypoint_core::{AppConfig, AppState};

mod cli;
mod config;

const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("waypoint=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_sqlite_dir(&config.database.url);

    let engine = waypoint_db::detect_database_engine(&config.database.url)?;
    let db = waypoint_db::create_pool(&config.database.url, config.database.max_connections).await?;
    waypoint_db::run_migrations(&db, engine).await?;
    tracing::info!(engine = engine.as_str(), "database ready");

    let registry = ConnectionRegistry::new(RegistryConfig {
        per_send_timeout: Duration::from_millis(config.chat.send_timeout_ms),
        reaper_interval: Duration::from_secs(config.chat.reaper_interval_secs),
        stale_after: Duration::from_secs(config.chat.stale_after_secs),
    });
    let limiter = Arc::new(RateLimiter::new(
        RateLimitConfig {
            limit: config.chat.dm_request_limit,
            window: Duration::from_secs(config.chat.dm_request_window_secs),
        },
        RateLimitConfig {
            limit: config.chat.dm_message_limit,
            window: Duration::from_secs(config.chat.dm_message_window_secs),
        },
    ));

    let state = AppState::new(
        db,
        Arc::clone(&registry),
        Arc::clone(&limiter),
        AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            jwt_expiry_seconds: config.auth.jwt_expiry_seconds,
            place_chat_window_hours: config.chat.place_chat_window_hours,
            typing_ttl_secs: config.chat.typing_ttl_secs,
        },
    );

    // keep idle rate-limit windows from accumulating
    let sweep_limiter = Arc::clone(&limiter);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        interval.tick().await; // skip immediate first tick
        loop {
            interval.tick().await;
            sweep_limiter.retain_active();
        }
    });

    let app = waypoint_api::api_router()
        .merge(waypoint_ws::chat_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(bind_address = %config.server.bind_address, "waypoint listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("shutdown signal error: {err}");
            }
            tracing::info!("shutting down");
        })
        .await?;

    registry.shutdown().await;
    Ok(())
}

/// Create the parent directory for a sqlite database file so first runs
/// succeed without manual setup.
fn ensure_sqlite_dir(database_url: &str) {
    if let Some(db_path) = database_url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    tracing::warn!("could not create directory {parent:?}: {err}");
                }
            }
        }
    }
}
