mod command;
mod config;
mod db;
mod error;
mod reading;
mod web;

use anyhow::{Context, Result};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "canopy_hub=info".into()),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "hub.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.db_url).await?;
    db.migrate().await?;

    let mode = db.get_mode().await?;
    let pending = db.pending_count().await?;
    info!(db = %cfg.db_url, %mode, pending, "store ready");
    if pending > 0 {
        warn!(pending, "commands are waiting for the device to poll");
    }

    // ── Web server ──────────────────────────────────────────────────
    let state = AppState {
        db,
        limits: cfg.limits,
    };

    tokio::select! {
        res = web::serve(state, &cfg) => res.context("hub stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}
