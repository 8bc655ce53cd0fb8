//! Overdue approval sweeper.
//!
//! Escalates every pending stock entry that has waited longer than its rule
//! allows and prints the sweep report as JSON. Meant to run from a scheduler.
use std::env;

use anyhow::Context;
use chrono::Utc;
use dotenvy::dotenv;
use stock_approval::{
    config::{AppConfig, CONFIG_ENV, load_config},
    types::Actor,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SWEEP_USER: &str = "Administrator";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenv().ok(); // env vars can also be set externally
    info!("Attempted to load .env file.");

    let app_config = match env::var(CONFIG_ENV) {
        Ok(path) => load_config(&path)
            .inspect_err(|e| error!("Failed to load configuration: {}", e))
            .with_context(|| format!("loading {path}"))?,
        Err(_) => {
            info!("{CONFIG_ENV} not set, using built-in defaults");
            AppConfig::default()
        }
    };

    let service = app_config
        .build_service()
        .inspect(|_| info!(path = ?app_config.storage.path, "Database opened."))
        .context("opening approval store")?;

    let actor = Actor::new(SWEEP_USER, &["System Manager"]);
    let report = service.escalate_overdue(&actor, Utc::now());
    service.store().flush()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
