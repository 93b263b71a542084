//! Eventbook Demo
//!
//! Replays the reference reservation scenario against the configured backend
//! and prints each step as a JSON line:
//! - Two users fill a two-spot event, a third is turned away
//! - A cancellation frees a spot that the third user then takes
//! - Double cancel, double booking and admin self-reservation are rejected
//! - Capacity cannot shrink below the reserved spots but can grow
//!
//! # Usage
//!
//! ```bash
//! # In-process store, no cache
//! cargo run --bin demo
//!
//! # PostgreSQL + Redis
//! EVENTBOOK_STORAGE=postgres DATABASE_URL=postgres://... REDIS_URL=redis://... cargo run --bin demo
//! ```

use anyhow::Context;
use chrono::{Duration, Utc};
use eventbook::{Backend, Config, bootstrap, scenario};
use eventbook_core::store::ReservationStore;
use eventbook_runtime::ReservationService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eventbook=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(storage = ?config.storage, "Configuration loaded");

    let metrics = bootstrap::start_metrics(&config)?;

    match bootstrap::build(&config).await? {
        Backend::Memory(service) => replay(&service).await?,
        Backend::Postgres(service) => replay(&service).await?,
    }

    if let Some(rendered) = metrics.as_ref().and_then(|server| server.render()) {
        println!("\n{rendered}");
    }

    Ok(())
}

async fn replay<S: ReservationStore>(service: &ReservationService<S>) -> anyhow::Result<()> {
    let report = scenario::run(service, Utc::now() + Duration::days(30))
        .await
        .context("Reference scenario failed")?;

    println!("{}", serde_json::to_string(&report.event)?);
    for step in &report.steps {
        println!("{}", serde_json::to_string(step)?);
    }
    println!("{}", serde_json::to_string(&report.audit)?);

    anyhow::ensure!(
        report.audit.is_consistent(),
        "Ledger audit failed for event {}",
        report.audit.event_id
    );
    tracing::info!(event_id = %report.event.event_id, "Scenario complete");
    Ok(())
}
