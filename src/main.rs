//! Positive-news pipeline service: binary entrypoint.
//! Loads config and tables, spawns the batch scheduler, serves the Axum router.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dobre_zpravy::ingest::scheduler::spawn_scheduler;
use dobre_zpravy::metrics::Metrics;
use dobre_zpravy::moderation::policy::start_hot_reload_thread;
use dobre_zpravy::{router, AppConfig, Pipeline};

/// `LOG_FORMAT=json` for machine logs, compact otherwise. Filter from `RUST_LOG`, default info.
/// The runtime may already have installed a subscriber; then ours is skipped.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    let metrics = Metrics::init(cfg.batch_size)?;
    let pipeline = Pipeline::build(&cfg)?;

    start_hot_reload_thread(pipeline.policy.clone(), pipeline.policy_path.clone());

    if cfg.scheduler_enabled {
        spawn_scheduler(pipeline.scheduler.clone(), cfg.interval());
        tracing::info!(
            target: "scheduler",
            interval_secs = cfg.interval_secs,
            "scheduler started"
        );
    }

    let app = router(pipeline.app_state(&cfg)).merge(metrics.router());

    Ok(app.into())
}
