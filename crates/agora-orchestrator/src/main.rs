//! Agora node
//!
//! Runs the orchestrator behind the REST API with a background loop for
//! assignment, timeout sweeps, the reward backlog, and optional periodic
//! ranking cycles.

use std::sync::Arc;
use std::time::Duration;

use agora_orchestrator::{api, config::LoggingConfig, AgoraConfig, Orchestrator, RankingSchedule};
use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("AGORA_CONFIG").ok();
    let config = AgoraConfig::load(config_path.as_deref())?;
    init_tracing(&config.logging);

    info!(version = agora_common::VERSION, "Starting Agora node");
    info!(
        listen = %config.server.listen_addr,
        tick_ms = config.server.tick_interval_ms,
        ranking_secs = config.server.ranking_interval_secs,
        "Loaded configuration"
    );

    let orchestrator = Arc::new(Orchestrator::new(config.clone()).await?);

    let ticker = tokio::spawn(run_ticker(orchestrator.clone(), config.server.tick_interval_ms));
    let ranker = (config.server.ranking_interval_secs > 0)
        .then(|| tokio::spawn(run_ranking(orchestrator.clone(), config.server.ranking_interval_secs)));

    let app = api::router(orchestrator.clone(), &config.server);
    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    if let Some(ranker) = ranker {
        ranker.abort();
    }
    orchestrator.audit().flush();
    info!("Agora node stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run_ticker(orchestrator: Arc<Orchestrator>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let report = orchestrator.tick().await;
        if report.timed_out > 0 || report.rewards_reissued > 0 || report.venture_transitions > 0 {
            info!(
                timed_out = report.timed_out,
                assigned = report.assigned,
                rewards_reissued = report.rewards_reissued,
                ventures = report.venture_transitions,
                "Tick"
            );
        }
    }
}

async fn run_ranking(orchestrator: Arc<Orchestrator>, interval_secs: u64) {
    let mut schedule = RankingSchedule::new(interval_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // First tick fires immediately; skip it so a fresh node has data to rank
    interval.tick().await;
    loop {
        interval.tick().await;
        schedule.run_due(orchestrator.as_ref(), agora_common::now_millis()).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
