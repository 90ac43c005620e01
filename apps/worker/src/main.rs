mod config;
mod intake;
mod main_lib;
mod scheduler;
mod sources;

use config::Config;
use main_lib::{build_orchestrator, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing();

    let worker = build_orchestrator(&config).await?;
    let orchestrator = worker.orchestrator;

    // Recovered executions are queued before the dispatch loop starts.
    let recovered = orchestrator.recover().await?;
    if recovered > 0 {
        tracing::info!("Recovered {} unfinished executions", recovered);
    }
    let dispatch = orchestrator.start()?;

    scheduler::start_sync_scheduler(
        orchestrator.clone(),
        config.account_ids.clone(),
        worker.sync_events,
        config.sync_interval,
    );
    scheduler::start_eviction(orchestrator.clone());
    intake::start_stdin_intake(orchestrator.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down; {} requests still running", orchestrator.running_requests());
    dispatch.abort();
    Ok(())
}
