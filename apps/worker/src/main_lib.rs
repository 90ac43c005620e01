use std::sync::Arc;

use marketsync_etl::orchestrator::StaticAccountConnections;
use marketsync_etl::sinks::LoggingMaterializer;
use marketsync_etl::{EtlOrchestrator, MarketplaceEvent, OrchestratorDeps, RawStore, SourceRegistry};
use marketsync_storage_sqlite::{db, SqliteAuditSink, SqliteExecutionStateStore, SqliteRawStore};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::sources::wire_sources;

pub fn init_tracing() {
    let log_format = std::env::var("MS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// A built, not yet started, orchestrator and the events the scheduler syncs.
pub struct Worker {
    pub orchestrator: Arc<EtlOrchestrator>,
    pub sync_events: Vec<MarketplaceEvent>,
}

/// Configured sync events, each of which must have sources, or every wired
/// event when none are configured.
pub fn resolve_sync_events(
    configured: Option<&[MarketplaceEvent]>,
    sources: &SourceRegistry,
) -> anyhow::Result<Vec<MarketplaceEvent>> {
    match configured {
        Some(events) => {
            sources.require(events)?;
            Ok(events.to_vec())
        }
        None => Ok(sources.events()),
    }
}

/// Opens the database, wires the sources and builds the orchestrator.
/// Nothing is started yet.
///
/// Fails when a configured sync event has no registered source.
pub async fn build_orchestrator(config: &Config) -> anyhow::Result<Worker> {
    let etl_config = config.etl_config()?;
    if etl_config.marketplaces.is_empty() {
        tracing::warn!("No marketplaces configured; every command will fail to plan");
    }

    let (pool, writer) = db::open(&config.db_path)?;
    tracing::info!("Database path in use: {}", config.db_path);

    let raw_store: Arc<dyn RawStore> = Arc::new(SqliteRawStore::new(pool.clone()));
    let wiring = wire_sources(&etl_config, raw_store.clone())?;
    let sync_events = resolve_sync_events(config.sync_events.as_deref(), &wiring.sources)?;

    let connections = StaticAccountConnections::all_connected_to(
        etl_config.marketplaces.keys().copied(),
    );

    let deps = OrchestratorDeps {
        sources: Arc::new(wiring.sources),
        connections: Arc::new(connections),
        dispatcher: Arc::new(wiring.dispatcher),
        layouts: Arc::new(wiring.layouts),
        raw_store,
        state_store: Arc::new(SqliteExecutionStateStore::new(pool.clone(), writer.clone())),
        materializer: Arc::new(LoggingMaterializer),
        audit: Arc::new(SqliteAuditSink::new(pool, writer)),
    };
    let orchestrator = EtlOrchestrator::new(etl_config, deps)?;
    Ok(Worker {
        orchestrator,
        sync_events,
    })
}
