//! Background scheduler for periodic marketplace sync.
//!
//! Submits one command per configured account and event on a fixed interval,
//! covering yesterday and today.

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use marketsync_etl::{EtlOrchestrator, MarketplaceEvent, OrchestrationCommand};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Initial delay before the first sync, letting recovered work drain first.
const INITIAL_DELAY_SECS: u64 = 60;

/// Registry eviction runs this often.
const EVICTION_INTERVAL_SECS: u64 = 15 * 60;

/// Starts the periodic sync. Does nothing without accounts.
pub fn start_sync_scheduler(
    orchestrator: Arc<EtlOrchestrator>,
    account_ids: Vec<i64>,
    events: Vec<MarketplaceEvent>,
    period: Duration,
) {
    if account_ids.is_empty() || events.is_empty() {
        info!("Sync scheduler disabled: no accounts or events configured");
        return;
    }

    tokio::spawn(async move {
        info!(
            "Sync scheduler started ({}s interval, {} accounts, {} events)",
            period.as_secs(),
            account_ids.len(),
            events.len()
        );

        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;

        let mut sync_interval = interval(period);
        loop {
            sync_interval.tick().await;
            let today = Utc::now().date_naive();
            run_scheduled_sync(&orchestrator, scheduled_commands(&account_ids, &events, today)).await;
        }
    });
}

/// Starts periodic eviction of stale registry entries.
pub fn start_eviction(orchestrator: Arc<EtlOrchestrator>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(EVICTION_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let evicted = orchestrator.evict_expired();
            if evicted > 0 {
                info!("Evicted {} stale event requests", evicted);
            }
        }
    });
}

/// One command per account and event for the window `[today - 1, today]`.
pub fn scheduled_commands(
    account_ids: &[i64],
    events: &[MarketplaceEvent],
    today: NaiveDate,
) -> Vec<OrchestrationCommand> {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    account_ids
        .iter()
        .flat_map(|account_id| {
            events
                .iter()
                .map(move |event| OrchestrationCommand::new(*account_id, *event, yesterday, today))
        })
        .collect()
}

async fn run_scheduled_sync(orchestrator: &Arc<EtlOrchestrator>, commands: Vec<OrchestrationCommand>) {
    info!("Running scheduled sync: {} commands", commands.len());
    for command in commands {
        let (account_id, event) = (command.account_id, command.event);
        match orchestrator.submit(command).await {
            Ok(request_id) => debug!(
                "Scheduled {} for account {} as {}",
                event, account_id, request_id
            ),
            Err(e) => warn!(
                "Scheduled {} for account {} was rejected: {}",
                event, account_id, e
            ),
        }
    }
}
