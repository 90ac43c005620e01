//! Turns an orchestration command into an execution plan.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::errors::{ConfigError, EtlError, Result};
use crate::models::{ExecutionDescriptor, ExecutionPlan, Marketplace, OrchestrationCommand};
use crate::source::SourceRegistry;

/// Answers which marketplaces an account is currently connected to.
#[async_trait]
pub trait AccountConnections: Send + Sync {
    async fn active_marketplaces(&self, account_id: i64) -> Result<BTreeSet<Marketplace>>;
}

/// Fixed account connections, configured at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountConnections {
    accounts: HashMap<i64, BTreeSet<Marketplace>>,
    fallback: BTreeSet<Marketplace>,
}

impl StaticAccountConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every account is connected to the given marketplaces unless configured
    /// otherwise.
    pub fn all_connected_to(marketplaces: impl IntoIterator<Item = Marketplace>) -> Self {
        Self {
            accounts: HashMap::new(),
            fallback: marketplaces.into_iter().collect(),
        }
    }

    pub fn connect(mut self, account_id: i64, marketplace: Marketplace) -> Self {
        self.accounts.entry(account_id).or_default().insert(marketplace);
        self
    }
}

#[async_trait]
impl AccountConnections for StaticAccountConnections {
    async fn active_marketplaces(&self, account_id: i64) -> Result<BTreeSet<Marketplace>> {
        Ok(self
            .accounts
            .get(&account_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

pub struct ExecutionPlanFactory {
    sources: Arc<SourceRegistry>,
    connections: Arc<dyn AccountConnections>,
}

impl ExecutionPlanFactory {
    pub fn new(sources: Arc<SourceRegistry>, connections: Arc<dyn AccountConnections>) -> Self {
        Self {
            sources,
            connections,
        }
    }

    /// Builds one execution per registered source of the event whose
    /// marketplace is active for the account, in source order.
    pub async fn build(&self, command: &OrchestrationCommand) -> Result<ExecutionPlan> {
        let window = command.window()?;
        let registered = self.sources.sources(command.event)?;

        let active = self.connections.active_marketplaces(command.account_id).await?;
        if active.is_empty() {
            return Err(EtlError::InvalidArgument(format!(
                "Account {} has no active marketplace connections",
                command.account_id
            )));
        }

        let request_id = command.resolve_request_id();
        let executions: Vec<ExecutionDescriptor> = registered
            .iter()
            .filter(|source| active.contains(&source.marketplace))
            .map(|source| ExecutionDescriptor {
                request_id: request_id.clone(),
                account_id: command.account_id,
                event: command.event,
                window,
                marketplace: source.marketplace,
                source_id: source.source_id.clone(),
                raw_table: source.raw_table.clone(),
            })
            .collect();

        if executions.is_empty() {
            return Err(ConfigError::NoSourcesForEvent(command.event).into());
        }

        info!(
            "Planned request {} for account {} event {} ({}): {} executions",
            request_id,
            command.account_id,
            command.event,
            window,
            executions.len()
        );
        Ok(ExecutionPlan {
            request_id,
            account_id: command.account_id,
            event: command.event,
            window,
            executions,
        })
    }
}
