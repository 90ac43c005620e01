//! Static source registration table.
//!
//! Sources are registered explicitly at process start. Each event maps to an
//! ordered list of sources.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use super::EventSource;
use crate::errors::ConfigError;
use crate::models::{is_valid_raw_table, Marketplace, MarketplaceEvent};

/// Registration metadata of one source.
#[derive(Clone)]
pub struct RegisteredSource {
    pub event: MarketplaceEvent,
    pub marketplace: Marketplace,
    /// Position in the plan and in the enqueue order. Executions of one
    /// request still run concurrently, so a lower order does not mean the
    /// source finishes first. Sequencing across events goes through
    /// [`MarketplaceEvent::required_events`].
    pub order: i32,
    pub source_id: String,
    pub raw_table: String,
    pub fetcher: Arc<dyn EventSource>,
}

impl RegisteredSource {
    pub fn new(
        event: MarketplaceEvent,
        marketplace: Marketplace,
        order: i32,
        source_id: impl Into<String>,
        raw_table: impl Into<String>,
        fetcher: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            event,
            marketplace,
            order,
            source_id: source_id.into(),
            raw_table: raw_table.into(),
            fetcher,
        }
    }
}

impl fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("event", &self.event)
            .field("marketplace", &self.marketplace)
            .field("order", &self.order)
            .field("source_id", &self.source_id)
            .field("raw_table", &self.raw_table)
            .finish_non_exhaustive()
    }
}

/// Event to ordered sources.
#[derive(Default, Debug)]
pub struct SourceRegistry {
    sources: HashMap<MarketplaceEvent, Vec<RegisteredSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source, keeping the event's list sorted by `order`.
    ///
    /// Equal orders keep registration order. A second registration of the same
    /// `source_id` for an event is rejected.
    pub fn register(&mut self, source: RegisteredSource) -> Result<(), ConfigError> {
        if !is_valid_raw_table(&source.raw_table) {
            return Err(ConfigError::InvalidRawTable(source.raw_table));
        }
        let entries = self.sources.entry(source.event).or_default();
        if entries.iter().any(|s| s.source_id == source.source_id) {
            return Err(ConfigError::DuplicateSource {
                event: source.event,
                source_id: source.source_id,
            });
        }
        debug!(
            "Registered source {} for {} ({}, order {})",
            source.source_id, source.event, source.marketplace, source.order
        );
        entries.push(source);
        entries.sort_by_key(|s| s.order);
        Ok(())
    }

    /// Ordered sources of an event. An event without sources is a
    /// configuration error, never an empty plan.
    pub fn sources(&self, event: MarketplaceEvent) -> Result<&[RegisteredSource], ConfigError> {
        match self.sources.get(&event) {
            Some(list) if !list.is_empty() => Ok(list.as_slice()),
            _ => Err(ConfigError::NoSourcesForEvent(event)),
        }
    }

    pub fn find(&self, event: MarketplaceEvent, source_id: &str) -> Option<&RegisteredSource> {
        self.sources
            .get(&event)
            .and_then(|list| list.iter().find(|s| s.source_id == source_id))
    }

    /// Fails fast when any of `events` has no registered source.
    pub fn require(&self, events: &[MarketplaceEvent]) -> Result<(), ConfigError> {
        for event in events {
            self.sources(*event)?;
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<MarketplaceEvent> {
        let mut events: Vec<_> = self
            .sources
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(event, _)| *event)
            .collect();
        events.sort();
        events
    }

    /// Distinct raw tables across all registrations.
    pub fn raw_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .sources
            .values()
            .flatten()
            .map(|s| s.raw_table.clone())
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }
}
