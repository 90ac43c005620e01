//! Worker configuration loaded from the environment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use marketsync_etl::{EtlConfig, Marketplace, MarketplaceConfig, MarketplaceEvent};

const DEFAULT_DB_PATH: &str = "./db/marketsync.db";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 4 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub marketplaces_file: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    /// Accounts the scheduler syncs. Empty disables the scheduler.
    pub account_ids: Vec<i64>,
    pub sync_interval: Duration,
    /// Events the scheduler syncs; `None` means every event with sources.
    pub sync_events: Option<Vec<MarketplaceEvent>>,
}

impl Config {
    /// Reads `MS_*` variables. `.env` is loaded by the caller beforehand.
    ///
    /// - `MS_DB_PATH`: SQLite file (default `./db/marketsync.db`)
    /// - `MS_MARKETPLACES_FILE`: JSON object keyed by marketplace
    /// - `MS_SNAPSHOT_DIR`, `MS_BATCH_SIZE`: engine overrides
    /// - `MS_ACCOUNT_IDS`: comma-separated account ids
    /// - `MS_SYNC_INTERVAL_SECS`: scheduler period (default 4h)
    /// - `MS_SYNC_EVENTS`: comma-separated events (default: every wired event)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let batch_size = var("MS_BATCH_SIZE")
            .map(|v| v.parse::<usize>().with_context(|| format!("MS_BATCH_SIZE: '{v}'")))
            .transpose()?;

        let sync_interval = var("MS_SYNC_INTERVAL_SECS")
            .map(|v| v.parse::<u64>().with_context(|| format!("MS_SYNC_INTERVAL_SECS: '{v}'")))
            .transpose()?
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        if sync_interval == 0 {
            return Err(anyhow!("MS_SYNC_INTERVAL_SECS must be positive"));
        }

        let account_ids = split_list(var("MS_ACCOUNT_IDS"))
            .map(|v| v.parse::<i64>().with_context(|| format!("MS_ACCOUNT_IDS: '{v}'")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let sync_events = var("MS_SYNC_EVENTS")
            .map(|raw| {
                split_list(Some(raw))
                    .map(|v| {
                        MarketplaceEvent::from_str(&v).map_err(|e| anyhow!("MS_SYNC_EVENTS: {e}"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()?;

        Ok(Self {
            db_path: var("MS_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            marketplaces_file: var("MS_MARKETPLACES_FILE").map(PathBuf::from),
            snapshot_dir: var("MS_SNAPSHOT_DIR").map(PathBuf::from),
            batch_size,
            account_ids,
            sync_interval: Duration::from_secs(sync_interval),
            sync_events,
        })
    }

    /// Builds the engine configuration, reading the marketplace file if set.
    pub fn etl_config(&self) -> anyhow::Result<EtlConfig> {
        let mut etl = EtlConfig::default();
        if let Some(path) = &self.marketplaces_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            etl.marketplaces = parse_marketplaces(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
        }
        if let Some(dir) = &self.snapshot_dir {
            etl.snapshot_dir = dir.clone();
        }
        if let Some(batch_size) = self.batch_size {
            etl.batch_size = batch_size;
        }
        etl.validate()?;
        Ok(etl)
    }
}

fn split_list(raw: Option<String>) -> impl Iterator<Item = String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .into_iter()
}

pub fn parse_marketplaces(raw: &str) -> anyhow::Result<BTreeMap<Marketplace, MarketplaceConfig>> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.db_path, DEFAULT_DB_PATH);
        assert!(config.account_ids.is_empty());
        assert_eq!(config.sync_interval, Duration::from_secs(14_400));
        assert!(config.sync_events.is_none());
        assert!(config.batch_size.is_none());
    }

    #[test]
    fn parses_lists_and_numbers() {
        let config = Config::from_lookup(lookup(&[
            ("MS_ACCOUNT_IDS", " 7, 12 ,,"),
            ("MS_SYNC_EVENTS", "SALES_FACT,FACT_FINANCE"),
            ("MS_SYNC_INTERVAL_SECS", "600"),
            ("MS_BATCH_SIZE", "250"),
        ]))
        .unwrap();
        assert_eq!(config.account_ids, vec![7, 12]);
        assert_eq!(
            config.sync_events,
            Some(vec![MarketplaceEvent::SalesFact, MarketplaceEvent::FactFinance])
        );
        assert_eq!(config.sync_interval, Duration::from_secs(600));
        assert_eq!(config.batch_size, Some(250));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("MS_ACCOUNT_IDS", "7,x")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MS_SYNC_EVENTS", "NOPE")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MS_SYNC_INTERVAL_SECS", "0")])).is_err());
    }

    #[test]
    fn builds_engine_config_from_marketplace_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("marketplaces.json");
        std::fs::write(
            &file,
            r#"{ "WILDBERRIES": { "baseUrl": "https://statistics-api.wildberries.ru", "apiKey": "k" } }"#,
        )
        .unwrap();

        let config = Config::from_lookup(lookup(&[
            ("MS_MARKETPLACES_FILE", file.to_str().unwrap()),
            ("MS_BATCH_SIZE", "100"),
        ]))
        .unwrap();
        let etl = config.etl_config().unwrap();
        assert_eq!(etl.batch_size, 100);
        assert!(etl.marketplace(Marketplace::Wildberries).is_ok());
        assert!(etl.marketplace(Marketplace::Ozon).is_err());
    }
}
