//! Per-marketplace guard construction.
//!
//! Guards are built lazily from configuration on first use and then shared by
//! every request to the same marketplace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};

use super::{Bulkhead, RateLimiter, RetryPolicy};
use crate::config::EtlConfig;
use crate::errors::ConfigError;
use crate::models::Marketplace;

/// The guards protecting one marketplace.
#[derive(Debug)]
pub struct MarketplaceGuards {
    pub rate_limiter: RateLimiter,
    pub bulkhead: Bulkhead,
    pub retry_policy: RetryPolicy,
}

pub struct ResilienceFactory {
    config: Arc<EtlConfig>,
    guards: Mutex<HashMap<Marketplace, Arc<MarketplaceGuards>>>,
}

impl ResilienceFactory {
    pub fn new(config: Arc<EtlConfig>) -> Self {
        Self {
            config,
            guards: Mutex::new(HashMap::new()),
        }
    }

    fn lock_guards(&self) -> MutexGuard<'_, HashMap<Marketplace, Arc<MarketplaceGuards>>> {
        self.guards.lock().unwrap_or_else(|poisoned| {
            warn!("Resilience factory mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Returns the shared guards of a marketplace, building them on first use.
    pub fn guards(&self, marketplace: Marketplace) -> Result<Arc<MarketplaceGuards>, ConfigError> {
        let mut guards = self.lock_guards();
        if let Some(existing) = guards.get(&marketplace) {
            return Ok(Arc::clone(existing));
        }

        let config = self.config.marketplace(marketplace)?;
        config.validate(marketplace)?;
        let resilience = &config.resilience;
        info!(
            "Building resilience guards for {}: {} permits/s, {} concurrent calls, {} attempts",
            marketplace,
            resilience.limit_for_period,
            resilience.max_concurrent_calls,
            resilience.max_attempts
        );

        let built = Arc::new(MarketplaceGuards {
            rate_limiter: RateLimiter::new(marketplace, resilience.limit_for_period),
            bulkhead: Bulkhead::new(marketplace, resilience.max_concurrent_calls),
            retry_policy: RetryPolicy::new(resilience),
        });
        guards.insert(marketplace, Arc::clone(&built));
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketplaceConfig;

    #[test]
    fn guards_are_cached_per_marketplace() {
        let mut config = EtlConfig::default();
        config
            .marketplaces
            .insert(Marketplace::Ozon, MarketplaceConfig::new("https://ozon.test"));
        let factory = ResilienceFactory::new(Arc::new(config));

        let first = factory.guards(Marketplace::Ozon).unwrap();
        let second = factory.guards(Marketplace::Ozon).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.retry_policy.max_attempts(), 5);
    }

    #[test]
    fn missing_or_invalid_config_fails() {
        let mut config = EtlConfig::default();
        config
            .marketplaces
            .insert(Marketplace::Wildberries, MarketplaceConfig::new(""));
        let factory = ResilienceFactory::new(Arc::new(config));

        assert!(matches!(
            factory.guards(Marketplace::Ozon),
            Err(ConfigError::MarketplaceNotConfigured(Marketplace::Ozon))
        ));
        assert!(matches!(
            factory.guards(Marketplace::Wildberries),
            Err(ConfigError::BlankBaseUrl(Marketplace::Wildberries))
        ));
    }
}
