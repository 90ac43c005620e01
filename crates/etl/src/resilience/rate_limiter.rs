//! Fixed-window rate limiter for a single marketplace.
//!
//! Every refresh period (one second) the limiter grants `limit_for_period`
//! permits. A caller that finds no permit waits for the next period, but only
//! up to the acquire timeout; if the next refresh is further away than the
//! remaining wait budget the call is rejected immediately.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::errors::FetchError;
use crate::models::Marketplace;

/// Permit refresh period.
pub const LIMIT_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// How long `acquire` may wait for a permit before failing.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Window {
    /// Start of the current refresh period.
    started_at: Instant,
    /// Permits left in the current period.
    permits: u32,
}

impl Window {
    fn refresh(&mut self, limit: u32, period: Duration) {
        let elapsed = self.started_at.elapsed();
        if elapsed >= period {
            let periods = (elapsed.as_nanos() / period.as_nanos()) as u32;
            self.started_at += period * periods;
            self.permits = limit;
        }
    }

    fn time_until_refresh(&self, period: Duration) -> Duration {
        period.saturating_sub(self.started_at.elapsed())
    }
}

/// Rate limiter shared by every call to one marketplace.
#[derive(Debug)]
pub struct RateLimiter {
    marketplace: Marketplace,
    limit_for_period: u32,
    period: Duration,
    acquire_timeout: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(marketplace: Marketplace, limit_for_period: u32) -> Self {
        Self::with_timing(
            marketplace,
            limit_for_period,
            LIMIT_REFRESH_PERIOD,
            DEFAULT_ACQUIRE_TIMEOUT,
        )
    }

    pub fn with_timing(
        marketplace: Marketplace,
        limit_for_period: u32,
        period: Duration,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            marketplace,
            limit_for_period,
            period,
            acquire_timeout,
            window: Mutex::new(Window {
                started_at: Instant::now(),
                permits: limit_for_period,
            }),
        }
    }

    /// Lock the window, recovering from poison if necessary.
    ///
    /// The worst case after recovery is a slightly wrong permit count.
    fn lock_window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| {
            warn!(
                "Rate limiter for {} was poisoned, recovering",
                self.marketplace
            );
            poisoned.into_inner()
        })
    }

    /// Takes a permit without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.lock_window();
        window.refresh(self.limit_for_period, self.period);
        if window.permits > 0 {
            window.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Takes a permit, waiting for the next refresh period when needed.
    ///
    /// Fails with [`FetchError::RateLimited`] when no permit can be obtained
    /// within the acquire timeout.
    pub async fn acquire(&self) -> Result<(), FetchError> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            let wait = {
                let mut window = self.lock_window();
                window.refresh(self.limit_for_period, self.period);
                if window.permits > 0 {
                    window.permits -= 1;
                    return Ok(());
                }
                window.time_until_refresh(self.period)
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait > remaining {
                debug!(
                    "Rate limiter for {}: next permit in {:?}, budget {:?}",
                    self.marketplace, wait, remaining
                );
                return Err(FetchError::RateLimited(self.marketplace));
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Permits left in the current period.
    pub fn available_permits(&self) -> u32 {
        let mut window = self.lock_window();
        window.refresh(self.limit_for_period, self.period);
        window.permits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_limit_per_period() {
        let limiter = RateLimiter::new(Marketplace::Ozon, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available_permits(), 0);
    }

    #[test]
    fn refills_after_period() {
        let limiter = RateLimiter::new(Marketplace::Ozon, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        limiter.lock_window().started_at = Instant::now() - Duration::from_millis(2_500);
        assert_eq!(limiter.available_permits(), 1);
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_rejects_when_refresh_is_beyond_timeout() {
        let limiter = RateLimiter::with_timing(
            Marketplace::Wildberries,
            1,
            Duration::from_secs(1),
            Duration::from_millis(20),
        );
        limiter.acquire().await.unwrap();

        let started = Instant::now();
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(Marketplace::Wildberries)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn acquire_waits_for_next_period() {
        let limiter = RateLimiter::with_timing(
            Marketplace::Wildberries,
            1,
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        limiter.acquire().await.unwrap();

        let started = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
