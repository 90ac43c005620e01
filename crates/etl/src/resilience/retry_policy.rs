//! Retry decisions for failed executions.
//!
//! The policy is a pure function of the attempt number and the failure. It
//! never sleeps; the orchestrator schedules the next attempt with the returned
//! delay.

use std::time::Duration;

use rand::Rng;

use crate::config::ResilienceConfig;
use crate::errors::{EtlError, FailureClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    max_jitter: Duration,
    retry_after_fallback: Duration,
}

impl RetryPolicy {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
            max_jitter: config.max_jitter,
            retry_after_fallback: config.retry_after_fallback,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt number `attempt` (1-indexed) failed.
    ///
    /// - the last allowed attempt always gives up
    /// - throttling waits for the provider's hint, or the fallback, without growth
    /// - transient failures wait `base * 2^(attempt-1)` (capped) plus jitter
    /// - anything else gives up immediately
    pub fn decide(&self, attempt: u32, error: &EtlError) -> RetryDecision {
        self.decide_class(attempt, error.failure_class())
    }

    pub fn decide_class(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match class {
            FailureClass::RetryAfter(hint) => {
                RetryDecision::RetryAfter(hint.unwrap_or(self.retry_after_fallback))
            }
            FailureClass::Backoff => {
                RetryDecision::RetryAfter(self.exponential_backoff(attempt) + self.jitter())
            }
            FailureClass::Terminal => RetryDecision::GiveUp,
        }
    }

    fn exponential_backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&ResilienceConfig {
            limit_for_period: 10,
            max_concurrent_calls: 2,
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            max_jitter: Duration::from_millis(50),
            retry_after_fallback: Duration::from_secs(30),
        })
    }

    fn http(status: u16) -> EtlError {
        FetchError::http(status).into()
    }

    fn delay(decision: RetryDecision) -> Duration {
        match decision {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::GiveUp => panic!("expected a retry"),
        }
    }

    #[test]
    fn server_errors_back_off_exponentially_with_jitter() {
        let policy = policy();
        for (attempt, base_ms) in [(1u32, 100u64), (2, 200), (3, 400)] {
            let d = delay(policy.decide(attempt, &http(500)));
            assert!(d >= Duration::from_millis(base_ms), "attempt {attempt}: {d:?}");
            assert!(d <= Duration::from_millis(base_ms + 50), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn last_attempt_gives_up() {
        let policy = policy();
        assert_eq!(policy.decide(4, &http(500)), RetryDecision::GiveUp);
        assert_eq!(policy.decide(5, &http(429)), RetryDecision::GiveUp);
    }

    #[test]
    fn throttling_uses_hint_or_fallback_without_growth() {
        let policy = policy();
        let hinted: EtlError = FetchError::Http {
            status: 429,
            retry_after: Some(Duration::from_secs(5)),
            body: None,
        }
        .into();
        assert_eq!(
            policy.decide(1, &hinted),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(3, &hinted),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(2, &http(429)),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
    }

    #[test]
    fn exponential_part_is_capped() {
        let mut config = ResilienceConfig {
            max_attempts: 40,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            max_jitter: Duration::ZERO,
            ..ResilienceConfig::default()
        };
        let policy = RetryPolicy::new(&config);
        assert_eq!(
            policy.decide(10, &http(503)),
            RetryDecision::RetryAfter(Duration::from_millis(1_000))
        );
        assert_eq!(
            policy.decide(39, &http(503)),
            RetryDecision::RetryAfter(Duration::from_millis(1_000))
        );

        config.max_attempts = 2;
        assert_eq!(RetryPolicy::new(&config).decide(2, &http(503)), RetryDecision::GiveUp);
    }

    #[test]
    fn terminal_failures_never_retry() {
        let policy = policy();
        assert_eq!(policy.decide(1, &http(404)), RetryDecision::GiveUp);
        assert_eq!(
            policy.decide(1, &EtlError::Snapshot("corrupt".into())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn transport_failures_back_off() {
        let policy = policy();
        let err: EtlError = FetchError::Transport("connection reset".into()).into();
        let d = delay(policy.decide(1, &err));
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
    }
}
