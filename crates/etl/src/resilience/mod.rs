//! Rate limiting, bulkheads and retry decisions per marketplace.

mod bulkhead;
mod factory;
mod rate_limiter;
mod retry_after;
mod retry_policy;

pub use bulkhead::{Bulkhead, BulkheadPermit, DEFAULT_BULKHEAD_WAIT};
pub use factory::{MarketplaceGuards, ResilienceFactory};
pub use rate_limiter::{RateLimiter, DEFAULT_ACQUIRE_TIMEOUT, LIMIT_REFRESH_PERIOD};
pub use retry_after::parse_retry_after;
pub use retry_policy::{RetryDecision, RetryPolicy};
