use std::time::Duration;

/// Classification for retry policy.
///
/// | Class | Retried? | Delay |
/// |-------|----------|-------|
/// | `RetryAfter` | Yes | server hint, else configured fallback |
/// | `Backoff` | Yes | exponential backoff plus jitter |
/// | `Terminal` | No | - |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// The provider throttled us (HTTP 429 or an explicit backoff signal).
    /// Carries the parsed retry hint when one was present.
    RetryAfter(Option<Duration>),

    /// Transient failure: 5xx, 408, 425, transport errors, local guard rejections.
    Backoff,

    /// Retrying won't help.
    Terminal,
}
