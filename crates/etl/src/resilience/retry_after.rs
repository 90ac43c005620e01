//! Retry hint parsing from provider response headers.
//!
//! Priority: `X-Ratelimit-Retry`, then the reset headers (`X-Ratelimit-Reset`,
//! `RateLimit-Reset`, `RateLimit-Reset-After`), then `Retry-After`. Invalid
//! values are skipped; the result is never negative.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};

const X_RATELIMIT_RETRY: &str = "x-ratelimit-retry";
const RESET_HEADERS: [&str; 3] = ["x-ratelimit-reset", "ratelimit-reset", "ratelimit-reset-after"];

/// Integers at least this long in a reset header are epoch timestamps.
const EPOCH_SECONDS_MIN_DIGITS: usize = 10;
const EPOCH_MILLIS_MIN_DIGITS: usize = 12;

/// Extracts the retry delay the provider asked for, if any.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    header(headers, X_RATELIMIT_RETRY)
        .and_then(parse_delta_seconds)
        .or_else(|| {
            RESET_HEADERS
                .iter()
                .find_map(|name| header(headers, name))
                .and_then(|value| parse_reset(value, now))
        })
        .or_else(|| {
            header(headers, RETRY_AFTER.as_str())
                .and_then(|value| parse_delta_seconds(value).or_else(|| parse_http_date(value, now)))
        })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `"5"`, `"+10"`, `"0.4"` (ceil to whole seconds). Negative values are invalid.
pub(crate) fn parse_delta_seconds(value: &str) -> Option<Duration> {
    let digits = value.strip_prefix('+').unwrap_or(value);
    if digits.starts_with('-') {
        return None;
    }
    let seconds: f64 = digits.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs(seconds.ceil() as u64))
}

fn parse_reset(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let is_integer = value.bytes().all(|b| b.is_ascii_digit());
    if is_integer && value.len() >= EPOCH_SECONDS_MIN_DIGITS {
        let n: i64 = value.parse().ok()?;
        let when = if value.len() >= EPOCH_MILLIS_MIN_DIGITS {
            DateTime::<Utc>::from_timestamp_millis(n)?
        } else {
            DateTime::<Utc>::from_timestamp(n, 0)?
        };
        return Some(non_negative(when - now));
    }
    parse_delta_seconds(value)
}

fn parse_http_date(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some(non_negative(when - now))
}

fn non_negative(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
