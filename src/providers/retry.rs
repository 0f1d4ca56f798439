use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
}

pub(crate) fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status.as_u16() == 529
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Exponential rate-limit backoff: `base`, `2*base`, `4*base`, ... for attempts 1, 2, 3.
pub(crate) fn rate_limit_delay(base: Duration, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let shift = attempt.saturating_sub(1).min(16) as u32;
    let delay = base.saturating_mul(1u32 << shift);
    match retry_after {
        Some(retry_after) if retry_after > delay => retry_after,
        _ => delay,
    }
}
