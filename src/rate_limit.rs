//! Backoff helpers for provider retries.
//!
//! Shared by the AI extractor (rate limits, timeouts) and the text
//! extraction retry loop (transient OCR failures).

use std::time::Duration;

/// Upper bound for any single wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_BACKOFF))
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

/// Wait for a provider-suggested delay, or exponential backoff without one.
pub fn retry_wait(attempt: u32, base_ms: u64, retry_after: Option<Duration>) -> Duration {
    retry_after
        .map(|d| d.min(MAX_BACKOFF))
        .unwrap_or_else(|| backoff_delay(attempt, base_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0, 500), Duration::from_millis(500));
        assert_eq!(backoff_delay(1, 500), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, 500), Duration::from_millis(4000));
        assert_eq!(backoff_delay(20, 500), MAX_BACKOFF);
        assert_eq!(backoff_delay(80, 500), MAX_BACKOFF);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("600")), Some(MAX_BACKOFF));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_retry_wait_prefers_provider_hint() {
        assert_eq!(
            retry_wait(4, 500, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(retry_wait(1, 100, None), Duration::from_millis(200));
    }
}
