//! Reading server-supplied wait hints from response headers.
//!
//! Servers announce how long a client should back off in a handful of ways:
//! `Retry-After` (delay-seconds or an HTTP date), `X-RateLimit-Reset` /
//! `RateLimit-Reset` (Unix timestamps), or a custom header whose value has to be
//! dug out with a regex. The header-driven backoff strategies are built on the
//! helpers in this module.

use http::HeaderMap;
use regex::Regex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Rate limit hints extracted from the well-known headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// When the rate limit window resets (`X-RateLimit-Reset` or `RateLimit-Reset`).
    pub reset_at: Option<SystemTime>,

    /// How long to wait before retrying (`Retry-After`).
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Extracts rate limit hints from response headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use rebound::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert!(info.retry_after.is_some());
    /// assert_eq!(info.delay(Duration::from_secs(30)), Some(Duration::from_secs(30)));
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            reset_at: header_epoch(headers, "x-ratelimit-reset", None)
                .or_else(|| header_epoch(headers, "ratelimit-reset", None)),
            retry_after: header_wait(headers, "retry-after", None),
        }
    }

    /// Returns the recommended delay, capped at `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp. Returns `None` when neither
    /// is present or the reset time is already in the past.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }

        let until_reset = self.reset_at?.duration_since(SystemTime::now()).ok()?;
        Some(until_reset.min(max_wait))
    }
}

/// Reads a wait duration from `name`.
///
/// The value may be delay-seconds (fractions allowed) or an HTTP date. When
/// `regex` is given, the number is taken from its first capture group, or from
/// the whole match if the regex has no groups.
pub fn header_wait(headers: &HeaderMap, name: &str, regex: Option<&Regex>) -> Option<Duration> {
    let raw = header_text(headers, name)?;
    let value = extract(raw, regex)?;

    if let Some(seconds) = parse_seconds(value) {
        return Some(Duration::from_secs_f64(seconds));
    }

    let date = httpdate::parse_http_date(value).ok()?;
    Some(
        date.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

/// Reads a Unix timestamp (seconds, fractions allowed) from `name`.
pub fn header_epoch(headers: &HeaderMap, name: &str, regex: Option<&Regex>) -> Option<SystemTime> {
    let raw = header_text(headers, name)?;
    let seconds = parse_seconds(extract(raw, regex)?)?;
    UNIX_EPOCH.checked_add(Duration::from_secs_f64(seconds))
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn extract<'a>(raw: &'a str, regex: Option<&Regex>) -> Option<&'a str> {
    let Some(regex) = regex else {
        return Some(raw.trim());
    };
    let captures = regex.captures(raw)?;
    captures
        .get(1)
        .or_else(|| captures.get(0))
        .map(|m| m.as_str().trim())
}

fn parse_seconds(value: &str) -> Option<f64> {
    let seconds = value.parse::<f64>().ok()?;
    (seconds.is_finite() && seconds >= 0.0 && seconds < u64::MAX as f64).then_some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_header_wait_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));
        assert_eq!(
            header_wait(&headers, "retry-after", None),
            Some(Duration::from_secs(60))
        );

        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(
            header_wait(&headers, "retry-after", None),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_header_wait_http_date() {
        let mut headers = HeaderMap::new();
        let future = SystemTime::now() + Duration::from_secs(30);
        headers.insert(
            "retry-after",
            HeaderValue::from_str(&httpdate::fmt_http_date(future)).unwrap(),
        );

        let wait = header_wait(&headers, "retry-after", None).unwrap();
        assert!(
            wait >= Duration::from_secs(28) && wait <= Duration::from_secs(30),
            "unexpected wait {:?}",
            wait
        );
    }

    #[test]
    fn test_header_wait_with_regex() {
        let mut headers = HeaderMap::new();
        headers.insert("x-wait", HeaderValue::from_static("wait=12s;scope=global"));
        let regex = Regex::new(r"wait=([\d.]+)s").unwrap();

        assert_eq!(
            header_wait(&headers, "x-wait", Some(&regex)),
            Some(Duration::from_secs(12))
        );
        assert_eq!(header_wait(&headers, "x-wait", None), None);
    }

    #[test]
    fn test_header_wait_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("-5"));
        assert_eq!(header_wait(&headers, "retry-after", None), None);

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(header_wait(&headers, "retry-after", None), None);

        assert_eq!(header_wait(&HeaderMap::new(), "retry-after", None), None);
    }

    #[test]
    fn test_header_epoch() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        assert_eq!(
            header_epoch(&headers, "x-ratelimit-reset", None),
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[test]
    fn test_rate_limit_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(info.reset_at, None);
    }

    #[test]
    fn test_rate_limit_info_falls_back_to_reset() {
        let mut headers = HeaderMap::new();
        let reset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 120;
        headers.insert(
            "ratelimit-reset",
            HeaderValue::from_str(&reset.to_string()).unwrap(),
        );

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.retry_after, None);
        let delay = info.delay(Duration::from_secs(300)).unwrap();
        assert!(delay > Duration::from_secs(100) && delay <= Duration::from_secs(120));
    }

    #[test]
    fn test_rate_limit_delay_capped_by_max_wait() {
        let info = RateLimitInfo {
            reset_at: None,
            retry_after: Some(Duration::from_secs(600)),
        };

        assert_eq!(
            info.delay(Duration::from_secs(300)),
            Some(Duration::from_secs(300))
        );
    }
}
