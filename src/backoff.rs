//! Backoff strategies: how long to wait before retrying a failed attempt.
//!
//! Strategies are consulted in order by [`RetryPolicy::backoff_time`](crate::RetryPolicy::backoff_time)
//! and the first one with an opinion wins. Returning `None` means "no opinion",
//! which lets header-driven strategies sit in front of a fixed fallback:
//!
//! ```
//! use rebound::BackoffStrategy;
//! use http::HeaderName;
//! use std::time::Duration;
//!
//! let strategies = vec![
//!     // Honour the server's hint when it sends one...
//!     BackoffStrategy::WaitTimeFromHeader {
//!         header: HeaderName::from_static("retry-after"),
//!         regex: None,
//!         max_wait: Some(Duration::from_secs(120)),
//!     },
//!     // ...and fall back to 100ms, 200ms, 400ms, ... otherwise.
//!     BackoffStrategy::Exponential {
//!         factor: Duration::from_millis(100),
//!         max_delay: Some(Duration::from_secs(30)),
//!         jitter: true,
//!     },
//! ];
//! # let _ = strategies;
//! ```

use crate::rate_limit::{header_epoch, header_wait, RateLimitInfo};
use crate::{Error, Outcome, Result};
use http::HeaderName;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use std::time::{Duration, SystemTime};

/// Factor of the default exponential strategy.
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_secs(5);

/// Cap applied by [`BackoffStrategy::RateLimitHeaders`] when none is configured.
pub const DEFAULT_RATE_LIMIT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Computes the delay before the next attempt.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// Wait `factor * 2^(attempt - 1)`.
    ///
    /// The delay is capped at `max_delay` when set. With `jitter`, it is then
    /// scaled by a random factor between 50% and 100%.
    Exponential {
        /// The delay before the first retry.
        factor: Duration,
        /// Upper bound on a single delay.
        max_delay: Option<Duration>,
        /// Whether to randomize delays.
        jitter: bool,
    },

    /// Wait the same amount before every retry.
    Constant {
        /// The delay between attempts.
        delay: Duration,
    },

    /// Wait as long as a response header says.
    ///
    /// The header holds delay-seconds or an HTTP date. Outcomes without the
    /// header get no opinion.
    WaitTimeFromHeader {
        /// Header to read.
        header: HeaderName,
        /// Extracts the number from a larger header value.
        regex: Option<Regex>,
        /// Longest wait honoured; longer hints are capped.
        max_wait: Option<Duration>,
    },

    /// Wait until the Unix timestamp held by a response header.
    WaitUntilTimeFromHeader {
        /// Header to read.
        header: HeaderName,
        /// Extracts the timestamp from a larger header value.
        regex: Option<Regex>,
        /// Shortest wait returned when the header is present.
        min_wait: Option<Duration>,
    },

    /// Wait according to `Retry-After` or the rate limit reset headers.
    RateLimitHeaders {
        /// Longest wait honoured.
        max_wait: Duration,
    },

    /// Custom backoff logic.
    ///
    /// Takes the failed outcome and the attempt number (1-indexed).
    Custom {
        /// Function that determines the delay.
        backoff_fn: fn(&Outcome, u32) -> Option<Duration>,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: None,
            jitter: false,
        }
    }
}

impl BackoffStrategy {
    /// Returns the delay before retrying after `outcome`, or `None` if this
    /// strategy has no opinion.
    ///
    /// `attempt` is 1-indexed; `0` is treated as `1`. `Some(Duration::ZERO)`
    /// means "retry immediately".
    pub fn backoff_time(&self, outcome: &Outcome, attempt: u32) -> Option<Duration> {
        let attempt = attempt.max(1);

        match self {
            BackoffStrategy::Exponential {
                factor,
                max_delay,
                jitter,
            } => {
                // factor * 2^(attempt - 1), saturating
                let multiplier = 2u64.saturating_pow(attempt - 1);
                let mut delay = factor.saturating_mul(multiplier.try_into().unwrap_or(u32::MAX));
                if let Some(max_delay) = max_delay {
                    delay = delay.min(*max_delay);
                }

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..1.0);
                    Some(
                        Duration::try_from_secs_f64(delay.as_secs_f64() * jitter_factor)
                            .unwrap_or(delay),
                    )
                } else {
                    Some(delay)
                }
            }
            BackoffStrategy::Constant { delay } => Some(*delay),
            BackoffStrategy::WaitTimeFromHeader {
                header,
                regex,
                max_wait,
            } => {
                let wait = header_wait(outcome.headers()?, header.as_str(), regex.as_ref())?;
                match max_wait {
                    Some(max_wait) if wait > *max_wait => {
                        tracing::warn!(
                            header = %header,
                            requested_ms = wait.as_millis(),
                            max_wait_ms = max_wait.as_millis(),
                            "Server requested a wait longer than allowed - capping"
                        );
                        Some(*max_wait)
                    }
                    _ => Some(wait),
                }
            }
            BackoffStrategy::WaitUntilTimeFromHeader {
                header,
                regex,
                min_wait,
            } => {
                let until = header_epoch(outcome.headers()?, header.as_str(), regex.as_ref())?;
                let wait = until
                    .duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO);
                Some(wait.max(min_wait.unwrap_or(Duration::ZERO)))
            }
            BackoffStrategy::RateLimitHeaders { max_wait } => {
                RateLimitInfo::from_headers(outcome.headers()?).delay(*max_wait)
            }
            BackoffStrategy::Custom { backoff_fn } => backoff_fn(outcome, attempt),
        }
    }

    /// Builds a strategy from its declarative form.
    ///
    /// # Errors
    ///
    /// Fails on negative or non-finite durations, invalid header names and
    /// regexes that do not compile.
    pub fn from_config(config: &BackoffConfig) -> Result<Self> {
        let strategy = match config {
            BackoffConfig::Exponential {
                factor,
                max_delay,
                jitter,
            } => BackoffStrategy::Exponential {
                factor: seconds("factor", *factor)?,
                max_delay: max_delay.map(|v| seconds("max_delay", v)).transpose()?,
                jitter: *jitter,
            },
            BackoffConfig::Constant {
                backoff_time_in_seconds,
            } => BackoffStrategy::Constant {
                delay: seconds("backoff_time_in_seconds", *backoff_time_in_seconds)?,
            },
            BackoffConfig::WaitTimeFromHeader {
                header,
                regex,
                max_waiting_time_in_seconds,
            } => BackoffStrategy::WaitTimeFromHeader {
                header: header_name(header)?,
                regex: regex.as_deref().map(Regex::new).transpose()?,
                max_wait: max_waiting_time_in_seconds
                    .map(|v| seconds("max_waiting_time_in_seconds", v))
                    .transpose()?,
            },
            BackoffConfig::WaitUntilTimeFromHeader {
                header,
                regex,
                min_wait,
            } => BackoffStrategy::WaitUntilTimeFromHeader {
                header: header_name(header)?,
                regex: regex.as_deref().map(Regex::new).transpose()?,
                min_wait: min_wait.map(|v| seconds("min_wait", v)).transpose()?,
            },
            BackoffConfig::RateLimitHeaders { max_wait } => BackoffStrategy::RateLimitHeaders {
                max_wait: seconds("max_wait", *max_wait)?,
            },
        };

        Ok(strategy)
    }
}

/// Declarative form of a [`BackoffStrategy`], tagged by `type`.
///
/// Durations are in seconds.
///
/// # Examples
///
/// ```
/// use rebound::BackoffConfig;
///
/// let config: BackoffConfig = serde_json::from_str(
///     r#"{ "type": "ConstantBackoff", "backoff_time_in_seconds": 5 }"#,
/// ).unwrap();
/// assert_eq!(config, BackoffConfig::Constant { backoff_time_in_seconds: 5.0 });
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum BackoffConfig {
    /// See [`BackoffStrategy::Exponential`].
    #[serde(rename = "ExponentialBackoff", alias = "ExponentialBackoffStrategy")]
    Exponential {
        /// Delay before the first retry.
        #[serde(default = "default_factor")]
        factor: f64,
        /// Upper bound on a single delay.
        #[serde(default)]
        max_delay: Option<f64>,
        /// Whether to randomize delays.
        #[serde(default)]
        jitter: bool,
    },

    /// See [`BackoffStrategy::Constant`].
    #[serde(rename = "ConstantBackoff", alias = "ConstantBackoffStrategy")]
    Constant {
        /// Delay between attempts.
        backoff_time_in_seconds: f64,
    },

    /// See [`BackoffStrategy::WaitTimeFromHeader`].
    #[serde(rename = "WaitTimeFromHeader", alias = "WaitTimeFromHeaderBackoffStrategy")]
    WaitTimeFromHeader {
        /// Header to read.
        header: String,
        /// Extracts the number from the header value.
        #[serde(default)]
        regex: Option<String>,
        /// Longest wait honoured.
        #[serde(default)]
        max_waiting_time_in_seconds: Option<f64>,
    },

    /// See [`BackoffStrategy::WaitUntilTimeFromHeader`].
    #[serde(
        rename = "WaitUntilTimeFromHeader",
        alias = "WaitUntilTimeFromHeaderBackoffStrategy"
    )]
    WaitUntilTimeFromHeader {
        /// Header to read.
        header: String,
        /// Extracts the timestamp from the header value.
        #[serde(default)]
        regex: Option<String>,
        /// Shortest wait returned.
        #[serde(default)]
        min_wait: Option<f64>,
    },

    /// See [`BackoffStrategy::RateLimitHeaders`].
    #[serde(rename = "RateLimitHeaders")]
    RateLimitHeaders {
        /// Longest wait honoured.
        #[serde(default = "default_rate_limit_max_wait")]
        max_wait: f64,
    },
}

fn default_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR.as_secs_f64()
}

fn default_rate_limit_max_wait() -> f64 {
    DEFAULT_RATE_LIMIT_MAX_WAIT.as_secs_f64()
}

pub(crate) fn seconds(field: &'static str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| Error::InvalidDuration { field, value })
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeaderName {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
