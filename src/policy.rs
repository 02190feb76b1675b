//! The retry policy façade.
//!
//! [`RetryPolicy`] is the main entry point. The caller owns the retry loop and
//! consults the policy once per attempt:
//!
//! 1. [`interpret_response`](RetryPolicy::interpret_response) says what to do
//!    with the outcome.
//! 2. If that is [`Action::Retry`](crate::Action::Retry), [`backoff_time`](RetryPolicy::backoff_time)
//!    says how long to wait first.
//!
//! The policy never sleeps and never enforces [`max_retries`](RetryPolicy::max_retries)
//! or [`max_time`](RetryPolicy::max_time); it only reports them.

use crate::attempts::{AttemptTracker, DEFAULT_TRACKED_REQUESTS};
use crate::backoff::seconds;
use crate::{
    BackoffConfig, BackoffStrategy, ErrorClassifier, ErrorResolution, FilterConfig, Outcome,
    RequestId, ResponseFilter, Result,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries the caller should allow.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default total time the caller should spend retrying.
pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(600);

/// Classifies outcomes and computes backoff delays.
///
/// The policy is cheap to clone; clones share the same attempt bookkeeping, so
/// one policy can serve every in-flight request of a client.
///
/// # Examples
///
/// ```
/// use rebound::{Action, HttpResponse, Outcome, ResponseFilter, RetryPolicy};
/// use http::StatusCode;
///
/// let policy = RetryPolicy::builder()
///     .filter(ResponseFilter::new(Action::Ignore).http_codes([429]))
///     .filter(ResponseFilter::new(Action::Retry).http_codes([404]))
///     .build()?;
///
/// let throttled = Outcome::from(HttpResponse::new(StatusCode::TOO_MANY_REQUESTS, ""));
/// assert_eq!(policy.interpret_response(&throttled).action, Action::Ignore);
///
/// let broken = Outcome::from(HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, ""));
/// assert_eq!(policy.interpret_response(&broken).action, Action::Retry);
/// assert!(policy.backoff_time(&broken, 1).is_some());
/// # Ok::<(), rebound::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    inner: Arc<PolicyInner>,
}

#[derive(Debug)]
struct PolicyInner {
    classifier: ErrorClassifier,
    backoff_strategies: Vec<BackoffStrategy>,
    attempts: AttemptTracker,
    max_retries: u32,
    max_time: Duration,
}

impl RetryPolicy {
    /// Creates a new `RetryPolicyBuilder`.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Builds a policy from its declarative configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any filter or backoff strategy is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use rebound::{ErrorHandlerConfig, RetryPolicy};
    ///
    /// let config: ErrorHandlerConfig = serde_json::from_str(r#"{
    ///     "max_retries": 10,
    ///     "response_filters": [
    ///         { "http_codes": [404], "action": "IGNORE" },
    ///         { "predicate": "{{ 'code' in response }}", "action": "FAIL" }
    ///     ],
    ///     "backoff_strategies": [
    ///         { "type": "WaitTimeFromHeader", "header": "Retry-After" },
    ///         { "type": "ConstantBackoff", "backoff_time_in_seconds": 5 }
    ///     ]
    /// }"#).unwrap();
    ///
    /// let policy = RetryPolicy::from_config(&config)?;
    /// assert_eq!(policy.max_retries(), 10);
    /// # Ok::<(), rebound::Error>(())
    /// ```
    pub fn from_config(config: &ErrorHandlerConfig) -> Result<Self> {
        let filters = config
            .response_filters
            .iter()
            .map(ResponseFilter::from_config)
            .collect::<Result<Vec<_>>>()?;
        let backoff_strategies = config
            .backoff_strategies
            .iter()
            .map(BackoffStrategy::from_config)
            .collect::<Result<Vec<_>>>()?;

        let mut builder = RetryPolicyBuilder::new()
            .filters(filters)
            .backoff_strategies(backoff_strategies)
            .max_retries(config.max_retries)
            .max_time(seconds("max_time", config.max_time)?);
        if config.standard_error_mapping {
            builder = builder.standard_error_mapping();
        }

        builder.build()
    }

    /// Classifies the outcome of one attempt.
    ///
    /// 2xx responses return [`ErrorResolution::SUCCESS`] immediately. Any other
    /// outcome first bumps the attempt count of its request, then runs through
    /// the filters in order; the first match decides.
    pub fn interpret_response(&self, outcome: &Outcome) -> ErrorResolution {
        if outcome.is_success() {
            return ErrorResolution::SUCCESS;
        }

        let attempt = outcome
            .request()
            .map(|request| self.inner.attempts.record(request));
        let resolution = self.inner.classifier.classify(outcome);

        tracing::debug!(
            status = outcome.status().map(|s| s.as_u16()),
            request = outcome.request().map(|r| r.as_u64()),
            attempt = attempt,
            action = %resolution.action,
            failure_type = ?resolution.failure_type,
            "Classified response"
        );

        resolution
    }

    /// Returns how long to wait before retrying after `outcome`.
    ///
    /// Strategies are consulted in order and the first `Some` wins, including
    /// `Some(Duration::ZERO)`. `None` means no strategy had an opinion and the
    /// caller should apply its own default.
    ///
    /// `attempt` is supplied by the caller and is independent of the count kept
    /// by [`interpret_response`](Self::interpret_response); `0` is treated as `1`.
    pub fn backoff_time(&self, outcome: &Outcome, attempt: u32) -> Option<Duration> {
        let delay = self
            .inner
            .backoff_strategies
            .iter()
            .find_map(|strategy| strategy.backoff_time(outcome, attempt));

        tracing::debug!(
            attempt = attempt,
            delay_ms = delay.map(|d| d.as_millis() as u64),
            "Computed backoff"
        );

        delay
    }

    /// The failed attempts recorded for `request` by `interpret_response`.
    pub fn attempts(&self, request: RequestId) -> Option<u32> {
        self.inner.attempts.attempts(request)
    }

    /// Stops tracking `request`, returning its final count.
    ///
    /// Call this once a request has finished, successfully or not.
    pub fn forget(&self, request: RequestId) -> Option<u32> {
        self.inner.attempts.forget(request)
    }

    /// The underlying attempt tracker.
    pub fn attempt_tracker(&self) -> &AttemptTracker {
        &self.inner.attempts
    }

    /// The filter chain, catch-all last.
    pub fn filters(&self) -> &[ResponseFilter] {
        self.inner.classifier.filters()
    }

    /// The backoff strategies in evaluation order.
    pub fn backoff_strategies(&self) -> &[BackoffStrategy] {
        &self.inner.backoff_strategies
    }

    /// How many retries the caller should allow.
    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    /// How long the caller should keep retrying in total.
    pub fn max_time(&self) -> Duration {
        self.inner.max_time
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            inner: Arc::new(PolicyInner {
                classifier: ErrorClassifier::default(),
                backoff_strategies: vec![BackoffStrategy::default()],
                attempts: AttemptTracker::default(),
                max_retries: DEFAULT_MAX_RETRIES,
                max_time: DEFAULT_MAX_TIME,
            }),
        }
    }
}

/// Builder for configuring and creating a [`RetryPolicy`].
///
/// # Examples
///
/// ```
/// use rebound::{Action, BackoffStrategy, FailureType, Predicate, ResponseFilter, RetryPolicyBuilder};
/// use std::time::Duration;
///
/// let policy = RetryPolicyBuilder::new()
///     .filter(
///         ResponseFilter::new(Action::Fail)
///             .predicate(Predicate::parse("response.error == 'invalid_grant'")?)
///             .failure_type(FailureType::Config)
///             .error_message("Refresh token rejected: {body}"),
///     )
///     .standard_error_mapping()
///     .backoff_strategy(BackoffStrategy::Constant { delay: Duration::from_secs(1) })
///     .max_retries(3)
///     .build()?;
/// assert_eq!(policy.filters().len(), 3);
/// # Ok::<(), rebound::Error>(())
/// ```
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    filters: Vec<ResponseFilter>,
    backoff_strategies: Vec<BackoffStrategy>,
    standard_error_mapping: bool,
    max_retries: u32,
    max_time: Duration,
    max_tracked_requests: usize,
}

impl RetryPolicyBuilder {
    /// Creates a new `RetryPolicyBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            backoff_strategies: Vec::new(),
            standard_error_mapping: false,
            max_retries: DEFAULT_MAX_RETRIES,
            max_time: DEFAULT_MAX_TIME,
            max_tracked_requests: DEFAULT_TRACKED_REQUESTS,
        }
    }

    /// Appends a filter. Filters are evaluated in the order they are added.
    pub fn filter(mut self, filter: ResponseFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Appends several filters.
    pub fn filters(mut self, filters: impl IntoIterator<Item = ResponseFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Appends a backoff strategy.
    ///
    /// When none is added, the default exponential strategy is used.
    pub fn backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategies.push(strategy);
        self
    }

    /// Appends several backoff strategies.
    pub fn backoff_strategies(
        mut self,
        strategies: impl IntoIterator<Item = BackoffStrategy>,
    ) -> Self {
        self.backoff_strategies.extend(strategies);
        self
    }

    /// Classifies well-known statuses after the user filters and before the
    /// catch-all. See [`ResponseFilter::standard_error_mapping`].
    pub fn standard_error_mapping(mut self) -> Self {
        self.standard_error_mapping = true;
        self
    }

    /// Sets how many retries the caller should allow.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets how long the caller should keep retrying in total.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    /// Sets how many requests have their attempts tracked at once.
    pub fn max_tracked_requests(mut self, max_tracked_requests: usize) -> Self {
        self.max_tracked_requests = max_tracked_requests;
        self
    }

    /// Builds the configured `RetryPolicy`.
    ///
    /// # Errors
    ///
    /// Returns an error if any filter is invalid.
    pub fn build(self) -> Result<RetryPolicy> {
        let mut filters = self.filters;
        if self.standard_error_mapping {
            filters.push(ResponseFilter::standard_error_mapping());
        }
        let classifier = ErrorClassifier::new(filters)?;

        let backoff_strategies = if self.backoff_strategies.is_empty() {
            vec![BackoffStrategy::default()]
        } else {
            self.backoff_strategies
        };

        tracing::debug!(
            filters = classifier.filters().len(),
            backoff_strategies = backoff_strategies.len(),
            max_retries = self.max_retries,
            "Built retry policy"
        );

        Ok(RetryPolicy {
            inner: Arc::new(PolicyInner {
                classifier,
                backoff_strategies,
                attempts: AttemptTracker::new(self.max_tracked_requests),
                max_retries: self.max_retries,
                max_time: self.max_time,
            }),
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Declarative configuration of a [`RetryPolicy`].
///
/// Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorHandlerConfig {
    /// Filters in evaluation order.
    #[serde(default)]
    pub response_filters: Vec<FilterConfig>,
    /// Backoff strategies in evaluation order.
    #[serde(default)]
    pub backoff_strategies: Vec<BackoffConfig>,
    /// How many retries the caller should allow.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long the caller should keep retrying in total.
    #[serde(default = "default_max_time")]
    pub max_time: f64,
    /// Whether to classify well-known statuses before the catch-all.
    #[serde(default)]
    pub standard_error_mapping: bool,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            response_filters: Vec::new(),
            backoff_strategies: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_time: DEFAULT_MAX_TIME.as_secs_f64(),
            standard_error_mapping: false,
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_time() -> f64 {
    DEFAULT_MAX_TIME.as_secs_f64()
}
