//! # Rebound - HTTP outcome classification and retry timing
//!
//! Rebound decides, after every outbound request, whether the outcome is a
//! success, a retryable failure, an ignorable failure or a fatal one, and, when
//! it is retryable, how long to wait before the next attempt. It does not send
//! requests and it does not run the retry loop: the caller does both and
//! consults a [`RetryPolicy`] once per attempt.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rebound::{Action, HttpResponse, Outcome, RequestId, ResponseFilter, RetryPolicy};
//! use std::time::{Duration, Instant};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .filter(ResponseFilter::new(Action::Ignore).http_codes([404]))
//!     .build()?;
//!
//! let http = reqwest::Client::new();
//! let request = RequestId::next();
//! let started = Instant::now();
//! let mut attempt = 0;
//!
//! loop {
//!     attempt += 1;
//!     let outcome = match http.get("https://api.example.com/users/1").send().await {
//!         Ok(response) => Outcome::from(HttpResponse::from_reqwest(response, request).await),
//!         Err(e) => Outcome::Transport(rebound::TransportError::from(e).with_request(request)),
//!     };
//!
//!     let resolution = policy.interpret_response(&outcome);
//!     match resolution.action {
//!         Action::Success => break,
//!         Action::Ignore => break,
//!         Action::Fail => return Err(resolution.error_message.unwrap_or_default().into()),
//!         Action::Retry => {
//!             if attempt > policy.max_retries() || started.elapsed() > policy.max_time() {
//!                 return Err("retries exhausted".into());
//!             }
//!             let delay = policy
//!                 .backoff_time(&outcome, attempt)
//!                 .unwrap_or(Duration::from_secs(1));
//!             tokio::time::sleep(delay).await;
//!         }
//!     }
//! }
//! policy.forget(request);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Ordered filters** - status codes, body substrings and predicate expressions, first match wins
//! - **Guaranteed fallback** - a catch-all filter retries every non-2xx outcome
//! - **Backoff chains** - exponential, constant and header-driven strategies, first opinion wins
//! - **Declarative configuration** - every filter and strategy deserializes with `serde`
//! - **Fail-fast validation** - bad status codes, predicates and regexes are rejected at build time
//! - **Bounded bookkeeping** - per-request attempt counts with eviction, safe to share across tasks
//! - **Structured logging** - classification and backoff decisions are logged with `tracing`
//!
//! ## Predicates
//!
//! Filters can match on a small expression language evaluated against the
//! response:
//!
//! ```
//! use rebound::{Action, FailureType, Predicate, ResponseFilter};
//!
//! let filter = ResponseFilter::new(Action::Fail)
//!     .predicate(Predicate::parse("{{ response.error.type == 'invalid_request' }}")?)
//!     .failure_type(FailureType::Config);
//! # let _ = filter;
//! # Ok::<(), rebound::Error>(())
//! ```
//!
//! See the [`predicate`] module for the full syntax.

mod attempts;
mod backoff;
mod classifier;
mod error;
mod filter;
mod outcome;
mod policy;
pub mod predicate;
pub mod rate_limit;
mod resolution;

pub use attempts::{AttemptTracker, DEFAULT_TRACKED_REQUESTS};
pub use backoff::{
    BackoffConfig, BackoffStrategy, DEFAULT_BACKOFF_FACTOR, DEFAULT_RATE_LIMIT_MAX_WAIT,
};
pub use classifier::ErrorClassifier;
pub use error::{Error, Result};
pub use filter::{FilterConfig, ResponseFilter};
pub use outcome::{HttpResponse, Outcome, RequestId, TransportError, TransportErrorKind};
pub use policy::{
    ErrorHandlerConfig, RetryPolicy, RetryPolicyBuilder, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TIME,
};
pub use predicate::Predicate;
pub use resolution::{Action, ErrorResolution, FailureType};
