//! Response filters: single "if this, then that" classification rules.

use crate::{
    Action, Error, ErrorResolution, FailureType, Outcome, Predicate, Result, TransportErrorKind,
};
use http::StatusCode;
use serde::Deserialize;
use std::collections::BTreeSet;

/// A rule mapping matching outcomes to an [`ErrorResolution`].
///
/// A filter matches when *any* of its conditions holds:
///
/// - the response status is one of `http_codes`
/// - `error_message_contains` occurs in the response body or transport error
///   message (case-sensitive)
/// - `predicate` evaluates to true
///
/// # Examples
///
/// ```
/// use rebound::{Action, HttpResponse, Outcome, ResponseFilter};
/// use http::StatusCode;
///
/// let filter = ResponseFilter::new(Action::Ignore).http_codes([404]);
///
/// let not_found = Outcome::from(HttpResponse::new(StatusCode::NOT_FOUND, ""));
/// assert_eq!(filter.matches(&not_found).unwrap().action, Action::Ignore);
///
/// let gone = Outcome::from(HttpResponse::new(StatusCode::GONE, ""));
/// assert!(filter.matches(&gone).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ResponseFilter {
    http_codes: BTreeSet<u16>,
    error_message_contains: Option<String>,
    predicate: Option<Predicate>,
    action: Action,
    failure_type: Option<FailureType>,
    error_message: Option<String>,
    matcher: Matcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matcher {
    Conditions,
    StandardMapping,
    CatchAll,
}

impl ResponseFilter {
    /// Creates a filter with the given action and no conditions yet.
    pub fn new(action: Action) -> Self {
        Self {
            http_codes: BTreeSet::new(),
            error_message_contains: None,
            predicate: None,
            action,
            failure_type: None,
            error_message: None,
            matcher: Matcher::Conditions,
        }
    }

    /// The filter appended after every user-supplied filter: retries any
    /// outcome that is not a 2xx response.
    pub fn catch_all() -> Self {
        Self {
            matcher: Matcher::CatchAll,
            failure_type: Some(FailureType::Transient),
            ..Self::new(Action::Retry)
        }
    }

    /// Classifies the well-known status codes and transport failures.
    ///
    /// | Outcome | Action | Failure type |
    /// |---|---|---|
    /// | 400, 404 | Fail | System |
    /// | 401, 403 | Fail | Config |
    /// | 408, 429, 500, 502, 503, 504 | Retry | Transient |
    /// | timeout, connect, body, decode | Retry | Transient |
    /// | request, redirect | Fail | System |
    ///
    /// Anything else falls through to the next filter.
    pub fn standard_error_mapping() -> Self {
        Self {
            matcher: Matcher::StandardMapping,
            ..Self::new(Action::Retry)
        }
    }

    /// Matches any of the given status codes.
    pub fn http_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.http_codes.extend(codes);
        self
    }

    /// Matches when the body or error message contains `needle`.
    pub fn error_message_contains(mut self, needle: impl Into<String>) -> Self {
        self.error_message_contains = Some(needle.into());
        self
    }

    /// Matches when `predicate` holds.
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Overrides the failure type inferred from the action.
    pub fn failure_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = Some(failure_type);
        self
    }

    /// Sets the message reported on match.
    ///
    /// `{status}`, `{reason}` and `{body}` are replaced with the response's
    /// status code, canonical reason and body; for transport errors `{body}` is
    /// the error message and the other two are empty.
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// The action taken on match.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Returns `true` for the implicit catch-all filter.
    pub fn is_catch_all(&self) -> bool {
        self.matcher == Matcher::CatchAll
    }

    /// Builds a filter from its declarative form, validating it.
    ///
    /// # Errors
    ///
    /// Fails if a status code is out of range, the predicate does not parse, or
    /// the filter has no condition.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut filter = ResponseFilter::new(config.action.unwrap_or(Action::Retry))
            .http_codes(config.http_codes.iter().copied());
        filter.error_message_contains = config.error_message_contains.clone();
        filter.predicate = config.predicate.as_deref().map(Predicate::parse).transpose()?;
        filter.failure_type = config.failure_type;
        filter.error_message = config.error_message.clone();

        filter.validate()?;
        Ok(filter)
    }

    /// Checks that the filter is well formed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStatusCode`] for codes outside `100..=599`,
    /// [`Error::ConfigurationError`] for an empty substring (it would match
    /// everything), and [`Error::MissingCondition`] for a filter that can never
    /// match.
    pub fn validate(&self) -> Result<()> {
        if self.matcher != Matcher::Conditions {
            return Ok(());
        }

        if let Some(code) = self.http_codes.iter().find(|c| !(100..=599).contains(*c)) {
            return Err(Error::InvalidStatusCode(*code));
        }

        if self.error_message_contains.as_deref() == Some("") {
            return Err(Error::ConfigurationError(
                "error_message_contains must not be empty".to_string(),
            ));
        }

        if self.http_codes.is_empty()
            && self.error_message_contains.is_none()
            && self.predicate.is_none()
        {
            return Err(Error::MissingCondition);
        }

        Ok(())
    }

    /// Returns the resolution for `outcome` if this filter matches it.
    pub fn matches(&self, outcome: &Outcome) -> Option<ErrorResolution> {
        match self.matcher {
            Matcher::Conditions => self
                .conditions_hold(outcome)
                .then(|| self.resolve(outcome)),
            Matcher::CatchAll => (!outcome.is_success()).then(|| self.resolve(outcome)),
            Matcher::StandardMapping => {
                let (action, failure_type, message) = standard_resolution(outcome)?;
                Some(ErrorResolution::new(
                    action,
                    Some(failure_type),
                    Some(message.to_string()),
                ))
            }
        }
    }

    fn conditions_hold(&self, outcome: &Outcome) -> bool {
        let code_matches = outcome
            .status()
            .is_some_and(|status| self.http_codes.contains(&status.as_u16()));

        code_matches
            || self
                .error_message_contains
                .as_deref()
                .is_some_and(|needle| outcome.error_text().contains(needle))
            || self
                .predicate
                .as_ref()
                .is_some_and(|predicate| predicate.evaluate(outcome))
    }

    fn resolve(&self, outcome: &Outcome) -> ErrorResolution {
        let message = match &self.error_message {
            Some(template) => render_message(template, outcome),
            None => describe(outcome),
        };
        ErrorResolution::new(self.action, self.failure_type, Some(message))
    }
}

/// Declarative form of a [`ResponseFilter`].
///
/// # Examples
///
/// ```
/// use rebound::{Action, FilterConfig};
///
/// let config: FilterConfig = serde_json::from_str(
///     r#"{ "http_codes": [404], "action": "IGNORE" }"#,
/// ).unwrap();
/// assert_eq!(config.http_codes, vec![404]);
/// assert_eq!(config.action, Some(Action::Ignore));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FilterConfig {
    /// Status codes that trigger the filter.
    #[serde(default)]
    pub http_codes: Vec<u16>,
    /// Substring of the body or error message that triggers the filter.
    #[serde(default, alias = "error_message_contain")]
    pub error_message_contains: Option<String>,
    /// Predicate expression that triggers the filter.
    #[serde(default)]
    pub predicate: Option<String>,
    /// Action on match. Defaults to `RETRY`.
    #[serde(default)]
    pub action: Option<Action>,
    /// Failure type on match. Inferred from the action when absent.
    #[serde(default)]
    pub failure_type: Option<FailureType>,
    /// Message on match. See [`ResponseFilter::error_message`].
    #[serde(default)]
    pub error_message: Option<String>,
}

fn render_message(template: &str, outcome: &Outcome) -> String {
    let (status, reason) = match outcome.status() {
        Some(status) => (
            status.as_u16().to_string(),
            status.canonical_reason().unwrap_or_default().to_string(),
        ),
        None => (String::new(), String::new()),
    };

    template
        .replace("{status}", &status)
        .replace("{reason}", &reason)
        .replace("{body}", outcome.error_text())
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Response(response) => format!(
            "Request {} failed with HTTP {}",
            response.request(),
            response.status()
        ),
        Outcome::Transport(error) => format!("Request failed: {}", error),
    }
}

fn standard_resolution(outcome: &Outcome) -> Option<(Action, FailureType, &'static str)> {
    let resolution = match outcome {
        Outcome::Response(response) => match response.status() {
            StatusCode::BAD_REQUEST => (
                Action::Fail,
                FailureType::System,
                "Bad request. Check the request parameters.",
            ),
            StatusCode::UNAUTHORIZED => (
                Action::Fail,
                FailureType::Config,
                "Unauthorized. Check the configured credentials.",
            ),
            StatusCode::FORBIDDEN => (
                Action::Fail,
                FailureType::Config,
                "Forbidden. The credentials lack permission for this resource.",
            ),
            StatusCode::NOT_FOUND => (
                Action::Fail,
                FailureType::System,
                "Not found. The requested resource does not exist.",
            ),
            StatusCode::REQUEST_TIMEOUT => (
                Action::Retry,
                FailureType::Transient,
                "Request timed out on the server.",
            ),
            StatusCode::TOO_MANY_REQUESTS => (
                Action::Retry,
                FailureType::Transient,
                "Too many requests.",
            ),
            StatusCode::INTERNAL_SERVER_ERROR => (
                Action::Retry,
                FailureType::Transient,
                "Internal server error.",
            ),
            StatusCode::BAD_GATEWAY => (Action::Retry, FailureType::Transient, "Bad gateway."),
            StatusCode::SERVICE_UNAVAILABLE => (
                Action::Retry,
                FailureType::Transient,
                "Service unavailable.",
            ),
            StatusCode::GATEWAY_TIMEOUT => {
                (Action::Retry, FailureType::Transient, "Gateway timeout.")
            }
            _ => return None,
        },
        Outcome::Transport(error) => match error.kind() {
            TransportErrorKind::Timeout
            | TransportErrorKind::Connect
            | TransportErrorKind::Body
            | TransportErrorKind::Decode => (
                Action::Retry,
                FailureType::Transient,
                "Transient transport failure.",
            ),
            TransportErrorKind::Request | TransportErrorKind::Redirect => (
                Action::Fail,
                FailureType::System,
                "The request could not be sent.",
            ),
            TransportErrorKind::Other => return None,
        },
    };

    Some(resolution)
}
