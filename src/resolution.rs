//! The verdict returned for every request attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the caller should do with an outcome.
///
/// Actions carry no intrinsic severity. When several filters could match, the
/// filter listed first decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Deliver the outcome as-is.
    Success,
    /// Re-issue the request after the backoff delay.
    Retry,
    /// Abort the enclosing operation.
    Fail,
    /// Skip this record or page and carry on.
    Ignore,
}

impl Action {
    /// Returns `true` for every action except [`Action::Retry`].
    pub fn is_terminal(self) -> bool {
        !matches!(self, Action::Retry)
    }

    /// The failure type assumed when a filter does not set one.
    pub fn default_failure_type(self) -> Option<FailureType> {
        match self {
            Action::Success => None,
            Action::Retry => Some(FailureType::Transient),
            Action::Fail | Action::Ignore => Some(FailureType::System),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Success => "SUCCESS",
            Action::Retry => "RETRY",
            Action::Fail => "FAIL",
            Action::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

/// Why an outcome failed, for operator-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// A defect on the server side or in this program.
    #[serde(alias = "system_error")]
    System,
    /// The user's configuration is wrong (bad credentials, missing access).
    #[serde(alias = "config_error")]
    Config,
    /// A temporary condition expected to clear on its own.
    #[serde(alias = "transient_error")]
    Transient,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureType::System => "system_error",
            FailureType::Config => "config_error",
            FailureType::Transient => "transient_error",
        };
        f.write_str(name)
    }
}

/// The classification of a single outcome.
///
/// # Examples
///
/// ```
/// use rebound::{Action, ErrorResolution, FailureType};
///
/// assert_eq!(ErrorResolution::SUCCESS.action, Action::Success);
/// assert_eq!(ErrorResolution::DEFAULT_ERROR.action, Action::Retry);
/// assert_eq!(
///     ErrorResolution::DEFAULT_ERROR.failure_type,
///     Some(FailureType::Transient)
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResolution {
    /// What to do next.
    pub action: Action,
    /// Why it failed. `None` for successes.
    pub failure_type: Option<FailureType>,
    /// Message to surface to the operator.
    pub error_message: Option<String>,
}

impl ErrorResolution {
    /// Returned for every 2xx response.
    pub const SUCCESS: ErrorResolution = ErrorResolution {
        action: Action::Success,
        failure_type: None,
        error_message: None,
    };

    /// Returned when no filter matches.
    pub const DEFAULT_ERROR: ErrorResolution = ErrorResolution {
        action: Action::Retry,
        failure_type: Some(FailureType::Transient),
        error_message: None,
    };

    /// Creates a resolution, inferring the failure type from the action when
    /// none is given.
    pub fn new(
        action: Action,
        failure_type: Option<FailureType>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            action,
            failure_type: failure_type.or_else(|| action.default_failure_type()),
            error_message,
        }
    }

    /// Returns `true` if the caller should try again.
    pub fn should_retry(&self) -> bool {
        self.action == Action::Retry
    }
}
