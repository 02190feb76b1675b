//! Ordered evaluation of response filters.

use crate::{ErrorResolution, Outcome, ResponseFilter, Result};

/// An immutable, ordered chain of [`ResponseFilter`]s ending in the catch-all.
///
/// The first matching filter decides. 2xx responses short-circuit to
/// [`ErrorResolution::SUCCESS`] without consulting any filter.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    filters: Vec<ResponseFilter>,
}

impl ErrorClassifier {
    /// Validates `filters` and appends the catch-all after them.
    ///
    /// # Errors
    ///
    /// Returns the first validation error among `filters`.
    pub fn new(filters: impl IntoIterator<Item = ResponseFilter>) -> Result<Self> {
        let mut filters = filters
            .into_iter()
            .filter(|f| !f.is_catch_all())
            .map(|f| f.validate().map(|()| f))
            .collect::<Result<Vec<_>>>()?;
        filters.push(ResponseFilter::catch_all());

        Ok(Self { filters })
    }

    /// Classifies an outcome.
    pub fn classify(&self, outcome: &Outcome) -> ErrorResolution {
        if outcome.is_success() {
            return ErrorResolution::SUCCESS;
        }

        self.filters
            .iter()
            .find_map(|filter| filter.matches(outcome))
            .unwrap_or(ErrorResolution::DEFAULT_ERROR)
    }

    /// The filters in evaluation order, catch-all last.
    pub fn filters(&self) -> &[ResponseFilter] {
        &self.filters
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            filters: vec![ResponseFilter::catch_all()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, HttpResponse, Predicate};
    use http::StatusCode;

    fn response(status: u16, body: &str) -> Outcome {
        HttpResponse::new(StatusCode::from_u16(status).unwrap(), body).into()
    }

    #[test]
    fn test_success_skips_filters() {
        let classifier = ErrorClassifier::new([ResponseFilter::new(Action::Fail)
            .predicate(Predicate::parse("true").unwrap())])
        .unwrap();

        for status in [200, 201, 204, 299] {
            assert_eq!(classifier.classify(&response(status, "")), ErrorResolution::SUCCESS);
        }
        assert_eq!(classifier.classify(&response(500, "")).action, Action::Fail);
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = ErrorClassifier::new([
            ResponseFilter::new(Action::Ignore).http_codes([404]),
            ResponseFilter::new(Action::Retry).http_codes([404]),
        ])
        .unwrap();

        assert_eq!(classifier.classify(&response(404, "")).action, Action::Ignore);
    }

    #[test]
    fn test_catch_all_appended_once() {
        let classifier = ErrorClassifier::new([
            ResponseFilter::new(Action::Ignore).http_codes([429]),
            ResponseFilter::catch_all(),
        ])
        .unwrap();

        assert_eq!(classifier.filters().len(), 2);
        assert!(classifier.filters()[1].is_catch_all());
        assert_eq!(classifier.classify(&response(503, "")).action, Action::Retry);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(ErrorClassifier::new([ResponseFilter::new(Action::Fail)]).is_err());
    }
}
