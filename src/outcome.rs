//! The result of one request attempt, as handed over by the transport layer.
//!
//! An [`Outcome`] is either an [`HttpResponse`] (the server answered, with any
//! status) or a [`TransportError`] (no usable answer arrived). Both carry the
//! [`RequestId`] of the request that produced them so that attempts can be
//! counted per request.

use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, StatusCode};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an outbound request.
///
/// Every attempt of the same logical request must carry the same id. Use
/// [`RequestId::next`] to allocate one per request, or [`RequestId::from_raw`]
/// when the caller already has its own request-scope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocates a new process-unique id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps an identifier chosen by the caller.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A response received from the server, whatever its status.
///
/// # Examples
///
/// ```
/// use rebound::{HttpResponse, RequestId};
/// use http::{HeaderValue, StatusCode};
///
/// let response = HttpResponse::new(StatusCode::TOO_MANY_REQUESTS, r#"{"code": 7}"#)
///     .with_header("retry-after", HeaderValue::from_static("3"))
///     .with_request(RequestId::from_raw(42));
///
/// assert_eq!(response.header("retry-after"), Some("3"));
/// assert_eq!(response.json().unwrap()["code"], 7);
/// ```
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    request: RequestId,
    json: OnceLock<Option<serde_json::Value>>,
}

impl HttpResponse {
    /// Creates a response with no headers and a freshly allocated request id.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            request: RequestId::next(),
            json: OnceLock::new(),
        }
    }

    /// Adds a response header.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces all response headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the identity of the request this response answers.
    pub fn with_request(mut self, request: RequestId) -> Self {
        self.request = request;
        self
    }

    /// Reads a `reqwest` response to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] tagged with `request` if the body could not
    /// be read.
    pub async fn from_reqwest(
        response: reqwest::Response,
        request: RequestId,
    ) -> std::result::Result<Self, TransportError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e).with_request(request))?;

        Ok(Self {
            status,
            headers,
            body,
            request,
            json: OnceLock::new(),
        })
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The raw response body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The body parsed as JSON.
    ///
    /// Parsing happens on first access and the result is cached. Returns `None`
    /// if the body is not valid JSON.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json
            .get_or_init(|| serde_json::from_str(&self.body).ok())
            .as_ref()
    }

    /// The request this response answers.
    pub fn request(&self) -> RequestId {
        self.request
    }
}

/// Broad category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The request could not be built or sent.
    Request,
    /// The body could not be read.
    Body,
    /// The body could not be decoded.
    Decode,
    /// Too many or invalid redirects.
    Redirect,
    /// Anything else.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Decode => "decode",
            TransportErrorKind::Redirect => "redirect",
            TransportErrorKind::Other => "transport",
        };
        f.write_str(name)
    }
}

/// A request attempt that produced no usable HTTP response.
#[derive(thiserror::Error, Debug)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    request: Option<RequestId>,
}

impl TransportError {
    /// Creates a transport error with no cause and no request identity.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            request: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the identity of the request that failed.
    pub fn with_request(mut self, request: RequestId) -> Self {
        self.request = Some(request);
        self
    }

    /// Converts a `reqwest` error, inferring the kind from its predicates.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_redirect() {
            TransportErrorKind::Redirect
        } else if error.is_body() {
            TransportErrorKind::Body
        } else if error.is_decode() {
            TransportErrorKind::Decode
        } else if error.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };

        Self::new(kind, error.to_string()).with_source(error)
    }

    /// The failure category.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The request that failed, if known.
    pub fn request(&self) -> Option<RequestId> {
        self.request
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::from_reqwest(error)
    }
}

/// The result of one request attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The server answered.
    Response(HttpResponse),
    /// The transport failed before a response was available.
    Transport(TransportError),
}

impl Outcome {
    /// Returns `true` for a response with a 2xx status.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Response(r) if r.status.is_success())
    }

    /// The status code, for responses.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Response(r) => Some(r.status),
            Outcome::Transport(_) => None,
        }
    }

    /// The response headers, for responses.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Outcome::Response(r) => Some(&r.headers),
            Outcome::Transport(_) => None,
        }
    }

    /// The request identity, when known.
    pub fn request(&self) -> Option<RequestId> {
        match self {
            Outcome::Response(r) => Some(r.request),
            Outcome::Transport(e) => e.request,
        }
    }

    /// The text that error-message filters search: the response body, or the
    /// transport error message.
    pub fn error_text(&self) -> &str {
        match self {
            Outcome::Response(r) => &r.body,
            Outcome::Transport(e) => &e.message,
        }
    }
}

impl From<HttpResponse> for Outcome {
    fn from(response: HttpResponse) -> Self {
        Outcome::Response(response)
    }
}

impl From<TransportError> for Outcome {
    fn from(error: TransportError) -> Self {
        Outcome::Transport(error)
    }
}

impl<E> From<std::result::Result<HttpResponse, E>> for Outcome
where
    E: Into<TransportError>,
{
    fn from(result: std::result::Result<HttpResponse, E>) -> Self {
        match result {
            Ok(response) => Outcome::Response(response),
            Err(e) => Outcome::Transport(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert_eq!(RequestId::from_raw(7).as_u64(), 7);
    }

    #[test]
    fn test_json_is_parsed_lazily_and_tolerates_garbage() {
        let ok = HttpResponse::new(StatusCode::BAD_REQUEST, r#"{"code": 7}"#);
        assert_eq!(ok.json().and_then(|v| v.get("code")), Some(&serde_json::json!(7)));

        let garbage = HttpResponse::new(StatusCode::BAD_REQUEST, "<html>oops</html>");
        assert!(garbage.json().is_none());
        assert_eq!(garbage.body(), "<html>oops</html>");
    }

    #[test]
    fn test_outcome_accessors() {
        let id = RequestId::from_raw(11);
        let response: Outcome = HttpResponse::new(StatusCode::OK, "fine")
            .with_request(id)
            .into();
        assert!(response.is_success());
        assert_eq!(response.request(), Some(id));
        assert_eq!(response.error_text(), "fine");

        let failure: Outcome = TransportError::new(TransportErrorKind::Timeout, "timed out").into();
        assert!(!failure.is_success());
        assert_eq!(failure.status(), None);
        assert_eq!(failure.request(), None);
        assert_eq!(failure.error_text(), "timed out");
    }

    #[test]
    fn test_transport_error_display_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TransportError::new(TransportErrorKind::Connect, "connection reset")
            .with_source(io)
            .with_request(RequestId::from_raw(3));

        assert_eq!(err.to_string(), "connect error: connection reset");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.request(), Some(RequestId::from_raw(3)));
    }
}
