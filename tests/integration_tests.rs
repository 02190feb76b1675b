//! Integration tests using wiremock to simulate HTTP servers.
//!
//! Each test drives real requests through `reqwest` and a caller-owned retry
//! loop that consults the policy once per attempt.

use rebound::{
    Action, BackoffStrategy, ErrorHandlerConfig, ErrorResolution, FailureType, HttpResponse,
    Outcome, Predicate, RequestId, ResponseFilter, RetryPolicy, TransportError,
    TransportErrorKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FALLBACK_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug)]
enum Finished {
    Delivered(HttpResponse),
    Ignored,
    Failed(ErrorResolution),
    Exhausted,
}

async fn fetch(http: &reqwest::Client, url: &str, request: RequestId) -> Outcome {
    match http.get(url).send().await {
        Ok(response) => HttpResponse::from_reqwest(response, request).await.into(),
        Err(e) => Outcome::Transport(TransportError::from(e).with_request(request)),
    }
}

/// Runs one logical request to completion. Returns how it finished and how
/// many attempts were made.
async fn run(
    policy: &RetryPolicy,
    http: &reqwest::Client,
    url: &str,
    request: RequestId,
) -> (Finished, u32) {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = fetch(http, url, request).await;
        let resolution = policy.interpret_response(&outcome);

        match resolution.action {
            Action::Success => match outcome {
                Outcome::Response(response) => return (Finished::Delivered(response), attempt),
                Outcome::Transport(e) => panic!("transport error classified as success: {}", e),
            },
            Action::Ignore => return (Finished::Ignored, attempt),
            Action::Fail => return (Finished::Failed(resolution), attempt),
            Action::Retry => {
                if attempt > policy.max_retries() || started.elapsed() > policy.max_time() {
                    return (Finished::Exhausted, attempt);
                }
                let delay = policy
                    .backoff_time(&outcome, attempt)
                    .unwrap_or(FALLBACK_DELAY);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn fast_policy() -> rebound::RetryPolicyBuilder {
    RetryPolicy::builder().backoff_strategy(BackoffStrategy::Constant {
        delay: Duration::from_millis(10),
    })
}

#[tokio::test]
async fn test_success_on_first_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id": 1}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let policy = fast_policy().build().unwrap();
    let http = reqwest::Client::new();
    let request = RequestId::next();

    let (finished, attempts) = run(
        &policy,
        &http,
        &format!("{}/users/1", mock_server.uri()),
        request,
    )
    .await;

    match finished {
        Finished::Delivered(response) => {
            assert_eq!(response.status().as_u16(), 200);
            assert_eq!(response.json().unwrap()["id"], 1);
        }
        other => panic!("Expected Delivered, got {:?}", other),
    }
    assert_eq!(attempts, 1);
    assert_eq!(policy.attempts(request), None);
}

#[tokio::test]
async fn test_retry_on_5xx_then_succeed() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail with 500, third succeeds
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(500).set_body_string("Server error")
            } else {
                ResponseTemplate::new(200).set_body_string("ok")
            }
        })
        .mount(&mock_server)
        .await;

    let policy = fast_policy().build().unwrap();
    let http = reqwest::Client::new();
    let request = RequestId::next();

    let (finished, attempts) =
        run(&policy, &http, &format!("{}/test", mock_server.uri()), request).await;

    assert!(matches!(finished, Finished::Delivered(_)));
    assert_eq!(attempts, 3);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    assert_eq!(policy.forget(request), Some(2));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Unavailable"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let policy = fast_policy().max_retries(2).build().unwrap();
    let http = reqwest::Client::new();
    let request = RequestId::next();

    let (finished, attempts) =
        run(&policy, &http, &format!("{}/test", mock_server.uri()), request).await;

    // max_retries: 2 means 3 total attempts (1 initial + 2 retries)
    assert!(matches!(finished, Finished::Exhausted));
    assert_eq!(attempts, 3);
    assert_eq!(policy.attempts(request), Some(3));
}

#[tokio::test]
async fn test_ignore_429_retry_404() {
    let mock_server = MockServer::start().await;
    let not_found_hits = Arc::new(AtomicUsize::new(0));
    let not_found_hits_clone = not_found_hits.clone();

    Mock::given(method("GET"))
        .and(path("/throttled"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The resource appears after the first lookup
    Mock::given(method("GET"))
        .and(path("/eventually"))
        .respond_with(move |_req: &wiremock::Request| {
            if not_found_hits_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(404)
            } else {
                ResponseTemplate::new(200)
            }
        })
        .mount(&mock_server)
        .await;

    let policy = fast_policy()
        .filter(ResponseFilter::new(Action::Ignore).http_codes([429]))
        .filter(ResponseFilter::new(Action::Retry).http_codes([404]))
        .build()
        .unwrap();
    let http = reqwest::Client::new();

    let (finished, attempts) = run(
        &policy,
        &http,
        &format!("{}/throttled", mock_server.uri()),
        RequestId::next(),
    )
    .await;
    assert!(matches!(finished, Finished::Ignored));
    assert_eq!(attempts, 1);

    let (finished, attempts) = run(
        &policy,
        &http,
        &format!("{}/eventually", mock_server.uri()),
        RequestId::next(),
    )
    .await;
    assert!(matches!(finished, Finished::Delivered(_)));
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn test_predicate_fails_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error": "invalid_grant"}"#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let policy = fast_policy()
        .filter(
            ResponseFilter::new(Action::Fail)
                .predicate(Predicate::parse("{{ response.error == 'invalid_grant' }}").unwrap())
                .failure_type(FailureType::Config)
                .error_message("Refresh token rejected ({status})"),
        )
        .build()
        .unwrap();
    let http = reqwest::Client::new();

    let (finished, attempts) = run(
        &policy,
        &http,
        &format!("{}/token", mock_server.uri()),
        RequestId::next(),
    )
    .await;

    match finished {
        Finished::Failed(resolution) => {
            assert_eq!(resolution.failure_type, Some(FailureType::Config));
            assert_eq!(
                resolution.error_message.as_deref(),
                Some("Refresh token rejected (400)")
            );
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn test_retry_after_header_drives_backoff() {
    let mock_server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(move |_req: &wiremock::Request| {
            if hits_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "0")
            } else {
                ResponseTemplate::new(200)
            }
        })
        .mount(&mock_server)
        .await;

    let config: ErrorHandlerConfig = serde_json::from_value(serde_json::json!({
        "backoff_strategies": [
            { "type": "WaitTimeFromHeader", "header": "Retry-After", "max_waiting_time_in_seconds": 1 },
            { "type": "ConstantBackoff", "backoff_time_in_seconds": 30 }
        ]
    }))
    .unwrap();
    let policy = RetryPolicy::from_config(&config).unwrap();
    let http = reqwest::Client::new();

    let started = Instant::now();
    let (finished, attempts) = run(
        &policy,
        &http,
        &format!("{}/limited", mock_server.uri()),
        RequestId::next(),
    )
    .await;

    assert!(matches!(finished, Finished::Delivered(_)));
    assert_eq!(attempts, 2);
    // The 30s constant fallback must not have been used
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_error_message_substring_in_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("upstream hiccup, retrythisrequest!"),
        )
        .mount(&mock_server)
        .await;

    let policy = fast_policy()
        .filter(ResponseFilter::new(Action::Retry).error_message_contains("retrythisrequest!"))
        .filter(ResponseFilter::new(Action::Fail).http_codes([400]))
        .max_retries(1)
        .build()
        .unwrap();
    let http = reqwest::Client::new();

    let (finished, attempts) = run(
        &policy,
        &http,
        &format!("{}/flaky", mock_server.uri()),
        RequestId::next(),
    )
    .await;

    assert!(matches!(finished, Finished::Exhausted));
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn test_transport_error_is_classified() {
    // Bind and immediately drop a listener so its port refuses connections
    let uri = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };

    let policy = fast_policy().standard_error_mapping().build().unwrap();
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let request = RequestId::next();

    let outcome = fetch(&http, &format!("{}/gone", uri), request).await;
    match &outcome {
        Outcome::Transport(e) => {
            assert!(
                matches!(e.kind(), TransportErrorKind::Connect | TransportErrorKind::Timeout),
                "unexpected kind {:?}",
                e.kind()
            );
            assert_eq!(e.request(), Some(request));
        }
        Outcome::Response(r) => panic!("Expected transport error, got HTTP {}", r.status()),
    }

    let resolution = policy.interpret_response(&outcome);
    assert_eq!(resolution.action, Action::Retry);
    assert_eq!(resolution.failure_type, Some(FailureType::Transient));
    assert_eq!(policy.attempts(request), Some(1));
}

#[tokio::test]
async fn test_shared_policy_across_concurrent_requests() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let policy = fast_policy().max_retries(2).build().unwrap();
    let http = reqwest::Client::new();
    let url = format!("{}/busy", mock_server.uri());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let policy = policy.clone();
            let http = http.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let request = RequestId::next();
                let (finished, attempts) = run(&policy, &http, &url, request).await;
                (request, finished, attempts)
            })
        })
        .collect();

    for handle in handles {
        let (request, finished, attempts) = handle.await.unwrap();
        assert!(matches!(finished, Finished::Exhausted));
        assert_eq!(attempts, 3);
        assert_eq!(policy.attempts(request), Some(3));
    }
    assert_eq!(policy.attempt_tracker().len(), 4);
}
