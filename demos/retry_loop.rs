//! Example demonstrating a caller-owned retry loop driven by a declarative policy.
//!
//! This example shows how to:
//! - Load a retry policy from JSON configuration
//! - Convert `reqwest` results into outcomes
//! - Act on each resolution and honour the backoff delay
//! - Enforce the retry budget on the caller's side
//!
//! Run with: `cargo run --example retry_loop -- https://httpbin.org/status/503`

use rebound::{Action, ErrorHandlerConfig, HttpResponse, Outcome, RequestId, RetryPolicy, TransportError};
use std::time::{Duration, Instant};

const CONFIG: &str = r#"{
    "max_retries": 4,
    "max_time": 30,
    "standard_error_mapping": true,
    "response_filters": [
        { "http_codes": [404], "action": "IGNORE", "error_message": "Nothing at this URL, skipping" },
        {
            "predicate": "{{ response.error == 'invalid_grant' }}",
            "action": "FAIL",
            "failure_type": "config_error",
            "error_message": "Credentials rejected: {body}"
        }
    ],
    "backoff_strategies": [
        { "type": "WaitTimeFromHeader", "header": "Retry-After", "max_waiting_time_in_seconds": 10 },
        { "type": "ExponentialBackoff", "factor": 0.5, "max_delay": 8, "jitter": true }
    ]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("rebound=debug,retry_loop=info")
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/status/503".to_string());

    let config: ErrorHandlerConfig = serde_json::from_str(CONFIG)?;
    let policy = RetryPolicy::from_config(&config)?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let request = RequestId::next();
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = match http.get(&url).send().await {
            Ok(response) => Outcome::from(HttpResponse::from_reqwest(response, request).await),
            Err(e) => Outcome::Transport(TransportError::from(e).with_request(request)),
        };

        let resolution = policy.interpret_response(&outcome);
        println!(
            "Attempt {}: {} ({})",
            attempt,
            resolution.action,
            resolution.error_message.as_deref().unwrap_or("no message")
        );

        match resolution.action {
            Action::Success => {
                println!("Success after {} attempt(s)", attempt);
                break;
            }
            Action::Ignore => {
                println!("Ignored, moving on");
                break;
            }
            Action::Fail => {
                println!(
                    "Giving up ({}): {}",
                    resolution
                        .failure_type
                        .map(|f| f.to_string())
                        .unwrap_or_default(),
                    resolution.error_message.unwrap_or_default()
                );
                break;
            }
            Action::Retry => {
                if attempt > policy.max_retries() || started.elapsed() > policy.max_time() {
                    println!("Retry budget exhausted after {} attempt(s)", attempt);
                    break;
                }
                let delay = policy
                    .backoff_time(&outcome, attempt)
                    .unwrap_or(Duration::from_secs(1));
                println!("Waiting {:?} before retrying", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }

    if let Some(failed) = policy.forget(request) {
        println!("Request saw {} failed attempt(s)", failed);
    }

    Ok(())
}
