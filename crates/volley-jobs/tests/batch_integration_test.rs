//! Integration tests for batch dispatch.
//!
//! This test suite validates:
//! - The mixed-failure batch: retried rate limits, one fatal client error
//! - Credential sharing and refresh across a running batch
//! - The full HTTP path against a wiremock server
//!
//! Scripted-endpoint tests run on paused tokio time, so backoff sleeps cost
//! nothing. The HTTP test uses real time with millisecond backoffs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use volley_inference::mock::{ScriptedEndpoint, Step};
use volley_inference::{
    ApiRequest, ChatCompletionRequest, EndpointConfig, OpenAIEndpoint, StaticCredentialProvider,
};
use volley_jobs::{
    run_batch, CredentialCache, CredentialProvider, Dispatcher, Error, FailureKind, Result,
    RetryPolicy, Session, Task,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Provider returning `token-N` on its N-th call.
#[derive(Default)]
struct SequenceProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for SequenceProvider {
    async fn fetch(&self) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(format!("token-{}", n))
    }

    fn name(&self) -> &str {
        "sequence"
    }
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_backoff(Duration::from_secs(1), Duration::from_secs(16))
        .with_jitter(Duration::from_millis(250))
}

// ============================================================================
// SCRIPTED ENDPOINT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_mixed_failure_batch() {
    let endpoint = ScriptedEndpoint::new()
        .with_random_latency(Duration::from_millis(300))
        .with_script(2, vec![Step::Status(429)])
        .with_script(5, vec![Step::Status(429)])
        .with_script(7, vec![Step::Status(404)]);
    let provider = Arc::new(SequenceProvider::default());
    let cache = Arc::new(CredentialCache::new(provider.clone(), Duration::from_secs(1800)));
    let session = Session::new(endpoint, cache.clone(), quick_policy());

    let report = run_batch(&session, Task::batch(0..10), 3).await;

    assert_eq!(report.total(), 10);
    assert_eq!(report.successful(), 9);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.total_attempts(), 12);

    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());

    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].index, 7);
    assert_eq!(failed[0].attempts, 1);
    assert_eq!(failed[0].error().map(|e| e.kind), Some(FailureKind::ClientError));

    assert_eq!(report.outcomes[2].attempts, 2);
    assert_eq!(report.outcomes[5].attempts, 2);

    assert!(session.endpoint().max_in_flight() <= 3);
    assert_eq!(cache.refresh_count(), 1);
    assert!(session
        .endpoint()
        .calls()
        .iter()
        .all(|c| c.token == "token-1"));

    match report.ensure_success() {
        Err(Error::BatchFailed { failed, total }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 10);
        }
        other => panic!("expected BatchFailed, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_credential_refreshed_mid_batch() {
    let endpoint = ScriptedEndpoint::new().with_latency(Duration::from_millis(400));
    let provider = Arc::new(SequenceProvider::default());
    let cache = Arc::new(CredentialCache::new(provider.clone(), Duration::from_secs(1)));
    let session = Session::new(endpoint, cache.clone(), quick_policy());

    let report = Dispatcher::with_concurrency(2)
        .run_batch(&session, Task::batch(0..10))
        .await;

    assert!(report.is_success());
    assert!(cache.refresh_count() >= 2);
    assert_eq!(
        cache.refresh_count() as usize,
        provider.calls.load(Ordering::SeqCst)
    );

    let tokens: Vec<String> = session.endpoint().calls().into_iter().map(|c| c.token).collect();
    assert_eq!(tokens.first().map(String::as_str), Some("token-1"));
    assert!(tokens.iter().any(|t| t == "token-2"));
}

#[tokio::test(start_paused = true)]
async fn test_shared_dispatcher_bounds_overlapping_batches() {
    let endpoint = ScriptedEndpoint::new().with_latency(Duration::from_millis(100));
    let cache = Arc::new(CredentialCache::new(
        Arc::new(StaticCredentialProvider::new("k")),
        Duration::from_secs(1800),
    ));
    let session = Session::new(endpoint, cache, quick_policy());
    let dispatcher = Dispatcher::with_concurrency(3);

    let (a, b) = tokio::join!(
        dispatcher.run_batch(&session, Task::batch(0..6)),
        dispatcher.run_batch(&session, Task::batch(100..106)),
    );

    assert!(a.is_success() && b.is_success());
    assert_ne!(a.batch_id, b.batch_id);
    assert_eq!(session.endpoint().max_in_flight(), 3);
    assert_eq!(dispatcher.available_permits(), 3);
}

// ============================================================================
// HTTP ENDPOINT
// ============================================================================

#[tokio::test]
async fn test_http_batch_against_mock_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("prompt 2\""))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("prompt 7\""))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"message": "no such route", "type": "not_found"}
        })))
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}]
        })))
        .mount(&mock_server)
        .await;

    let endpoint =
        OpenAIEndpoint::new(EndpointConfig::default().with_base_url(mock_server.uri())).unwrap();
    let cache = Arc::new(CredentialCache::new(
        Arc::new(StaticCredentialProvider::new("sk-test")),
        Duration::from_secs(1800),
    ));
    let policy = RetryPolicy::default()
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_jitter(Duration::from_millis(5))
        .with_attempt_timeout(Duration::from_secs(10));
    let session = Session::new(endpoint, cache, policy);

    let tasks = Task::batch((0..10).map(|i| {
        let payload = ChatCompletionRequest::user("test-model", format!("prompt {}", i));
        ApiRequest::chat(&payload).unwrap()
    }));

    let report = run_batch(&session, tasks, 3).await;

    assert_eq!(report.successful(), 9);
    assert_eq!(report.total_attempts(), 11);
    assert_eq!(report.outcomes[2].attempts, 2);
    assert_eq!(
        report.outcomes[0].response().and_then(|r| r.text()).as_deref(),
        Some("ok")
    );

    let failed = &report.outcomes[7];
    let err = failed.error().unwrap();
    assert_eq!(err.kind, FailureKind::ClientError);
    assert_eq!(err.status, Some(404));
}

#[tokio::test]
async fn test_oversized_retry_after_still_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1e20"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}]
        })))
        .mount(&mock_server)
        .await;

    let endpoint =
        OpenAIEndpoint::new(EndpointConfig::default().with_base_url(mock_server.uri())).unwrap();
    let cache = Arc::new(CredentialCache::new(
        Arc::new(StaticCredentialProvider::new("sk-test")),
        Duration::from_secs(1800),
    ));
    let policy = RetryPolicy::default()
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_jitter(Duration::ZERO)
        .with_max_retry_after(Duration::from_millis(100));
    let session = Session::new(endpoint, cache, policy);

    let payload = ChatCompletionRequest::user("test-model", "hello");
    let tasks = vec![Task::new(0, ApiRequest::chat(&payload).unwrap())];

    let report = run_batch(&session, tasks, 1).await;

    let outcome = &report.outcomes[0];
    assert!(outcome.is_success(), "{:?}", outcome.error());
    assert_eq!(outcome.attempts, 2);
    assert!(report.elapsed < Duration::from_secs(5));
}
