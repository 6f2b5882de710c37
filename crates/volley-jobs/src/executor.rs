//! Resilient single-task executor.
//!
//! A [`Session`] bundles what every task in a batch shares: the endpoint,
//! the credential source and the retry policy. [`Session::execute`] drives
//! one task through its attempts:
//!
//! ```text
//! PENDING -> ATTEMPTING -> SUCCESS
//!                       -> RETRY_WAIT -> ATTEMPTING
//!                       -> FAILED
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use volley_core::{
    Attempt, CredentialSource, Endpoint, Outcome, RequestError, RetryPolicy, Task,
};

use crate::events::{BatchEvent, EventPublisher};

/// Everything a task needs to run, shared across a batch.
///
/// Cloning is cheap; all parts are reference counted.
pub struct Session<E: Endpoint> {
    endpoint: Arc<E>,
    credentials: Arc<dyn CredentialSource>,
    policy: Arc<RetryPolicy>,
}

impl<E: Endpoint> Clone for Session<E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            credentials: self.credentials.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<E: Endpoint> Session<E> {
    pub fn new(endpoint: E, credentials: Arc<dyn CredentialSource>, policy: RetryPolicy) -> Self {
        Self::from_shared(Arc::new(endpoint), credentials, Arc::new(policy))
    }

    pub fn from_shared(
        endpoint: Arc<E>,
        credentials: Arc<dyn CredentialSource>,
        policy: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            policy,
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `task` to its terminal outcome.
    ///
    /// Never fails as a whole: every error ends up in the returned outcome.
    pub async fn execute(&self, task: &Task<E::Request>) -> Outcome<E::Response> {
        let attempts = AtomicU32::new(0);
        self.execute_tracked(task, None, &attempts).await
    }

    /// Retry loop. `attempts` mirrors the current attempt number so a caller
    /// can still report it if the task panics midway.
    pub(crate) async fn execute_tracked(
        &self,
        task: &Task<E::Request>,
        events: Option<&EventPublisher>,
        attempts: &AtomicU32,
    ) -> Outcome<E::Response> {
        let index = task.index;
        let start = Instant::now();
        let mut number = 0u32;

        loop {
            number += 1;
            attempts.store(number, Ordering::SeqCst);

            let error = match self.attempt(&task.request).await {
                Ok(response) => {
                    debug!(
                        subsystem = "executor",
                        task = index,
                        attempt = number,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Task succeeded"
                    );
                    return Outcome::success(index, number, response);
                }
                Err(e) => e,
            };

            let backoff = self
                .policy
                .should_retry(number, &error)
                .then(|| self.policy.backoff(number, &error));

            match backoff {
                Some(delay) => warn!(
                    subsystem = "executor",
                    task = index,
                    attempt = number,
                    max_attempts = self.policy.max_attempts,
                    kind = %error.kind,
                    status = ?error.status,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error.message,
                    "Attempt failed, retrying"
                ),
                None => warn!(
                    subsystem = "executor",
                    task = index,
                    attempt = number,
                    kind = %error.kind,
                    status = ?error.status,
                    error = %error.message,
                    "Attempt failed, giving up"
                ),
            }

            if let Some(events) = events {
                events.publish(BatchEvent::AttemptFailed {
                    batch_id: events.batch_id,
                    index,
                    attempt: Attempt {
                        number,
                        error: Some(error.clone()),
                        backoff,
                    },
                });
            }

            match backoff {
                Some(delay) => sleep(delay).await,
                None => return Outcome::failure(index, number, error),
            }
        }
    }

    /// One attempt: fresh credential, then the call under the attempt timeout.
    async fn attempt(&self, request: &E::Request) -> Result<E::Response, RequestError> {
        let credential = self
            .credentials
            .credential()
            .await
            .map_err(|e| RequestError::credential(e.to_string()))?;

        let limit = self.policy.attempt_timeout;
        match timeout(limit, self.endpoint.call(request, &credential)).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use volley_core::FailureKind;
    use volley_inference::mock::{ScriptedEndpoint, Step};
    use volley_inference::StaticCredentialProvider;

    use crate::CredentialCache;

    fn session(endpoint: ScriptedEndpoint, policy: RetryPolicy) -> Session<ScriptedEndpoint> {
        let cache = CredentialCache::new(
            Arc::new(StaticCredentialProvider::new("sk-test")),
            Duration::from_secs(1800),
        );
        Session::new(endpoint, Arc::new(cache), policy)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(16))
            .with_jitter(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let session = session(ScriptedEndpoint::new(), fast_policy());
        let outcome = session.execute(&Task::new(0, 0)).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.response().map(String::as_str), Some("response-0"));
        assert_eq!(session.endpoint().calls()[0].token, "sk-test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let endpoint = ScriptedEndpoint::new().with_script(3, vec![Step::Status(429)]);
        let session = session(endpoint, fast_policy());

        let start = tokio::time::Instant::now();
        let outcome = session.execute(&Task::new(3, 3)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_success() {
        let endpoint = ScriptedEndpoint::new().with_script(4, vec![Step::Disconnect]);
        let session = session(endpoint, fast_policy());

        let start = tokio::time::Instant::now();
        let outcome = session.execute(&Task::new(4, 4)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(session.endpoint().calls_for(4), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_then_success() {
        let endpoint =
            ScriptedEndpoint::new().with_script(1, vec![Step::Status(502), Step::Status(503)]);
        let session = session(endpoint, fast_policy());

        let start = tokio::time::Instant::now();
        let outcome = session.execute(&Task::new(1, 1)).await;

        assert_eq!(outcome.response().map(String::as_str), Some("response-1"));
        assert_eq!(outcome.attempts, 3);
        // 1 + 2
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let endpoint = ScriptedEndpoint::new().with_script(7, vec![Step::Status(404)]);
        let session = session(endpoint, fast_policy());

        let outcome = session.execute(&Task::new(7, 7)).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error().map(|e| e.kind), Some(FailureKind::ClientError));
        assert_eq!(session.endpoint().calls_for(7), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempt_budget_with_growing_backoff() {
        let endpoint = ScriptedEndpoint::new().with_script(0, vec![Step::Status(503); 5]);
        let session = session(endpoint, fast_policy());

        let start = tokio::time::Instant::now();
        let outcome = session.execute(&Task::new(0, 0)).await;

        assert_eq!(outcome.attempts, 5);
        assert_eq!(outcome.error().map(|e| e.kind), Some(FailureKind::ServerError));
        // 1 + 2 + 4 + 8
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_times_out_and_retries() {
        let endpoint = ScriptedEndpoint::new().with_script(0, vec![Step::Hang]);
        let policy = fast_policy().with_attempt_timeout(Duration::from_secs(5));
        let session = session(endpoint, policy);

        let outcome = session.execute(&Task::new(0, 0)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(session.endpoint().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_stretches_backoff() {
        let endpoint = ScriptedEndpoint::new().with_script(
            0,
            vec![Step::StatusWithRetryAfter(429, Duration::from_secs(7))],
        );
        let session = session(endpoint, fast_policy());

        let start = tokio::time::Instant::now();
        let outcome = session.execute(&Task::new(0, 0)).await;

        assert!(outcome.is_success());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_is_fatal() {
        let endpoint = ScriptedEndpoint::new().with_script(0, vec![Step::Garbage]);
        let session = session(endpoint, fast_policy());

        let outcome = session.execute(&Task::new(0, 0)).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error().map(|e| e.kind), Some(FailureKind::Decode));
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_failure_is_fatal() {
        let cache = CredentialCache::new(
            Arc::new(volley_inference::EnvCredentialProvider::new(
                "VOLLEY_TEST_TOKEN_UNSET_EXECUTOR",
            )),
            Duration::from_secs(1800),
        );
        let endpoint = ScriptedEndpoint::new();
        let session = Session::new(endpoint, Arc::new(cache), fast_policy());

        let outcome = session.execute(&Task::new(0, 0)).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error().map(|e| e.kind), Some(FailureKind::Credential));
        assert_eq!(session.endpoint().call_count(), 0);
    }
}
