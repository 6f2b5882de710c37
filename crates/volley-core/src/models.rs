//! Data model for batched request execution.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

// =============================================================================
// TASK
// =============================================================================

/// One unit of dispatched work: a request descriptor and its position in the
/// batch.
#[derive(Debug, Clone)]
pub struct Task<R> {
    /// Ordinal index within the batch. Outcomes are correlated by this value.
    pub index: usize,
    /// Opaque request descriptor handed to the endpoint.
    pub request: R,
}

impl<R> Task<R> {
    pub fn new(index: usize, request: R) -> Self {
        Self { index, request }
    }

    /// Number a list of requests in order, producing one task per request.
    pub fn batch(requests: impl IntoIterator<Item = R>) -> Vec<Self> {
        requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| Self::new(index, request))
            .collect()
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Terminal result of a task. Exactly one is produced per task.
#[derive(Debug)]
pub struct Outcome<T> {
    /// Index of the task this outcome belongs to.
    pub index: usize,
    /// Number of attempts consumed, including the final one.
    pub attempts: u32,
    /// The response, or the error that ended the task.
    pub result: Result<T, RequestError>,
}

impl<T> Outcome<T> {
    pub fn success(index: usize, attempts: u32, response: T) -> Self {
        Self {
            index,
            attempts,
            result: Ok(response),
        }
    }

    pub fn failure(index: usize, attempts: u32, error: RequestError) -> Self {
        Self {
            index,
            attempts,
            result: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn response(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.result.as_ref().err()
    }
}

// =============================================================================
// CREDENTIAL
// =============================================================================

/// A bearer token and the instant it was acquired.
///
/// Credentials are replaced on refresh, never mutated. The token is kept out
/// of `Debug` output.
#[derive(Clone)]
pub struct Credential {
    token: String,
    acquired_at: Instant,
}

impl Credential {
    /// Wrap a freshly acquired token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            acquired_at: Instant::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether the credential has outlived `ttl`, regardless of whether the
    /// remote service still accepts it.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("age", &self.age())
            .finish()
    }
}

// =============================================================================
// ERROR TAXONOMY
// =============================================================================

/// Classification of a failed attempt.
///
/// The retry decision is a pure function of this value; see
/// [`FailureKind::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote signalled too many requests (HTTP 429).
    RateLimited,
    /// Remote internal error (HTTP 5xx).
    ServerError,
    /// No response within the attempt timeout.
    Timeout,
    /// Connection could not be established or was lost.
    Connection,
    /// Request rejected as invalid (4xx other than 429).
    ClientError,
    /// A successful response could not be parsed.
    Decode,
    /// No credential could be obtained.
    Credential,
    /// The task itself crashed.
    Internal,
}

impl FailureKind {
    /// Default retry predicate: transient remote conditions are retried,
    /// everything else fails the task immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Timeout | Self::Connection
        )
    }

    /// Classify a non-success HTTP status. Returns `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::RateLimited),
            500..=599 => Some(Self::ServerError),
            _ => Some(Self::ClientError),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::ClientError => "client_error",
            Self::Decode => "decode",
            Self::Credential => "credential",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error that ended a single attempt (and, if terminal, its task).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    pub kind: FailureKind,
    /// HTTP status, when the remote answered at all.
    pub status: Option<u16>,
    pub message: String,
    /// Server-requested wait before the next attempt (`Retry-After`).
    pub retry_after: Option<Duration>,
}

impl RequestError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build an error from a non-success HTTP status. A 2xx status here means
    /// the caller has already decided the response is unusable, so it is
    /// classified as a decode failure.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = FailureKind::from_status(status).unwrap_or(FailureKind::Decode);
        Self {
            kind,
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Decode, message)
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Credential, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

// =============================================================================
// ATTEMPT
// =============================================================================

/// One try inside a task's retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Error that ended the attempt, if it failed.
    pub error: Option<RequestError>,
    /// Delay awaited before the next attempt, if one follows.
    pub backoff: Option<Duration>,
}

impl Attempt {
    /// Whether the retry loop stops after this attempt.
    pub fn is_final(&self) -> bool {
        self.backoff.is_none()
    }
}
