//! OpenAI-specific error handling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};

use volley_core::FailureKind;

use super::types::OpenAIErrorResponse;

/// Longest raw body excerpt kept in an error message.
const MAX_BODY_EXCERPT: usize = 512;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl ApiErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Prefix a remote message with a human-readable cause.
    pub fn describe(self, message: &str) -> String {
        match self {
            Self::AuthenticationError => format!("Authentication failed: {}", message),
            Self::RateLimitExceeded => format!("Rate limit exceeded: {}", message),
            Self::ModelNotFound => format!("Model not found: {}", message),
            Self::ContextLengthExceeded => format!("Context too long: {}", message),
            Self::ServerError => format!("Server error: {}", message),
            Self::Unknown => message.to_string(),
        }
    }
}

/// Build the message for a non-success response from its status and body.
///
/// Uses the structured `{"error": {...}}` payload when present and falls back
/// to a truncated excerpt of the raw body.
pub fn error_message(status: u16, body: &str) -> String {
    let (message, error_type) = match serde_json::from_str::<OpenAIErrorResponse>(body) {
        Ok(parsed) => (
            parsed.error.message,
            parsed.error.error_type.unwrap_or_default(),
        ),
        Err(_) => (excerpt(body), String::new()),
    };

    let message = if message.is_empty() {
        format!("HTTP {}", status)
    } else {
        message
    };

    ApiErrorCode::from_response(status, &error_type).describe(&message)
}

/// Parse a `Retry-After` header, either delta-seconds or an HTTP-date.
///
/// Only meaningful for statuses the retry loop acts on; anything else
/// returns `None`, as does a value no `Duration` can hold.
pub fn parse_retry_after(status: u16, headers: &HeaderMap) -> Option<Duration> {
    if !FailureKind::from_status(status).is_some_and(FailureKind::is_retryable) {
        return None;
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
