//! Centralized default constants for volley.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the CLI reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// ENDPOINT
// =============================================================================

/// Default base URL of the OpenAI-compatible API.
pub const API_BASE_URL: &str = "http://localhost:8000/v1";

/// Default model name sent in request payloads.
pub const MODEL_NAME: &str = "default-model";

/// Path of the chat completions endpoint, relative to the base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Path of the embeddings endpoint, relative to the base URL.
pub const EMBEDDINGS_PATH: &str = "/embeddings";

/// TCP connect timeout for the HTTP client in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Environment variable holding the bearer token.
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";

/// How long an acquired credential is considered fresh (30 minutes).
pub const CREDENTIAL_TTL_SECS: u64 = 30 * 60;

// =============================================================================
// RETRY
// =============================================================================

/// Maximum number of attempts per task, including the first.
pub const MAX_ATTEMPTS: u32 = 5;

/// Backoff before the second attempt, in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Upper bound on the exponential part of the backoff, in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 16_000;

/// Upper bound of the uniform random jitter added to each backoff.
pub const JITTER_MS: u64 = 1_000;

/// Longest server-requested `Retry-After` wait honoured, in seconds.
pub const MAX_RETRY_AFTER_SECS: u64 = 120;

/// Wall-clock timeout applied to each attempt, in seconds.
pub const ATTEMPT_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// DISPATCH
// =============================================================================

/// Default maximum number of tasks executing at once.
pub const CONCURRENCY_LIMIT: usize = 3;

/// Default number of requests the CLI sends in one batch.
pub const BATCH_SIZE: usize = 10;

/// Capacity of the batch event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
