//! OpenAI-compatible HTTP endpoint.
//!
//! Works with any server speaking the OpenAI REST dialect:
//!
//! - OpenAI cloud API
//! - Azure OpenAI
//! - vLLM
//! - Ollama (in OpenAI compatibility mode)
//! - LocalAI, LM Studio
//!
//! The endpoint performs one HTTP exchange per call and classifies the
//! result by status code; retries belong to the dispatch core.

mod endpoint;
mod error;
mod streaming;
mod types;

pub use endpoint::OpenAIEndpoint;
pub use error::{error_message, parse_retry_after, ApiErrorCode};
pub use streaming::{collect_sse_stream, StreamedText};
pub use types::*;
