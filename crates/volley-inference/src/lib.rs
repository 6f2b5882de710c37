//! # volley-inference
//!
//! External collaborators of the volley dispatch core.
//!
//! This crate provides:
//! - An OpenAI-compatible HTTP [`Endpoint`](volley_core::Endpoint) that
//!   classifies responses by status code, honours `Retry-After`, and
//!   aggregates SSE streams
//! - Chat-completion and embedding payload types
//! - Credential providers backed by an environment variable, an external
//!   command, or a fixed token
//! - A scripted in-process endpoint for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::ScriptedEndpoint`]
//! - `integration`: Enable tests that require a live inference server
//!
//! # Example
//!
//! ```rust,no_run
//! use volley_core::{Credential, Endpoint};
//! use volley_inference::{ApiRequest, ChatCompletionRequest, EndpointConfig, OpenAIEndpoint};
//!
//! #[tokio::main]
//! async fn main() -> volley_core::Result<()> {
//!     let endpoint = OpenAIEndpoint::new(EndpointConfig::from_env())?;
//!     let payload = ChatCompletionRequest::user("default-model", "Say hello");
//!     let request = ApiRequest::chat(&payload)?;
//!     let response = endpoint.call(&request, &Credential::new("sk-...")).await;
//!     println!("{:?}", response.map(|r| r.text()));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod openai;

#[cfg(feature = "mock")]
pub mod mock;

// Re-export core types
pub use volley_core::*;

pub use config::EndpointConfig;
pub use credentials::{CommandCredentialProvider, EnvCredentialProvider, StaticCredentialProvider};
pub use openai::{
    ApiRequest, ApiResponse, ChatCompletionRequest, ChatMessage, EmbeddingRequest,
    OpenAIEndpoint, ResponseBody,
};
