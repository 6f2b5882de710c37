//! # volley-jobs
//!
//! Concurrent request execution for volley.
//!
//! This crate provides:
//! - A shared credential cache that refreshes at most once per expiry
//! - A resilient executor that retries transient failures with exponential
//!   backoff and a per-attempt timeout
//! - A dispatcher that runs a batch with a fixed concurrency bound and
//!   returns one outcome per task, in input order
//! - Progress notifications via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use volley_jobs::{CredentialCache, Dispatcher, DispatcherConfig, Session, Task};
//! use volley_inference::{EndpointConfig, EnvCredentialProvider, OpenAIEndpoint, RetryPolicy};
//!
//! let endpoint = OpenAIEndpoint::new(EndpointConfig::from_env())?;
//! let credentials = CredentialCache::from_env(Arc::new(EnvCredentialProvider::default()));
//! let session = Session::new(endpoint, Arc::new(credentials), RetryPolicy::from_env());
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::from_env());
//! let report = dispatcher.run_batch(&session, Task::batch(requests)).await;
//!
//! println!("{}/{} succeeded", report.successful(), report.total());
//! report.ensure_success()?;
//! ```

pub mod credentials;
pub mod dispatcher;
pub mod events;
pub mod executor;

// Re-export core types
pub use volley_core::*;

pub use credentials::{CredentialCache, StalePolicy};
pub use dispatcher::{run_batch, BatchReport, Dispatcher, DispatcherConfig};
pub use events::BatchEvent;
pub use executor::Session;
