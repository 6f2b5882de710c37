//! # volley-core
//!
//! Core types, traits, and abstractions for the volley batch dispatcher.
//!
//! This crate provides the data model shared by every other volley crate:
//! tasks and their outcomes, credentials, the request error taxonomy, the
//! retry policy, and the seam traits that endpoints and credential providers
//! implement.

pub mod defaults;
pub mod error;
pub mod models;
pub mod retry;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use retry::{RetryPolicy, RetryPredicate};
pub use traits::*;
