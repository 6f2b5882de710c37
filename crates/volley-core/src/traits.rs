//! Core traits for volley abstractions.
//!
//! These traits are the seams between the dispatch core and its external
//! collaborators: the remote endpoint and the credential supply. Concrete
//! implementations live in `volley-inference` (HTTP) and `volley-jobs`
//! (credential cache); tests plug in fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Credential, RequestError};

/// A remote service that accepts one request per call.
///
/// Implementations perform exactly one network exchange per call and report
/// failures as a classified [`RequestError`]; retries, timeouts and
/// credential refresh are the caller's concern.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Request descriptor (payload plus target).
    type Request: Send + Sync;
    /// Parsed successful response.
    type Response: Send;

    async fn call(
        &self,
        request: &Self::Request,
        credential: &Credential,
    ) -> std::result::Result<Self::Response, RequestError>;
}

/// Acquires a bearer token from wherever tokens come from (environment,
/// an external command, an OAuth flow).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<String>;

    /// Short label used in logs.
    fn name(&self) -> &str;
}

/// Supplies the credential to use for the next attempt.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self) -> Result<Arc<Credential>>;
}

