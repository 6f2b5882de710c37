//! Shared, lazily refreshed credential cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use volley_core::{defaults, Credential, CredentialProvider, CredentialSource, Error, Result};

/// What to do when a refresh fails but an older credential is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Keep serving the last credential; surface the failure only if none
    /// was ever obtained.
    #[default]
    ServeStale,
    /// Every failed refresh is an error.
    FailHard,
}

#[derive(Debug, Default)]
struct CacheState {
    current: Option<Arc<Credential>>,
    /// Bumped on every completed refresh, successful or not.
    generation: u64,
    last_error: Option<String>,
    invalidated: bool,
}

impl CacheState {
    fn fresh(&self, ttl: Duration) -> Option<Arc<Credential>> {
        match &self.current {
            Some(cred) if !self.invalidated && !cred.is_expired(ttl) => Some(cred.clone()),
            _ => None,
        }
    }

    /// Result of the most recent refresh as seen by a caller that waited on it.
    fn settled(&self, policy: StalePolicy) -> Result<Arc<Credential>> {
        match (&self.last_error, &self.current, policy) {
            (None, Some(cred), _) => Ok(cred.clone()),
            (Some(_), Some(cred), StalePolicy::ServeStale) => Ok(cred.clone()),
            (Some(err), _, _) => Err(Error::Credential(err.clone())),
            (None, None, _) => Err(Error::Credential("no credential available".into())),
        }
    }
}

/// Credential cache shared by every task in a batch.
///
/// Reads are lock-free with respect to refreshing: a caller holding a fresh
/// credential never waits. When the credential is missing or older than the
/// TTL, one caller refreshes under the refresh lock while the others queue
/// on it and reuse whatever that refresh produced.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    ttl: Duration,
    stale_policy: StalePolicy,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
}

impl CredentialCache {
    /// Create a cache over `provider` with the given expiry window.
    pub fn new(provider: Arc<dyn CredentialProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            stale_policy: StalePolicy::default(),
            state: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Create a cache whose TTL comes from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VOLLEY_CREDENTIAL_TTL_SECS` | `1800` | Credential lifetime before refresh |
    pub fn from_env(provider: Arc<dyn CredentialProvider>) -> Self {
        let ttl_secs = std::env::var("VOLLEY_CREDENTIAL_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::CREDENTIAL_TTL_SECS);
        Self::new(provider, Duration::from_secs(ttl_secs))
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stale_policy(&self) -> StalePolicy {
        self.stale_policy
    }

    /// Number of provider invocations so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Force the next caller to refresh. The old credential stays available
    /// as a stale fallback.
    pub async fn invalidate(&self) {
        self.state.write().await.invalidated = true;
        debug!(subsystem = "credentials", "Credential invalidated");
    }

    /// Return a usable credential, refreshing at most once per expiry.
    pub async fn credential(&self) -> Result<Arc<Credential>> {
        let observed = {
            let state = self.state.read().await;
            if let Some(cred) = state.fresh(self.ttl) {
                return Ok(cred);
            }
            state.generation
        };

        let _guard = self.refresh_lock.lock().await;

        {
            let state = self.state.read().await;
            if state.generation != observed {
                // A refresh finished while we were queued
                return state.settled(self.stale_policy);
            }
            if let Some(cred) = state.fresh(self.ttl) {
                return Ok(cred);
            }
        }

        self.refresh().await
    }

    /// Invoke the provider and publish the result. Caller holds the refresh
    /// lock.
    async fn refresh(&self) -> Result<Arc<Credential>> {
        let attempt = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        let fetched = self.provider.fetch().await;

        let mut state = self.state.write().await;
        state.generation += 1;

        match fetched {
            Ok(token) => {
                let cred = Arc::new(Credential::new(token));
                state.current = Some(cred.clone());
                state.last_error = None;
                state.invalidated = false;
                info!(
                    subsystem = "credentials",
                    provider = self.provider.name(),
                    refresh = attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Credential refreshed"
                );
                Ok(cred)
            }
            Err(e) => {
                let message = e.to_string();
                state.last_error = Some(message.clone());
                let fallback = match self.stale_policy {
                    StalePolicy::ServeStale => state.current.clone(),
                    StalePolicy::FailHard => None,
                };
                warn!(
                    subsystem = "credentials",
                    provider = self.provider.name(),
                    refresh = attempt,
                    error = %message,
                    serving_stale = fallback.is_some(),
                    "Credential refresh failed"
                );
                fallback.ok_or(Error::Credential(message))
            }
        }
    }
}

#[async_trait]
impl CredentialSource for CredentialCache {
    async fn credential(&self) -> Result<Arc<Credential>> {
        CredentialCache::credential(self).await
    }
}
