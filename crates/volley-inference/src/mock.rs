//! Scripted in-process endpoint for deterministic testing.
//!
//! Each request is a `usize` key. Per key, a script of [`Step`]s decides what
//! successive calls return; once a script runs out, calls succeed. The
//! endpoint records every call and tracks how many are in flight at once.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use volley_inference::mock::{ScriptedEndpoint, Step};
//!
//! let endpoint = ScriptedEndpoint::new()
//!     .with_script(2, vec![Step::Status(429), Step::Succeed])
//!     .with_script(7, vec![Step::Status(404)]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use volley_core::{Credential, Endpoint, RequestError};

/// What one call to a key does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return `"response-{key}"`.
    Succeed,
    /// Fail as if the server answered with this status.
    Status(u16),
    /// Fail with this status and a `Retry-After`.
    StatusWithRetryAfter(u16, Duration),
    /// Never answer; only a timeout ends the attempt.
    Hang,
    /// Fail as a dropped connection.
    Disconnect,
    /// Answer 200 with an unparseable body.
    Garbage,
    /// Panic inside the call.
    Panic,
}

/// Record of one call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub key: usize,
    pub token: String,
}

#[derive(Debug, Default)]
struct MockConfig {
    scripts: HashMap<usize, VecDeque<Step>>,
    latency: Duration,
    latencies: HashMap<usize, Duration>,
    random_latency: Option<Duration>,
}

/// Mock endpoint driven by per-key scripts.
#[derive(Clone, Default)]
pub struct ScriptedEndpoint {
    config: Arc<Mutex<MockConfig>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight counter however the call ends.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedEndpoint {
    /// Create an endpoint where every call succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the steps for successive calls with `key`.
    pub fn with_script(self, key: usize, steps: Vec<Step>) -> Self {
        self.config
            .lock()
            .unwrap()
            .scripts
            .insert(key, steps.into());
        self
    }

    /// Latency applied to every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.config.lock().unwrap().latency = latency;
        self
    }

    /// Latency for one key, overriding the shared latency.
    pub fn with_key_latency(self, key: usize, latency: Duration) -> Self {
        self.config.lock().unwrap().latencies.insert(key, latency);
        self
    }

    /// Random latency in `[0, max]` per call, overriding the others.
    pub fn with_random_latency(self, max: Duration) -> Self {
        self.config.lock().unwrap().random_latency = Some(max);
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Total number of calls.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Number of calls made with `key`.
    pub fn calls_for(&self, key: usize) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.key == key)
            .count()
    }

    /// Calls currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever executing at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, key: usize) -> (Step, Duration) {
        let mut config = self.config.lock().unwrap();
        let latency = match config.random_latency {
            Some(max) if !max.is_zero() => {
                let ms = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
                Duration::from_millis(ms)
            }
            _ => config.latencies.get(&key).copied().unwrap_or(config.latency),
        };
        let step = config
            .scripts
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Succeed);
        (step, latency)
    }
}

#[async_trait]
impl Endpoint for ScriptedEndpoint {
    type Request = usize;
    type Response = String;

    async fn call(&self, key: &usize, credential: &Credential) -> Result<String, RequestError> {
        let key = *key;
        self.call_log.lock().unwrap().push(MockCall {
            key,
            token: credential.token().to_string(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        let (step, latency) = self.next_step(key);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match step {
            Step::Succeed => Ok(format!("response-{}", key)),
            Step::Status(status) => Err(RequestError::from_status(
                status,
                format!("scripted status {}", status),
            )),
            Step::StatusWithRetryAfter(status, wait) => Err(RequestError::from_status(
                status,
                format!("scripted status {}", status),
            )
            .with_retry_after(Some(wait))),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            Step::Disconnect => Err(RequestError::connection("scripted disconnect")),
            Step::Garbage => Err(RequestError::decode("scripted garbage body")),
            Step::Panic => panic!("scripted panic for key {}", key),
        }
    }
}
