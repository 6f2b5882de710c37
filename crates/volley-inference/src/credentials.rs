//! Credential providers.
//!
//! Each provider answers "what is the bearer token right now" and nothing
//! else. Caching and expiry are handled by the credential cache in
//! `volley-jobs`, which invokes a provider only when its cached token goes
//! stale.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use volley_core::{defaults, CredentialProvider, Error, Result};

/// Reads the token from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
    dummy_fallback: bool,
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new(defaults::ENV_API_KEY)
    }
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            dummy_fallback: false,
        }
    }

    /// When the variable is unset, hand out a time-stamped placeholder
    /// (`dummy-key-HHMMSS`) instead of failing. Local OpenAI-compatible
    /// servers accept any token; the stamp makes refreshes visible in logs.
    pub fn with_dummy_fallback(mut self, enabled: bool) -> Self {
        self.dummy_fallback = enabled;
        self
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn fetch(&self) -> Result<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ if self.dummy_fallback => {
                let token = format!("dummy-key-{}", chrono::Local::now().format("%H%M%S"));
                debug!(var = %self.var, "Environment token unset, using placeholder");
                Ok(token)
            }
            _ => Err(Error::Credential(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// Runs an external command and uses its trimmed stdout as the token,
/// e.g. `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct CommandCredentialProvider {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

/// Per-invocation limit for credential commands.
const COMMAND_TIMEOUT_SECS: u64 = 30;

impl CommandCredentialProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }

    /// Split a command line on whitespace: first word is the program, the
    /// rest are arguments. No shell quoting is interpreted.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| Error::Config("credential command is empty".to_string()))?;
        Ok(Self::new(program, words.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CredentialProvider for CommandCredentialProvider {
    async fn fetch(&self) -> Result<String> {
        debug!(program = %self.program, "Running credential command");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            Error::Credential(format!(
                "{} did not finish within {}s",
                self.program,
                self.timeout.as_secs()
            ))
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                program = %self.program,
                status = %output.status,
                "Credential command failed"
            );
            return Err(Error::Credential(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(Error::Credential(format!(
                "{} printed an empty token",
                self.program
            )));
        }
        Ok(token)
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Always returns the same token.
#[derive(Clone)]
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentialProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
