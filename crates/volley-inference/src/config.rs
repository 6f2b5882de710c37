//! Endpoint configuration.

use std::time::Duration;

use volley_core::defaults;

/// Configuration for the OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL for the API endpoint, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    /// TCP connect timeout. The per-attempt wall-clock limit is enforced by
    /// the retry policy, not here.
    pub connect_timeout: Duration,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
    /// HTTP-Referer header for OpenRouter.ai rankings (optional).
    pub http_referer: Option<String>,
    /// X-Title header for app name on OpenRouter.ai (optional).
    pub x_title: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
            skip_tls_verify: false,
            http_referer: None,
            x_title: None,
        }
    }
}

impl EndpointConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `OPENAI_API_BASE` | `http://localhost:8000/v1` | API endpoint |
    /// | `VOLLEY_CONNECT_TIMEOUT_SECS` | `10` | TCP connect timeout |
    /// | `VOLLEY_SKIP_TLS_VERIFY` | `false` | Accept invalid certificates |
    /// | `OPENAI_HTTP_REFERER` | (none) | OpenRouter referer header |
    /// | `OPENAI_X_TITLE` | (none) | OpenRouter title header |
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| defaults::API_BASE_URL.to_string()),
            connect_timeout: std::env::var("VOLLEY_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS)),
            skip_tls_verify: std::env::var("VOLLEY_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
            http_referer: std::env::var("OPENAI_HTTP_REFERER").ok(),
            x_title: std::env::var("OPENAI_X_TITLE").ok(),
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Join a request path onto the base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EndpointConfig::default();
        assert_eq!(config.base_url, defaults::API_BASE_URL);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(!config.skip_tls_verify);
        assert!(config.http_referer.is_none());
        assert!(config.x_title.is_none());
    }

    #[test]
    fn test_url_for_normalizes_slashes() {
        let config = EndpointConfig::default().with_base_url("http://host:8000/v1/");
        assert_eq!(
            config.url_for("/chat/completions"),
            "http://host:8000/v1/chat/completions"
        );
        assert_eq!(config.url_for("embeddings"), "http://host:8000/v1/embeddings");
    }
}
