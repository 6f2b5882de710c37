//! OpenAI-compatible endpoint implementation.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use volley_core::{Credential, Endpoint, Error, FailureKind, RequestError, Result};

use super::error::{error_message, parse_retry_after};
use super::streaming::collect_sse_stream;
use super::types::{ApiRequest, ApiResponse, ResponseBody};
use crate::config::EndpointConfig;

/// OpenAI-compatible HTTP endpoint.
///
/// Sends each [`ApiRequest`] as `POST {base_url}{path}` with the attempt's
/// bearer token. One call is one HTTP exchange.
pub struct OpenAIEndpoint {
    client: Client,
    config: EndpointConfig,
}

impl OpenAIEndpoint {
    /// Create a new endpoint with the given configuration.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let mut client_builder = Client::builder().connect_timeout(config.connect_timeout);

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            base_url = %config.base_url,
            "Initializing OpenAI-compatible endpoint"
        );

        Ok(Self { client, config })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(EndpointConfig::default())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Build a POST request with authentication and optional OpenRouter
    /// headers.
    fn build_request(&self, request: &ApiRequest, credential: &Credential) -> reqwest::RequestBuilder {
        let url = self.config.url_for(&request.path);
        let mut req = self
            .client
            .post(&url)
            .header("Authorization", credential.bearer())
            .header("Content-Type", "application/json");

        if request.stream {
            req = req.header("Accept", "text/event-stream");
        }

        if let Some(ref referer) = self.config.http_referer {
            req = req.header("HTTP-Referer", referer);
        }

        if let Some(ref title) = self.config.x_title {
            req = req.header("X-Title", title);
        }

        req.json(&request.body)
    }
}

/// Classify a transport-level reqwest failure (no usable response).
fn transport_error(e: reqwest::Error) -> RequestError {
    if e.is_timeout() {
        RequestError::new(FailureKind::Timeout, format!("Request timed out: {}", e))
    } else {
        RequestError::connection(format!("Request failed: {}", e))
    }
}

#[async_trait]
impl Endpoint for OpenAIEndpoint {
    type Request = ApiRequest;
    type Response = ApiResponse;

    async fn call(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> std::result::Result<ApiResponse, RequestError> {
        debug!(path = %request.path, stream = request.stream, "Sending request");

        let response = self
            .build_request(request, credential)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = parse_retry_after(status, response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(RequestError::from_status(status, error_message(status, &body))
                .with_retry_after(retry_after));
        }

        if request.stream {
            let text = collect_sse_stream(response.bytes_stream()).await?;
            debug!(chunks = text.chunks, response_len = text.content.len(), "Stream complete");
            return Ok(ApiResponse {
                status,
                body: ResponseBody::Stream {
                    content: text.content,
                    chunks: text.chunks,
                },
            });
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        let json = serde_json::from_slice(&bytes).map_err(|e| {
            RequestError::decode(format!("Failed to parse response: {}", e))
        })?;

        debug!(response_len = bytes.len(), "Response received");
        Ok(ApiResponse {
            status,
            body: ResponseBody::Json(json),
        })
    }
}
