//! OpenAI API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use volley_core::{defaults, Result};

// =============================================================================
// REQUEST DESCRIPTOR
// =============================================================================

/// One request against the API: target path plus JSON body.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Path relative to the base URL, e.g. `/chat/completions`.
    pub path: String,
    pub body: JsonValue,
    /// Read the response as a server-sent event stream.
    pub stream: bool,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>, body: JsonValue) -> Self {
        let stream = body
            .get("stream")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        Self {
            path: path.into(),
            body,
            stream,
        }
    }

    pub fn chat(request: &ChatCompletionRequest) -> Result<Self> {
        Ok(Self::new(
            defaults::CHAT_COMPLETIONS_PATH,
            serde_json::to_value(request)?,
        ))
    }

    pub fn embeddings(request: &EmbeddingRequest) -> Result<Self> {
        Ok(Self::new(
            defaults::EMBEDDINGS_PATH,
            serde_json::to_value(request)?,
        ))
    }
}

/// Successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

/// Body of a successful response.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    /// Parsed JSON document.
    Json(JsonValue),
    /// Concatenated content deltas of an SSE stream.
    Stream { content: String, chunks: usize },
}

impl ApiResponse {
    /// Assistant text: the first choice's message content for JSON
    /// responses, the joined deltas for streams.
    pub fn text(&self) -> Option<String> {
        match &self.body {
            ResponseBody::Json(json) => json
                .pointer("/choices/0/message/content")
                .and_then(JsonValue::as_str)
                .map(|s| s.trim().to_string()),
            ResponseBody::Stream { content, .. } => Some(content.clone()),
        }
    }

    /// Number of vectors in an embeddings response.
    pub fn embedding_count(&self) -> Option<usize> {
        match &self.body {
            ResponseBody::Json(json) => json
                .get("data")
                .and_then(JsonValue::as_array)
                .map(Vec::len),
            ResponseBody::Stream { .. } => None,
        }
    }
}

// =============================================================================
// EMBEDDING TYPES
// =============================================================================

/// Request body for the embeddings endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
}

impl EmbeddingRequest {
    pub fn new(model: impl Into<String>, input: Vec<String>) -> Self {
        Self {
            model: model.into(),
            input,
            encoding_format: Some("float".to_string()),
        }
    }
}

// =============================================================================
// CHAT COMPLETION TYPES
// =============================================================================

/// Request body for chat completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Single user turn, non-streaming.
    pub fn user(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.messages.insert(0, ChatMessage::system(system));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

// =============================================================================
// STREAMING TYPES
// =============================================================================

/// Streaming chunk from chat completions.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Choice within a streaming chunk.
#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
}

/// Delta content in streaming response.
#[derive(Debug, Deserialize)]
pub struct ChunkDelta {
    pub content: Option<String>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Error response body.
#[derive(Debug, Deserialize)]
pub struct OpenAIErrorResponse {
    pub error: OpenAIError,
}

/// Error details.
#[derive(Debug, Deserialize)]
pub struct OpenAIError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatCompletionRequest::user("m", "hi")
            .with_system("be brief")
            .with_max_tokens(70)
            .with_temperature(0.7);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 70);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let json = serde_json::to_value(ChatCompletionRequest::user("m", "hi")).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_api_request_detects_stream_flag() {
        let chat = ChatCompletionRequest::user("m", "hi").with_stream(true);
        let request = ApiRequest::chat(&chat).unwrap();
        assert!(request.stream);
        assert_eq!(request.path, "/chat/completions");

        let embed = EmbeddingRequest::new("e", vec!["a".into()]);
        let request = ApiRequest::embeddings(&embed).unwrap();
        assert!(!request.stream);
        assert_eq!(request.path, "/embeddings");
    }

    #[test]
    fn test_response_text_from_json() {
        let response = ApiResponse {
            status: 200,
            body: ResponseBody::Json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  Hello \n"}}]
            })),
        };
        assert_eq!(response.text().as_deref(), Some("Hello"));
        assert_eq!(response.embedding_count(), None);
    }

    #[test]
    fn test_response_embedding_count() {
        let response = ApiResponse {
            status: 200,
            body: ResponseBody::Json(json!({
                "data": [{"embedding": [0.1], "index": 0}, {"embedding": [0.2], "index": 1}]
            })),
        };
        assert_eq!(response.embedding_count(), Some(2));
        assert_eq!(response.text(), None);
    }

    #[test]
    fn test_error_response_parses_without_type() {
        let body: OpenAIErrorResponse =
            serde_json::from_str(r#"{"error": {"message": "nope"}}"#).unwrap();
        assert_eq!(body.error.message, "nope");
        assert!(body.error.error_type.is_none());
    }
}
