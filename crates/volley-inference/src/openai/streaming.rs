//! SSE stream parsing for OpenAI-compatible streaming responses.

use futures::{Stream, StreamExt};
use tracing::trace;

use volley_core::RequestError;

use super::types::ChatCompletionChunk;

/// Longest SSE line buffered while waiting for its newline.
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;

/// Content assembled from a completed stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamedText {
    pub content: String,
    /// Number of `data:` events carrying a chunk.
    pub chunks: usize,
}

/// One parsed SSE line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Content(String),
    Done,
    Skip,
}

/// Drain an SSE byte stream into its concatenated content deltas.
///
/// Lines may be split across network chunks, so bytes are buffered until a
/// newline arrives. Transport errors mid-stream are connection failures; an
/// unparseable event is a decode failure, as is a line longer than
/// [`MAX_SSE_LINE_BYTES`].
pub async fn collect_sse_stream<S, B, E>(stream: S) -> Result<StreamedText, RequestError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();
    let mut text = StreamedText::default();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| RequestError::connection(format!("Stream error: {}", e)))?;
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            match parse_sse_line(&String::from_utf8_lossy(&line))? {
                SseLine::Content(piece) => {
                    text.chunks += 1;
                    text.content.push_str(&piece);
                }
                SseLine::Done => {
                    trace!(chunks = text.chunks, "Stream finished");
                    return Ok(text);
                }
                SseLine::Skip => {}
            }
        }

        if buffer.len() > MAX_SSE_LINE_BYTES {
            return Err(RequestError::decode(format!(
                "SSE line exceeds {} bytes without a newline",
                MAX_SSE_LINE_BYTES
            )));
        }
    }

    // Servers that close without a trailing newline
    if !buffer.is_empty() {
        if let SseLine::Content(piece) = parse_sse_line(&String::from_utf8_lossy(&buffer))? {
            text.chunks += 1;
            text.content.push_str(&piece);
        }
    }

    Ok(text)
}

/// Parse a single SSE line and extract content.
fn parse_sse_line(line: &str) -> Result<SseLine, RequestError> {
    let line = line.trim();

    // Skip empty lines, comments, and non-data fields
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();

    // End of stream marker
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| RequestError::decode(format!("Failed to parse SSE chunk: {}", e)))?;

    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();

    Ok(SseLine::Content(content))
}
