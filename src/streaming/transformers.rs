use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::AppError;
use crate::models::Usage;

/// Result of chunk transformation operations
#[derive(Debug, PartialEq, Eq)]
pub enum TransformResult {
    /// Non-empty content fragment to forward as a `delta` frame
    Delta(String),
    /// Nothing to forward (usage-only, role-only or empty increments)
    Ignore,
}

/// Failures inside the relay loop
#[derive(Debug)]
pub enum StreamError {
    /// The consumer went away; no terminal frame is attempted
    Cancelled,
    /// Provider returned an API error in a stream increment
    ProviderError(String),
    /// Network/connection error while reading the upstream body
    NetworkError(String),
    /// Upstream event payload was not JSON
    ParseError(String),
    /// No upstream increment arrived within the configured bound
    Timeout(Duration),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Cancelled => write!(f, "stream cancelled by consumer"),
            StreamError::ProviderError(msg) => write!(f, "provider error: {}", msg),
            StreamError::NetworkError(msg) => write!(f, "network error: {}", msg),
            StreamError::ParseError(msg) => write!(f, "stream parsing error: {}", msg),
            StreamError::Timeout(after) => write!(f, "no upstream increment within {:?}", after),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<StreamError> for AppError {
    fn from(stream_error: StreamError) -> Self {
        match stream_error {
            StreamError::Cancelled => AppError::Internal("Stream cancelled".to_string()),
            StreamError::ProviderError(msg) => AppError::External(format!("Provider error: {}", msg)),
            StreamError::NetworkError(msg) => AppError::External(format!("Network error: {}", msg)),
            StreamError::ParseError(msg) => AppError::External(format!("Stream parsing error: {}", msg)),
            StreamError::Timeout(after) => AppError::External(format!("Upstream idle for {:?}", after)),
        }
    }
}

/// Provider-specific streaming chunk transformation
///
/// The relay loop owns ordering, cancellation and terminal frames; a
/// transformer only decides what a single upstream increment contributes.
pub trait StreamChunkTransformer: Send + Sync {
    /// Turn a parsed upstream increment into a content fragment, if any
    fn transform_chunk(&self, chunk: &Value) -> Result<TransformResult, StreamError>;

    /// Convert a provider error object to a StreamError
    fn handle_error_chunk(&self, error: &Value) -> StreamError;

    /// Extract usage counters carried by an increment
    fn extract_usage_from_chunk(&self, _chunk: &Value) -> Option<Usage> {
        None
    }
}

/// Transformer for chat-completions style increments (Mistral, OpenAI-compatible).
///
/// Upstream shape is not under our control, so every field is probed:
/// `choices[0].delta.content`, then `choices[0].message.content`, then a
/// top-level `content`. SDK-style payloads wrapped in `data` are unwrapped first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatCompletionTransformer;

impl ChatCompletionTransformer {
    pub fn new() -> Self {
        Self
    }

    fn body(chunk: &Value) -> &Value {
        match chunk.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => chunk,
        }
    }

    fn present(value: Option<&Value>) -> Option<&Value> {
        value.filter(|v| !v.is_null())
    }

    /// First populated content field, in probing order
    fn content_field(body: &Value) -> Option<&Value> {
        let choice = body.get("choices").and_then(|c| c.get(0));
        Self::present(choice.and_then(|c| c.get("delta")).and_then(|d| d.get("content")))
            .or_else(|| Self::present(choice.and_then(|c| c.get("message")).and_then(|m| m.get("content"))))
            .or_else(|| Self::present(body.get("content")))
    }

    fn content_text(content: &Value) -> Option<String> {
        match content {
            Value::String(text) => Some(text.clone()),
            // Content part arrays: keep text parts only
            Value::Array(parts) => {
                let text: String = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                Some(text)
            }
            _ => None,
        }
    }
}

impl StreamChunkTransformer for ChatCompletionTransformer {
    fn transform_chunk(&self, chunk: &Value) -> Result<TransformResult, StreamError> {
        let body = Self::body(chunk);

        if let Some(error_obj) = body.get("error").filter(|e| !e.is_null()) {
            return Err(self.handle_error_chunk(error_obj));
        }

        match Self::content_field(body).and_then(Self::content_text) {
            Some(text) if !text.is_empty() => Ok(TransformResult::Delta(text)),
            _ => Ok(TransformResult::Ignore),
        }
    }

    fn handle_error_chunk(&self, error: &Value) -> StreamError {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("Unknown upstream API error");
        StreamError::ProviderError(message.to_string())
    }

    fn extract_usage_from_chunk(&self, chunk: &Value) -> Option<Usage> {
        let usage = Self::body(chunk).get("usage")?;
        let prompt = usage.get("prompt_tokens").and_then(Value::as_u64);
        let completion = usage.get("completion_tokens").and_then(Value::as_u64);

        // Zeroed counters carry no information
        if prompt.unwrap_or(0) == 0 && completion.unwrap_or(0) == 0 {
            return None;
        }

        Some(Usage { prompt, completion })
    }
}
