use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub model: Option<String>,
    pub preset: Option<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            model: None,
            preset: None,
        }
    }
}

/// Body of `POST /api/chat`
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub preset: Option<String>,
    pub stream: Option<bool>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            preset: None,
            stream: None,
        }
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    /// Validate a raw request body.
    ///
    /// Checks run in order and stop at the first failure: the body must be
    /// JSON, `model` must be a non-empty string and `messages` an array, then
    /// every message must match the `Message` shape with a non-empty `id`.
    pub fn from_slice(body: &[u8]) -> Result<Self, AppError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedBody(format!("Request body is not valid JSON: {}", e)))?;

        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| AppError::MissingField("model must be a non-empty string".to_string()))?
            .to_string();

        let raw_messages = payload
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::MissingField("messages must be an array".to_string()))?;

        let mut messages = Vec::with_capacity(raw_messages.len());
        for (index, raw) in raw_messages.iter().enumerate() {
            let message: Message = serde_json::from_value(raw.clone())
                .map_err(|e| AppError::InvalidMessage(format!("messages[{}]: {}", index, e)))?;
            if message.id.is_empty() {
                return Err(AppError::InvalidMessage(format!("messages[{}]: id must not be empty", index)));
            }
            messages.push(message);
        }

        let preset = payload
            .get("preset")
            .and_then(Value::as_str)
            .map(str::to_string);
        let stream = payload.get("stream").and_then(Value::as_bool);

        Ok(Self {
            model,
            messages,
            preset,
            stream,
        })
    }

    /// Messages as sent upstream: an optional preset system message first,
    /// then the conversation reduced to role and content.
    pub fn upstream_messages(&self) -> Vec<UpstreamMessage> {
        let preset = self
            .preset
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| UpstreamMessage {
                role: Role::System,
                content: p.clone(),
            });

        preset
            .into_iter()
            .chain(self.messages.iter().map(|m| UpstreamMessage {
                role: m.role,
                content: m.content.clone(),
            }))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: String,
}

/// Payload for the upstream chat completions call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamChatRequest {
    pub model: String,
    pub messages: Vec<UpstreamMessage>,
    pub stream: bool,
}

impl From<&ChatRequest> for UpstreamChatRequest {
    fn from(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.upstream_messages(),
            stream: true,
        }
    }
}
