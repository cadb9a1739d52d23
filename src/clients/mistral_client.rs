use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{ChunkStream, CompletionProvider};
use crate::config::settings::AppSettings;
use crate::error::AppError;
use crate::models::UpstreamChatRequest;
use crate::streaming::sse_adapter::IntoSseStream;
use crate::streaming::transformers::StreamError;
use crate::utils::http_client::new_streaming_client;

/// Streaming client for the Mistral chat completions API
pub struct MistralClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl MistralClient {
    pub fn new(app_settings: &AppSettings) -> Result<Self, AppError> {
        let api_key = app_settings
            .upstream
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration("MISTRAL_API_KEY must be set".to_string()))?;

        Ok(Self {
            client: new_streaming_client()?,
            api_key,
            base_url: app_settings.upstream.base_url.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for MistralClient {
    fn name(&self) -> &'static str {
        "mistral"
    }

    #[instrument(skip_all)]
    async fn stream_chat(&self, request: UpstreamChatRequest) -> Result<ChunkStream, AppError> {
        let mut streaming_request = request;
        streaming_request.stream = true;

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&streaming_request)
            .send()
            .await
            .map_err(|e| AppError::External(format!("Mistral request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response".to_string());
            return Err(AppError::External(format!(
                "Mistral streaming request failed with status {}: {}",
                status, error_text
            )));
        }

        debug!("Mistral stream opened with status {}", status);

        let events = response
            .bytes_stream()
            .into_sse_stream()
            .take_while(|event| {
                let keep_going = !matches!(event, Ok(e) if e.is_done());
                async move { keep_going }
            })
            .map(|event| {
                let event = event?;
                serde_json::from_str::<Value>(&event.data).map_err(|e| {
                    warn!("Failed to parse upstream JSON: {} - Data: {}", e, event.data);
                    StreamError::ParseError(e.to_string())
                })
            });

        Ok(Box::pin(events))
    }
}
