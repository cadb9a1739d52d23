pub mod mistral_client;

pub use mistral_client::*;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::AppError;
use crate::models::UpstreamChatRequest;
use crate::streaming::transformers::StreamError;

/// Parsed upstream increments, in arrival order
pub type ChunkStream = BoxStream<'static, Result<Value, StreamError>>;

/// A chat completion backend able to stream increments.
///
/// Opening the call can fail with an `AppError`; failures after that surface
/// as `StreamError` items.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short lowercase name used in logs and debug file names
    fn name(&self) -> &'static str;

    async fn stream_chat(&self, request: UpstreamChatRequest) -> Result<ChunkStream, AppError>;
}
