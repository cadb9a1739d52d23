use actix_web_lab::sse;
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::mock::mock_script;
use super::transformers::{ChatCompletionTransformer, StreamChunkTransformer, StreamError, TransformResult};
use crate::clients::{ChunkStream, CompletionProvider};
use crate::models::{StreamEvent, UpstreamChatRequest, Usage};
use crate::utils::stream_debug_logger::StreamDebugLogger;

/// Frames buffered between the relay task and the response body
const CHANNEL_CAPACITY: usize = 32;

/// Where the frames after `meta` come from
pub enum StreamSource {
    /// Canned reply with a pause before each delta
    Mock { delta_delay: Duration },
    /// No upstream credential: bare `final`
    Unconfigured,
    Upstream {
        provider: Arc<dyn CompletionProvider>,
        request: UpstreamChatRequest,
    },
}

/// Write side of a stream, owned by the relay task
pub struct FrameSink {
    tx: mpsc::Sender<StreamEvent>,
    token: CancellationToken,
}

impl FrameSink {
    /// Queue one frame. A closed channel means the response is gone.
    pub async fn send(&self, event: StreamEvent) -> Result<(), StreamError> {
        if self.token.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.tx.send(event).await.map_err(|_| {
            self.token.cancel();
            StreamError::Cancelled
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep unless the stream is cancelled first
    async fn pause(&self, delay: Duration) -> Result<(), StreamError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Read side of a stream: frames in emission order.
///
/// Holds the guard of the relay's cancellation token, so dropping the
/// response body stops the relay task.
pub struct ChatEventStream {
    rx: mpsc::Receiver<StreamEvent>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl ChatEventStream {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        futures_util::stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }

    /// Convert to an SSE responder for actix-web. `None` sends no keep-alive comments.
    pub fn into_sse(self, keep_alive: Option<Duration>) -> sse::Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
        let frames = self.into_stream().filter_map(|event| async move {
            match sse::Data::new_json(&event) {
                Ok(data) => Some(Ok(sse::Event::Data(data))),
                Err(e) => {
                    error!("Failed to serialize {} frame: {}", event.kind(), e);
                    None
                }
            }
        });

        let sse = sse::Sse::from_stream(frames);
        match keep_alive {
            Some(period) => sse.with_keep_alive(period),
            None => sse,
        }
    }
}

/// Per-request producer: emits `meta`, then relays the source, then `final`.
pub struct StreamRelay {
    request_id: String,
    t0: i64,
    mock: bool,
    source: StreamSource,
    transformer: Box<dyn StreamChunkTransformer>,
    idle_timeout: Option<Duration>,
    debug_logging: bool,
}

impl StreamRelay {
    pub fn new(t0: i64, mock: bool, source: StreamSource) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            t0,
            mock,
            source,
            transformer: Box::new(ChatCompletionTransformer::new()),
            idle_timeout: None,
            debug_logging: false,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Request raw upstream dumps for this stream
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Start the relay task and hand back the frame stream
    pub fn spawn(self) -> ChatEventStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let sink = FrameSink {
            tx,
            token: token.clone(),
        };

        tokio::spawn(self.run(sink));

        ChatEventStream {
            rx,
            token: token.clone(),
            _guard: token.drop_guard(),
        }
    }

    async fn run(self, sink: FrameSink) {
        let request_id = self.request_id.clone();
        info!("Starting chat stream request_id={} mock={}", request_id, self.mock);

        let outcome = match sink.send(StreamEvent::meta(self.t0, self.mock)).await {
            Ok(()) => self.produce(&sink).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => debug!("Chat stream completed request_id={}", request_id),
            Err(StreamError::Cancelled) => {
                info!("Chat stream cancelled by consumer request_id={}", request_id);
            }
            Err(e) => {
                warn!("Chat stream failed request_id={}: {}", request_id, e);
                // Best effort: the consumer may already be gone
                let _ = sink.send(StreamEvent::final_with(None)).await;
            }
        }
    }

    async fn produce(self, sink: &FrameSink) -> Result<(), StreamError> {
        match self.source {
            StreamSource::Mock { delta_delay } => {
                for event in mock_script() {
                    if let StreamEvent::Delta(_) = event {
                        sink.pause(delta_delay).await?;
                    }
                    sink.send(event).await?;
                }
                Ok(())
            }
            StreamSource::Unconfigured => {
                debug!("No upstream credential configured, sending bare final");
                sink.send(StreamEvent::final_with(None)).await
            }
            StreamSource::Upstream { provider, request } => {
                let debug_logger = StreamDebugLogger::new(provider.name(), &self.request_id, self.debug_logging);
                debug_logger.log_stream_start();

                let relayed = relay_upstream(
                    provider.as_ref(),
                    request,
                    self.transformer.as_ref(),
                    self.idle_timeout,
                    &debug_logger,
                    sink,
                )
                .await;

                match relayed {
                    Ok(usage) => {
                        debug_logger.log_stream_end();
                        sink.send(StreamEvent::final_with(usage)).await
                    }
                    Err(e) => {
                        debug_logger.log_error(&e.to_string());
                        Err(e)
                    }
                }
            }
        }
    }
}

/// Forward upstream increments as deltas. Returns the last-seen usage.
async fn relay_upstream(
    provider: &dyn CompletionProvider,
    request: UpstreamChatRequest,
    transformer: &dyn StreamChunkTransformer,
    idle_timeout: Option<Duration>,
    debug_logger: &StreamDebugLogger,
    sink: &FrameSink,
) -> Result<Option<Usage>, StreamError> {
    let mut chunks = tokio::select! {
        biased;
        _ = sink.token().cancelled() => return Err(StreamError::Cancelled),
        opened = provider.stream_chat(request) => {
            opened.map_err(|e| StreamError::NetworkError(e.to_string()))?
        }
    };

    let mut last_usage = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = sink.token().cancelled() => return Err(StreamError::Cancelled),
            next = next_chunk(&mut chunks, idle_timeout) => next?,
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;

        if debug_logger.is_enabled() {
            debug_logger.log_chunk(chunk.to_string().as_bytes());
        }

        let transformed = transformer.transform_chunk(&chunk)?;
        if let Some(usage) = transformer.extract_usage_from_chunk(&chunk) {
            last_usage = Some(usage);
        }
        if let TransformResult::Delta(content) = transformed {
            sink.send(StreamEvent::delta(content)).await?;
        }
    }

    Ok(last_usage)
}

async fn next_chunk(
    chunks: &mut ChunkStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<serde_json::Value, StreamError>>, StreamError> {
    match idle_timeout {
        Some(after) => tokio::time::timeout(after, chunks.next())
            .await
            .map_err(|_| StreamError::Timeout(after)),
        None => Ok(chunks.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{ChatRequest, Message, Role};
    use async_trait::async_trait;
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Provider replaying a fixed list of increments
    struct ScriptedProvider {
        chunks: Vec<Result<Value, &'static str>>,
        open_error: bool,
        seen: Mutex<Option<UpstreamChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(chunks: Vec<Result<Value, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                open_error: false,
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn stream_chat(&self, request: UpstreamChatRequest) -> Result<ChunkStream, AppError> {
            *self.seen.lock().unwrap() = Some(request);
            if self.open_error {
                return Err(AppError::External("upstream refused".into()));
            }
            let items: Vec<Result<Value, StreamError>> = self
                .chunks
                .iter()
                .cloned()
                .map(|c| c.map_err(|e| StreamError::NetworkError(e.to_string())))
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn upstream(provider: Arc<ScriptedProvider>) -> StreamSource {
        let chat = ChatRequest::new("m", vec![Message::new("u1", Role::User, "Hi")]);
        StreamSource::Upstream {
            provider,
            request: UpstreamChatRequest::from(&chat),
        }
    }

    async fn collect(relay: StreamRelay) -> Vec<StreamEvent> {
        relay.spawn().into_stream().collect().await
    }

    fn delta(content: &str) -> Value {
        json!({"choices": [{"delta": {"content": content}}]})
    }

    #[tokio::test]
    async fn test_mock_sequence() {
        let events = collect(StreamRelay::new(42, true, StreamSource::Mock { delta_delay: Duration::ZERO })).await;

        assert_eq!(events.len(), 7);
        assert_eq!(events[0], StreamEvent::meta(42, true));
        assert_eq!(events[1], StreamEvent::delta("Hi"));
        assert_eq!(events[6], StreamEvent::final_with(Some(Usage { prompt: Some(5), completion: Some(6) })));
    }

    #[tokio::test]
    async fn test_unconfigured_sends_meta_then_bare_final() {
        let events = collect(StreamRelay::new(1, false, StreamSource::Unconfigured)).await;
        assert_eq!(events, vec![StreamEvent::meta(1, false), StreamEvent::final_with(None)]);
    }

    #[tokio::test]
    async fn test_relays_deltas_and_last_seen_usage() {
        let provider = ScriptedProvider::new(vec![
            Ok(delta("Hel")),
            Ok(json!({"choices": [{"delta": {"content": ""}}]})),
            Ok(json!({"choices": [{"delta": {"role": "assistant"}}], "usage": {"prompt_tokens": 1, "completion_tokens": 1}})),
            Ok(delta("lo")),
            Ok(json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 2}})),
            Ok(json!({"choices": [], "usage": {"prompt_tokens": 0, "completion_tokens": 0}})),
        ]);

        let events = collect(StreamRelay::new(5, false, upstream(provider))).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::meta(5, false),
                StreamEvent::delta("Hel"),
                StreamEvent::delta("lo"),
                StreamEvent::final_with(Some(Usage { prompt: Some(7), completion: Some(2) })),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_error_object_ends_with_bare_final() {
        let provider = ScriptedProvider::new(vec![
            Ok(delta("partial")),
            Ok(json!({"error": {"message": "overloaded"}})),
            Ok(delta("never")),
        ]);

        let events = collect(StreamRelay::new(5, false, upstream(provider))).await;

        assert_eq!(
            events,
            vec![StreamEvent::meta(5, false), StreamEvent::delta("partial"), StreamEvent::final_with(None)]
        );
    }

    #[tokio::test]
    async fn test_transport_error_ends_with_bare_final() {
        let provider = ScriptedProvider::new(vec![Ok(delta("a")), Err("connection reset")]);
        let events = collect(StreamRelay::new(5, false, upstream(provider))).await;
        assert_eq!(events.last(), Some(&StreamEvent::final_with(None)));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_open_failure_ends_with_bare_final() {
        let provider = Arc::new(ScriptedProvider {
            chunks: vec![],
            open_error: true,
            seen: Mutex::new(None),
        });
        let events = collect(StreamRelay::new(5, false, upstream(provider))).await;
        assert_eq!(events, vec![StreamEvent::meta(5, false), StreamEvent::final_with(None)]);
    }

    #[tokio::test]
    async fn test_preset_reaches_provider_first() {
        let provider = ScriptedProvider::new(vec![]);
        let chat = ChatRequest::new("m", vec![Message::new("u1", Role::User, "Hi")]).with_preset("Be brief.");
        let source = StreamSource::Upstream {
            provider: provider.clone(),
            request: UpstreamChatRequest::from(&chat),
        };

        collect(StreamRelay::new(5, false, source)).await;

        let seen = provider.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.messages[0].role, Role::System);
        assert_eq!(seen.messages[0].content, "Be brief.");
        assert!(seen.stream);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_with_bare_final() {
        struct StalledProvider;

        #[async_trait]
        impl CompletionProvider for StalledProvider {
            fn name(&self) -> &'static str {
                "stalled"
            }

            async fn stream_chat(&self, _request: UpstreamChatRequest) -> Result<ChunkStream, AppError> {
                Ok(Box::pin(stream::pending::<Result<Value, StreamError>>()))
            }
        }

        let chat = ChatRequest::new("m", vec![]);
        let source = StreamSource::Upstream {
            provider: Arc::new(StalledProvider),
            request: UpstreamChatRequest::from(&chat),
        };
        let relay = StreamRelay::new(5, false, source).with_idle_timeout(Some(Duration::from_millis(50)));

        let events = collect(relay).await;
        assert_eq!(events, vec![StreamEvent::meta(5, false), StreamEvent::final_with(None)]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_relay() {
        let relay = StreamRelay::new(5, true, StreamSource::Mock { delta_delay: Duration::from_secs(60) });
        let mut events = relay.spawn();
        assert_eq!(events.recv().await, Some(StreamEvent::meta(5, true)));

        let token = events.cancellation_token();
        assert!(!token.is_cancelled());
        drop(events);
        assert!(token.is_cancelled());
    }
}
