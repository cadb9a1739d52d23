use futures_util::StreamExt;
use reqwest::header::{ACCEPT, ORIGIN};
use reqwest::Client;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::callbacks::StreamCallbacks;
use super::decoder::{parse_frame, FrameDecoder};
use super::error::ClientError;
use super::metrics::{json_byte_length, StreamMetrics};
use crate::error::AppError;
use crate::models::{ChatRequest, StreamEvent};
use crate::utils::http_client::new_streaming_client;

/// Lifecycle of one stream; `Streaming` is skipped when the request fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Requesting = 1,
    Streaming = 2,
    Closed = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Requesting,
            2 => StreamState::Streaming,
            3 => StreamState::Closed,
            _ => StreamState::Idle,
        }
    }
}

#[derive(Debug, Default)]
struct SharedState(AtomicU8);

impl SharedState {
    fn set(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Control handle for one open stream
#[derive(Debug, Clone)]
pub struct StreamHandle {
    cancel: CancellationToken,
    done: CancellationToken,
    state: Arc<SharedState>,
    metrics: Arc<Mutex<StreamMetrics>>,
}

impl StreamHandle {
    /// Abort the request or read in flight. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the stream task has finished and `on_close` has run
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    /// Snapshot of the figures gathered so far
    pub fn metrics(&self) -> StreamMetrics {
        match self.metrics.lock() {
            Ok(metrics) => metrics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Consumer of the chat event stream
#[derive(Debug, Clone)]
pub struct ChatStreamClient {
    http: Client,
    endpoint: Url,
    origin: Option<String>,
}

impl ChatStreamClient {
    pub fn new(endpoint: Url) -> Result<Self, AppError> {
        Ok(Self {
            http: new_streaming_client()?,
            endpoint,
            origin: None,
        })
    }

    /// Client for `POST {base}/api/chat`
    pub fn for_base_url(base_url: &str) -> Result<Self, AppError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("/api/chat"))
            .map_err(|e| AppError::Configuration(format!("Invalid stream endpoint {}: {}", base_url, e)))?;
        Self::new(endpoint)
    }

    /// Declared origin sent with every request
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Start streaming `request`. Events reach `callbacks` in emission order
    /// from a background task; `on_close` fires exactly once at the end.
    pub fn open(&self, request: ChatRequest, callbacks: StreamCallbacks) -> StreamHandle {
        let mut request = request;
        request.stream = Some(true);

        let request_bytes = json_byte_length(&request).unwrap_or(0);
        let handle = StreamHandle {
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            state: Arc::new(SharedState::default()),
            metrics: Arc::new(Mutex::new(StreamMetrics::start(request_bytes))),
        };

        let task = StreamTask {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            origin: self.origin.clone(),
            request,
            callbacks,
            handle: handle.clone(),
        };
        tokio::spawn(task.run());

        handle
    }
}

struct StreamTask {
    http: Client,
    endpoint: Url,
    origin: Option<String>,
    request: ChatRequest,
    callbacks: StreamCallbacks,
    handle: StreamHandle,
}

impl StreamTask {
    async fn run(self) {
        self.handle.state.set(StreamState::Requesting);

        let outcome = tokio::select! {
            biased;
            _ = self.handle.cancel.cancelled() => {
                info!("Chat stream cancelled by caller");
                Ok(())
            }
            result = self.read() => result,
        };

        if let Err(error) = outcome {
            debug!("Chat stream failed: {}", error);
            self.callbacks.error(error);
        }

        self.handle.state.set(StreamState::Closed);
        self.callbacks.close();
        self.handle.done.cancel();
    }

    async fn read(&self) -> Result<(), ClientError> {
        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "text/event-stream")
            .json(&self.request);
        if let Some(origin) = &self.origin {
            builder = builder.header(ORIGIN, origin);
        }

        let response = builder.send().await.map_err(ClientError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        self.handle.state.set(StreamState::Streaming);

        let mut decoder = FrameDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ClientError::Read)?;
            for line in decoder.push(&chunk) {
                self.handle_line(&line);
            }
        }

        if let Some(rest) = decoder.finish() {
            self.handle_line(&rest);
        }

        Ok(())
    }

    fn handle_line(&self, line: &str) {
        match parse_frame(line) {
            Some(Ok(event)) => {
                self.record(&event);
                self.callbacks.dispatch(event);
            }
            Some(Err(error)) => self.callbacks.error(error),
            None => {}
        }
    }

    fn record(&self, event: &StreamEvent) {
        let Ok(mut metrics) = self.handle.metrics.lock() else {
            return;
        };
        match event {
            StreamEvent::Meta(meta) => metrics.record_meta(meta),
            StreamEvent::Delta(delta) => metrics.record_delta(&delta.content),
            StreamEvent::Final(done) => metrics.record_final(done.usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Role, Usage};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        closes: AtomicUsize,
    }

    impl Recorder {
        fn callbacks(self: &Arc<Self>) -> StreamCallbacks {
            let (m, d, f, e, c) = (self.clone(), self.clone(), self.clone(), self.clone(), self.clone());
            StreamCallbacks::new()
                .on_meta(move |meta| m.push(format!("meta:{}", meta.t0)))
                .on_delta(move |content| d.push(format!("delta:{}", content)))
                .on_final(move |usage| f.push(format!("final:{:?}", usage)))
                .on_error(move |error| e.push(format!("error:{}", error)))
                .on_close(move || {
                    c.closes.fetch_add(1, Ordering::SeqCst);
                })
        }

        fn push(&self, entry: String) {
            self.events.lock().unwrap().push(entry);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![Message::new("u1", Role::User, "Hi")])
    }

    fn client_for(server: &mockito::Server) -> ChatStreamClient {
        ChatStreamClient::for_base_url(&server.url())
            .unwrap()
            .with_origin("http://localhost:3000")
    }

    #[tokio::test]
    async fn test_full_stream_dispatches_in_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_header("origin", "http://localhost:3000")
            .match_body(mockito::Matcher::PartialJsonString(r#"{"stream":true,"model":"m"}"#.to_string()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"type\":\"meta\",\"t0\":10,\"mock\":false}\n\n",
                ": keep-alive\n\n",
                "data: {not json}\n\n",
                "data: {\"type\":\"delta\",\"content\":\"Hel\"}\n\n",
                "data: {\"type\":\"usage\",\"n\":1}\n\n",
                "data: {\"type\":\"delta\",\"content\":\"lo\"}\n\n",
                "data: {\"type\":\"final\",\"usage\":{\"prompt\":2,\"completion\":3}}",
            ))
            .create_async()
            .await;

        let recorder = Arc::new(Recorder::default());
        let handle = client_for(&server).open(request(), recorder.callbacks());
        handle.closed().await;

        mock.assert_async().await;
        let events = recorder.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], "meta:10");
        assert!(events[1].starts_with("error:malformed frame"));
        assert_eq!(events[2], "delta:Hel");
        assert_eq!(events[3], "delta:lo");
        assert_eq!(
            events[4],
            format!("final:{:?}", Some(Usage { prompt: Some(2), completion: Some(3) }))
        );
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), StreamState::Closed);

        let metrics = handle.metrics();
        assert_eq!(metrics.response_bytes, 5);
        assert_eq!(metrics.tokens, Some(5));
        assert!(metrics.request_bytes > 0);
    }

    #[tokio::test]
    async fn test_error_status_reports_and_closes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(403)
            .with_body("Forbidden")
            .create_async()
            .await;

        let recorder = Arc::new(Recorder::default());
        let handle = client_for(&server).open(request(), recorder.callbacks());
        handle.closed().await;

        assert_eq!(
            recorder.events(),
            vec!["error:stream request rejected with status 403: Forbidden".to_string()]
        );
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_usage_still_closes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(concat!(
                "data: {\"type\":\"meta\",\"t0\":1}\n\n",
                "data: {\"type\":\"final\",\"usage\":{\"prompt\":18446744073709551615,\"completion\":1}}\n\n",
            ))
            .create_async()
            .await;

        let recorder = Arc::new(Recorder::default());
        let handle = client_for(&server).open(request(), recorder.callbacks());
        tokio::time::timeout(Duration::from_secs(5), handle.closed())
            .await
            .expect("stream should close");

        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), StreamState::Closed);
        assert_eq!(handle.metrics().tokens, Some(u64::MAX));
        assert_eq!(recorder.events().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_request_error() {
        // Nothing listens on the discard port
        let client = ChatStreamClient::for_base_url("http://127.0.0.1:9").unwrap();
        let recorder = Arc::new(Recorder::default());
        let handle = client.open(request(), recorder.callbacks());
        handle.closed().await;

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error:request failed"));
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_closes_once() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_chunked_body(|writer| {
                writer.write_all(b"data: {\"type\":\"meta\",\"t0\":1}\n\n")?;
                std::thread::sleep(Duration::from_secs(2));
                writer.write_all(b"data: {\"type\":\"delta\",\"content\":\"late\"}\n\n")
            })
            .create_async()
            .await;

        let recorder = Arc::new(Recorder::default());
        let handle = client_for(&server).open(request(), recorder.callbacks());

        handle.cancel();
        handle.cancel();
        handle.closed().await;
        handle.cancel();

        assert!(handle.is_cancelled());
        assert_eq!(handle.state(), StreamState::Closed);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
        assert!(!recorder.events().iter().any(|e| e == "delta:late"));
    }
}
