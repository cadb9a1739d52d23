use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, error};

use super::transformers::StreamError;

const DONE_MARKER: &str = "[DONE]";

/// Represents a parsed SSE event with optional event type and data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl ParsedSseEvent {
    /// OpenAI-style end-of-stream sentinel
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_MARKER
    }
}

type EventResult = Result<eventsource_stream::Event, EventStreamError<std::io::Error>>;

pin_project! {
    /// Adapter that converts an upstream byte stream into parsed SSE events
    ///
    /// This wraps eventsource-stream so the relay loop only deals with whole
    /// `data:` payloads, whatever the network chunking was.
    pub struct SseAdapter {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = EventResult> + Send>>,
    }
}

impl SseAdapter {
    /// Create a new SSE adapter for the given byte stream
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display,
    {
        // eventsource-stream wants a concrete error type
        let mapped_stream = stream.map(|result| {
            result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });

        Self {
            inner: Box::pin(mapped_stream.eventsource()),
        }
    }
}

impl Stream for SseAdapter {
    type Item = Result<ParsedSseEvent, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                let event_type = if event.event.is_empty() || event.event == "message" {
                    None
                } else {
                    Some(event.event)
                };
                let parsed_event = ParsedSseEvent {
                    event_type,
                    data: event.data,
                };
                debug!("Parsed SSE event: {:?}", parsed_event);
                Poll::Ready(Some(Ok(parsed_event)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!("SSE parsing error: {}", e);
                let stream_error = match e {
                    EventStreamError::Transport(io) => StreamError::NetworkError(io.to_string()),
                    other => StreamError::ParseError(other.to_string()),
                };
                Poll::Ready(Some(Err(stream_error)))
            }
            Poll::Ready(None) => {
                debug!("SSE stream ended");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Extension trait to easily convert byte streams to SSE event streams
pub trait IntoSseStream<E> {
    /// Convert this stream into an SSE event stream
    fn into_sse_stream(self) -> SseAdapter;
}

impl<S, E> IntoSseStream<E> for S
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    fn into_sse_stream(self) -> SseAdapter {
        SseAdapter::new(self)
    }
}
