use std::fmt;

use super::error::ClientError;
use crate::models::{MetaEvent, StreamEvent, Usage};

type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

/// Optional handlers for each event class of a stream.
///
/// Any handler may be left unset; events of that class are then dropped.
#[derive(Default)]
pub struct StreamCallbacks {
    on_meta: Option<Handler<MetaEvent>>,
    on_delta: Option<Handler<String>>,
    on_final: Option<Handler<Option<Usage>>>,
    on_error: Option<Handler<ClientError>>,
    on_close: Option<Box<dyn Fn() + Send + Sync>>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_meta(mut self, handler: impl Fn(MetaEvent) + Send + Sync + 'static) -> Self {
        self.on_meta = Some(Box::new(handler));
        self
    }

    pub fn on_delta(mut self, handler: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_delta = Some(Box::new(handler));
        self
    }

    pub fn on_final(mut self, handler: impl Fn(Option<Usage>) + Send + Sync + 'static) -> Self {
        self.on_final = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn on_close(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(handler));
        self
    }

    /// Route a validated frame to its handler
    pub(crate) fn dispatch(&self, event: StreamEvent) {
        match event {
            StreamEvent::Meta(meta) => {
                if let Some(handler) = &self.on_meta {
                    handler(meta);
                }
            }
            StreamEvent::Delta(delta) => {
                if let Some(handler) = &self.on_delta {
                    handler(delta.content);
                }
            }
            StreamEvent::Final(done) => {
                if let Some(handler) = &self.on_final {
                    handler(done.usage);
                }
            }
        }
    }

    pub(crate) fn error(&self, error: ClientError) {
        match &self.on_error {
            Some(handler) => handler(error),
            None if error.is_terminal() => log::warn!("Unhandled stream error: {}", error),
            None => log::debug!("Unhandled stream error: {}", error),
        }
    }

    pub(crate) fn close(&self) {
        if let Some(handler) = &self.on_close {
            handler();
        }
    }
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_meta", &self.on_meta.is_some())
            .field("on_delta", &self.on_delta.is_some())
            .field("on_final", &self.on_final.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_by_tag() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (m, d, f) = (seen.clone(), seen.clone(), seen.clone());
        let callbacks = StreamCallbacks::new()
            .on_meta(move |meta| m.lock().unwrap().push(format!("meta:{}", meta.t0)))
            .on_delta(move |content| d.lock().unwrap().push(format!("delta:{}", content)))
            .on_final(move |usage| f.lock().unwrap().push(format!("final:{}", usage.map(|u| u.total()).unwrap_or(0))));

        callbacks.dispatch(StreamEvent::meta(9, false));
        callbacks.dispatch(StreamEvent::delta("x"));
        callbacks.dispatch(StreamEvent::final_with(Some(Usage { prompt: Some(1), completion: Some(2) })));

        assert_eq!(*seen.lock().unwrap(), vec!["meta:9", "delta:x", "final:3"]);
    }

    #[test]
    fn test_missing_handlers_drop_events() {
        let callbacks = StreamCallbacks::new();
        callbacks.dispatch(StreamEvent::delta("ignored"));
        callbacks.error(ClientError::Status { status: 500, body: String::new() });
        callbacks.close();
        assert_eq!(
            format!("{:?}", callbacks),
            "StreamCallbacks { on_meta: false, on_delta: false, on_final: false, on_error: false, on_close: false }"
        );
    }
}
