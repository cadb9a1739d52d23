use actix_web::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL,
    CONNECTION, CONTENT_TYPE,
};
use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use log::debug;

use crate::error::AppResult;
use crate::middleware::AllowedOrigin;
use crate::models::{AppState, ChatRequest, UpstreamChatRequest};
use crate::streaming::{StreamRelay, StreamSource};

/// Stream a chat reply as SSE frames: `meta`, `delta`*, `final`.
///
/// Body validation happens before anything is streamed, so a bad request gets
/// a plain 400 and never reaches the upstream provider.
pub async fn chat_stream(
    origin: AllowedOrigin,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> AppResult<impl Responder> {
    let t0 = Utc::now().timestamp_millis();
    let request = ChatRequest::from_slice(&body)?;

    let mock = state.is_mock();
    let source = if mock {
        StreamSource::Mock {
            delta_delay: state.settings.streaming.mock_delta_delay(),
        }
    } else {
        match &state.provider {
            Some(provider) => StreamSource::Upstream {
                provider: provider.clone(),
                request: UpstreamChatRequest::from(&request),
            },
            None => StreamSource::Unconfigured,
        }
    };

    let relay = StreamRelay::new(t0, mock, source)
        .with_idle_timeout(state.settings.upstream.idle_timeout())
        .with_debug_logging(state.settings.streaming.debug_logging);

    debug!(
        "Chat stream request_id={} requested by {} for model {} with {} message(s)",
        relay.request_id(),
        origin.as_str(),
        request.model,
        request.messages.len()
    );

    let events = relay.spawn();

    Ok(events
        .into_sse(state.settings.streaming.keep_alive())
        .customize()
        .insert_header((CONTENT_TYPE, "text/event-stream; charset=utf-8"))
        .insert_header((CACHE_CONTROL, "no-cache, no-transform"))
        .insert_header((CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no")))
}

/// CORS preflight for the chat endpoint. Origin headers come from the gate.
pub async fn chat_preflight(_origin: AllowedOrigin) -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header((ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"))
        .insert_header((ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"))
        .insert_header((ACCESS_CONTROL_MAX_AGE, "600"))
        .finish()
}
