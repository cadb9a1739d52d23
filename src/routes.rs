use actix_web::web;

use crate::handlers;
use crate::middleware::OriginGate;
use crate::models::AppState;

/// Routes under the gated `/api` scope.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/chat")
            .route(web::post().to(handlers::chat_handlers::chat_stream))
            .route(web::method(actix_web::http::Method::OPTIONS).to(handlers::chat_handlers::chat_preflight)),
    );
}

/// Full application: shared state and body limit, public health check and the gated `/api` scope.
pub fn configure_app(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let gate = OriginGate::new(state.settings.server.allowed_origins.clone());
        let payload_limit = state.settings.server.max_request_body_bytes;

        cfg.app_data(web::Data::new(state))
            .app_data(web::PayloadConfig::new(payload_limit))
            // Register health check endpoint without the origin gate
            .service(web::resource("/health").route(web::get().to(handlers::health::health_check)))
            .service(web::scope("/api").wrap(gate).configure(configure_routes));
    }
}
