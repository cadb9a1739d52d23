use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::models::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    version: String,
    mock: bool,
    upstream_configured: bool,
}

pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    // Public endpoint: report mode flags only, never credentials
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mock: state.is_mock(),
        upstream_configured: state.provider.is_some(),
    };

    HttpResponse::Ok().json(response)
}
