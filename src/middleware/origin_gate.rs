use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{self, HeaderMap, HeaderValue},
    Error, HttpMessage, ResponseError,
};
use futures_util::future::{ok, ready, Ready};
use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::AppError;

/// Caller origin that passed the allow-list check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedOrigin(pub String);

impl AllowedOrigin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl actix_web::FromRequest for AllowedOrigin {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let origin = req.extensions().get::<AllowedOrigin>().cloned();
        let request_path = req.path().to_string();

        ready(origin.ok_or_else(|| {
            log::error!("AllowedOrigin not found in request extensions for path: {}", request_path);
            AppError::Forbidden("Origin not allowed".to_string()).into()
        }))
    }
}

/// Declared origin of a request: `Origin`, else the origin of `Referer`.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        return Some(origin.to_string());
    }

    let referer = headers.get(header::REFERER)?.to_str().ok()?;
    let parsed = url::Url::parse(referer).ok()?;
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// Rejects requests whose origin is not in the allow-list.
///
/// Matching is exact and case-sensitive. Rejections never reach the handler;
/// accepted requests get the origin echoed back with `Vary: Origin`.
#[derive(Clone)]
pub struct OriginGate {
    allowed_origins: Arc<Vec<String>>,
}

impl OriginGate {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        debug!("OriginGate initialised with {} allowed origin(s)", allowed_origins.len());
        Self {
            allowed_origins: Arc::new(allowed_origins),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for OriginGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = OriginGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(OriginGateMiddleware {
            service: Arc::new(service),
            allowed_origins: self.allowed_origins.clone(),
        })
    }
}

pub struct OriginGateMiddleware<S> {
    service: Arc<S>,
    allowed_origins: Arc<Vec<String>>,
}

impl<S, B> Service<ServiceRequest> for OriginGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let origin = request_origin(req.headers());

        let matched = match origin {
            Some(origin) if self.allowed_origins.iter().any(|allowed| *allowed == origin) => origin,
            other => {
                warn!(
                    "Rejected {} {} from origin {:?}",
                    req.method(),
                    req.path(),
                    other.as_deref().unwrap_or("<none>")
                );
                return Box::pin(ready(Ok(forbidden(req))));
            }
        };

        let echoed = match HeaderValue::from_str(&matched) {
            Ok(value) => value,
            Err(_) => return Box::pin(ready(Ok(forbidden(req)))),
        };

        req.extensions_mut().insert(AllowedOrigin(matched));
        let service = self.service.clone();

        Box::pin(async move {
            let mut res = service.call(req).await?.map_into_left_body();
            let headers = res.headers_mut();
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, echoed);
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
            Ok(res)
        })
    }
}

/// 403 rendered by `AppError`, short-circuiting the wrapped service
fn forbidden<B>(req: ServiceRequest) -> ServiceResponse<EitherBody<B>> {
    let response = AppError::Forbidden("Origin not allowed".to_string()).error_response();
    req.into_response(response).map_into_right_body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, web, App, HttpResponse};

    async fn echo(origin: AllowedOrigin) -> HttpResponse {
        HttpResponse::Ok().body(origin.0)
    }

    macro_rules! gated_app {
        () => {
            actix_test::init_service(
                App::new().service(
                    web::scope("/api")
                        .wrap(OriginGate::new(vec![
                            "http://localhost:3000".to_string(),
                            "https://chat.example.com".to_string(),
                        ]))
                        .route("/echo", web::post().to(echo)),
                ),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn test_allowed_origin_is_echoed() {
        let app = gated_app!();
        let req = actix_test::TestRequest::post()
            .uri("/api/echo")
            .insert_header((header::ORIGIN, "https://chat.example.com"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://chat.example.com"
        );
        assert_eq!(resp.headers().get(header::VARY).unwrap(), "Origin");
        assert_eq!(actix_test::read_body(resp).await, "https://chat.example.com");
    }

    #[actix_rt::test]
    async fn test_unknown_and_missing_origins_are_forbidden() {
        let app = gated_app!();
        for origin in [Some("https://evil.example"), Some("HTTP://LOCALHOST:3000"), None] {
            let mut req = actix_test::TestRequest::post().uri("/api/echo");
            if let Some(origin) = origin {
                req = req.insert_header((header::ORIGIN, origin));
            }
            let resp = actix_test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "origin {:?}", origin);
            assert_eq!(resp.headers().get(header::VARY).unwrap(), "Origin");
        }
    }

    #[actix_rt::test]
    async fn test_referer_fallback() {
        let app = gated_app!();
        let req = actix_test::TestRequest::post()
            .uri("/api/echo")
            .insert_header((header::REFERER, "http://localhost:3000/chat?id=4"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(actix_test::read_body(resp).await, "http://localhost:3000");
    }

    #[test]
    fn test_request_origin_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_origin(&headers), None);

        headers.insert(header::REFERER, HeaderValue::from_static("not a url"));
        assert_eq!(request_origin(&headers), None);

        headers.insert(header::REFERER, HeaderValue::from_static("https://a.test:8443/path"));
        assert_eq!(request_origin(&headers).as_deref(), Some("https://a.test:8443"));

        headers.insert(header::ORIGIN, HeaderValue::from_static("https://b.test"));
        assert_eq!(request_origin(&headers).as_deref(), Some("https://b.test"));
    }
}
