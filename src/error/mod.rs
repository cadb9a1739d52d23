use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Request body is not parseable JSON
    MalformedBody(String),
    /// `model` or `messages` missing or of the wrong type
    MissingField(String),
    /// A message failed the `Message` shape check
    InvalidMessage(String),
    /// Caller origin is not in the allow-list
    Forbidden(String),
    Configuration(String),
    External(String),
    Internal(String),
    Serialization(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    error_type: String,
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::MalformedBody(_) => "malformed_body",
            AppError::MissingField(_) => "missing_required_field",
            AppError::InvalidMessage(_) => "invalid_message_shape",
            AppError::Forbidden(_) => "forbidden",
            AppError::Configuration(_) => "configuration_error",
            AppError::External(_) => "external_service_error",
            AppError::Internal(_) => "internal_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MalformedBody(e) => write!(f, "Malformed body: {}", e),
            AppError::MissingField(e) => write!(f, "Missing required field: {}", e),
            AppError::InvalidMessage(e) => write!(f, "Invalid message: {}", e),
            AppError::Forbidden(e) => write!(f, "Forbidden: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::External(e) => write!(f, "External service error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl StdError for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: self.to_string(),
            error_type: self.error_type().to_string(),
        };

        let mut builder = HttpResponse::build(status_code);
        if let AppError::Forbidden(_) = self {
            builder.insert_header((header::VARY, "Origin"));
        }
        builder.json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            AppError::MissingField(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::External(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(format!("JSON deserialization/serialization error: {}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::External(format!("HTTP client error: {}", error))
    }
}

/// Result alias for handlers and configuration
pub type AppResult<T> = Result<T, AppError>;
