//! Relaychat Server Library
//!
//! Streaming chat relay: the actix-web producer that turns an upstream
//! completion into `meta`/`delta`/`final` SSE frames, and the client that
//! consumes them.

pub mod client;
pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod streaming;
pub mod utils;

// Re-export commonly used types for convenience
pub use client::{ChatStreamClient, ClientError, StreamCallbacks, StreamHandle};
pub use config::AppSettings;
pub use error::AppError;
pub use models::runtime_config::AppState;
pub use models::StreamEvent;
