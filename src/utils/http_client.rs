use reqwest::Client;
use std::time::Duration;

use crate::error::AppError;

/// Client for long-lived streaming calls.
///
/// No overall request timeout: a stream stays open as long as the peer keeps it
/// open. Stalled upstream streams are bounded separately by the relay's idle timeout.
pub fn new_streaming_client() -> Result<Client, AppError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        // Less than common 5-minute server keep-alive timeouts to avoid reusing stale connections
        .pool_idle_timeout(Some(Duration::from_secs(240)))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))
}
