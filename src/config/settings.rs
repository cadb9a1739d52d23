use std::env;
use std::time::Duration;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
/// 8 MiB: room for long conversation histories
const DEFAULT_MAX_REQUEST_BODY_BYTES: &str = "8388608";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub streaming: StreamingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Exact-match allow-list for the caller's declared origin
    pub allowed_origins: Vec<String>,
    /// Upper bound on a chat request body
    pub max_request_body_bytes: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// `None` means upstream calls are impossible; streams degrade to a bare final.
    pub api_key: Option<String>,
    pub base_url: String,
    /// Bound on the wait for the next upstream increment. `None` waits forever.
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub mock: bool,
    pub mock_delta_delay_ms: u64,
    /// Keep-alive comment period; 0 turns keep-alives off
    pub keep_alive_secs: u64,
    /// Raw upstream dumps under `gen/streams/`, effective only at debug log level
    pub debug_logging: bool,
}

impl UpstreamConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl StreamingConfig {
    pub fn mock_delta_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delta_delay_ms)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }
}

/// Parse a comma separated origin list, dropping blank entries.
pub fn parse_allowed_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> AppResult<T> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{} must be a valid number", key)))
}

impl AppSettings {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        // App config
        let app_name = lookup("APP_NAME").unwrap_or_else(|| "relaychat".to_string());
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        // Server config
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = lookup("SERVER_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| AppError::Configuration("SERVER_PORT must be a valid port number".to_string()))?;

        let allowed_origins = parse_allowed_origins(
            &lookup("ALLOWED_ORIGIN").unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string()),
        );
        let max_request_body_bytes = parse_number(&lookup, "MAX_REQUEST_BODY_BYTES", DEFAULT_MAX_REQUEST_BODY_BYTES)?;

        // Upstream provider
        let api_key = lookup("MISTRAL_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let base_url = lookup("MISTRAL_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_MISTRAL_BASE_URL.to_string());
        let idle_timeout_secs = match lookup("UPSTREAM_IDLE_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| AppError::Configuration("UPSTREAM_IDLE_TIMEOUT_SECS must be a valid number".to_string()))?,
            ),
            _ => None,
        };

        // Streaming behaviour
        let mock = lookup("MOCK").map(|v| v.trim() == "1").unwrap_or(false);
        let mock_delta_delay_ms = parse_number(&lookup, "MOCK_DELTA_DELAY_MS", "150")?;
        let keep_alive_secs = parse_number(&lookup, "SSE_KEEP_ALIVE_SECS", "15")?;
        let debug_logging = lookup("ENABLE_STREAM_DEBUG_LOGGING")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                allowed_origins,
                max_request_body_bytes,
            },
            upstream: UpstreamConfig {
                api_key,
                base_url,
                idle_timeout_secs,
            },
            streaming: StreamingConfig {
                mock,
                mock_delta_delay_ms,
                keep_alive_secs,
                debug_logging,
            },
        })
    }
}
