use thiserror::Error;

/// Failures reported to `on_error` by the stream consumer
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent (connect, DNS, TLS, invalid endpoint)
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The producer answered with a non-success status
    #[error("stream request rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body broke off while streaming
    #[error("failed to read stream body: {0}")]
    Read(#[source] reqwest::Error),

    /// A frame was not valid JSON; the stream keeps going
    #[error("malformed frame {line:?}: {source}")]
    Frame {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// True for errors that end the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClientError::Frame { .. })
    }
}
