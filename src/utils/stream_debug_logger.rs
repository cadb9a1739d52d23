use chrono::Utc;
use log::{error, info};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Appends raw upstream stream payloads to `gen/streams/` for offline inspection.
///
/// Only active when requested and the log level admits debug output;
/// otherwise every call is a no-op.
pub struct StreamDebugLogger {
    file_path: PathBuf,
    enabled: bool,
}

impl StreamDebugLogger {
    pub fn new(provider: &str, request_id: &str, requested: bool) -> Self {
        let server_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let streams_dir = server_root.join("gen").join("streams");
        Self::in_dir(streams_dir, provider, request_id, requested && log::log_enabled!(log::Level::Debug))
    }

    fn in_dir(streams_dir: PathBuf, provider: &str, request_id: &str, enabled: bool) -> Self {
        let file_path = streams_dir.join(format!(
            "stream_debug_{}_{}.log",
            provider.to_lowercase(),
            request_id
        ));

        let mut enabled = enabled;
        if enabled {
            if let Err(e) = std::fs::create_dir_all(&streams_dir) {
                error!("Failed to create gen/streams directory: {}", e);
                enabled = false;
            } else {
                info!("Stream debug logs will be stored at: {}", file_path.display());
            }
        }

        Self { file_path, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_chunk(&self, chunk_data: &[u8]) {
        if !self.enabled {
            return;
        }

        let mut line = chunk_data.to_vec();
        line.push(b'\n');
        if let Err(e) = self.write_to_file(&line) {
            error!("Failed to write stream chunk to debug log: {}", e);
        }
    }

    pub fn log_error(&self, error_msg: &str) {
        if !self.enabled {
            return;
        }

        let log_entry = format!("ERROR: {}\n", error_msg);
        if let Err(e) = self.write_to_file(log_entry.as_bytes()) {
            error!("Failed to write error to debug log: {}", e);
        }
    }

    pub fn log_stream_start(&self) {
        self.log_marker("STREAM_START: Beginning stream relay");
    }

    pub fn log_stream_end(&self) {
        self.log_marker("STREAM_END: Upstream stream completed");
    }

    fn log_marker(&self, marker: &str) {
        if !self.enabled {
            return;
        }

        let log_entry = format!("[{}] {}\n", Utc::now().to_rfc3339(), marker);
        if let Err(e) = self.write_to_file(log_entry.as_bytes()) {
            error!("Failed to write stream marker to debug log: {}", e);
        }
    }

    fn write_to_file(&self, content: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        file.write_all(content)?;
        file.flush()?;

        Ok(())
    }
}
