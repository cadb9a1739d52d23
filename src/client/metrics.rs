use chrono::Utc;
use serde::Serialize;

use crate::models::{MetaEvent, Usage};

/// Kilobytes rounded to two decimals
pub fn bytes_to_kb(bytes: usize) -> f64 {
    ((bytes as f64 / 1024.0) * 100.0).round() / 100.0
}

/// Size of a value once serialized as JSON
pub fn json_byte_length<T: Serialize>(value: &T) -> Result<usize, serde_json::Error> {
    serde_json::to_vec(value).map(|bytes| bytes.len())
}

/// Elapsed milliseconds, clamped at zero for skewed clocks
pub fn elapsed_ms(from_ms: i64, to_ms: i64) -> u64 {
    (to_ms - from_ms).max(0) as u64
}

/// Per-stream figures as shown next to a chat reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetrics {
    /// Reference clock: the producer's `t0`, or the local start time
    pub t0_ms: i64,
    pub request_bytes: usize,
    pub response_bytes: usize,
    /// Time to first delta
    pub latency_ms: Option<u64>,
    /// Time to `final`
    pub duration_ms: Option<u64>,
    /// `prompt + completion`, when non-zero
    pub tokens: Option<u64>,
    pub mock: Option<bool>,
}

impl StreamMetrics {
    pub fn start(request_bytes: usize) -> Self {
        Self::start_at(request_bytes, Utc::now().timestamp_millis())
    }

    pub fn start_at(request_bytes: usize, now_ms: i64) -> Self {
        Self {
            t0_ms: now_ms,
            request_bytes,
            ..Self::default()
        }
    }

    pub fn record_meta(&mut self, meta: &MetaEvent) {
        // Prefer the producer clock, keep the local one if absent
        if meta.t0 > 0 {
            self.t0_ms = meta.t0;
        }
        self.mock = meta.mock;
    }

    pub fn record_delta(&mut self, content: &str) {
        self.record_delta_at(content, Utc::now().timestamp_millis());
    }

    pub fn record_delta_at(&mut self, content: &str, now_ms: i64) {
        if self.latency_ms.is_none() {
            self.latency_ms = Some(elapsed_ms(self.t0_ms, now_ms));
        }
        self.response_bytes += content.len();
    }

    pub fn record_final(&mut self, usage: Option<Usage>) {
        self.record_final_at(usage, Utc::now().timestamp_millis());
    }

    pub fn record_final_at(&mut self, usage: Option<Usage>, now_ms: i64) {
        self.duration_ms = Some(elapsed_ms(self.t0_ms, now_ms));
        self.tokens = usage.map(|u| u.total()).filter(|total| *total > 0);
    }

    pub fn request_kb(&self) -> f64 {
        bytes_to_kb(self.request_bytes)
    }

    pub fn response_kb(&self) -> f64 {
        bytes_to_kb(self.response_bytes)
    }
}
