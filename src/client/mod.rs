//! Consumer side of the chat event stream.
//!
//! `ChatStreamClient::open` posts a chat request and feeds the decoded frames
//! to a set of callbacks from a background task.

pub mod callbacks;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod metrics;

pub use callbacks::StreamCallbacks;
pub use consumer::{ChatStreamClient, StreamHandle, StreamState};
pub use decoder::{parse_frame, FrameDecoder, FrameLineCodec};
pub use error::ClientError;
pub use metrics::{bytes_to_kb, json_byte_length, StreamMetrics};
