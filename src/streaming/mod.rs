pub mod mock;
pub mod sse_adapter;
pub mod stream_handler;
pub mod transformers;

pub use stream_handler::{ChatEventStream, FrameSink, StreamRelay, StreamSource};
pub use transformers::{StreamError, TransformResult};
