pub mod chat;
pub mod runtime_config;
pub mod stream_event;

pub use chat::{ChatRequest, Message, Role, UpstreamChatRequest, UpstreamMessage};
pub use runtime_config::*;
pub use stream_event::{DeltaEvent, FinalEvent, MetaEvent, StreamEvent, Usage};
