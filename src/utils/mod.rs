pub mod http_client;
pub mod stream_debug_logger;
