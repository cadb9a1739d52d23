pub mod origin_gate;

pub use origin_gate::{request_origin, AllowedOrigin, OriginGate};
