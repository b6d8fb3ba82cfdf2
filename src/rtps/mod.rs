pub mod builtin_endpoint_pair;
pub mod constant;
pub mod discovery_stub;
pub mod liveliness_manager;
pub mod security_stub;
pub mod timed_event;
pub mod wlp;

pub use wlp::{WlpError, WriterLivelinessProtocol};
