//! Built-in Writer Liveliness Protocol (WLP) and the reader/writer
//! endpoint liveness state it manipulates: timed assertions, the three
//! liveliness disciplines multiplexed onto shared built-in endpoints, and
//! gain/loss notification fan-out to matched user endpoints.

pub mod dds;
pub mod rtps;
pub mod structure;

pub use dds::qos::policy::{LivelinessKind, LivelinessQosPolicy};
pub use rtps::wlp::{WlpError, WriterLivelinessProtocol};
pub use structure::{
  duration::Duration,
  guid::{EntityId, GuidPrefix, GUID},
  instance_handle::InstanceHandle,
};
