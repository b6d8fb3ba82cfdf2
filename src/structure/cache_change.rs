// Minimal cache-change representation. The full RTPS history cache
// (disposal, sequence numbers, fragmentation) is out of scope; this crate
// only needs enough of it to model ALIVE liveliness-assertion samples and
// their keep-last-1-per-instance semantics (spec.md §4.4.3).

use crate::structure::{guid::GUID, instance_handle::InstanceHandle};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ChangeKind {
  Alive,
  NotAliveDisposed,
}

#[derive(Clone, Debug)]
pub struct CacheChange {
  pub kind: ChangeKind,
  pub writer_guid: GUID,
  pub instance_handle: InstanceHandle,
  pub data: Vec<u8>,
}

impl CacheChange {
  pub fn new(
    kind: ChangeKind,
    writer_guid: GUID,
    instance_handle: InstanceHandle,
    data: Vec<u8>,
  ) -> Self {
    CacheChange {
      kind,
      writer_guid,
      instance_handle,
      data,
    }
  }
}
