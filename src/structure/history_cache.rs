// Stand-in for `WriterHistory`/`ReaderHistory` (spec.md §4.3): a
// keep-last-1-per-instance cache bounded by the same initial/maximum
// depth figures the source uses for the liveliness built-in endpoints.
// The real history cache (ack tracking, fragment reassembly, durability
// replay) is out of scope; this crate only needs "does a change with
// this instance handle already exist" and a depth cap.

use crate::structure::{cache_change::CacheChange, instance_handle::InstanceHandle};

#[derive(Copy, Clone, Debug)]
pub struct HistoryCacheConfig {
  pub initial_reserved_caches: usize,
  pub maximum_reserved_caches: usize,
}

impl HistoryCacheConfig {
  pub const BUILTIN_WRITER: HistoryCacheConfig = HistoryCacheConfig {
    initial_reserved_caches: 20,
    maximum_reserved_caches: 1000,
  };

  pub const BUILTIN_READER: HistoryCacheConfig = HistoryCacheConfig {
    initial_reserved_caches: 100,
    maximum_reserved_caches: 2000,
  };
}

pub struct HistoryCache {
  config: HistoryCacheConfig,
  changes: Vec<CacheChange>,
}

impl HistoryCache {
  pub fn new(config: HistoryCacheConfig) -> Self {
    HistoryCache {
      changes: Vec::with_capacity(config.initial_reserved_caches),
      config,
    }
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &CacheChange> {
    self.changes.iter()
  }

  /// Reserves a slot for a new change. Fails (returns `false`) once the
  /// cache is at its maximum depth and no same-instance slot can be
  /// reclaimed, mirroring `RTPSWriter::new_change` returning `nullptr`
  /// under exhaustion (spec.md §7, "cache-change exhaustion").
  fn has_room_for(&self, instance_handle: InstanceHandle) -> bool {
    self.changes.len() < self.config.maximum_reserved_caches
      || self
        .changes
        .iter()
        .any(|c| c.instance_handle == instance_handle)
  }

  /// Adds `change`, first removing any existing change for the same
  /// instance (keep-last-1-per-instance, spec.md §4.4.3 step 5). Returns
  /// `false` if the cache was full and held no change for this instance
  /// to evict.
  pub fn add_change(&mut self, change: CacheChange) -> bool {
    if !self.has_room_for(change.instance_handle) {
      return false;
    }
    self.remove_instance(change.instance_handle);
    self.changes.push(change);
    true
  }

  pub fn remove_instance(&mut self, instance_handle: InstanceHandle) {
    self.changes.retain(|c| c.instance_handle != instance_handle);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::{cache_change::ChangeKind, guid::GUID};

  fn change(tag: u8) -> CacheChange {
    let mut bytes = [0u8; 16];
    bytes[15] = tag;
    CacheChange::new(
      ChangeKind::Alive,
      GUID::UNKNOWN,
      InstanceHandle(bytes),
      vec![0; 28],
    )
  }

  #[test]
  fn keeps_only_last_change_per_instance() {
    let mut history = HistoryCache::new(HistoryCacheConfig::BUILTIN_WRITER);
    assert!(history.add_change(change(0x02)));
    assert!(history.add_change(change(0x02)));
    assert_eq!(history.len(), 1);
  }

  #[test]
  fn distinct_instances_coexist() {
    let mut history = HistoryCache::new(HistoryCacheConfig::BUILTIN_WRITER);
    history.add_change(change(0x02));
    history.add_change(change(0x03));
    assert_eq!(history.len(), 2);
  }
}
