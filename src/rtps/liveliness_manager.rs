// Liveliness Manager (spec.md C2): a per-side (publisher or subscriber)
// table of tracked writers with per-kind expiration, mirroring Fast-RTPS's
// `LivelinessManager` that WLP delegates every add/remove/assert to
// (original_source WLP.cpp calls into `mp_livelinessManager`/
// `mp_livelinessManager2` for exactly this bookkeeping).
//
// This is deliberately synchronous and lock-free internally: it holds no
// timer of its own. The earliest-deadline timer described in spec.md
// §4.2 is driven by the owning WLP core, which calls `expire()` from a
// `TimedEventScheduler` callback and re-arms against `next_deadline()`.

use std::collections::HashMap;

use crate::{
  dds::qos::policy::LivelinessKind,
  structure::{duration::Duration, guid::GUID, time::Timestamp},
};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WriterLivelinessStatus {
  Alive,
  NotAlive,
}

struct TrackedWriter {
  kind: LivelinessKind,
  lease_duration: Duration,
  status: WriterLivelinessStatus,
  expiration: Timestamp,
}

#[derive(Default)]
pub struct LivelinessManager {
  writers: HashMap<GUID, TrackedWriter>,
  // Insertion order, for the simultaneous-deadline tie-break (spec.md
  // §4.2 "Tie-breaks").
  order: Vec<GUID>,
}

impl LivelinessManager {
  /// Degrades to "always alive" once this many writers are tracked
  /// (spec.md §7 "Manager-full on add_writer").
  pub const MAX_TRACKED_WRITERS: usize = 4096;

  pub fn new() -> Self {
    LivelinessManager {
      writers: HashMap::new(),
      order: Vec::new(),
    }
  }

  /// Duplicate insertions are idempotent. Returns `false` only once the
  /// store is full.
  pub fn add_writer(&mut self, guid: GUID, kind: LivelinessKind, lease_duration: Duration) -> bool {
    if self.writers.contains_key(&guid) {
      return true;
    }
    if self.writers.len() >= Self::MAX_TRACKED_WRITERS {
      return false;
    }
    self.writers.insert(
      guid,
      TrackedWriter {
        kind,
        lease_duration,
        status: WriterLivelinessStatus::Alive,
        expiration: Timestamp::deadline_after(lease_duration),
      },
    );
    self.order.push(guid);
    true
  }

  pub fn remove_writer(&mut self, guid: GUID) -> bool {
    if self.writers.remove(&guid).is_some() {
      self.order.retain(|g| *g != guid);
      true
    } else {
      false
    }
  }

  /// Marks `guid` Alive and resets its deadline to `now + lease`.
  /// Returns its status just before this call, or `None` if untracked.
  pub fn assert_writer(&mut self, guid: GUID) -> Option<WriterLivelinessStatus> {
    let writer = self.writers.get_mut(&guid)?;
    let previous = writer.status;
    writer.status = WriterLivelinessStatus::Alive;
    writer.expiration = Timestamp::deadline_after(writer.lease_duration);
    Some(previous)
  }

  /// Bulk-asserts every tracked writer of `participant_prefix` whose kind
  /// is `ManualByParticipant`, in insertion order (spec.md §4.2
  /// `assert_liveliness(kind)`).
  pub fn assert_manual_by_participant(&mut self, participant_prefix: crate::structure::guid::GuidPrefix) {
    for guid in &self.order {
      if guid.prefix != participant_prefix {
        continue;
      }
      if let Some(writer) = self.writers.get_mut(guid) {
        if writer.kind != LivelinessKind::ManualByParticipant {
          continue;
        }
        writer.status = WriterLivelinessStatus::Alive;
        writer.expiration = Timestamp::deadline_after(writer.lease_duration);
      }
    }
  }

  /// Transitions every writer whose deadline has passed from Alive to
  /// NotAlive, in insertion order, and returns the ones that just
  /// transitioned together with their kind and lease duration (spec.md
  /// §4.2 "Internal algorithm", step 1).
  pub fn expire(&mut self) -> Vec<(GUID, LivelinessKind, Duration)> {
    let mut expired = Vec::new();
    for guid in &self.order {
      if let Some(writer) = self.writers.get_mut(guid) {
        if writer.status == WriterLivelinessStatus::Alive && writer.expiration.has_passed() {
          writer.status = WriterLivelinessStatus::NotAlive;
          expired.push((*guid, writer.kind, writer.lease_duration));
        }
      }
    }
    expired
  }

  /// The earliest deadline among currently-alive tracked writers, or
  /// `None` if there are none (spec.md §4.2 "single timer").
  pub fn next_deadline(&self) -> Option<Timestamp> {
    self
      .writers
      .values()
      .filter(|w| w.status == WriterLivelinessStatus::Alive)
      .map(|w| w.expiration)
      .min()
  }

  pub fn is_any_alive(&self, kind: LivelinessKind) -> bool {
    self
      .writers
      .values()
      .any(|w| w.kind == kind && w.status == WriterLivelinessStatus::Alive)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::guid::{EntityId, GuidPrefix};

  fn guid(tag: u8) -> GUID {
    GUID::new(GuidPrefix::new([1; 12]), EntityId::new([0, 0, 0, tag]))
  }

  #[test]
  fn add_writer_is_idempotent() {
    let mut manager = LivelinessManager::new();
    assert!(manager.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(100)));
    assert!(manager.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(100)));
    assert_eq!(manager.order.len(), 1);
  }

  #[test]
  fn expire_transitions_alive_to_not_alive_once() {
    let mut manager = LivelinessManager::new();
    manager.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(5));
    let expired = manager.expire();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].0, guid(1));
    // Idempotence: a second expire() call finds nothing new (I5 / P5).
    assert!(manager.expire().is_empty());
  }

  #[test]
  fn assert_writer_reports_previous_status_and_revives() {
    let mut manager = LivelinessManager::new();
    manager.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(5));
    manager.expire();
    let previous = manager.assert_writer(guid(1));
    assert_eq!(previous, Some(WriterLivelinessStatus::NotAlive));
    assert!(manager.is_any_alive(LivelinessKind::ManualByTopic));
  }

  #[test]
  fn next_deadline_ignores_not_alive_writers() {
    let mut manager = LivelinessManager::new();
    manager.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(0));
    manager.add_writer(guid(2), LivelinessKind::ManualByTopic, Duration::from_millis(10_000));
    std::thread::sleep(std::time::Duration::from_millis(5));
    manager.expire();
    assert!(manager.next_deadline().is_some());
    assert!(manager.is_any_alive(LivelinessKind::ManualByTopic));
  }

  #[test]
  fn assert_manual_by_participant_only_touches_matching_kind_and_prefix() {
    let mut manager = LivelinessManager::new();
    let other_prefix_guid = GUID::new(GuidPrefix::new([9; 12]), EntityId::new([0, 0, 0, 1]));
    manager.add_writer(guid(1), LivelinessKind::ManualByParticipant, Duration::from_millis(0));
    manager.add_writer(guid(2), LivelinessKind::ManualByTopic, Duration::from_millis(0));
    manager.add_writer(other_prefix_guid, LivelinessKind::ManualByParticipant, Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(5));
    manager.expire();

    manager.assert_manual_by_participant(GuidPrefix::new([1; 12]));

    assert!(manager.is_any_alive(LivelinessKind::ManualByParticipant));
    // guid(2) is ManualByTopic and stays NotAlive.
    let expired_again = manager.expire();
    assert!(expired_again.iter().all(|(g, _, _)| *g != guid(1)));
  }
}
