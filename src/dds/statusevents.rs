// Describes the liveliness-related communication status changes as
// plain data, and the listener capability surface that gets notified of
// them. This is a narrowed generalization of the upstream crate's
// `statusevents` module: `CountWithChange` is kept essentially verbatim
// (it already modeled exactly this), but the upstream crate's
// `DataWriterStatus`/`DataReaderStatus` enums exist to multiplex *every*
// communication status (subscription-matched, requested/offered QoS
// incompatible, sample lost, ...) over one channel; this crate only ever
// produces the two liveliness statuses, delivered directly to
// `EndpointListener`, so that multiplexing layer -- along with the
// broader async-stream/`mio::Evented` status-polling machinery for
// *all* communication statuses -- is out of scope here. This crate only
// ever needs synchronous, in-mutex listener callbacks (spec.md I6).

use crate::structure::guid::GUID;

/// Helper bundling a running count with its "change since last callback"
/// companion, used identically for liveliness-lost and liveliness-changed
/// counters.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct CountWithChange {
  count: i32,
  count_change: i32,
}

impl CountWithChange {
  pub fn new(count: i32, count_change: i32) -> Self {
    Self {
      count,
      count_change,
    }
  }

  pub fn count(&self) -> i32 {
    self.count
  }

  pub fn count_change(&self) -> i32 {
    self.count_change
  }

  fn increment(&mut self) {
    self.count += 1;
    self.count_change += 1;
  }

  /// Zeroes the change field. Called once a listener callback returns,
  /// enforcing invariant I6.
  fn reset_change(&mut self) {
    self.count_change = 0;
  }
}

/// Status surface for a local writer (spec.md §3, §4.5).
#[derive(Copy, Clone, Debug, Default)]
pub struct LivelinessLostStatus {
  pub total_count: CountWithChange,
}

impl LivelinessLostStatus {
  pub(crate) fn record_loss(&mut self) {
    self.total_count.increment();
  }

  pub(crate) fn reset_change(&mut self) {
    self.total_count.reset_change();
  }
}

/// Status surface for a local reader (spec.md §3, §4.5).
#[derive(Copy, Clone, Debug)]
pub struct LivelinessChangedStatus {
  pub alive_count: CountWithChange,
  pub not_alive_count: CountWithChange,
  pub last_publication_handle: GUID,
}

impl Default for LivelinessChangedStatus {
  fn default() -> Self {
    LivelinessChangedStatus {
      alive_count: CountWithChange::default(),
      not_alive_count: CountWithChange::default(),
      last_publication_handle: GUID::UNKNOWN,
    }
  }
}

impl LivelinessChangedStatus {
  pub(crate) fn apply_delta(
    &mut self,
    writer: GUID,
    alive_delta: i32,
    not_alive_delta: i32,
  ) {
    for _ in 0..alive_delta.max(0) {
      self.alive_count.increment();
    }
    for _ in 0..not_alive_delta.max(0) {
      self.not_alive_count.increment();
    }
    self.last_publication_handle = writer;
  }

  pub(crate) fn reset_change(&mut self) {
    self.alive_count.reset_change();
    self.not_alive_count.reset_change();
  }
}

/// Capability set an application-facing endpoint listener can implement.
/// Collapsed from the upstream crate's polymorphic `WriterListener`/
/// `ReaderListener` base classes into one trait with default no-op
/// methods, per the Design Notes' suggestion to expose this as a tagged
/// capability set rather than one polymorphic object, while staying
/// object-safe so it can be stored as `Box<dyn EndpointListener>`.
///
/// Invocation happens with the endpoint's mutex held (spec.md §4.5):
/// implementations must not block and must not call back into the
/// endpoint's destructive API (add/remove writer or reader) from within
/// a callback.
pub trait EndpointListener: Send {
  fn on_liveliness_lost(&mut self, _writer: GUID, _status: LivelinessLostStatus) {}
  fn on_liveliness_changed(&mut self, _reader: GUID, _status: LivelinessChangedStatus) {}
  fn on_subscription_matched(&mut self, _reader: GUID, _writer: GUID) {}
  fn on_data_available(&mut self, _reader: GUID) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn count_with_change_resets_only_change() {
    let mut c = CountWithChange::default();
    c.increment();
    c.increment();
    assert_eq!(c.count(), 2);
    assert_eq!(c.count_change(), 2);
    c.reset_change();
    assert_eq!(c.count(), 2);
    assert_eq!(c.count_change(), 0);
  }

  #[test]
  fn liveliness_changed_status_tracks_last_publication_handle() {
    let mut status = LivelinessChangedStatus::default();
    let writer = GUID::new(
      crate::structure::guid::GuidPrefix::new([1; 12]),
      crate::structure::guid::EntityId::new([0, 0, 0, 1]),
    );
    status.apply_delta(writer, 0, 1);
    assert_eq!(status.not_alive_count.count(), 1);
    assert_eq!(status.last_publication_handle, writer);
  }
}
