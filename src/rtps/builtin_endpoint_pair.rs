// Built-in Endpoint Pair (spec.md C3): the stateful writer/reader bound to
// one liveliness built-in topic, each with its history and matched-proxy
// set. One pair is plain, the other (under the `security` feature) is the
// DDS-Security-protected duplicate; WLP core picks between them per
// `is_liveliness_protected` (spec.md §4.3, §9 "Secure/plain duplication").
//
// Proxy/transport details (acknowledgement tracking, fragment reassembly)
// are out of scope; only enough state to match proxies and publish/accept
// keyed ALIVE samples is modeled here.

use std::collections::HashSet;

use crate::structure::{
  cache_change::{CacheChange, ChangeKind},
  guid::GUID,
  history_cache::{HistoryCache, HistoryCacheConfig},
  instance_handle::InstanceHandle,
};

pub struct BuiltinWriterEndpoint {
  pub guid: GUID,
  history: HistoryCache,
  matched_readers: HashSet<GUID>,
}

impl BuiltinWriterEndpoint {
  pub fn new(guid: GUID) -> Self {
    BuiltinWriterEndpoint {
      guid,
      history: HistoryCache::new(HistoryCacheConfig::BUILTIN_WRITER),
      matched_readers: HashSet::new(),
    }
  }

  pub fn matched_reader_count(&self) -> usize {
    self.matched_readers.len()
  }

  pub fn match_reader(&mut self, reader: GUID) -> bool {
    self.matched_readers.insert(reader)
  }

  pub fn unmatch_reader(&mut self, reader: GUID) -> bool {
    self.matched_readers.remove(&reader)
  }

  /// Publishes a liveliness assertion sample, replacing any previous one
  /// for the same instance (keep-last-1, spec.md §4.4.3 step 5). Returns
  /// `false` if the history cache is exhausted (spec.md §7,
  /// non-fatal: the caller drops the tick and the bucket timer re-arms).
  pub fn assert_liveliness(&mut self, instance_handle: InstanceHandle, payload: Vec<u8>) -> bool {
    self
      .history
      .add_change(CacheChange::new(ChangeKind::Alive, self.guid, instance_handle, payload))
  }

  pub fn history_len(&self) -> usize {
    self.history.len()
  }
}

pub struct BuiltinReaderEndpoint {
  pub guid: GUID,
  history: HistoryCache,
  matched_writers: HashSet<GUID>,
}

impl BuiltinReaderEndpoint {
  pub fn new(guid: GUID) -> Self {
    BuiltinReaderEndpoint {
      guid,
      history: HistoryCache::new(HistoryCacheConfig::BUILTIN_READER),
      matched_writers: HashSet::new(),
    }
  }

  pub fn matched_writer_count(&self) -> usize {
    self.matched_writers.len()
  }

  pub fn match_writer(&mut self, writer: GUID) -> bool {
    self.matched_writers.insert(writer)
  }

  pub fn unmatch_writer(&mut self, writer: GUID) -> bool {
    self.matched_writers.remove(&writer)
  }

  /// Accepts an inbound ALIVE sample into this reader's history.
  pub fn receive(&mut self, writer_guid: GUID, instance_handle: InstanceHandle, payload: Vec<u8>) -> bool {
    self
      .history
      .add_change(CacheChange::new(ChangeKind::Alive, writer_guid, instance_handle, payload))
  }

  pub fn history_len(&self) -> usize {
    self.history.len()
  }
}

/// One writer/reader pair for a liveliness built-in topic.
pub struct BuiltinEndpointPair {
  pub writer: BuiltinWriterEndpoint,
  pub reader: BuiltinReaderEndpoint,
}

impl BuiltinEndpointPair {
  pub fn new(writer_guid: GUID, reader_guid: GUID) -> Self {
    BuiltinEndpointPair {
      writer: BuiltinWriterEndpoint::new(writer_guid),
      reader: BuiltinReaderEndpoint::new(reader_guid),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::guid::{EntityId, GuidPrefix};

  fn guid(tag: u8) -> GUID {
    GUID::new(GuidPrefix::new([2; 12]), EntityId::new([0, 0, 0, tag]))
  }

  #[test]
  fn matching_a_reader_is_reflected_in_the_count() {
    let mut writer = BuiltinWriterEndpoint::new(guid(1));
    assert_eq!(writer.matched_reader_count(), 0);
    assert!(writer.match_reader(guid(2)));
    assert!(!writer.match_reader(guid(2)));
    assert_eq!(writer.matched_reader_count(), 1);
    assert!(writer.unmatch_reader(guid(2)));
    assert_eq!(writer.matched_reader_count(), 0);
  }

  #[test]
  fn asserting_liveliness_keeps_one_change_per_instance() {
    let mut writer = BuiltinWriterEndpoint::new(guid(1));
    let handle = InstanceHandle([7; 16]);
    assert!(writer.assert_liveliness(handle, vec![0; 28]));
    assert!(writer.assert_liveliness(handle, vec![0; 28]));
    assert_eq!(writer.history_len(), 1);
  }
}
