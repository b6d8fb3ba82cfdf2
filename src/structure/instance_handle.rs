// Instance handles for the liveliness built-in topic. General DDS
// instance-handle machinery (key hashing for arbitrary keyed topics) is
// out of scope; only the fixed layout used by the liveliness assertion
// channel is implemented (spec.md §3).

use crate::{dds::qos::policy::LivelinessKind, structure::guid::GuidPrefix};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
  /// Builds the instance handle used to key outbound liveliness
  /// assertions for `kind` on behalf of `participant_prefix`:
  /// bytes 0-11 = participant prefix, bytes 12-14 = 0, byte 15 = kind tag.
  /// Returns `None` for `ManualByTopic`, which does not use this channel.
  pub fn for_liveliness(participant_prefix: GuidPrefix, kind: LivelinessKind) -> Option<Self> {
    let tag = kind.wire_tag()?;
    let mut bytes = [0u8; 16];
    bytes[0..12].copy_from_slice(&participant_prefix.0);
    bytes[15] = tag;
    Some(InstanceHandle(bytes))
  }

  pub fn participant_prefix(self) -> GuidPrefix {
    let mut prefix = [0u8; 12];
    prefix.copy_from_slice(&self.0[0..12]);
    GuidPrefix::new(prefix)
  }

  /// Decodes the announced liveliness kind from the last byte. Unknown
  /// tags are reported as `None`, to be ignored by the caller per
  /// spec.md §4.4.4 ("Unknown kind bytes are ignored").
  pub fn liveliness_kind(self) -> Option<LivelinessKind> {
    LivelinessKind::from_wire_tag(self.0[15])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn handle_layout_matches_spec() {
    let prefix = GuidPrefix::new([7; 12]);
    let h = InstanceHandle::for_liveliness(prefix, LivelinessKind::Automatic).unwrap();
    assert_eq!(&h.0[0..12], &[7; 12]);
    assert_eq!(&h.0[12..15], &[0, 0, 0]);
    assert_eq!(h.0[15], 0x02);
  }

  #[test]
  fn manual_by_topic_has_no_channel() {
    let prefix = GuidPrefix::new([1; 12]);
    assert!(InstanceHandle::for_liveliness(prefix, LivelinessKind::ManualByTopic).is_none());
  }

  #[test]
  fn kind_round_trips_through_handle() {
    let prefix = GuidPrefix::new([3; 12]);
    for kind in [LivelinessKind::Automatic, LivelinessKind::ManualByParticipant] {
      let h = InstanceHandle::for_liveliness(prefix, kind).unwrap();
      assert_eq!(h.liveliness_kind(), Some(kind));
      assert_eq!(h.participant_prefix(), prefix);
    }
  }
}
