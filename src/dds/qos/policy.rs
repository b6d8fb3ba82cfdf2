// The Liveliness QoS policy. Only this one policy is modeled; every other
// DDS QoS policy is out of scope for this crate (spec Non-goals).

use crate::structure::duration::Duration;

/// Which of the three liveliness disciplines a writer uses.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LivelinessKind {
  /// The middleware asserts on the writer's behalf.
  Automatic,
  /// The application calls `assert_liveliness_manual_by_participant` and
  /// every manual-by-participant writer of that participant is
  /// considered alive for one lease period.
  ManualByParticipant,
  /// The application must assert per-writer; other writers are
  /// unaffected.
  ManualByTopic,
}

impl LivelinessKind {
  /// The wire-format tag stamped into byte 15 of an instance handle for
  /// kinds that use the shared liveliness-assertion channel. Per the
  /// source this is derived from `<KIND>_LIVELINESS_QOS + 0x01` — an
  /// offset with no stated rationale, preserved here as a wire-format
  /// fact rather than re-derived from first principles.
  /// `ManualByTopic` has no such tag: it never uses this channel.
  pub fn wire_tag(self) -> Option<u8> {
    match self {
      LivelinessKind::Automatic => Some(0x02),
      LivelinessKind::ManualByParticipant => Some(0x03),
      LivelinessKind::ManualByTopic => None,
    }
  }

  pub fn from_wire_tag(tag: u8) -> Option<Self> {
    match tag {
      0x02 => Some(LivelinessKind::Automatic),
      0x03 => Some(LivelinessKind::ManualByParticipant),
      _ => None,
    }
  }
}

#[derive(Copy, Clone, Debug)]
pub struct LivelinessQosPolicy {
  pub kind: LivelinessKind,
  pub lease_duration: Duration,
  /// Cadence at which the middleware (for `Automatic`) or the WLP tick
  /// (for `ManualByParticipant`) re-asserts liveliness. Must be
  /// `<= lease_duration`; this is not enforced by the type, matching the
  /// source, which also trusts the caller-supplied QoS.
  pub announcement_period: Duration,
}

impl LivelinessQosPolicy {
  pub fn automatic(lease_duration: Duration, announcement_period: Duration) -> Self {
    LivelinessQosPolicy {
      kind: LivelinessKind::Automatic,
      lease_duration,
      announcement_period,
    }
  }

  pub fn manual_by_participant(lease_duration: Duration, announcement_period: Duration) -> Self {
    LivelinessQosPolicy {
      kind: LivelinessKind::ManualByParticipant,
      lease_duration,
      announcement_period,
    }
  }

  pub fn manual_by_topic(lease_duration: Duration) -> Self {
    LivelinessQosPolicy {
      kind: LivelinessKind::ManualByTopic,
      lease_duration,
      announcement_period: lease_duration,
    }
  }
}

#[cfg(test)]
mod tests {
  use test_case::test_case;

  use super::*;

  #[test_case(LivelinessKind::Automatic, Some(0x02))]
  #[test_case(LivelinessKind::ManualByParticipant, Some(0x03))]
  #[test_case(LivelinessKind::ManualByTopic, None)]
  fn wire_tags_match_spec_open_question(kind: LivelinessKind, expected: Option<u8>) {
    assert_eq!(kind.wire_tag(), expected);
  }

  #[test_case(LivelinessKind::Automatic)]
  #[test_case(LivelinessKind::ManualByParticipant)]
  fn wire_tag_round_trips(k: LivelinessKind) {
    let tag = k.wire_tag().unwrap();
    assert_eq!(LivelinessKind::from_wire_tag(tag), Some(k));
  }

  #[test]
  fn unknown_wire_tag_is_ignored() {
    assert_eq!(LivelinessKind::from_wire_tag(0xff), None);
  }
}
