// Monotonic timestamps used for lease-expiration deadlines. Kept separate
// from `crate::structure::duration::Duration`, which is the RTPS wire
// type; this is purely a local bookkeeping helper around
// `std::time::Instant`.

use std::time::Instant;

use super::duration::Duration;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct Timestamp(Instant);

impl Timestamp {
  pub fn now() -> Self {
    Timestamp(Instant::now())
  }

  /// Deadline `lease` from now. An infinite lease never expires: we
  /// represent that by pushing the deadline far enough into the future
  /// that normal test/run durations cannot reach it.
  pub fn deadline_after(lease: Duration) -> Self {
    if lease.is_infinite() {
      Timestamp(Instant::now() + std::time::Duration::from_secs(3600 * 24 * 365 * 100))
    } else {
      Timestamp(Instant::now() + lease.as_std())
    }
  }

  pub fn has_passed(self) -> bool {
    Instant::now() >= self.0
  }

  pub fn is_at_or_before(self, other: Timestamp) -> bool {
    self.0 <= other.0
  }

  /// Time left until this deadline, zero if it has already passed. Used
  /// to arm a scheduler event for "next earliest deadline".
  pub fn remaining(self) -> std::time::Duration {
    self.0.saturating_duration_since(Instant::now())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deadline_in_past_has_passed() {
    let d = Timestamp::deadline_after(Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(d.has_passed());
  }

  #[test]
  fn deadline_in_future_has_not_passed() {
    let d = Timestamp::deadline_after(Duration::from_millis(500));
    assert!(!d.has_passed());
  }

  #[test]
  fn remaining_is_zero_once_passed() {
    let d = Timestamp::deadline_after(Duration::from_millis(0));
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert_eq!(d.remaining(), std::time::Duration::ZERO);
  }
}
