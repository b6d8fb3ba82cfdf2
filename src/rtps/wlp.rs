// Writer Liveliness Protocol core (spec.md C4): admits/evicts local
// writers and readers, recomputes announcement cadence, serializes and
// dispatches liveliness assertion samples, pairs with remote participants'
// built-in endpoints, and fans status changes out to matched listeners.
// Grounded directly on original_source WLP.cpp's `add_local_writer`,
// `remove_local_writer`, `assertLiveliness*`, `assignRemoteEndpoints`,
// `removeRemoteEndpoints`, `pub_liveliness_changed`, and
// `sub_liveliness_changed`.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
};

use byteorder::{BigEndian, ByteOrder};
use log::{error, trace, warn};

use crate::{
  dds::{
    qos::policy::LivelinessKind,
    statusevents::{EndpointListener, LivelinessChangedStatus, LivelinessLostStatus},
  },
  rtps::{
    builtin_endpoint_pair::BuiltinEndpointPair,
    constant::{BuiltinEndpoint, BuiltinEndpointSet, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_READER, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER},
    discovery_stub::DiscoveryDb,
    liveliness_manager::{LivelinessManager, WriterLivelinessStatus},
    security_stub::{ParticipantSecurityAttributes, SecurityManager},
    timed_event::{EventCode, EventHandle, TimedEventScheduler},
  },
  structure::{
    duration::{Duration, DURATION_ZERO},
    guid::{GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    time::Timestamp,
  },
};

#[cfg(feature = "security")]
use crate::rtps::constant::{
  ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_READER, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_WRITER,
};

/// Encapsulation identifiers for the 4-byte CDR header this protocol
/// stamps on every liveliness payload (spec.md §4.4.3 step 4).
const PL_CDR_BE_ID: u16 = 0x0002;
const PL_CDR_LE_ID: u16 = 0x0003;

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum WlpError {
  #[error("writer {0:?} does not belong to this participant")]
  ForeignWriter(GUID),
  #[error("reader {0:?} does not belong to this participant")]
  ForeignReader(GUID),
}

struct LocalWriterRecord {
  kind: LivelinessKind,
  lease_duration: Duration,
  status: LivelinessLostStatus,
}

struct LocalReaderRecord {
  kind: LivelinessKind,
  lease_duration: Duration,
  matched_writers: HashSet<GUID>,
  status: LivelinessChangedStatus,
}

struct WlpState {
  participant_prefix: GuidPrefix,

  automatic_writers: HashMap<GUID, Duration>,
  manual_by_participant_writers: HashMap<GUID, Duration>,
  manual_by_topic_writers: HashSet<GUID>,

  min_automatic_ms: Option<u64>,
  min_manual_by_participant_ms: Option<u64>,
  automatic_timer: Option<EventHandle>,
  manual_timer: Option<EventHandle>,

  local_writers: HashMap<GUID, LocalWriterRecord>,
  local_readers: HashMap<GUID, LocalReaderRecord>,
  listeners: HashMap<GUID, Box<dyn EndpointListener>>,

  publisher_liveliness: LivelinessManager,
  subscriber_liveliness: LivelinessManager,
  publisher_timer: Option<EventHandle>,
  subscriber_timer: Option<EventHandle>,

  plain: BuiltinEndpointPair,
  // The secure, duplicated built-in endpoint pair is compile-conditional
  // (spec.md §9): a plain build carries no `Option<BuiltinEndpointPair>`
  // slot for it at all, rather than one that is merely always `None`.
  #[cfg(feature = "security")]
  secure: Option<BuiltinEndpointPair>,
  security_attributes: ParticipantSecurityAttributes,
  // Total successful outbound assertions, regardless of how many survive
  // in the (keep-last-1-per-instance) history afterward. Monitoring-only.
  assertions_emitted: u64,

  discovery: Box<dyn DiscoveryDb>,
  security: Box<dyn SecurityManager>,
}

/// Shared, mutex-guarded WLP state plus a handle to the scheduler it
/// arms timers against. Cloning a `WriterLivelinessProtocol` shares the
/// same state (both the `Arc<Mutex<_>>` and the scheduler `Arc`), the way
/// the source's `WLP` instance is reached from multiple threads (user API,
/// transport, scheduler worker) under its own internal locks.
#[derive(Clone)]
pub struct WriterLivelinessProtocol {
  state: Arc<Mutex<WlpState>>,
  scheduler: Arc<TimedEventScheduler>,
}

impl WriterLivelinessProtocol {
  pub fn new(
    participant_prefix: GuidPrefix,
    scheduler: Arc<TimedEventScheduler>,
    discovery: Box<dyn DiscoveryDb>,
    security: Box<dyn SecurityManager>,
    security_attributes: ParticipantSecurityAttributes,
  ) -> Self {
    let plain = BuiltinEndpointPair::new(
      GUID::new(participant_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER),
      GUID::new(participant_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_READER),
    );

    #[cfg(feature = "security")]
    let secure = if security_attributes.is_liveliness_protected {
      Some(BuiltinEndpointPair::new(
        GUID::new(participant_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_WRITER),
        GUID::new(participant_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_READER),
      ))
    } else {
      None
    };

    let state = WlpState {
      participant_prefix,
      automatic_writers: HashMap::new(),
      manual_by_participant_writers: HashMap::new(),
      manual_by_topic_writers: HashSet::new(),
      min_automatic_ms: None,
      min_manual_by_participant_ms: None,
      automatic_timer: None,
      manual_timer: None,
      local_writers: HashMap::new(),
      local_readers: HashMap::new(),
      listeners: HashMap::new(),
      publisher_liveliness: LivelinessManager::new(),
      subscriber_liveliness: LivelinessManager::new(),
      publisher_timer: None,
      subscriber_timer: None,
      plain,
      #[cfg(feature = "security")]
      secure,
      security_attributes,
      assertions_emitted: 0,
      discovery,
      security,
    };

    WriterLivelinessProtocol {
      state: Arc::new(Mutex::new(state)),
      scheduler,
    }
  }

  pub fn set_listener(&self, endpoint: GUID, listener: Box<dyn EndpointListener>) {
    self.state.lock().unwrap().listeners.insert(endpoint, listener);
  }

  /// Current automatic-bucket timer interval, or `None` if the bucket is
  /// empty (spec.md I1). Exposed for monitoring and tests.
  pub fn min_automatic_ms(&self) -> Option<u64> {
    self.state.lock().unwrap().min_automatic_ms
  }

  pub fn min_manual_by_participant_ms(&self) -> Option<u64> {
    self.state.lock().unwrap().min_manual_by_participant_ms
  }

  /// Number of ALIVE samples currently held by the plain built-in writer's
  /// history. Exposed for monitoring and tests; the secure pair (if any)
  /// is not observable from outside the protocol.
  pub fn plain_builtin_writer_sample_count(&self) -> usize {
    self.state.lock().unwrap().plain.writer.history_len()
  }

  /// Number of ALIVE samples held by the secure built-in writer's
  /// history, or `None` if this build carries no secure pair at all
  /// (the `security` feature is off) or the participant never built one
  /// (`is_liveliness_protected` was false at construction). Exposed for
  /// monitoring and tests.
  #[cfg(feature = "security")]
  pub fn secure_builtin_writer_sample_count(&self) -> Option<usize> {
    self.state.lock().unwrap().secure.as_ref().map(|pair| pair.writer.history_len())
  }

  #[cfg(not(feature = "security"))]
  pub fn secure_builtin_writer_sample_count(&self) -> Option<usize> {
    None
  }

  /// Cumulative count of successful outbound liveliness assertions since
  /// construction, regardless of how many survive afterward in the
  /// keep-last-1-per-instance history (spec.md §8 scenario 1's "at least
  /// 4 ALIVE samples" is this cumulative count: a single automatic
  /// writer has one instance handle, so its built-in writer's history
  /// never holds more than one change at a time). Exposed for monitoring
  /// and tests.
  pub fn assertions_emitted(&self) -> u64 {
    self.state.lock().unwrap().assertions_emitted
  }

  // ---- 4.4.1 Admission --------------------------------------------------

  pub fn add_local_writer(
    &self,
    guid: GUID,
    kind: LivelinessKind,
    lease_duration: Duration,
    announcement_period: Duration,
  ) -> Result<bool, WlpError> {
    let mut state = self.state.lock().unwrap();
    if guid.prefix != state.participant_prefix {
      return Err(WlpError::ForeignWriter(guid));
    }

    state.local_writers.insert(
      guid,
      LocalWriterRecord {
        kind,
        lease_duration,
        status: LivelinessLostStatus::default(),
      },
    );

    match kind {
      LivelinessKind::Automatic => {
        state.automatic_writers.insert(guid, announcement_period);
        self.rearm_bucket_timer(&mut state, true);
      }
      LivelinessKind::ManualByParticipant => {
        state.manual_by_participant_writers.insert(guid, announcement_period);
        if !state.publisher_liveliness.add_writer(guid, kind, lease_duration) {
          warn!("publisher liveliness manager full, admitting {guid:?} without tracking");
        }
        self.rearm_bucket_timer(&mut state, false);
        self.rearm_publisher_manager_timer(&mut state);
      }
      LivelinessKind::ManualByTopic => {
        state.manual_by_topic_writers.insert(guid);
        if !state.publisher_liveliness.add_writer(guid, kind, lease_duration) {
          warn!("publisher liveliness manager full, admitting {guid:?} without tracking");
        }
        self.rearm_publisher_manager_timer(&mut state);
      }
    }

    Ok(true)
  }

  // ---- 4.4.2 Eviction ----------------------------------------------------

  pub fn remove_local_writer(&self, guid: GUID) -> bool {
    let mut state = self.state.lock().unwrap();
    let Some(record) = state.local_writers.remove(&guid) else {
      warn!("remove_local_writer: unknown writer {guid:?}");
      return false;
    };

    // The kind that decides which bucket set to evict from is looked up
    // via the discovery database, not trusted from the admission-time
    // cache, so a QoS mutation recorded there since `add_local_writer`
    // is still honored (spec.md §4.4.2 step 2). A writer's liveliness
    // kind is immutable in practice, so discovery and the cache should
    // always agree; falling back to `record.kind` only covers a writer
    // discovery has since forgotten about entirely.
    let kind = state
      .discovery
      .lookup_writer_liveliness_qos(guid)
      .map(|qos| qos.kind)
      .unwrap_or(record.kind);

    match kind {
      LivelinessKind::Automatic => {
        state.automatic_writers.remove(&guid);
        self.rearm_bucket_timer(&mut state, true);
      }
      LivelinessKind::ManualByParticipant => {
        state.manual_by_participant_writers.remove(&guid);
        state.publisher_liveliness.remove_writer(guid);
        self.rearm_bucket_timer(&mut state, false);
        self.rearm_publisher_manager_timer(&mut state);
      }
      LivelinessKind::ManualByTopic => {
        state.manual_by_topic_writers.remove(&guid);
        state.publisher_liveliness.remove_writer(guid);
        self.rearm_publisher_manager_timer(&mut state);
      }
    }

    state.listeners.remove(&guid);
    true
  }

  pub fn add_local_reader(&self, guid: GUID, kind: LivelinessKind, lease_duration: Duration) -> Result<(), WlpError> {
    let mut state = self.state.lock().unwrap();
    if guid.prefix != state.participant_prefix {
      return Err(WlpError::ForeignReader(guid));
    }
    state.local_readers.insert(
      guid,
      LocalReaderRecord {
        kind,
        lease_duration,
        matched_writers: HashSet::new(),
        status: LivelinessChangedStatus::default(),
      },
    );
    Ok(())
  }

  pub fn remove_local_reader(&self, guid: GUID) -> bool {
    let mut state = self.state.lock().unwrap();
    state.listeners.remove(&guid);
    state.local_readers.remove(&guid).is_some()
  }

  /// Records that `reader` has been matched (by EDP, out of this crate's
  /// scope) with remote writer `writer`. Needed before liveliness changes
  /// for `writer` can be reported to `reader` (spec.md §4.4.6).
  pub fn match_local_reader_with_remote_writer(&self, reader: GUID, writer: GUID) {
    let mut state = self.state.lock().unwrap();
    if let Some(record) = state.local_readers.get_mut(&reader) {
      record.matched_writers.insert(writer);
    }
  }

  pub fn unmatch_local_reader_from_remote_writer(&self, reader: GUID, writer: GUID) {
    let mut state = self.state.lock().unwrap();
    if let Some(record) = state.local_readers.get_mut(&reader) {
      record.matched_writers.remove(&writer);
    }
  }

  // ---- Application API (spec.md §6) --------------------------------------

  /// Asserts a single writer. The only effective discipline for this is
  /// MANUAL_BY_TOPIC; calling it for writers of other kinds is harmless
  /// (they are asserted automatically or in bulk instead).
  pub fn assert_liveliness(&self, writer_guid: GUID) -> bool {
    let mut state = self.state.lock().unwrap();
    let previous = state.publisher_liveliness.assert_writer(writer_guid);
    self.rearm_publisher_manager_timer(&mut state);
    previous.is_some()
  }

  /// Bulk-asserts every MANUAL_BY_PARTICIPANT writer of this participant.
  /// Succeeds iff at least one such writer exists.
  pub fn assert_liveliness_manual_by_participant(&self) -> bool {
    let mut state = self.state.lock().unwrap();
    if state.manual_by_participant_writers.is_empty() {
      return false;
    }
    let prefix = state.participant_prefix;
    state.publisher_liveliness.assert_manual_by_participant(prefix);
    self.rearm_publisher_manager_timer(&mut state);
    true
  }

  // ---- 4.4.5 Peer endpoint pairing ---------------------------------------

  pub fn assign_remote_endpoints(&self, remote_prefix: GuidPrefix, remote_endpoints: BuiltinEndpointSet) {
    let mut state = self.state.lock().unwrap();

    if remote_endpoints.contains(BuiltinEndpoint::ParticipantMessageDataWriter) {
      let remote_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER);
      state.plain.reader.match_writer(remote_writer);
    }
    if remote_endpoints.contains(BuiltinEndpoint::ParticipantMessageDataReader) {
      let remote_reader = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_READER);
      state.plain.writer.match_reader(remote_reader);
    }

    #[cfg(feature = "security")]
    if state.security_attributes.is_liveliness_protected {
      let attrs = state.security_attributes;

      if remote_endpoints.contains(BuiltinEndpoint::ParticipantMessageSecureDataWriter) {
        let remote_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_WRITER);
        if state.security.discovered_builtin_writer(remote_writer, attrs) {
          if let Some(pair) = state.secure.as_mut() {
            pair.reader.match_writer(remote_writer);
          }
        } else {
          error!("security manager rejected remote writer {remote_writer:?}");
        }
      }
      if remote_endpoints.contains(BuiltinEndpoint::ParticipantMessageSecureDataReader) {
        let remote_reader = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_READER);
        if state.security.discovered_builtin_reader(remote_reader, attrs) {
          if let Some(pair) = state.secure.as_mut() {
            pair.writer.match_reader(remote_reader);
          }
        } else {
          error!("security manager rejected remote reader {remote_reader:?}");
        }
      }
    }
  }

  pub fn remove_remote_endpoints(&self, remote_prefix: GuidPrefix) {
    let mut state = self.state.lock().unwrap();

    let remote_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER);
    let remote_reader = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_READER);
    state.plain.reader.unmatch_writer(remote_writer);
    state.plain.writer.unmatch_reader(remote_reader);

    #[cfg(feature = "security")]
    {
      let secure_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_WRITER);
      let secure_reader = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_READER);
      if let Some(pair) = state.secure.as_mut() {
        if pair.reader.unmatch_writer(secure_writer) {
          state.security.remove_writer(secure_writer);
        }
        if pair.writer.unmatch_reader(secure_reader) {
          state.security.remove_reader(secure_reader);
        }
      }
    }

    for record in state.local_readers.values_mut() {
      record.matched_writers.remove(&remote_writer);
    }

    state.subscriber_liveliness.remove_writer(remote_writer);
    self.rearm_subscriber_manager_timer(&mut state);
  }

  // ---- 4.4.4 Inbound sample handling --------------------------------------

  pub fn handle_inbound_sample(&self, writer_guid: GUID, payload: &[u8]) {
    let Some(instance_handle) = decode_liveliness_payload(payload) else {
      warn!("malformed liveliness sample from {writer_guid:?}, ignoring");
      return;
    };
    let Some(kind) = instance_handle.liveliness_kind() else {
      trace!("unknown liveliness kind byte from {writer_guid:?}, ignoring");
      return;
    };

    let mut state = self.state.lock().unwrap();
    let Some(qos) = state.discovery.lookup_writer_liveliness_qos(writer_guid) else {
      trace!("liveliness sample from undiscovered writer {writer_guid:?}, ignoring");
      return;
    };
    if qos.kind != kind {
      warn!("writer {writer_guid:?} asserted kind {kind:?} but QoS says {:?}, ignoring", qos.kind);
      return;
    }

    state.subscriber_liveliness.add_writer(writer_guid, kind, qos.lease_duration);
    let previous = state.subscriber_liveliness.assert_writer(writer_guid);
    let became_alive = !matches!(previous, Some(WriterLivelinessStatus::Alive));
    if became_alive {
      Self::sub_liveliness_changed_locked(&mut state, writer_guid, kind, qos.lease_duration, 1, 0);
    }
    self.rearm_subscriber_manager_timer(&mut state);
  }

  // ---- 4.4.6 Liveness change fan-out -------------------------------------

  /// `lease_duration` is accepted but unused: the source leaves this
  /// parameter unread too (spec.md §9, second Open Question), so it is
  /// preserved here rather than acted on.
  fn pub_liveliness_changed_locked(
    state: &mut WlpState,
    writer_guid: GUID,
    _kind: LivelinessKind,
    _lease_duration: Duration,
    _alive_delta: i32,
    not_alive_delta: i32,
  ) {
    if not_alive_delta != 1 {
      return;
    }
    let Some(record) = state.local_writers.get_mut(&writer_guid) else {
      return;
    };
    record.status.record_loss();
    let status = record.status;
    if let Some(listener) = state.listeners.get_mut(&writer_guid) {
      listener.on_liveliness_lost(writer_guid, status);
    }
    if let Some(record) = state.local_writers.get_mut(&writer_guid) {
      record.status.reset_change();
    }
  }

  fn sub_liveliness_changed_locked(
    state: &mut WlpState,
    remote_writer: GUID,
    kind: LivelinessKind,
    lease_duration: Duration,
    alive_delta: i32,
    not_alive_delta: i32,
  ) {
    let matching_readers: Vec<GUID> = state
      .local_readers
      .iter()
      .filter(|(_, r)| r.kind == kind && r.lease_duration == lease_duration && r.matched_writers.contains(&remote_writer))
      .map(|(guid, _)| *guid)
      .collect();

    for reader_guid in matching_readers {
      if let Some(record) = state.local_readers.get_mut(&reader_guid) {
        record.status.apply_delta(remote_writer, alive_delta, not_alive_delta);
        let status = record.status;
        if let Some(listener) = state.listeners.get_mut(&reader_guid) {
          listener.on_liveliness_changed(reader_guid, status);
        }
      }
      if let Some(record) = state.local_readers.get_mut(&reader_guid) {
        record.status.reset_change();
      }
    }
  }

  // ---- Bucket timers (automatic / manual-by-participant) -----------------

  fn rearm_bucket_timer(&self, state: &mut WlpState, automatic: bool) {
    let bucket_min_ms = (if automatic {
      state.automatic_writers.values().copied().min()
    } else {
      state.manual_by_participant_writers.values().copied().min()
    })
    .map(|d| d.as_millis_f64().round() as u64);

    if automatic {
      state.min_automatic_ms = bucket_min_ms;
    } else {
      state.min_manual_by_participant_ms = bucket_min_ms;
    }

    let existing = if automatic { state.automatic_timer } else { state.manual_timer };

    match (bucket_min_ms, existing) {
      (None, Some(handle)) => {
        self.scheduler.cancel(handle);
        self.set_bucket_timer(state, automatic, None);
      }
      (Some(ms), None) => {
        let handle = self.spawn_bucket_tick(ms, automatic);
        self.set_bucket_timer(state, automatic, Some(handle));
      }
      (Some(ms), Some(handle)) => {
        // Shrinking the interval must not wait out the old period
        // (spec.md §4.4.2 "Edge cases"): cancel and re-arm fresh rather
        // than merely updating if the remaining time exceeds the new
        // minimum.
        let remaining = self.scheduler.remaining_ms(handle).unwrap_or(0);
        if remaining > ms {
          self.scheduler.cancel(handle);
          let new_handle = self.spawn_bucket_tick(ms, automatic);
          self.set_bucket_timer(state, automatic, Some(new_handle));
        } else {
          self.scheduler.update_interval(handle, Duration::from_millis(ms));
        }
      }
      (None, None) => {}
    }
  }

  fn set_bucket_timer(&self, state: &mut WlpState, automatic: bool, handle: Option<EventHandle>) {
    if automatic {
      state.automatic_timer = handle;
    } else {
      state.manual_timer = handle;
    }
  }

  fn spawn_bucket_tick(&self, ms: u64, automatic: bool) -> EventHandle {
    let state_arc = Arc::clone(&self.state);
    self.scheduler.schedule_periodic(Duration::from_millis(ms), move |code| {
      if code == EventCode::Success {
        WriterLivelinessProtocol::on_bucket_tick(&state_arc, automatic);
      }
    })
  }

  fn on_bucket_tick(state_arc: &Arc<Mutex<WlpState>>, automatic: bool) {
    let mut state = state_arc.lock().unwrap();
    let kind = if automatic {
      LivelinessKind::Automatic
    } else {
      LivelinessKind::ManualByParticipant
    };

    // I7: never emit from a bucket that is not alive.
    let any_alive = if automatic {
      !state.automatic_writers.is_empty()
    } else {
      state.publisher_liveliness.is_any_alive(LivelinessKind::ManualByParticipant)
    };
    if !any_alive {
      trace!("{kind:?} bucket has no alive writers at tick, skipping assertion");
      return;
    }

    let participant_prefix = state.participant_prefix;
    let Some(instance_handle) = InstanceHandle::for_liveliness(participant_prefix, kind) else {
      return;
    };
    let payload = encode_liveliness_payload(instance_handle);

    let ok = match Self::assert_via_secure_pair(&mut state, instance_handle, payload.clone()) {
      Some(result) => result,
      None => state.plain.writer.assert_liveliness(instance_handle, payload),
    };

    if ok {
      state.assertions_emitted += 1;
    } else {
      warn!("{kind:?} liveliness assertion dropped: built-in writer cache exhausted");
    }
  }

  /// Emits through the secure built-in writer instead of the plain one,
  /// iff this build carries the `security` feature, the pair was built
  /// (`is_liveliness_protected` was set), and a secure pair actually
  /// exists. Returns `None` (rather than falling through to `plain`
  /// itself) so the caller always still has `payload` in hand to send on
  /// the plain endpoint.
  #[cfg(feature = "security")]
  fn assert_via_secure_pair(state: &mut WlpState, instance_handle: InstanceHandle, payload: Vec<u8>) -> Option<bool> {
    if !state.security_attributes.is_liveliness_protected {
      return None;
    }
    state.secure.as_mut().map(|pair| pair.writer.assert_liveliness(instance_handle, payload))
  }

  #[cfg(not(feature = "security"))]
  fn assert_via_secure_pair(_state: &mut WlpState, _instance_handle: InstanceHandle, _payload: Vec<u8>) -> Option<bool> {
    None
  }

  // ---- Liveliness Manager earliest-deadline timers ------------------------

  fn rearm_publisher_manager_timer(&self, state: &mut WlpState) {
    let next = state.publisher_liveliness.next_deadline();
    if let Some(handle) = state.publisher_timer.take() {
      self.scheduler.cancel(handle);
    }
    state.publisher_timer = next.map(|deadline| self.spawn_manager_tick(deadline, true));
  }

  fn rearm_subscriber_manager_timer(&self, state: &mut WlpState) {
    let next = state.subscriber_liveliness.next_deadline();
    if let Some(handle) = state.subscriber_timer.take() {
      self.scheduler.cancel(handle);
    }
    state.subscriber_timer = next.map(|deadline| self.spawn_manager_tick(deadline, false));
  }

  fn spawn_manager_tick(&self, deadline: Timestamp, publisher_side: bool) -> EventHandle {
    let delay = Duration::try_from(deadline.remaining()).unwrap_or(DURATION_ZERO);
    let state_arc = Arc::clone(&self.state);
    let scheduler = Arc::clone(&self.scheduler);
    self.scheduler.schedule(delay, move |code| {
      if code == EventCode::Success {
        if publisher_side {
          WriterLivelinessProtocol::on_publisher_manager_tick(&state_arc, &scheduler);
        } else {
          WriterLivelinessProtocol::on_subscriber_manager_tick(&state_arc, &scheduler);
        }
      }
    })
  }

  fn on_publisher_manager_tick(state_arc: &Arc<Mutex<WlpState>>, scheduler: &Arc<TimedEventScheduler>) {
    let mut state = state_arc.lock().unwrap();
    let expired = state.publisher_liveliness.expire();
    for (guid, kind, lease_duration) in expired {
      Self::pub_liveliness_changed_locked(&mut state, guid, kind, lease_duration, 0, 1);
    }
    let next = state.publisher_liveliness.next_deadline();
    state.publisher_timer = next.map(|deadline| {
      let delay = Duration::try_from(deadline.remaining()).unwrap_or(DURATION_ZERO);
      let state_arc = Arc::clone(state_arc);
      let scheduler_clone = Arc::clone(scheduler);
      scheduler.schedule(delay, move |code| {
        if code == EventCode::Success {
          WriterLivelinessProtocol::on_publisher_manager_tick(&state_arc, &scheduler_clone);
        }
      })
    });
  }

  fn on_subscriber_manager_tick(state_arc: &Arc<Mutex<WlpState>>, scheduler: &Arc<TimedEventScheduler>) {
    let mut state = state_arc.lock().unwrap();
    let expired = state.subscriber_liveliness.expire();
    for (guid, kind, lease_duration) in expired {
      Self::sub_liveliness_changed_locked(&mut state, guid, kind, lease_duration, 0, 1);
    }
    let next = state.subscriber_liveliness.next_deadline();
    state.subscriber_timer = next.map(|deadline| {
      let delay = Duration::try_from(deadline.remaining()).unwrap_or(DURATION_ZERO);
      let state_arc = Arc::clone(state_arc);
      let scheduler_clone = Arc::clone(scheduler);
      scheduler.schedule(delay, move |code| {
        if code == EventCode::Success {
          WriterLivelinessProtocol::on_subscriber_manager_tick(&state_arc, &scheduler_clone);
        }
      })
    });
  }
}

/// Builds the 28-byte liveliness assertion payload (spec.md §4.4.3 step 4,
/// P2): a 4-byte CDR encapsulation header (2-byte id, 2 zero option
/// bytes), the 16-byte instance handle, then 8 zero bytes.
fn encode_liveliness_payload(instance_handle: InstanceHandle) -> Vec<u8> {
  let id = if cfg!(target_endian = "little") {
    PL_CDR_LE_ID
  } else {
    PL_CDR_BE_ID
  };
  let mut payload = Vec::with_capacity(28);
  payload.extend_from_slice(&id.to_be_bytes());
  payload.extend_from_slice(&[0u8, 0u8]);
  payload.extend_from_slice(&instance_handle.0);
  payload.extend_from_slice(&[0u8; 8]);
  payload
}

fn decode_liveliness_payload(payload: &[u8]) -> Option<InstanceHandle> {
  if payload.len() != 28 {
    return None;
  }
  let id = BigEndian::read_u16(&payload[0..2]);
  if id != PL_CDR_LE_ID && id != PL_CDR_BE_ID {
    return None;
  }
  let mut bytes = [0u8; 16];
  bytes.copy_from_slice(&payload[4..20]);
  Some(InstanceHandle(bytes))
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex as StdMutex;

  use super::*;
  use crate::{
    dds::qos::policy::LivelinessQosPolicy,
    rtps::security_stub::NullSecurityManager,
    structure::guid::EntityId,
  };

  struct FixedDiscovery(StdMutex<HashMap<GUID, LivelinessQosPolicy>>);

  impl DiscoveryDb for FixedDiscovery {
    fn lookup_writer_liveliness_qos(&self, writer: GUID) -> Option<LivelinessQosPolicy> {
      self.0.lock().unwrap().get(&writer).copied()
    }
  }

  fn new_wlp() -> (WriterLivelinessProtocol, GuidPrefix) {
    new_wlp_with_discovery(HashMap::new())
  }

  fn new_wlp_with_discovery(entries: HashMap<GUID, LivelinessQosPolicy>) -> (WriterLivelinessProtocol, GuidPrefix) {
    let prefix = GuidPrefix::new([5; 12]);
    let scheduler = Arc::new(TimedEventScheduler::new());
    let discovery = Box::new(FixedDiscovery(StdMutex::new(entries)));
    let security = Box::new(NullSecurityManager);
    let wlp = WriterLivelinessProtocol::new(
      prefix,
      scheduler,
      discovery,
      security,
      ParticipantSecurityAttributes::default(),
    );
    (wlp, prefix)
  }

  #[test]
  fn encoded_payload_matches_wire_layout() {
    let handle = InstanceHandle::for_liveliness(GuidPrefix::new([1; 12]), LivelinessKind::Automatic).unwrap();
    let payload = encode_liveliness_payload(handle);
    assert_eq!(payload.len(), 28);
    assert_eq!(&payload[4..20], &handle.0);
    assert_eq!(&payload[20..28], &[0u8; 8]);
    assert_eq!(decode_liveliness_payload(&payload), Some(handle));
  }

  #[test]
  fn encapsulation_header_matches_host_endianness() {
    let handle = InstanceHandle::for_liveliness(GuidPrefix::new([1; 12]), LivelinessKind::Automatic).unwrap();
    let payload = encode_liveliness_payload(handle);
    let expected_header: [u8; 4] = if cfg!(target_endian = "little") {
      hex_literal::hex!("00 03 00 00")
    } else {
      hex_literal::hex!("00 02 00 00")
    };
    assert_eq!(&payload[0..4], &expected_header);
  }

  // spec.md §8 P4: add_local_writer followed by remove_local_writer
  // leaves the bucket set and minimum scalar in their pre-state.
  #[test_log::test]
  fn add_then_remove_restores_bucket_minimum() -> anyhow::Result<()> {
    let (wlp, prefix) = new_wlp();
    let existing = GUID::new(prefix, EntityId::new([0, 0, 0, 1]));
    wlp.add_local_writer(existing, LivelinessKind::Automatic, Duration::from_millis(900), Duration::from_millis(300))?;
    anyhow::ensure!(wlp.min_automatic_ms() == Some(300), "unexpected pre-state minimum");

    let transient = GUID::new(prefix, EntityId::new([0, 0, 0, 2]));
    wlp.add_local_writer(transient, LivelinessKind::Automatic, Duration::from_millis(300), Duration::from_millis(50))?;
    anyhow::ensure!(wlp.min_automatic_ms() == Some(50), "adding a faster writer must lower the minimum");

    anyhow::ensure!(wlp.remove_local_writer(transient), "remove_local_writer must report success for a known writer");
    anyhow::ensure!(wlp.min_automatic_ms() == Some(300), "round trip must restore the pre-state minimum");
    Ok(())
  }

  #[test]
  fn rejects_writer_from_a_foreign_participant() {
    let (wlp, _prefix) = new_wlp();
    let foreign = GUID::new(GuidPrefix::new([9; 12]), EntityId::new([0, 0, 0, 1]));
    let result = wlp.add_local_writer(
      foreign,
      LivelinessKind::Automatic,
      Duration::from_millis(300),
      Duration::from_millis(100),
    );
    assert_eq!(result, Err(WlpError::ForeignWriter(foreign)));
  }

  #[test]
  fn admitting_an_automatic_writer_arms_the_bucket_timer() {
    let (wlp, prefix) = new_wlp();
    let writer = GUID::new(prefix, EntityId::new([0, 0, 0, 1]));
    assert_eq!(
      wlp.add_local_writer(
        writer,
        LivelinessKind::Automatic,
        Duration::from_millis(300),
        Duration::from_millis(100)
      ),
      Ok(true)
    );
    let state = wlp.state.lock().unwrap();
    assert_eq!(state.min_automatic_ms, Some(100));
    assert!(state.automatic_timer.is_some());
  }

  #[test]
  fn removing_the_last_writer_cancels_the_bucket_timer() {
    let (wlp, prefix) = new_wlp();
    let writer = GUID::new(prefix, EntityId::new([0, 0, 0, 1]));
    wlp
      .add_local_writer(
        writer,
        LivelinessKind::Automatic,
        Duration::from_millis(300),
        Duration::from_millis(100),
      )
      .unwrap();
    assert!(wlp.remove_local_writer(writer));
    let state = wlp.state.lock().unwrap();
    assert!(state.automatic_timer.is_none());
    assert_eq!(state.min_automatic_ms, None);
  }

  #[test]
  fn assert_liveliness_manual_by_participant_requires_a_writer() {
    let (wlp, _prefix) = new_wlp();
    assert!(!wlp.assert_liveliness_manual_by_participant());
  }

  #[test]
  fn unknown_writer_removal_is_reported_and_does_not_panic() {
    let (wlp, prefix) = new_wlp();
    let writer = GUID::new(prefix, EntityId::new([0, 0, 0, 1]));
    assert!(!wlp.remove_local_writer(writer));
  }

  // spec.md §4.4.5's symmetric inverse of `assign_remote_endpoints`:
  // departing a remote participant unmatches it from the plain pair and
  // forgets it from every local reader it was matched with, as well as
  // from the subscriber-side Liveliness Manager.
  #[test]
  fn remove_remote_endpoints_unmatches_plain_pair_and_local_readers() {
    let (wlp, prefix) = new_wlp();
    let remote_prefix = GuidPrefix::new([6; 12]);
    let remote_endpoints: BuiltinEndpointSet =
      BuiltinEndpoint::ParticipantMessageDataWriter | BuiltinEndpoint::ParticipantMessageDataReader;
    wlp.assign_remote_endpoints(remote_prefix, remote_endpoints);

    let remote_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER);
    let reader = GUID::new(prefix, EntityId::new([0, 0, 0, 20]));
    wlp.add_local_reader(reader, LivelinessKind::ManualByParticipant, Duration::from_millis(100)).unwrap();
    wlp.match_local_reader_with_remote_writer(reader, remote_writer);

    {
      let state = wlp.state.lock().unwrap();
      assert_eq!(state.plain.reader.matched_writer_count(), 1);
      assert_eq!(state.plain.writer.matched_reader_count(), 1);
    }

    wlp.remove_remote_endpoints(remote_prefix);

    let state = wlp.state.lock().unwrap();
    assert_eq!(state.plain.reader.matched_writer_count(), 0);
    assert_eq!(state.plain.writer.matched_reader_count(), 0);
    assert!(state.local_readers.get(&reader).unwrap().matched_writers.is_empty());
  }

  // spec.md §8 scenario 2: two automatic writers with different periods.
  #[test]
  fn bucket_minimum_recomputes_after_faster_writer_is_removed() {
    let (wlp, prefix) = new_wlp();
    let slow = GUID::new(prefix, EntityId::new([0, 0, 0, 1]));
    let fast = GUID::new(prefix, EntityId::new([0, 0, 0, 2]));
    wlp
      .add_local_writer(slow, LivelinessKind::Automatic, Duration::from_millis(600), Duration::from_millis(200))
      .unwrap();
    wlp
      .add_local_writer(fast, LivelinessKind::Automatic, Duration::from_millis(150), Duration::from_millis(50))
      .unwrap();
    assert_eq!(wlp.min_automatic_ms(), Some(50));

    assert!(wlp.remove_local_writer(fast));
    assert_eq!(wlp.min_automatic_ms(), Some(200));
  }

  // spec.md §8 scenario 3: manual-by-participant expiry is reported to a
  // matched local reader with the same (kind, lease).
  #[test]
  fn manual_by_participant_loss_reaches_a_matched_reader_after_lease_expires() {
    use std::sync::mpsc;

    struct CapturingListener(mpsc::Sender<LivelinessChangedStatus>);
    impl EndpointListener for CapturingListener {
      fn on_liveliness_changed(&mut self, _reader: GUID, status: LivelinessChangedStatus) {
        let _ = self.0.send(status);
      }
    }

    let remote_prefix = GuidPrefix::new([7; 12]);
    let remote_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER);
    let lease = Duration::from_millis(80);
    let mut entries = HashMap::new();
    entries.insert(remote_writer, LivelinessQosPolicy::manual_by_participant(lease, lease));
    let (wlp, prefix) = new_wlp_with_discovery(entries);

    let reader = GUID::new(prefix, EntityId::new([0, 0, 0, 9]));
    wlp.add_local_reader(reader, LivelinessKind::ManualByParticipant, lease).unwrap();
    wlp.match_local_reader_with_remote_writer(reader, remote_writer);

    let (tx, rx) = mpsc::channel();
    wlp.set_listener(reader, Box::new(CapturingListener(tx)));

    let payload = encode_liveliness_payload(
      InstanceHandle::for_liveliness(remote_prefix, LivelinessKind::ManualByParticipant).unwrap(),
    );
    wlp.handle_inbound_sample(remote_writer, &payload);

    // First notification: the initial NotAlive->Alive transition.
    let alive_status = rx.recv_timeout(std::time::Duration::from_millis(1000)).unwrap();
    assert_eq!(alive_status.alive_count.count(), 1);

    // Second notification: the lease expires without a further assert.
    // The snapshot handed to the listener still carries the pending
    // change (I6 zeroes it on the *stored* status only after the
    // callback returns, not in the copy the callback already received).
    let lost_status = rx.recv_timeout(std::time::Duration::from_millis(1000)).unwrap();
    assert_eq!(lost_status.not_alive_count.count(), 1);
    assert_eq!(lost_status.not_alive_count.count_change(), 1);
  }

  // spec.md §8 scenario 4: a reader whose lease does not match the
  // announced writer's lease never observes its liveliness changes.
  #[test]
  fn reader_with_incompatible_lease_is_never_notified() {
    use std::sync::mpsc;

    struct CapturingListener(mpsc::Sender<LivelinessChangedStatus>);
    impl EndpointListener for CapturingListener {
      fn on_liveliness_changed(&mut self, _reader: GUID, status: LivelinessChangedStatus) {
        let _ = self.0.send(status);
      }
    }

    let remote_prefix = GuidPrefix::new([8; 12]);
    let remote_writer = GUID::new(remote_prefix, ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER);
    let remote_lease = Duration::from_millis(80);
    let mut entries = HashMap::new();
    entries.insert(remote_writer, LivelinessQosPolicy::manual_by_participant(remote_lease, remote_lease));
    let (wlp, prefix) = new_wlp_with_discovery(entries);

    let reader = GUID::new(prefix, EntityId::new([0, 0, 0, 10]));
    // Remote writer's lease (above) is 80ms; this reader asked for 500ms,
    // an incompatible QoS match that EDP would never have paired -- but
    // `match_local_reader_with_remote_writer` models the pairing directly.
    wlp.add_local_reader(reader, LivelinessKind::ManualByParticipant, Duration::from_millis(500)).unwrap();
    wlp.match_local_reader_with_remote_writer(reader, remote_writer);

    let (tx, rx) = mpsc::channel();
    wlp.set_listener(reader, Box::new(CapturingListener(tx)));

    let payload = encode_liveliness_payload(
      InstanceHandle::for_liveliness(remote_prefix, LivelinessKind::ManualByParticipant).unwrap(),
    );
    wlp.handle_inbound_sample(remote_writer, &payload);

    assert!(rx.recv_timeout(std::time::Duration::from_millis(300)).is_err());
  }

  // spec.md §8 scenario 6: removing a writer concurrently with its bucket
  // tick must not deadlock or leave inconsistent state.
  #[test]
  fn removal_racing_the_automatic_tick_does_not_deadlock() {
    let (wlp, prefix) = new_wlp();
    let writer = GUID::new(prefix, EntityId::new([0, 0, 0, 3]));
    wlp
      .add_local_writer(writer, LivelinessKind::Automatic, Duration::from_millis(100), Duration::from_millis(5))
      .unwrap();

    let wlp_for_remover = wlp.clone();
    let remover = std::thread::spawn(move || {
      std::thread::sleep(std::time::Duration::from_millis(10));
      wlp_for_remover.remove_local_writer(writer)
    });

    std::thread::sleep(std::time::Duration::from_millis(50));
    remover.join().unwrap();

    assert!(wlp.min_automatic_ms().is_none() || wlp.min_automatic_ms() == Some(5));
  }
}
