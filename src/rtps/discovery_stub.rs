// Black-box discovery surface (spec.md §1 "Out of scope", §6). The
// liveliness protocol only ever needs two facts from PDP/EDP: a writer's
// Liveliness QoS, and which built-in endpoints a remote participant
// advertises. Everything else discovery does is out of scope and
// represented only by this trait.
//
// `lookup_writer_liveliness_qos` is consulted for both remote writers
// (inbound sample validation, spec.md §4.4.4) and local writers being
// evicted (spec.md §4.4.2 step 2, so removal reads the writer's current
// kind rather than trusting a cache taken at admission time).

use crate::{
  dds::qos::policy::LivelinessQosPolicy,
  structure::guid::GUID,
};

pub trait DiscoveryDb: Send {
  fn lookup_writer_liveliness_qos(&self, writer: GUID) -> Option<LivelinessQosPolicy>;
}
