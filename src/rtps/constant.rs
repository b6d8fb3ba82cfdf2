// Built-in entity ids and discovery flags for the liveliness protocol.
// Entity id values are the ones assigned by the RTPS spec
// (`ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_{WRITER,READER}`); the
// secure variants follow the DDS Security spec's convention of setting
// the high bit of the vendor-specific first octet. Mirrors Fast-RTPS's
// `c_EntityId_WriterLiveliness` / `c_EntityId_ReaderLiveliness` and their
// `...Secure` counterparts (original_source WLP.cpp).

use enumflags2::{bitflags, BitFlags};

use crate::structure::guid::EntityId;

pub const ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER: EntityId =
  EntityId::new([0x00, 0x02, 0x00, 0xc2]);
pub const ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_READER: EntityId =
  EntityId::new([0x00, 0x02, 0x00, 0xc7]);

pub const ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_WRITER: EntityId =
  EntityId::new([0xff, 0x02, 0x00, 0xc2]);
pub const ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_SECURE_READER: EntityId =
  EntityId::new([0xff, 0x02, 0x00, 0xc7]);

/// Flags an SPDP participant proxy advertises for which built-in endpoints
/// it has. Only the liveliness-relevant bits are modeled; the RTPS spec
/// defines many more (EDP publication/subscription readers and writers,
/// etc.) that this crate never inspects.
#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BuiltinEndpoint {
  ParticipantMessageDataWriter = 0x0000_0400,
  ParticipantMessageDataReader = 0x0000_0800,
  ParticipantMessageSecureDataWriter = 0x0000_4000,
  ParticipantMessageSecureDataReader = 0x0000_8000,
}

pub type BuiltinEndpointSet = BitFlags<BuiltinEndpoint>;
