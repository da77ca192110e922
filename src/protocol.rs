//! Header protocol registry.
//!
//! A connection's over-the-air header is a composable sequence of small
//! fields. The set and order are fixed at connection creation from a
//! [`HeaderCfg`]; serialization and deserialization walk the resulting plan
//! in registration order with precomputed offsets, so the per-slot radio
//! interrupt path does no searching. Receivers must mirror the sender's
//! registration order exactly; both are derived from the same
//! configuration.
//!
//! Header layout for a main frame with everything enabled:
//! ```norust
//!  1            | 1             | 2   | 1 or 5  | 1             | 1
//!  timeslot_saw | channel_index | rdo | ranging | connection_id | credit
//! ```
//! Acknowledge frames use the same registry without the timeslot_saw and
//! channel_index fields.

use modular_bitfield::prelude::*;

use crate::parameters::MAX_HEADER_FIELDS;

/// Byte 0 of a main frame header: bit 7 carries the stop-and-wait sequence
/// bit, bits 6..0 the time slot index.
#[bitfield]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeslotSaw {
    pub time_slot_id: B7,
    pub seq_num: bool,
}

/// Header field identifiers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoId {
    TimeslotSaw,
    ChannelIndex,
    Rdo,
    RangingResponder,
    RangingInitiator,
    ConnectionId,
    CreditFc,
}

pub const TIMESLOT_SAW_PROTO_SIZE: u8 = 1;
pub const CHANNEL_INDEX_PROTO_SIZE: u8 = 1;
pub const RDO_PROTO_SIZE: u8 = 2;
pub const RANGING_PHASE_COUNT_PROTO_SIZE: u8 = 1;
pub const RANGING_PHASES_PROTO_SIZE: u8 = 5;
pub const CONNECTION_ID_PROTO_SIZE: u8 = 1;
pub const CREDIT_FC_PROTO_SIZE: u8 = 1;

/// Ranging role of a connection.
///
/// Standalone modes run the whole exchange over one connection's main and
/// acknowledge frames; the split TX/RX modes spread it over dedicated
/// connections.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangingMode {
    #[default]
    None,
    StandaloneInitiator,
    StandaloneResponder,
    InitiatorTx,
    InitiatorRx,
    ResponderTx,
    ResponderRx,
}

/// Header composition requested for a connection.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderCfg {
    /// The connection is attached to main time slots.
    pub main_connection: bool,
    pub rdo_enabled: bool,
    /// More than one connection shares the slot.
    pub connection_id: bool,
    pub credit_fc_enabled: bool,
    pub ranging_mode: RangingMode,
}

/// One planned header field.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ProtoEntry {
    pub id: ProtoId,
    /// Byte offset inside the serialized header.
    pub offset: u8,
    pub size: u8,
    /// Field is serialized on the sending side.
    pub tx: bool,
    /// Field is interpreted on the receiving side.
    pub rx: bool,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFull;

/// Ordered field plan for one frame type of one connection.
#[derive(Debug, Clone, Default)]
pub struct LinkProtocol {
    entries: heapless::Vec<ProtoEntry, MAX_HEADER_FIELDS>,
    size: u8,
}

impl LinkProtocol {
    pub const fn new() -> Self {
        Self { entries: heapless::Vec::new(), size: 0 }
    }

    pub fn add(&mut self, id: ProtoId, size: u8, tx: bool, rx: bool) -> Result<(), ProtocolFull> {
        let entry = ProtoEntry { id, offset: self.size, size, tx, rx };
        self.entries.push(entry).map_err(|_| ProtocolFull)?;
        self.size += size;
        Ok(())
    }

    /// Total serialized header size.
    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn entries(&self) -> &[ProtoEntry] {
        &self.entries
    }

    /// Byte offset of a field inside the serialized header.
    pub fn offset_of(&self, id: ProtoId) -> Option<u8> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.offset)
    }

    /// Build the plan for a connection's main frames.
    pub fn for_main_frame(cfg: HeaderCfg) -> Self {
        let mut proto = Self::new();

        if cfg.main_connection {
            let _ = proto.add(ProtoId::TimeslotSaw, TIMESLOT_SAW_PROTO_SIZE, true, true);
            let _ = proto.add(ProtoId::ChannelIndex, CHANNEL_INDEX_PROTO_SIZE, true, true);
        }
        if cfg.rdo_enabled {
            let _ = proto.add(ProtoId::Rdo, RDO_PROTO_SIZE, true, true);
        }
        match cfg.ranging_mode {
            RangingMode::StandaloneInitiator | RangingMode::InitiatorTx => {
                let _ = proto.add(
                    ProtoId::RangingInitiator,
                    RANGING_PHASE_COUNT_PROTO_SIZE,
                    true,
                    false,
                );
            }
            RangingMode::StandaloneResponder | RangingMode::ResponderRx => {
                let _ = proto.add(
                    ProtoId::RangingResponder,
                    RANGING_PHASE_COUNT_PROTO_SIZE,
                    false,
                    true,
                );
            }
            RangingMode::InitiatorRx => {
                let _ =
                    proto.add(ProtoId::RangingInitiator, RANGING_PHASES_PROTO_SIZE, false, true);
            }
            RangingMode::ResponderTx => {
                let _ =
                    proto.add(ProtoId::RangingResponder, RANGING_PHASES_PROTO_SIZE, true, false);
            }
            RangingMode::None => {}
        }
        if cfg.connection_id {
            let _ = proto.add(ProtoId::ConnectionId, CONNECTION_ID_PROTO_SIZE, true, true);
        }
        if cfg.credit_fc_enabled {
            let _ = proto.add(ProtoId::CreditFc, CREDIT_FC_PROTO_SIZE, true, true);
        }

        proto
    }

    /// Build the plan for a connection's acknowledge frames.
    pub fn for_ack_frame(cfg: HeaderCfg) -> Self {
        let mut proto = Self::new();

        if cfg.rdo_enabled {
            let _ = proto.add(ProtoId::Rdo, RDO_PROTO_SIZE, true, true);
        }
        match cfg.ranging_mode {
            RangingMode::StandaloneInitiator => {
                let _ =
                    proto.add(ProtoId::RangingInitiator, RANGING_PHASES_PROTO_SIZE, false, true);
            }
            RangingMode::StandaloneResponder => {
                let _ =
                    proto.add(ProtoId::RangingResponder, RANGING_PHASES_PROTO_SIZE, true, false);
            }
            RangingMode::InitiatorTx
            | RangingMode::InitiatorRx
            | RangingMode::ResponderTx
            | RangingMode::ResponderRx
            | RangingMode::None => {}
        }
        if cfg.connection_id {
            let _ = proto.add(ProtoId::ConnectionId, CONNECTION_ID_PROTO_SIZE, true, true);
        }
        if cfg.credit_fc_enabled {
            let _ = proto.add(ProtoId::CreditFc, CREDIT_FC_PROTO_SIZE, true, true);
        }

        proto
    }
}

/// Serialized size of a main frame header for this configuration.
pub fn main_header_size(cfg: HeaderCfg) -> u8 {
    LinkProtocol::for_main_frame(cfg).size()
}

/// Serialized size of an acknowledge frame header for this configuration.
pub fn ack_header_size(cfg: HeaderCfg) -> u8 {
    LinkProtocol::for_ack_frame(cfg).size()
}
