//! Radio PHY boundary.
//!
//! The PHY is a black box to this crate: it programs the transceiver,
//! handles preamble/syncword/CRC and the hardware auto-reply turnaround,
//! and reports one completion signal per frame direction at every slot
//! boundary. The MAC consumes those signals through [`WpsPhy`] and arms the
//! next slot with a [`PhyPrepare`] command.
//!
//! Channel register patterns ([`RfChannel`]) are precomputed by the
//! application from its calibration data; the MAC passes them through
//! untouched.

use crate::link::LinkCca;
use crate::parameters::PHASE_OFFSET_BYTE_COUNT;
use crate::{Address, ChipRepetition, FecLevel, Modulation, SleepLevel};

/// Completion signal reported by the PHY for one frame direction.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhySignal {
    /// Nothing happened in this direction.
    #[default]
    None,
    /// The next slot command was accepted.
    PrepareDone,
    /// A frame addressed to us passed the CRC.
    FrameReceived,
    /// Expected frame never arrived, or arrived corrupted.
    FrameLost,
    /// A frame arrived but was addressed elsewhere.
    FrameRejected,
    /// Our transmission was acknowledged (or needed no acknowledge).
    FrameSentAck,
    /// Our transmission was not acknowledged.
    FrameSentNack,
}

/// Per-frame radio metrics sampled by the PHY.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct PhyMetrics {
    /// Raw RSSI; larger = weaker signal.
    pub rssi_raw: u8,
    /// Raw noise indicator.
    pub rnsi_raw: u8,
    pub phase_offset: [u8; PHASE_OFFSET_BYTE_COUNT],
    /// CCA probes burned before transmitting (or before giving up).
    pub cca_try_count: u8,
    /// PLL cycles the receiver waited past its power-up for the syncword.
    pub rx_wait_time: u16,
}

/// Precomputed transceiver register pattern for one RF channel.
///
/// Produced by the application's spectral calibration; opaque here.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfChannel {
    pub reg_pattern: [u16; 6],
    pub tx_gain: u8,
}

/// Which of the two per-slot frames to address.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTarget {
    Main,
    Auto,
}

/// How a requested register write is applied by the PHY.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegWriteCfg {
    /// Written once at the next slot boundary.
    #[default]
    WriteOnce,
    /// Rewritten by the PHY on every slot until cleared.
    WritePeriodic,
}

/// Command arming the PHY for the next time slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhyPrepare<'f> {
    /// Radio power-up lead time, in PLL cycles.
    pub power_up_delay: u16,
    /// Receive timeout, in PLL cycles. 0 for TX slots.
    pub rx_timeout: u32,
    /// Sleep duration until the slot, in PLL cycles.
    pub sleep_time: u32,
    pub sleep_level: SleepLevel,
    pub channel: RfChannel,
    pub modulation: Modulation,
    pub fec: FecLevel,
    pub chip_repet: ChipRepetition,
    pub cca: LinkCca,
    /// Random datarate offset for this wake-up, in PLL cycles.
    pub rdo_offset: u16,
    /// Desync drift offset for this wake-up, in PLL cycles.
    pub ddcm_offset: u16,
    pub rx_gain: u8,
    pub local_address: Address,
    pub destination_address: Address,
    /// Largest header the receiver may see this slot.
    pub expected_header_size: u8,
    /// Largest payload the receiver may see this slot.
    pub expected_payload_size: u8,
    /// Serialized main frame to transmit; `None` arms a receive slot.
    pub main_tx: Option<&'f [u8]>,
    /// Serialized acknowledge / auto-reply frame.
    pub auto_tx: Option<&'f [u8]>,
    /// The main transmission expects an acknowledge.
    pub ack_expected: bool,
    /// Throttled-out slot: the radio sleeps through it.
    pub muted: bool,
}

/// The two per-slot completion signals.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhySignalPair {
    pub main: PhySignal,
    pub auto: PhySignal,
}

/// Interface the radio PHY exposes to the MAC.
pub trait WpsPhy {
    /// Completion signals for the slot that just ended.
    fn signals(&self) -> PhySignalPair;

    /// Metrics sampled with those signals.
    fn metrics(&self) -> PhyMetrics;

    /// Copy the received frame bytes (serialized header + payload) into
    /// `dest`, returning the byte count (0 when nothing was received).
    fn read_frame(&mut self, target: FrameTarget, dest: &mut [u8]) -> usize;

    /// Arm the next slot.
    fn prepare(&mut self, prepare: &PhyPrepare<'_>);

    /// Bring the radio up; the first slot signals follow.
    fn connect(&mut self);

    /// Shut the radio down.
    fn disconnect(&mut self);

    fn write_register(&mut self, reg: u8, value: u16, cfg: RegWriteCfg);

    /// Cancel any periodic register write armed through
    /// [`Self::write_register`].
    fn clear_write_register(&mut self);

    fn read_register(&mut self, reg: u8) -> u16;
}
