//! TDMA wireless protocol stack (MAC/link layer) for sub-GHz/UWB radio nodes.
//!
//! Supports `no_std`.
//!
//! The stack sits between a radio physical layer (exposed through the
//! [`phy::WpsPhy`] trait) and application connections. It owns the TDMA
//! schedule, multiplexes up to [`parameters::MAX_CONN_PER_TIMESLOT`]
//! connections per time slot, runs a one-bit stop-and-wait ARQ over the
//! auto-reply acknowledge path, hops channels, applies clear-channel
//! assessment, drifts its own timing to escape congested air time (DDCM and
//! RDO), and moves frames between layers through zero-copy descriptor
//! queues.
#![no_std]

// Execution contexts:
//  - radio IRQ: `Wps::phy_callback` only. Never blocks, never allocates,
//    defers all application notifications into a bounded event queue.
//  - callback worker: `Wps::process_callback`. Drains the event queue and
//    the statistics staging ring.
//  - application: everything else on the facade.

pub mod parameters;

pub mod xlayer;

pub mod scheduler;

pub mod link;

pub mod protocol;

pub mod connection;

pub mod phy;

pub mod mac;

pub mod request;

pub mod network;

pub use connection::{Connection, ConnectionConfig, FrameConfig};
pub use network::{Node, NodeConfig, Wps};
pub use protocol::{HeaderCfg, RangingMode};

/// Over-the-air node address.
pub type Address = u16;

/// Handle to a connection created on a [`Node`].
///
/// Handles are plain indices into the node's connection table; they stay
/// valid for the lifetime of the node and are `Copy` so the application can
/// stash them anywhere.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle(pub(crate) u8);

impl ConnectionHandle {
    /// Handle for the connection at `index` in the node's table. Normally
    /// obtained from `create_connection`; constructing one directly is only
    /// useful when driving the scheduler without a node.
    pub const fn from_index(index: u8) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Role of the local node in the network.
///
/// The coordinator owns the schedule: it never resynchronizes from received
/// headers. Network nodes track the coordinator's timing and jump their
/// schedule cursor when a received slot id disagrees with the local one.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Node,
}

/// Radio sleep depth between time slots.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SleepLevel {
    #[default]
    Idle,
    Shallow,
    Deep,
}

/// Frame modulation.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modulation {
    #[default]
    Iook,
    TwoBitPpm,
    Ook,
}

/// Forward error correction level.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecLevel {
    #[default]
    Lvl0,
    Lvl1,
    Lvl2,
    Lvl3,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct FecLevelOutOfRange;

impl TryFrom<u8> for FecLevel {
    type Error = FecLevelOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use FecLevel::*;
        Ok(match value {
            0 => Lvl0,
            1 => Lvl1,
            2 => Lvl2,
            3 => Lvl3,
            _ => return Err(FecLevelOutOfRange),
        })
    }
}

/// Chip repetition count.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipRepetition {
    #[default]
    Repeat1,
    Repeat2,
    Repeat3,
    Repeat4,
}

/// Radio chip rate.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipRate {
    Rate20M48,
    #[default]
    Rate27M30,
    Rate40M96,
}

impl ChipRate {
    /// PLL frequency for this chip rate, in kHz.
    pub const fn pll_freq_khz(&self) -> u32 {
        match *self {
            ChipRate::Rate20M48 => 20_480,
            ChipRate::Rate27M30 => 27_300,
            ChipRate::Rate40M96 => 40_960,
        }
    }
}

/// Convert a microsecond duration into PLL cycles for a given chip rate.
pub const fn us_to_pll_cycles(time_us: u32, chip_rate: ChipRate) -> u32 {
    (time_us as u64 * chip_rate.pll_freq_khz() as u64 / 1000 - 1) as u32
}

/// Inter-symbol-interference mitigation level.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsiMitig {
    #[default]
    Lvl0,
    Lvl1,
    Lvl2,
    Lvl3,
}

impl IsiMitig {
    /// Number of modulation pauses inserted for this mitigation level.
    pub const fn pauses(&self) -> u8 {
        match *self {
            IsiMitig::Lvl0 => 0,
            IsiMitig::Lvl1 => 1,
            IsiMitig::Lvl2 => 2,
            IsiMitig::Lvl3 => 3,
        }
    }
}

/// Syncword programming for the transceiver.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct SyncwordConfig {
    pub syncword: u32,
    /// Length of the syncword in bits.
    pub syncword_length: u8,
    /// Transmitted bits per syncword bit.
    pub syncword_bit_cost: u8,
    /// Number of bit errors tolerated by the correlator.
    pub syncword_tolerance: u8,
}

impl Default for SyncwordConfig {
    fn default() -> Self {
        Self {
            syncword: 0x9F1D_C392,
            syncword_length: 32,
            syncword_bit_cost: parameters::recommended::SYNCWORD_BIT_COST,
            syncword_tolerance: parameters::recommended::SYNCWORD_TOLERANCE,
        }
    }
}

/// Stack lifecycle signal.
///
/// `NotInit → Disconnect ⇄ Connect`; `Halt` is a parked `Connect`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WpsSignal {
    NotInit = 0,
    Disconnect = 1,
    Connect = 2,
    Halt = 3,
}

impl WpsSignal {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => WpsSignal::Disconnect,
            2 => WpsSignal::Connect,
            3 => WpsSignal::Halt,
            _ => WpsSignal::NotInit,
        }
    }
}

/// Errors surfaced by the facade.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpsError {
    NotInit,
    RadioNotInitialized,
    ChannelSequenceNotInitialized,
    QueueFull,
    QueueEmpty,
    WrongTxSize,
    WrongRxSize,
    NotEnoughMemory,
    AlreadyConnected,
    AlreadyDisconnected,
    DisconnectTimeout,
    RequestQueueFull,
    WriteRequestQueueFull,
    ReadRequestQueueFull,
    ScheduleRatioQueueFull,
    InvalidCcaSettings,
    AckDisabled,
    TimeslotConnLimitReached,
    ConnectionLimitReached,
    InvalidTimeslot,
}

/// What happened to a connection, delivered from the deferred event queue.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A frame was delivered and acknowledged.
    TxSuccess,
    /// A transmission attempt failed; the frame stays queued for retry.
    TxFail,
    /// A frame exhausted its retry or deadline budget and was discarded.
    TxDrop,
    /// A frame is waiting in the connection's receive queue.
    RxSuccess,
    /// A complete ranging phase sample set is ready to read.
    RangingDataReady,
    /// The connect-status tracker declared the link up.
    Connected,
    /// The connect-status tracker declared the link down.
    Disconnected,
}

/// One deferred application notification.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WpsEvent {
    pub connection: ConnectionHandle,
    pub kind: EventKind,
}
