//! Logical connections.
//!
//! A connection is a one-directional stream between two addresses carried
//! over one or more time slots. It owns no frame bytes: its FIFO is a list
//! of descriptor nodes whose payloads live in the node's shared arenas.

use crate::link::{
    ConnectStatus, CreditFlowCtrl, GainLoop, LinkCca, LinkFallback, LinkPhase, Lqi, SawArq,
};
use crate::parameters::{
    MAX_CHANNEL_COUNT, MAX_FALLBACK_SETS, PATTERN_THROTTLE_GRANULARITY,
};
use crate::phy::RfChannel;
use crate::protocol::{LinkProtocol, RangingMode};
use crate::xlayer::XlayerQueue;
use crate::{Address, ChipRepetition, FecLevel, Modulation, WpsError};

/// Modulation parameters of a connection's frames.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameConfig {
    pub modulation: Modulation,
    pub chip_repet: ChipRepetition,
    pub fec: FecLevel,
}

/// Per-connection statistics counters.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    pub tx_success: u32,
    pub tx_fail: u32,
    pub tx_drop: u32,
    pub rx_received: u32,
    pub rx_overrun: u32,
    pub tx_byte_sent: u32,
    pub rx_byte_received: u32,
    pub total_cca_events: u32,
    pub total_cca_fail_count: u32,
    pub total_cca_tx_fail_count: u32,
    pub total_pkt_dropped: u32,
}

/// Configuration for [`crate::network::Node::create_connection`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub source_address: Address,
    pub destination_address: Address,
    /// Serialized header size; must match the header configuration applied
    /// later.
    pub header_length: u8,
    /// Serialized acknowledge header size.
    pub ack_header_length: u8,
    /// Total frame size: header + payload + terminator.
    pub frame_length: u8,
    /// Frame FIFO depth.
    pub fifo_buffer_size: u16,
    /// Arbitration priority; lower wins.
    pub priority: u8,
    pub ranging_mode: RangingMode,
    pub credit_fc_enabled: bool,
}

/// State of one logical connection.
pub struct Connection {
    pub source_address: Address,
    pub destination_address: Address,
    pub header_size: u8,
    pub ack_header_size: u8,
    pub payload_size: u8,

    /// Frame FIFO (TX frames queued by the application, or RX frames
    /// queued for it).
    pub queue: XlayerQueue,
    /// TX node reserved by `get_free_slot`, waiting for its `send`/`commit`.
    pub pending_tx: Option<u16>,

    pub link_protocol: LinkProtocol,
    /// Plan for acknowledge frames; empty unless acknowledge payloads or
    /// credit flow control are in use.
    pub auto_link_protocol: LinkProtocol,

    pub stop_and_wait_arq: SawArq,
    pub cca: LinkCca,
    pub credit_flow_ctrl: CreditFlowCtrl,
    pub link_fallback: LinkFallback,
    pub lqi: Lqi,
    pub channel_lqi: [Lqi; MAX_CHANNEL_COUNT],
    pub gain_loop: [GainLoop; MAX_CHANNEL_COUNT],
    pub link_phase: LinkPhase,
    pub connect_status: ConnectStatus,

    pub frame_cfg: FrameConfig,
    /// Primary channel register patterns, indexed by channel table id.
    pub channel: [RfChannel; MAX_CHANNEL_COUNT],
    /// Fallback register patterns, `[set][channel]`.
    pub fallback_channel: [[RfChannel; MAX_CHANNEL_COUNT]; MAX_FALLBACK_SETS],

    pub stats: ConnectionStats,

    /// Throttle pattern; the slot participates iff the current bit is set.
    pub pattern: [bool; PATTERN_THROTTLE_GRANULARITY],
    pub pattern_count: u8,
    pub pattern_total_count: u8,
    pub active_ratio: u8,

    pub priority: u8,
    pub ranging_mode: RangingMode,

    pub ack_enable: bool,
    pub auto_sync_enable: bool,
    /// Acknowledge frames carry header fields even without a dedicated
    /// auto-reply connection.
    pub ack_frame_enable: bool,
    pub currently_enabled: bool,
    pub first_tx_after_connect: bool,
    pub is_main: bool,

    /// Last error recorded against this connection, cleared on read.
    pub wps_error: Option<WpsError>,
}

impl Connection {
    pub fn new(config: &ConnectionConfig) -> Self {
        let payload_size = config
            .frame_length
            .saturating_sub(config.header_length)
            .saturating_sub(1);

        // Ranging over a single connection and credit flow control both
        // ride on the acknowledge frame, so it must exist.
        let ack_frame_enable = matches!(
            config.ranging_mode,
            RangingMode::StandaloneInitiator | RangingMode::StandaloneResponder
        ) || config.credit_fc_enabled;

        Self {
            source_address: config.source_address,
            destination_address: config.destination_address,
            header_size: config.header_length,
            ack_header_size: config.ack_header_length,
            payload_size,
            queue: XlayerQueue::new(config.fifo_buffer_size),
            pending_tx: None,
            link_protocol: LinkProtocol::new(),
            auto_link_protocol: LinkProtocol::new(),
            stop_and_wait_arq: SawArq::default(),
            cca: LinkCca::default(),
            credit_flow_ctrl: CreditFlowCtrl::default(),
            link_fallback: LinkFallback::default(),
            lqi: Lqi::default(),
            channel_lqi: [Lqi::default(); MAX_CHANNEL_COUNT],
            gain_loop: [GainLoop::default(); MAX_CHANNEL_COUNT],
            link_phase: LinkPhase::default(),
            connect_status: ConnectStatus::default(),
            frame_cfg: FrameConfig::default(),
            channel: [RfChannel::default(); MAX_CHANNEL_COUNT],
            fallback_channel: [[RfChannel::default(); MAX_CHANNEL_COUNT]; MAX_FALLBACK_SETS],
            stats: ConnectionStats::default(),
            pattern: [true; PATTERN_THROTTLE_GRANULARITY],
            pattern_count: 0,
            pattern_total_count: PATTERN_THROTTLE_GRANULARITY as u8,
            active_ratio: 100,
            priority: config.priority,
            ranging_mode: config.ranging_mode,
            ack_enable: false,
            auto_sync_enable: true,
            ack_frame_enable,
            currently_enabled: true,
            first_tx_after_connect: true,
            is_main: false,
            wps_error: None,
        }
    }

    /// Whether the local throttle pattern lets this slot participate, then
    /// advance the pattern cursor.
    pub fn throttle_step(&mut self) -> bool {
        if self.pattern_total_count == 0 {
            return true;
        }
        let active = self.pattern[self.pattern_count as usize];
        self.pattern_count = (self.pattern_count + 1) % self.pattern_total_count;
        active
    }

    /// Install a freshly generated throttle pattern.
    pub fn apply_pattern(&mut self, pattern: &[bool], total_count: u8, active_ratio: u8) {
        self.pattern = [false; PATTERN_THROTTLE_GRANULARITY];
        self.pattern[..total_count as usize].copy_from_slice(&pattern[..total_count as usize]);
        self.pattern_count = 0;
        self.pattern_total_count = total_count;
        self.active_ratio = active_ratio;
    }

    pub fn take_error(&mut self) -> Option<WpsError> {
        self.wps_error.take()
    }
}

/// Greatest common divisor.
pub(crate) fn gcd(mut a: u8, mut b: u8) -> u8 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Expand an active ratio (percent) into a bit pattern that spreads the
/// active slots evenly. Returns the pattern length: the denominator of
/// `active_ratio / 100` in lowest terms; the number of set bits is the
/// numerator.
pub fn generate_active_pattern(pattern: &mut [bool], active_ratio: u8) -> u8 {
    let current_gcd = gcd(active_ratio, 100).max(1);
    let active_elements = active_ratio / current_gcd;
    let total_number_of_val = 100 / current_gcd;

    for bit in pattern[..total_number_of_val as usize].iter_mut() {
        *bit = false;
    }
    for i in 0..active_elements {
        let pos = (i as usize * total_number_of_val as usize) / active_elements as usize;
        pattern[pos % total_number_of_val as usize] = true;
    }

    total_number_of_val
}
