//! Stack-wide tuning constants.
//!
//! Most of these are protocol constants that both ends of a link must agree
//! on; the `recommended` module collects the values a default deployment
//! should start from.

/// Maximum number of main (and auto-reply) connections sharing one time slot.
pub const MAX_CONN_PER_TIMESLOT: usize = 4;

/// Maximum number of connections a node can carry.
pub const MAX_CONNECTIONS: usize = 8;

/// Highest (numerically largest, least urgent) connection priority value.
pub const MAX_CONN_PRIORITY: u8 = 7;

/// Granularity of the throttle active-ratio pattern, in percent.
pub const PATTERN_THROTTLE_GRANULARITY: usize = 100;

/// Number of channel entries a connection can carry register patterns for.
pub const MAX_CHANNEL_COUNT: usize = 8;

/// Number of RSSI-threshold-selected fallback channel sets per connection.
pub const MAX_FALLBACK_SETS: usize = 3;

/// Maximum number of fields in a header protocol plan.
pub const MAX_HEADER_FIELDS: usize = 8;

/// Largest serialized header the stack will ever produce, in bytes.
pub const MAX_HEADER_SIZE: usize = 16;

/// Number of ranging phase-sample pairs buffered per connection.
pub const MAX_PHASE_SAMPLES: usize = 8;

/// Number of raw phase offset bytes reported by the transceiver per frame.
pub const PHASE_OFFSET_BYTE_COUNT: usize = 4;

/// Extra byte reserved after the payload of every frame slot.
pub const EMPTY_BYTE: usize = 1;

/// Number of frames a credit-starved connection is skipped before the MAC
/// forces a transmission to probe the peer queue state.
pub const CREDIT_FLOW_CTRL_SKIPPED_FRAMES_THRESHOLD: u8 = 10;

/// Extra aging points granted to the highest-priority auto-reply connection
/// when it has pending data.
pub const NOTIFY_MISSED_CREDITS_HIGH_CONN_EXTRA_POINTS: u8 = 3;

/// Largest credit count that fits the one-byte header field.
pub const CREDIT_FLOW_CONTROL_MAX_VALUE: u16 = 255;

/// Credits a connection starts with before the peer's first advertisement.
pub const MIN_QUEUE_SIZE: u8 = 2;

/// CCA threshold sentinel meaning "never back off".
pub const DISABLE_CCA_THRESHOLD: u8 = 0xFF;

/// Offset applied when DDCM has been unable to transmit for its whole sync
/// loss budget, in PLL cycles.
pub const UNSYNC_TX_OFFSET_PLL_CYCLES: u16 = 1024;

/// How long `disconnect` waits for the radio to acknowledge, in milliseconds.
pub const DISCONNECT_TIMEOUT_MS: u32 = 1000;

/// Capacity of the deferred application event queue.
pub const CALLBACK_QUEUE_SIZE: usize = 32;

/// Capacity of the out-of-band request queue.
pub const REQUEST_QUEUE_SIZE: usize = 8;

/// Capacity of each request sidecar ring (write, read, schedule ratio).
pub const SIDECAR_QUEUE_SIZE: usize = 4;

/// Recommended defaults for a new deployment.
pub mod recommended {
    /// SAW retry budget before a frame is dropped.
    pub const SAW_RETRY: u16 = 3;
    /// SAW deadline in application ticks.
    pub const SAW_DEADLINE: u32 = 1000;
    /// CCA probe duration in PLL cycles.
    pub const CCA_ON_TIME_PLL_CYCLES: u8 = 16;
    /// Delay between CCA probes in PLL cycles.
    pub const CCA_RETRY_TIME_PLL_CYCLES: u16 = 96;
    /// Consecutive lost-frame duration before a slave falls out of sync,
    /// in PLL cycles.
    pub const FRAME_LOST_MAX_DURATION: u32 = 1_000_000;
    /// Syncword tolerance programmed into the transceiver.
    pub const SYNCWORD_TOLERANCE: u8 = 0xC;
    /// Cost of one syncword bit, in transmitted bits.
    pub const SYNCWORD_BIT_COST: u8 = 2;
}
