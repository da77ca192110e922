//! Statistics staging.
//!
//! The radio interrupt must not spend time folding metrics into the
//! per-connection averages, so each slot's raw numbers are staged into a
//! two-entry ring (one slot holds at most a main and an auto outcome) and
//! folded in by the callback worker. When the worker falls behind, entries
//! are dropped and counted rather than blocking the interrupt.

use crate::connection::Connection;
use crate::parameters::{MAX_CHANNEL_COUNT, PHASE_OFFSET_BYTE_COUNT};
use crate::xlayer::FrameOutcome;
use crate::ConnectionHandle;

/// Entries the ring holds: one main plus one auto outcome per slot.
pub const STATS_BUFFER_SIZE: usize = 2;

/// Raw numbers for one frame event, captured in interrupt context.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct StatsEntry {
    pub connection: ConnectionHandle,
    pub rssi: u8,
    pub rnsi: u8,
    pub phase_offset: [u8; PHASE_OFFSET_BYTE_COUNT],
    /// Channel table id the exchange used.
    pub channel_index: u8,
    pub outcome: FrameOutcome,
    /// The frame carried no application payload.
    pub empty_frame: bool,
}

/// Two-entry staging ring between interrupt and worker context.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct MacStats {
    input_data: [Option<StatsEntry>; STATS_BUFFER_SIZE],
    no_space_counter: u16,
}

impl MacStats {
    /// Stage an entry from interrupt context.
    pub fn push(&mut self, entry: StatsEntry) {
        for slot in self.input_data.iter_mut() {
            if slot.is_none() {
                *slot = Some(entry);
                return;
            }
        }
        self.no_space_counter = self.no_space_counter.saturating_add(1);
    }

    /// Fold every staged entry into its connection's link quality
    /// statistics. Worker context.
    pub fn process(&mut self, connections: &mut [Connection]) {
        for slot in self.input_data.iter_mut() {
            let entry = match slot.take() {
                Some(entry) => entry,
                None => continue,
            };
            let conn = match connections.get_mut(entry.connection.index()) {
                Some(conn) => conn,
                None => continue,
            };
            conn.lqi.update(entry.outcome, entry.rssi, entry.rnsi);
            if (entry.channel_index as usize) < MAX_CHANNEL_COUNT {
                conn.channel_lqi[entry.channel_index as usize].update(
                    entry.outcome,
                    entry.rssi,
                    entry.rnsi,
                );
            }
        }
    }

    /// Entries dropped because the worker fell behind.
    pub fn dropped(&self) -> u16 {
        self.no_space_counter
    }

    pub fn reset(&mut self) {
        self.input_data = [None; STATS_BUFFER_SIZE];
        self.no_space_counter = 0;
    }
}
