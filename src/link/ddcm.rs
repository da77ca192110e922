//! Distributed desync concurrency mechanism.
//!
//! Concurrent networks sharing air time collide periodically when their
//! schedules beat against each other. After each transmission that needed
//! CCA retries, this module schedules a small timing offset to drift the
//! local schedule into quieter air, bounded per slot so the peer's receive
//! window can follow.

use crate::parameters::UNSYNC_TX_OFFSET_PLL_CYCLES;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkDdcm {
    /// Remaining offset to apply, in PLL cycles.
    target_offset: u16,
    /// Largest offset applied in a single time slot.
    max_timeslot_offset: u16,
    /// PLL cycles elapsed since the last post-TX update.
    pll_cycles_since_tx: u32,
    /// PLL cycles spent failing to transmit.
    sync_loss_duration_pll: u32,
    /// Failure budget before the unsync offset is applied.
    sync_loss_max_duration_pll: u32,
    last_tx_successful: bool,
    enabled: bool,
}

impl LinkDdcm {
    /// `max_timeslot_offset == 0` disables the module; a disabled instance
    /// reports a zero offset everywhere.
    pub fn init(&mut self, max_timeslot_offset: u16, sync_loss_max_duration_pll: u32) {
        self.target_offset = 0;
        self.max_timeslot_offset = max_timeslot_offset;
        self.enabled = max_timeslot_offset != 0;
        self.sync_loss_max_duration_pll = sync_loss_max_duration_pll;
        self.pll_cycles_since_tx = 0;
        self.sync_loss_duration_pll = 0;
        self.last_tx_successful = false;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Account the duration of the current time slot.
    pub fn pll_cycles_update(&mut self, pll_cycles: u32) {
        if !self.enabled {
            return;
        }
        self.pll_cycles_since_tx = self.pll_cycles_since_tx.wrapping_add(pll_cycles);
    }

    /// Update after a transmission attempt.
    pub fn post_tx_update(&mut self, cca_try_count: u8, cca_retry_time: u16, tx_success: bool) {
        if !self.enabled {
            return;
        }

        if !tx_success {
            self.sync_loss_duration_pll += self.pll_cycles_since_tx;
        } else {
            self.sync_loss_duration_pll =
                self.sync_loss_duration_pll.saturating_sub(self.pll_cycles_since_tx);
            if self.target_offset == 0 {
                // Only pick a new target once the previous one is drained.
                if cca_try_count > 0 {
                    self.target_offset = (cca_try_count as u16 - 1) * cca_retry_time
                        + self.max_timeslot_offset;
                }
            }
        }
        self.pll_cycles_since_tx = 0;
        self.last_tx_successful = tx_success;
    }

    /// Offset to apply to the upcoming time slot, in PLL cycles.
    pub fn get_offset(&mut self) -> u16 {
        if !self.enabled {
            return 0;
        }

        if self.sync_loss_duration_pll >= self.sync_loss_max_duration_pll {
            // Unable to transmit for the whole budget: jump a large fixed
            // offset to look for free air time.
            self.sync_loss_duration_pll = 0;
            self.target_offset = 0;
            return UNSYNC_TX_OFFSET_PLL_CYCLES;
        }

        if !self.last_tx_successful {
            // Do not drift while the link is lost.
            return 0;
        }

        let timeslot_offset = self.target_offset.min(self.max_timeslot_offset);
        self.target_offset -= timeslot_offset;
        timeslot_offset
    }

    pub fn target_offset(&self) -> u16 {
        self.target_offset
    }

    pub fn sync_loss_duration_pll(&self) -> u32 {
        self.sync_loss_duration_pll
    }
}
