//! TDMA synchronization tracking.
//!
//! Produces the per-slot radio commands (power-up delay, receive timeout,
//! sleep cycles) from the schedule's sleep budget and the link's frame
//! geometry, and tracks whether a network node is locked to the
//! coordinator's timing.
//!
//! A node starts unsynced and listens continuously. The first frame whose
//! syncword the transceiver accepts locks the slave; from then on the
//! receive window narrows to the syncword plus a drift guard estimated from
//! the measured wait time of recent receptions. Consecutive losses widen
//! the guard again and, once their accumulated duration exceeds the
//! configured budget, drop the node back to the unsynced state.

use crate::{ChipRate, SleepLevel};

/// Fixed guard added around the expected syncword arrival, in PLL cycles.
const SYNC_BASE_GUARD_PLL: u32 = 16;

/// Receive timeout while unsynced (continuous listen).
const UNSYNC_RX_TIMEOUT_PLL: u32 = 0x00FF_FFFF;

/// Drift estimator weight: new measurements move the estimate by 1/8.
const DRIFT_EWMA_SHIFT: u32 = 3;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct TdmaSyncCfg {
    pub sleep_level: SleepLevel,
    pub preamble_len: u32,
    pub syncword_len: u32,
    pub isi_mitig_pauses: u8,
    pub tx_jitter_enabled: bool,
    pub chip_rate: ChipRate,
    /// Consecutive lost-frame duration (PLL cycles) before a slave falls
    /// back to the unsynced state.
    pub frame_lost_max_duration: u32,
}

impl Default for TdmaSyncCfg {
    fn default() -> Self {
        Self {
            sleep_level: SleepLevel::Idle,
            preamble_len: 0,
            syncword_len: 0,
            isi_mitig_pauses: 0,
            tx_jitter_enabled: false,
            chip_rate: ChipRate::default(),
            frame_lost_max_duration: u32::MAX,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct TdmaSync {
    cfg: TdmaSyncCfg,
    slave_synced: bool,
    /// Accumulated duration of consecutive losses, in PLL cycles.
    frame_lost_duration_pll: u32,
    /// Signed drift estimate of the peer's timing, in PLL cycles.
    drift_pll: i32,
    /// Commands for the upcoming slot.
    pwr_up: u16,
    rx_timeout: u32,
    sleep_cycles: u32,
}

impl TdmaSync {
    pub fn new(cfg: TdmaSyncCfg) -> Self {
        Self {
            cfg,
            slave_synced: false,
            frame_lost_duration_pll: 0,
            drift_pll: 0,
            pwr_up: 0,
            rx_timeout: 0,
            sleep_cycles: 0,
        }
    }

    pub fn reset(&mut self) {
        self.slave_synced = false;
        self.frame_lost_duration_pll = 0;
        self.drift_pll = 0;
        self.pwr_up = 0;
        self.rx_timeout = 0;
        self.sleep_cycles = 0;
    }

    /// Radio setup cost before the frame proper, in PLL cycles.
    fn setup_cycles(&self) -> u32 {
        let pauses = self.cfg.isi_mitig_pauses as u32;
        self.cfg.preamble_len + self.cfg.syncword_len * (1 + pauses)
    }

    /// Compute the commands for an upcoming TX slot.
    pub fn update_tx(&mut self, sleep_cycles: u32) {
        let setup = self.setup_cycles();
        self.pwr_up = setup.min(u16::MAX as u32) as u16;
        self.rx_timeout = 0;
        self.sleep_cycles = sleep_cycles.saturating_sub(setup);
    }

    /// Compute the commands for an upcoming RX slot.
    pub fn update_rx(&mut self, sleep_cycles: u32) {
        let setup = self.setup_cycles();
        if !self.slave_synced {
            // Listen continuously until the first syncword hit.
            self.pwr_up = 0;
            self.rx_timeout = UNSYNC_RX_TIMEOUT_PLL;
            self.sleep_cycles = 0;
            return;
        }
        let guard = SYNC_BASE_GUARD_PLL
            + self.drift_pll.unsigned_abs() * 2
            + self.frame_lost_duration_pll / 64;
        self.pwr_up = setup.saturating_sub(guard).min(u16::MAX as u32) as u16;
        self.rx_timeout = self.cfg.syncword_len + 2 * guard;
        self.sleep_cycles = sleep_cycles.saturating_sub(setup + guard);
    }

    /// Feed the measured wait time of a successful reception into the drift
    /// estimate. Locks an unsynced slave.
    pub fn slave_adjust(&mut self, rx_wait_time: u16) {
        let expected = SYNC_BASE_GUARD_PLL as i32;
        let error = rx_wait_time as i32 - expected;
        self.drift_pll += (error - self.drift_pll) >> DRIFT_EWMA_SHIFT;
        self.slave_synced = true;
        self.frame_lost_duration_pll = 0;
    }

    /// Account a lost frame over a slot of the given duration. Returns
    /// `true` when the loss budget is exhausted and the node fell out of
    /// sync.
    pub fn frame_lost(&mut self, slot_duration_pll: u32) -> bool {
        self.frame_lost_duration_pll =
            self.frame_lost_duration_pll.saturating_add(slot_duration_pll);
        if self.frame_lost_duration_pll >= self.cfg.frame_lost_max_duration {
            self.slave_synced = false;
            self.frame_lost_duration_pll = 0;
            return true;
        }
        false
    }

    pub fn is_slave_synced(&self) -> bool {
        self.slave_synced
    }

    pub fn get_pwr_up(&self) -> u16 {
        self.pwr_up
    }

    pub fn get_timeout(&self) -> u32 {
        self.rx_timeout
    }

    pub fn get_sleep_cycles(&self) -> u32 {
        self.sleep_cycles
    }

    pub fn sleep_level(&self) -> SleepLevel {
        self.cfg.sleep_level
    }

    pub fn tx_jitter_enabled(&self) -> bool {
        self.cfg.tx_jitter_enabled
    }
}
