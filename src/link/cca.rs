//! Clear-channel assessment policy.
//!
//! The transceiver probes the channel before transmitting; this object only
//! carries the policy (probe budget, spacing, and what to do when every
//! probe fails). Probe outcomes come back from the PHY as a try count and
//! are accounted by the MAC.

use crate::parameters::DISABLE_CCA_THRESHOLD;

/// What the transceiver does when every CCA probe fails.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CcaFailAction {
    /// Transmit anyway.
    #[default]
    ForceTx,
    /// Give the air time up; the frame stays queued for retry.
    AbortTx,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct LinkCca {
    pub threshold: u8,
    pub retry_time_pll_cycles: u16,
    pub on_time_pll_cycles: u8,
    pub max_try_count: u8,
    pub fail_action: CcaFailAction,
    enabled: bool,
}

impl Default for LinkCca {
    fn default() -> Self {
        Self {
            threshold: DISABLE_CCA_THRESHOLD,
            retry_time_pll_cycles: 0,
            on_time_pll_cycles: 0,
            max_try_count: 0,
            fail_action: CcaFailAction::ForceTx,
            enabled: false,
        }
    }
}

impl LinkCca {
    pub fn init(
        &mut self,
        threshold: u8,
        retry_time_pll_cycles: u16,
        on_time_pll_cycles: u8,
        max_try_count: u8,
        fail_action: CcaFailAction,
        enabled: bool,
    ) {
        self.threshold = threshold;
        self.retry_time_pll_cycles = retry_time_pll_cycles;
        self.on_time_pll_cycles = on_time_pll_cycles;
        self.max_try_count = max_try_count;
        self.fail_action = fail_action;
        // A zero probe budget is the disabled configuration regardless of
        // the requested flag.
        self.enabled = enabled && max_try_count != 0;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a failed transmission with this try count means the whole
    /// probe budget was burned without finding clear air.
    pub fn all_probes_failed(&self, cca_try_count: u8) -> bool {
        self.enabled && cca_try_count >= self.max_try_count
    }
}
