//! Credit-based flow control.
//!
//! The receiving end of a connection advertises how many free slots its
//! receive queue has; the transmitting end spends one credit per frame and
//! stops when the peer is full. A starved connection is skipped only so
//! many times before the MAC forces a frame through anyway, because the
//! credit refresh itself rides on the acknowledge path and a silent link
//! would otherwise deadlock.

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditFlowCtrl {
    pub enabled: bool,
    /// Free slots last advertised by the peer.
    pub credits_count: u8,
    /// Times this connection was passed over while starved.
    pub skipped_frames_count: u8,
    /// Aging score for auto-reply arbitration.
    pub notify_missed_credits_count: u8,
}

impl CreditFlowCtrl {
    pub fn init(&mut self, enabled: bool, initial_credits: u8) {
        self.enabled = enabled;
        self.credits_count = if enabled { initial_credits } else { 0 };
        self.skipped_frames_count = 0;
        self.notify_missed_credits_count = 0;
    }

    /// Spend one credit for a transmitted frame.
    pub fn consume(&mut self) {
        if self.enabled {
            self.credits_count = self.credits_count.saturating_sub(1);
            self.skipped_frames_count = 0;
        }
    }

    /// Adopt the credit count received from the peer.
    pub fn set_credits(&mut self, credits: u8) {
        if self.enabled {
            self.credits_count = credits;
        }
    }

    pub fn has_credits(&self) -> bool {
        !self.enabled || self.credits_count > 0
    }
}
