//! Connection status tracking.
//!
//! Debounces the frame-by-frame outcome stream into a connected /
//! disconnected state per connection: a configurable run of consecutive
//! successes declares the link up, a run of losses declares it down.
//! Transitions are reported so the MAC can raise application events.

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectStatusState {
    #[default]
    Disconnected,
    Connected,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ConnectStatusCfg {
    /// Consecutive successful exchanges before the link counts as up.
    pub connect_count: u16,
    /// Consecutive lost exchanges before the link counts as down.
    pub disconnect_count: u16,
}

impl Default for ConnectStatusCfg {
    fn default() -> Self {
        Self { connect_count: 1, disconnect_count: 100 }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectStatus {
    cfg: ConnectStatusCfg,
    status: ConnectStatusState,
    success_run: u16,
    loss_run: u16,
}

impl ConnectStatus {
    pub fn init(&mut self, cfg: ConnectStatusCfg) {
        self.cfg = cfg;
        self.status = ConnectStatusState::Disconnected;
        self.success_run = 0;
        self.loss_run = 0;
    }

    /// Feed one exchange outcome. Returns the new state when it changed.
    pub fn update(&mut self, success: bool) -> Option<ConnectStatusState> {
        if success {
            self.loss_run = 0;
            self.success_run = self.success_run.saturating_add(1);
            if self.status == ConnectStatusState::Disconnected
                && self.success_run >= self.cfg.connect_count
            {
                self.status = ConnectStatusState::Connected;
                return Some(self.status);
            }
        } else {
            self.success_run = 0;
            self.loss_run = self.loss_run.saturating_add(1);
            if self.status == ConnectStatusState::Connected
                && self.loss_run >= self.cfg.disconnect_count
            {
                self.status = ConnectStatusState::Disconnected;
                return Some(self.status);
            }
        }
        None
    }

    pub fn status(&self) -> ConnectStatusState {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectStatusState::Connected
    }
}
