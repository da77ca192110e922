//! Ranging phase acquisition.
//!
//! Distance measurement needs the phase readings of both ends of an
//! exchange paired up. Each frame header carries the peer's phase block and
//! a modulo-256 sample counter; a sample is accepted only when the counters
//! line up (see the MAC's acceptance rule), and accepted pairs accumulate
//! here until the application reads the batch out.

use crate::parameters::MAX_PHASE_SAMPLES;

/// One end's phase readings for a single frame.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseInfos {
    pub phase1: u8,
    pub phase2: u8,
    pub phase3: u8,
    pub phase4: u8,
    /// Low byte of the receiver wait time paired with the readings.
    pub rx_waited0: u8,
    /// High 7 bits of the receiver wait time.
    pub rx_waited1: u8,
}

/// A paired local/remote phase sample.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhasePair {
    pub local: PhaseInfos,
    pub remote: PhaseInfos,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkPhase {
    samples: [PhasePair; MAX_PHASE_SAMPLES],
    count: u8,
    /// Batch size the application asked for.
    sample_size: u8,
    enabled: bool,
}

impl LinkPhase {
    pub fn init(&mut self, sample_size: u8) {
        self.samples = [PhasePair::default(); MAX_PHASE_SAMPLES];
        self.count = 0;
        self.sample_size = sample_size.min(MAX_PHASE_SAMPLES as u8);
        self.enabled = sample_size != 0;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Store an accepted sample pair. Returns `true` when the batch just
    /// became complete and the application should be notified.
    pub fn add_data(&mut self, local: PhaseInfos, remote: PhaseInfos) -> bool {
        if !self.enabled || self.count >= self.sample_size {
            return false;
        }
        self.samples[self.count as usize] = PhasePair { local, remote };
        self.count += 1;
        self.count == self.sample_size
    }

    /// The accumulated batch, empty until complete.
    pub fn metrics(&self) -> &[PhasePair] {
        if self.count == self.sample_size {
            &self.samples[..self.count as usize]
        } else {
            &[]
        }
    }

    /// Release the batch for reuse. Returns `false` when no complete batch
    /// was pending.
    pub fn done(&mut self) -> bool {
        if self.count != self.sample_size || self.sample_size == 0 {
            return false;
        }
        self.count = 0;
        true
    }
}
