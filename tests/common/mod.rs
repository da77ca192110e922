#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use embedded_time::clock::Error as ClockError;
use embedded_time::fraction::Fraction;
use embedded_time::Instant;

use wps::phy::{
    FrameTarget, PhyMetrics, PhyPrepare, PhySignal, PhySignalPair, RegWriteCfg, WpsPhy,
};
use wps::{NodeConfig, Role};

/// Free-running test clock at 1 kHz. Every read moves time forward one
/// tick, like a hardware free-running counter would between polls.
#[derive(Clone, Default)]
pub struct TestClock {
    ticks: Arc<AtomicU64>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl embedded_time::Clock for TestClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

    fn try_now(&self) -> Result<Instant<Self>, ClockError> {
        Ok(Instant::new(self.ticks.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

/// Owned copy of a prepare command, captured for assertions.
#[derive(Clone, Default)]
pub struct CapturedPrepare {
    pub main_tx: Option<Vec<u8>>,
    pub auto_tx: Option<Vec<u8>>,
    pub muted: bool,
    pub rx_timeout: u32,
    pub sleep_time: u32,
    pub power_up_delay: u16,
    pub ack_expected: bool,
    pub rdo_offset: u16,
    pub ddcm_offset: u16,
}

/// Scripted PHY: the test sets the next completion signals and received
/// bytes, and inspects what the MAC armed.
pub struct MockPhy {
    pub signals: PhySignalPair,
    pub metrics: PhyMetrics,
    pub rx_main: Option<Vec<u8>>,
    pub rx_auto: Option<Vec<u8>>,
    pub prepares: Vec<CapturedPrepare>,
    pub connected: bool,
    pub disconnected: bool,
    pub registers: [u16; 256],
    /// Register write the radio rewrites every slot, until cleared.
    pub periodic_write: Option<(u8, u16)>,
}

impl Default for MockPhy {
    fn default() -> Self {
        Self {
            signals: PhySignalPair::default(),
            metrics: PhyMetrics::default(),
            rx_main: None,
            rx_auto: None,
            prepares: Vec::new(),
            connected: false,
            disconnected: false,
            registers: [0; 256],
            periodic_write: None,
        }
    }
}

impl MockPhy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, main: PhySignal, auto: PhySignal) {
        self.signals = PhySignalPair { main, auto };
    }

    pub fn last_prepare(&self) -> &CapturedPrepare {
        self.prepares.last().expect("no prepare captured")
    }
}

impl WpsPhy for MockPhy {
    fn signals(&self) -> PhySignalPair {
        self.signals
    }

    fn metrics(&self) -> PhyMetrics {
        self.metrics
    }

    fn read_frame(&mut self, target: FrameTarget, dest: &mut [u8]) -> usize {
        let source = match target {
            FrameTarget::Main => &mut self.rx_main,
            FrameTarget::Auto => &mut self.rx_auto,
        };
        match source.take() {
            Some(bytes) => {
                let n = bytes.len().min(dest.len());
                dest[..n].copy_from_slice(&bytes[..n]);
                n
            }
            None => 0,
        }
    }

    fn prepare(&mut self, prepare: &PhyPrepare<'_>) {
        self.prepares.push(CapturedPrepare {
            main_tx: prepare.main_tx.map(|b| b.to_vec()),
            auto_tx: prepare.auto_tx.map(|b| b.to_vec()),
            muted: prepare.muted,
            rx_timeout: prepare.rx_timeout,
            sleep_time: prepare.sleep_time,
            power_up_delay: prepare.power_up_delay,
            ack_expected: prepare.ack_expected,
            rdo_offset: prepare.rdo_offset,
            ddcm_offset: prepare.ddcm_offset,
        });
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
    }

    fn write_register(&mut self, reg: u8, value: u16, cfg: RegWriteCfg) {
        self.registers[reg as usize] = value;
        if cfg == RegWriteCfg::WritePeriodic {
            self.periodic_write = Some((reg, value));
        }
    }

    fn clear_write_register(&mut self) {
        self.periodic_write = None;
    }

    fn read_register(&mut self, reg: u8) -> u16 {
        self.registers[reg as usize]
    }
}

pub fn node_cfg(local_address: u16, role: Role) -> NodeConfig {
    NodeConfig {
        local_address,
        role,
        preamble_len: 64,
        syncword_cfg: Default::default(),
        sleep_lvl: Default::default(),
        crc_polynomial: 0x1021,
        isi_mitig: Default::default(),
        rx_gain: 0,
        frame_lost_max_duration: 100_000,
        tx_jitter_enabled: false,
        chip_rate: Default::default(),
    }
}
