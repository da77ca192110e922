//! MAC state machine.
//!
//! Everything in this module runs in the radio interrupt context: the PHY
//! reports one completion signal per frame direction at each slot boundary,
//! and the MAC turns those into application-visible outcomes, then advances
//! the schedule and arms the next slot. Application notifications are
//! deferred into a bounded event queue; nothing here blocks or allocates.

pub mod priority;
pub mod stats;

use heapless::Deque;

use crate::connection::Connection;
use crate::link::{
    ChannelHopping, ChannelSequence, LinkDdcm, LinkRdo, PhaseInfos, TdmaSync, TdmaSyncCfg,
};
use crate::mac::stats::{MacStats, StatsEntry};
use crate::network::Node;
use crate::parameters::{CALLBACK_QUEUE_SIZE, CREDIT_FLOW_CONTROL_MAX_VALUE, MAX_HEADER_SIZE};
use crate::phy::{FrameTarget, PhyMetrics, PhyPrepare, PhySignal, WpsPhy};
use crate::protocol::{ProtoId, TimeslotSaw};
use crate::request::{ReadRegisterResult, RequestKind, RequestQueues};
use crate::scheduler::{Scheduler, TimeSlot};
use crate::xlayer::FrameOutcome;
use crate::{Address, ConnectionHandle, EventKind, Role, WpsError, WpsEvent};

/// MAC output signal, per frame direction.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacSignal {
    #[default]
    Empty,
    FrameRxSuccess,
    FrameRxFail,
    FrameRxOverrun,
    TxSuccess,
    TxFail,
    TxDrop,
    PrepareDone,
    Syncing,
}

/// The two per-direction output signals of the last processed slot.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct MacOutput {
    pub main_signal: MacSignal,
    pub auto_signal: MacSignal,
}

/// Result of one `process` call.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacProcessOutcome {
    /// Next slot armed, link still up.
    Prepared,
    /// A disconnect request was serviced; the radio is down.
    Disconnected,
}

/// Ranging phase bookkeeping shared by the header fields.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseData {
    pub local_phases_count: u8,
    pub remote_phases_count: u8,
    pub local_phases_info: PhaseInfos,
    pub last_local_phases_info: PhaseInfos,
    pub remote_phases_info: PhaseInfos,
}

impl PhaseData {
    /// Whether the just-received remote block pairs with our previous
    /// sample. The wrap at 256 is part of the wire contract.
    fn is_valid(&self) -> bool {
        self.remote_phases_count.wrapping_add(1) == self.local_phases_count
    }

    /// Roll the local sample forward after a reception.
    fn update(&mut self, rx_wait_time: u16) {
        self.last_local_phases_info = PhaseInfos {
            rx_waited0: (rx_wait_time & 0x00FF) as u8,
            rx_waited1: ((rx_wait_time & 0x7F00) >> 8) as u8,
            ..self.local_phases_info
        };
        self.local_phases_count = self.local_phases_count.wrapping_add(1);
    }
}

/// What the MAC armed the in-flight slot with.
#[derive(Debug, Clone, Copy, Default)]
struct ArmedSlot {
    /// The main direction is a local transmission.
    main_is_tx: bool,
    /// TX frame node; `None` while `main_is_tx` means a header-only sync
    /// frame.
    main_tx_node: Option<u16>,
    /// RX node the PHY writes the main frame into.
    main_rx_node: Option<u16>,
    /// The auto direction is a local transmission.
    auto_is_tx: bool,
    auto_tx_node: Option<u16>,
    auto_rx_node: Option<u16>,
    /// Slot was throttled out; nothing is on the air.
    muted: bool,
}

/// MAC layer state.
pub struct Mac<'a> {
    pub output_signal: MacOutput,

    pub scheduler: Scheduler<'a>,
    pub channel_hopping: ChannelHopping<'a>,
    pub network_id: u8,
    pub fast_sync_enabled: bool,

    pub local_address: Address,
    pub syncing_address: Address,
    pub node_role: Role,

    pub tdma_sync: TdmaSync,
    pub link_rdo: LinkRdo,
    pub link_ddcm: LinkDdcm,

    pub main_connection_id: u8,
    pub auto_connection_id: u8,
    /// Connection id for acknowledge frames when the slot has no dedicated
    /// auto-reply connection.
    pub main_ack_connection_id: u8,
    pub main_connection: Option<ConnectionHandle>,
    pub auto_connection: Option<ConnectionHandle>,

    pub phase_data: PhaseData,

    pub max_expected_header_size: u8,
    pub max_expected_payload_size: u8,

    pub callback_queue: Deque<WpsEvent, CALLBACK_QUEUE_SIZE>,
    /// Events lost to a full queue; a persistent non-zero value is an
    /// application sizing bug.
    pub callback_drop_count: u16,
    pub stats_staging: MacStats,

    armed: ArmedSlot,
    /// Serialization buffer for header-only sync frames.
    empty_tx_buf: [u8; MAX_HEADER_SIZE],
    empty_tx_len: u8,
    /// Serialization buffer for acknowledge frames without an auto-reply
    /// connection.
    empty_ack_buf: [u8; MAX_HEADER_SIZE],
    empty_ack_len: u8,
    /// Landing buffer for received acknowledge headers.
    ack_rx_buf: [u8; MAX_HEADER_SIZE],
}

impl<'a> Mac<'a> {
    pub fn new(timeslots: &'a mut [TimeSlot]) -> Self {
        Self {
            output_signal: MacOutput::default(),
            scheduler: Scheduler::new(timeslots),
            channel_hopping: ChannelHopping::new(ChannelSequence::new(&[]), false, 0),
            network_id: 0,
            fast_sync_enabled: false,
            local_address: 0,
            syncing_address: 0,
            node_role: Role::Node,
            tdma_sync: TdmaSync::new(TdmaSyncCfg::default()),
            link_rdo: LinkRdo::default(),
            link_ddcm: LinkDdcm::default(),
            main_connection_id: 0,
            auto_connection_id: 0,
            main_ack_connection_id: 0,
            main_connection: None,
            auto_connection: None,
            phase_data: PhaseData::default(),
            max_expected_header_size: 0,
            max_expected_payload_size: 0,
            callback_queue: Deque::new(),
            callback_drop_count: 0,
            stats_staging: MacStats::default(),
            armed: ArmedSlot::default(),
            empty_tx_buf: [0; MAX_HEADER_SIZE],
            empty_tx_len: 0,
            empty_ack_buf: [0; MAX_HEADER_SIZE],
            empty_ack_len: 0,
            ack_rx_buf: [0; MAX_HEADER_SIZE],
        }
    }

    /// Configure the MAC for a node. Called once from the facade's `init`.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        channel_sequence: ChannelSequence<'a>,
        sync_cfg: TdmaSyncCfg,
        local_address: Address,
        node_role: Role,
        random_channel_sequence_enabled: bool,
        network_id: u8,
        max_expected_payload_size: u8,
        max_expected_header_size: u8,
    ) {
        self.channel_hopping =
            ChannelHopping::new(channel_sequence, random_channel_sequence_enabled, network_id);
        self.tdma_sync = TdmaSync::new(sync_cfg);
        self.local_address = local_address;
        self.node_role = node_role;
        self.network_id = network_id;
        self.max_expected_payload_size = max_expected_payload_size;
        self.max_expected_header_size = max_expected_header_size;
        self.scheduler.init(local_address);
    }

    /// Rearm for a fresh connection cycle.
    pub fn reset(&mut self) {
        self.scheduler.init(self.local_address);
        self.scheduler.reset_sleep_time();
        self.scheduler.set_first_time_slot();
        self.channel_hopping.reset();
        self.tdma_sync.reset();
        self.phase_data = PhaseData::default();
        self.main_connection_id = 0;
        self.auto_connection_id = 0;
        self.main_ack_connection_id = 0;
        self.main_connection = None;
        self.auto_connection = None;
        self.callback_queue.clear();
        self.callback_drop_count = 0;
        self.stats_staging.reset();
        self.armed = ArmedSlot::default();
        self.output_signal = MacOutput::default();
    }

    pub fn enable_fast_sync(&mut self) {
        self.fast_sync_enabled = true;
    }

    pub fn disable_fast_sync(&mut self) {
        self.fast_sync_enabled = false;
    }

    pub fn is_network_node(&self) -> bool {
        self.node_role == Role::Node
    }

    fn is_synced(&self) -> bool {
        self.node_role == Role::Coordinator || self.tdma_sync.is_slave_synced()
    }

    fn push_event(&mut self, connection: ConnectionHandle, kind: EventKind) {
        if self
            .callback_queue
            .push_back(WpsEvent { connection, kind })
            .is_err()
        {
            self.callback_drop_count = self.callback_drop_count.saturating_add(1);
        }
    }

    /// PHY completion entry point. One call handles the outcome of the slot
    /// that just ended, services at most one application request, and arms
    /// the next slot.
    pub fn process<P: WpsPhy>(
        &mut self,
        node: &mut Node<'_>,
        requests: &mut RequestQueues,
        phy: &mut P,
        now: u32,
    ) -> MacProcessOutcome {
        let signals = phy.signals();
        let metrics = phy.metrics();

        self.output_signal = MacOutput::default();

        if signals.main == PhySignal::PrepareDone {
            self.output_signal.main_signal = MacSignal::PrepareDone;
            return MacProcessOutcome::Prepared;
        }

        // Nothing was on the air during a muted slot; any stray signal from
        // it carries no frame.
        if !self.armed.muted {
            if is_frame_outcome(signals.main) {
                if self.armed.main_is_tx {
                    self.process_main_tx_outcome(node, signals.main, &metrics, now);
                } else {
                    self.process_main_rx_outcome(node, phy, signals.main, &metrics);
                }
            }
            if is_frame_outcome(signals.auto) {
                if self.armed.auto_is_tx {
                    self.process_auto_tx_outcome(node, signals.auto, &metrics, now);
                } else {
                    self.process_auto_rx_outcome(node, phy, signals.auto, &metrics);
                }
            }
        }

        if self.process_next_request(node, requests, phy) {
            return MacProcessOutcome::Disconnected;
        }

        self.prepare_next_slot(node, phy);
        MacProcessOutcome::Prepared
    }

    // --- outcome processing -------------------------------------------------

    fn process_main_tx_outcome(
        &mut self,
        node: &mut Node<'_>,
        signal: PhySignal,
        metrics: &PhyMetrics,
        now: u32,
    ) {
        let handle = match self.main_connection {
            Some(handle) => handle,
            None => return,
        };
        let success = signal == PhySignal::FrameSentAck;
        let channel_index = self.channel_hopping.current_channel();
        let empty_frame = self.armed.main_tx_node.is_none();

        {
            let conn = &mut node.connections[handle.index()];
            // Every TX attempt is one CCA event; the try count is the number
            // of failed probes it burned.
            if conn.cca.enabled() {
                conn.stats.total_cca_events += 1;
                conn.stats.total_cca_fail_count += metrics.cca_try_count as u32;
                if !success && conn.cca.all_probes_failed(metrics.cca_try_count) {
                    conn.stats.total_cca_tx_fail_count += 1;
                }
            }
        }

        if success {
            if let Some(tx_node) = self.armed.main_tx_node {
                let conn = &mut node.connections[handle.index()];
                let dequeued = conn.queue.dequeue(&mut node.free_tx_queue);
                debug_assert_eq!(dequeued, Some(tx_node));
                let frame = *node.free_tx_queue.frame(tx_node);
                node.tx_data.free(frame.buffer_offset, frame.buffer_len as usize);
                node.free_tx_queue.free_node(tx_node);

                conn.stats.tx_success += 1;
                conn.stats.tx_byte_sent += frame.payload_len() as u32;
                conn.stop_and_wait_arq.increment_seq_num();
                conn.credit_flow_ctrl.consume();
                conn.first_tx_after_connect = false;
                self.push_event(handle, EventKind::TxSuccess);
            }
            let retry_time = node.connections[handle.index()].cca.retry_time_pll_cycles;
            node.connections[handle.index()].link_fallback.update(metrics.rssi_raw);
            self.link_ddcm.post_tx_update(metrics.cca_try_count, retry_time, true);
            if let Some(state) = node.connections[handle.index()].connect_status.update(true) {
                self.push_connect_event(handle, state);
            }
            self.output_signal.main_signal = MacSignal::TxSuccess;
        } else {
            if let Some(tx_node) = self.armed.main_tx_node {
                let drop = {
                    let frame = node.free_tx_queue.frame_mut(tx_node);
                    frame.retry_count += 1;
                    let conn = &node.connections[handle.index()];
                    conn.stop_and_wait_arq.should_drop(frame.time_stamp, now, frame.retry_count)
                };
                let conn = &mut node.connections[handle.index()];
                if drop {
                    let dequeued = conn.queue.dequeue(&mut node.free_tx_queue);
                    debug_assert_eq!(dequeued, Some(tx_node));
                    let frame = *node.free_tx_queue.frame(tx_node);
                    node.tx_data.free(frame.buffer_offset, frame.buffer_len as usize);
                    node.free_tx_queue.free_node(tx_node);

                    conn.stats.tx_drop += 1;
                    conn.stats.total_pkt_dropped += 1;
                    self.push_event(handle, EventKind::TxDrop);
                    self.output_signal.main_signal = MacSignal::TxDrop;
                } else {
                    conn.stats.tx_fail += 1;
                    self.push_event(handle, EventKind::TxFail);
                    self.output_signal.main_signal = MacSignal::TxFail;
                }
            } else {
                self.output_signal.main_signal = MacSignal::TxFail;
            }
            let retry_time = node.connections[handle.index()].cca.retry_time_pll_cycles;
            self.link_ddcm.post_tx_update(metrics.cca_try_count, retry_time, false);
            if let Some(state) = node.connections[handle.index()].connect_status.update(false) {
                self.push_connect_event(handle, state);
            }
        }

        self.stats_staging.push(StatsEntry {
            connection: handle,
            rssi: metrics.rssi_raw,
            rnsi: metrics.rnsi_raw,
            phase_offset: metrics.phase_offset,
            channel_index,
            outcome: if success { FrameOutcome::SentAck } else { FrameOutcome::SentNack },
            empty_frame,
        });
    }

    fn process_main_rx_outcome<P: WpsPhy>(
        &mut self,
        node: &mut Node<'_>,
        phy: &mut P,
        signal: PhySignal,
        metrics: &PhyMetrics,
    ) {
        let channel_index = self.channel_hopping.current_channel();

        if signal != PhySignal::FrameReceived {
            // Lost or rejected: nothing landed in the RX node.
            if let Some(rx_node) = self.armed.main_rx_node.take() {
                node.free_rx_queue.free_node(rx_node);
            }
            let slot_duration = self.scheduler.current_timeslot().duration_pll_cycles;
            if self.is_network_node() {
                // On budget exhaustion the prepare path drops to syncing.
                self.tdma_sync.frame_lost(slot_duration);
            }
            if let Some(handle) = self.main_connection {
                if let Some(state) = node.connections[handle.index()].connect_status.update(false)
                {
                    self.push_connect_event(handle, state);
                }
                self.stats_staging.push(StatsEntry {
                    connection: handle,
                    rssi: metrics.rssi_raw,
                    rnsi: metrics.rnsi_raw,
                    phase_offset: metrics.phase_offset,
                    channel_index,
                    outcome: if signal == PhySignal::FrameRejected {
                        FrameOutcome::Rejected
                    } else {
                        FrameOutcome::Lost
                    },
                    empty_frame: true,
                });
            }
            self.output_signal.main_signal = MacSignal::FrameRxFail;
            return;
        }

        let rx_node = match self.armed.main_rx_node.take() {
            Some(rx_node) => rx_node,
            None => {
                // No free descriptor was available when the slot was armed.
                self.output_signal.main_signal = MacSignal::FrameRxOverrun;
                if let Some(handle) = self.main_connection {
                    let conn = &mut node.connections[handle.index()];
                    conn.stats.rx_overrun += 1;
                    conn.wps_error = Some(WpsError::QueueFull);
                }
                return;
            }
        };

        // Pull the bytes out of the transceiver into the pre-assigned slot.
        let received_len = {
            let frame = *node.free_rx_queue.frame(rx_node);
            let slot = &mut node.rx_storage[frame.buffer_offset as usize
                ..frame.buffer_offset as usize + frame.buffer_len as usize];
            phy.read_frame(FrameTarget::Main, slot)
        };

        let expected_header = self
            .main_connection
            .map(|h| node.connections[h.index()].header_size)
            .unwrap_or(self.max_expected_header_size);

        if received_len < expected_header as usize {
            node.free_rx_queue.free_node(rx_node);
            self.output_signal.main_signal = MacSignal::FrameRxFail;
            return;
        }

        {
            let frame = node.free_rx_queue.frame_mut(rx_node);
            frame.header_begin = 0;
            frame.header_size = expected_header as u16;
            frame.payload_begin = expected_header as u16;
            frame.payload_end = received_len as u16;
            frame.outcome = FrameOutcome::Received;
        }

        self.find_received_timeslot_and_connection_main(node, rx_node);

        let handle = match self.main_connection {
            Some(handle) => handle,
            None => {
                node.free_rx_queue.free_node(rx_node);
                self.output_signal.main_signal = MacSignal::Empty;
                return;
            }
        };

        let duplicate = self.run_rx_pipeline(node, handle, rx_node, false, metrics);

        // A successful reception (re)locks a slave regardless of payload.
        if self.is_network_node() {
            self.tdma_sync.slave_adjust(metrics.rx_wait_time);
        }

        let frame = *node.free_rx_queue.frame(rx_node);
        let empty_frame = frame.is_empty_frame();
        {
            let conn = &mut node.connections[handle.index()];
            let gain_slot = (channel_index as usize) % conn.gain_loop.len();
            conn.gain_loop[gain_slot].update(metrics.rssi_raw);
        }

        if duplicate || empty_frame {
            // Duplicate of an already-delivered frame, or a header-only
            // sync frame: nothing reaches the application.
            node.free_rx_queue.free_node(rx_node);
            self.output_signal.main_signal = MacSignal::Empty;
        } else {
            let conn = &mut node.connections[handle.index()];
            if !conn.queue.enqueue(&mut node.free_rx_queue, rx_node) {
                node.free_rx_queue.free_node(rx_node);
                conn.stats.rx_overrun += 1;
                conn.wps_error = Some(WpsError::QueueFull);
                self.output_signal.main_signal = MacSignal::FrameRxOverrun;
            } else {
                conn.stats.rx_received += 1;
                conn.stats.rx_byte_received += frame.payload_len() as u32;
                self.push_event(handle, EventKind::RxSuccess);
                self.output_signal.main_signal = MacSignal::FrameRxSuccess;
            }
        }

        if let Some(state) = node.connections[handle.index()].connect_status.update(true) {
            self.push_connect_event(handle, state);
        }

        self.stats_staging.push(StatsEntry {
            connection: handle,
            rssi: metrics.rssi_raw,
            rnsi: metrics.rnsi_raw,
            phase_offset: metrics.phase_offset,
            channel_index,
            outcome: FrameOutcome::Received,
            empty_frame: empty_frame || duplicate,
        });
    }

    fn process_auto_tx_outcome(
        &mut self,
        node: &mut Node<'_>,
        signal: PhySignal,
        metrics: &PhyMetrics,
        now: u32,
    ) {
        let success = signal == PhySignal::FrameSentAck;
        let handle = match self.auto_connection {
            Some(handle) => handle,
            // Header-only acknowledge; nothing to account.
            None => return,
        };
        let channel_index = self.channel_hopping.current_channel();

        if let Some(tx_node) = self.armed.auto_tx_node {
            if success {
                let conn = &mut node.connections[handle.index()];
                let dequeued = conn.queue.dequeue(&mut node.free_tx_queue);
                debug_assert_eq!(dequeued, Some(tx_node));
                let frame = *node.free_tx_queue.frame(tx_node);
                node.tx_data.free(frame.buffer_offset, frame.buffer_len as usize);
                node.free_tx_queue.free_node(tx_node);

                conn.stats.tx_success += 1;
                conn.stats.tx_byte_sent += frame.payload_len() as u32;
                conn.stop_and_wait_arq.increment_seq_num();
                conn.credit_flow_ctrl.consume();
                self.push_event(handle, EventKind::TxSuccess);
                self.output_signal.auto_signal = MacSignal::TxSuccess;
            } else {
                let drop = {
                    let frame = node.free_tx_queue.frame_mut(tx_node);
                    frame.retry_count += 1;
                    let conn = &node.connections[handle.index()];
                    conn.stop_and_wait_arq.should_drop(frame.time_stamp, now, frame.retry_count)
                };
                let conn = &mut node.connections[handle.index()];
                if drop {
                    let dequeued = conn.queue.dequeue(&mut node.free_tx_queue);
                    debug_assert_eq!(dequeued, Some(tx_node));
                    let frame = *node.free_tx_queue.frame(tx_node);
                    node.tx_data.free(frame.buffer_offset, frame.buffer_len as usize);
                    node.free_tx_queue.free_node(tx_node);

                    conn.stats.tx_drop += 1;
                    conn.stats.total_pkt_dropped += 1;
                    self.push_event(handle, EventKind::TxDrop);
                    self.output_signal.auto_signal = MacSignal::TxDrop;
                } else {
                    conn.stats.tx_fail += 1;
                    self.push_event(handle, EventKind::TxFail);
                    self.output_signal.auto_signal = MacSignal::TxFail;
                }
            }
        }

        self.stats_staging.push(StatsEntry {
            connection: handle,
            rssi: metrics.rssi_raw,
            rnsi: metrics.rnsi_raw,
            phase_offset: metrics.phase_offset,
            channel_index,
            outcome: if success { FrameOutcome::SentAck } else { FrameOutcome::SentNack },
            empty_frame: self.armed.auto_tx_node.is_none(),
        });
    }

    fn process_auto_rx_outcome<P: WpsPhy>(
        &mut self,
        node: &mut Node<'_>,
        phy: &mut P,
        signal: PhySignal,
        metrics: &PhyMetrics,
    ) {
        if signal != PhySignal::FrameReceived {
            if let Some(rx_node) = self.armed.auto_rx_node.take() {
                node.free_rx_queue.free_node(rx_node);
            }
            if self.armed.main_is_tx {
                self.output_signal.auto_signal = MacSignal::FrameRxFail;
            }
            return;
        }

        match self.auto_connection {
            Some(armed_auto) => {
                let rx_node = match self.armed.auto_rx_node.take() {
                    Some(rx_node) => rx_node,
                    None => {
                        self.output_signal.auto_signal = MacSignal::FrameRxOverrun;
                        if let Some(handle) = self.auto_connection {
                            let conn = &mut node.connections[handle.index()];
                            conn.stats.rx_overrun += 1;
                            conn.wps_error = Some(WpsError::QueueFull);
                        }
                        return;
                    }
                };
                let received_len = {
                    let frame = *node.free_rx_queue.frame(rx_node);
                    let slot = &mut node.rx_storage[frame.buffer_offset as usize
                        ..frame.buffer_offset as usize + frame.buffer_len as usize];
                    phy.read_frame(FrameTarget::Auto, slot)
                };

                self.find_received_connection_auto(node, rx_node, armed_auto);
                let handle = match self.auto_connection {
                    Some(handle) => handle,
                    None => {
                        node.free_rx_queue.free_node(rx_node);
                        return;
                    }
                };
                let expected_header = node.connections[handle.index()].header_size;

                if received_len < expected_header as usize {
                    node.free_rx_queue.free_node(rx_node);
                    self.output_signal.auto_signal = MacSignal::FrameRxFail;
                    return;
                }
                {
                    let frame = node.free_rx_queue.frame_mut(rx_node);
                    frame.header_begin = 0;
                    frame.header_size = expected_header as u16;
                    frame.payload_begin = expected_header as u16;
                    frame.payload_end = received_len as u16;
                    frame.outcome = FrameOutcome::Received;
                }

                let duplicate = self.run_rx_pipeline(node, handle, rx_node, false, metrics);

                let frame = *node.free_rx_queue.frame(rx_node);
                let empty_frame = frame.is_empty_frame();

                if duplicate || empty_frame {
                    node.free_rx_queue.free_node(rx_node);
                    self.output_signal.auto_signal = MacSignal::Empty;
                } else {
                    let conn = &mut node.connections[handle.index()];
                    if !conn.queue.enqueue(&mut node.free_rx_queue, rx_node) {
                        node.free_rx_queue.free_node(rx_node);
                        conn.stats.rx_overrun += 1;
                        conn.wps_error = Some(WpsError::QueueFull);
                        self.output_signal.auto_signal = MacSignal::FrameRxOverrun;
                    } else {
                        conn.stats.rx_received += 1;
                        conn.stats.rx_byte_received += frame.payload_len() as u32;
                        self.push_event(handle, EventKind::RxSuccess);
                        self.output_signal.auto_signal = MacSignal::FrameRxSuccess;
                    }
                }

                self.stats_staging.push(StatsEntry {
                    connection: handle,
                    rssi: metrics.rssi_raw,
                    rnsi: metrics.rnsi_raw,
                    phase_offset: metrics.phase_offset,
                    channel_index: self.channel_hopping.current_channel(),
                    outcome: FrameOutcome::Received,
                    empty_frame: empty_frame || duplicate,
                });
            }
            None => {
                // Plain acknowledge. Even without an auto-reply connection
                // it may carry credit and ranging fields for the main
                // connection; decode them from the scratch buffer.
                let handle = match self.main_connection {
                    Some(handle) => handle,
                    None => return,
                };
                if node.connections[handle.index()].ack_frame_enable {
                    let mut buf = self.ack_rx_buf;
                    let len = phy.read_frame(FrameTarget::Auto, &mut buf);
                    self.ack_rx_buf = buf;
                    let expected = node.connections[handle.index()].ack_header_size as usize;
                    if len >= expected {
                        self.run_ack_rx_pipeline(node, handle, metrics);
                    }
                }
                self.output_signal.auto_signal = MacSignal::Empty;
            }
        }
    }

    // --- received-header resolution -----------------------------------------

    /// Re-derive the current time slot and main connection from a received
    /// header. Required for slave resynchronization and multi-connection
    /// slots.
    fn find_received_timeslot_and_connection_main(&mut self, node: &mut Node<'_>, rx_node: u16) {
        let handle = match self.main_connection {
            Some(handle) => handle,
            None => return,
        };
        let prev_auto_connection = self.auto_connection;
        let mut plan = node.connections[handle.index()].link_protocol.clone();

        if self.is_network_node() {
            if let Some(offset) = plan.offset_of(ProtoId::TimeslotSaw) {
                let byte = {
                    let frame = node.free_rx_queue.frame(rx_node);
                    frame.header(node.rx_storage)[offset as usize]
                };
                let ts_saw = TimeslotSaw::from_bytes([byte]);
                let time_slot_id = ts_saw.time_slot_id();
                if (time_slot_id as usize) < self.scheduler.total_timeslot_count() {
                    if self.scheduler.next_timeslot_index() != time_slot_id {
                        self.scheduler.set_mismatch();
                    }
                    self.scheduler.set_time_slot_i(time_slot_id);
                }
            }
        }

        if (!self.tdma_sync.is_slave_synced() && self.is_network_node())
            || self.scheduler.mismatch()
        {
            self.main_connection = self.scheduler.current_main_connection(self.main_connection_id);
            self.auto_connection = self.scheduler.current_auto_connection(0);
            if let Some(handle) = self.main_connection {
                plan = node.connections[handle.index()].link_protocol.clone();
            }
        }

        let connection_count = self.scheduler.current_timeslot().main_connection_count;
        if connection_count > 1 {
            let connection_id = plan.offset_of(ProtoId::ConnectionId).map(|offset| {
                let frame = node.free_rx_queue.frame(rx_node);
                frame.header(node.rx_storage)[offset as usize]
            });
            let connection_id = connection_id.unwrap_or(0);
            self.main_connection_id =
                if connection_id < connection_count { connection_id } else { 0 };
        } else {
            self.main_connection_id = 0;
        }

        self.main_connection = self.scheduler.current_main_connection(self.main_connection_id);
        self.auto_connection = self.scheduler.current_auto_connection(self.auto_connection_id);

        // A mismatch may land on a slot without an auto-reply connection
        // while an auto-reply TX from the previous assignment is still in
        // flight; keep processing it so its memory is released.
        if self.auto_connection.is_none() && self.scheduler.mismatch() {
            self.auto_connection = prev_auto_connection;
        }
    }

    /// Re-derive the auto-reply connection id from a received auto frame.
    /// `connection` is the auto-reply connection the slot was armed with;
    /// its plan locates the connection-id field.
    fn find_received_connection_auto(
        &mut self,
        node: &mut Node<'_>,
        rx_node: u16,
        connection: ConnectionHandle,
    ) {
        let plan = node.connections[connection.index()].link_protocol.clone();
        let connection_count = self.scheduler.current_timeslot().auto_connection_count;

        if connection_count > 1 {
            let connection_id = plan.offset_of(ProtoId::ConnectionId).map(|offset| {
                let frame = node.free_rx_queue.frame(rx_node);
                frame.header(node.rx_storage)[offset as usize]
            });
            let connection_id = connection_id.unwrap_or(0);
            self.auto_connection_id =
                if connection_id < connection_count { connection_id } else { 0 };
        } else {
            self.auto_connection_id = 0;
        }

        self.main_connection = self.scheduler.current_main_connection(self.main_connection_id);
        self.auto_connection = self.scheduler.current_auto_connection(self.auto_connection_id);
    }

    // --- header pipelines ---------------------------------------------------

    /// Serialize the header of an outgoing frame. `is_ack` selects the
    /// acknowledge-frame field semantics.
    fn run_tx_pipeline(
        &mut self,
        connections: &mut [Connection],
        conn_index: usize,
        is_ack: bool,
        buf: &mut [u8],
    ) {
        let plan = if is_ack {
            connections[conn_index].auto_link_protocol.clone()
        } else {
            connections[conn_index].link_protocol.clone()
        };

        for entry in plan.entries() {
            if !entry.tx {
                continue;
            }
            let field = &mut buf[entry.offset as usize..(entry.offset + entry.size) as usize];
            match entry.id {
                ProtoId::TimeslotSaw => {
                    let ts = TimeslotSaw::new()
                        .with_time_slot_id(self.scheduler.next_timeslot_index() & 0x7F)
                        .with_seq_num(connections[conn_index].stop_and_wait_arq.seq_num());
                    field[0] = ts.into_bytes()[0];
                }
                ProtoId::ChannelIndex => {
                    field[0] = self.channel_hopping.seq_index();
                }
                ProtoId::Rdo => {
                    self.link_rdo.send_offset(field);
                }
                ProtoId::RangingInitiator | ProtoId::RangingResponder => {
                    if entry.size == 1 {
                        field[0] = self.phase_data.local_phases_count;
                    } else {
                        field[0] = self.phase_data.local_phases_count;
                        field[1] = self.phase_data.local_phases_info.phase1;
                        field[2] = self.phase_data.local_phases_info.phase2;
                        field[3] = self.phase_data.local_phases_info.phase3;
                        field[4] = self.phase_data.local_phases_info.phase4;
                    }
                }
                ProtoId::ConnectionId => {
                    field[0] = if is_ack {
                        self.main_ack_connection_id
                    } else {
                        self.send_connection_id(connections)
                    };
                }
                ProtoId::CreditFc => {
                    field[0] = self.send_credit(connections, is_ack);
                }
            }
        }
    }

    fn send_connection_id(&self, connections: &[Connection]) -> u8 {
        if let Some(auto) = self.auto_connection {
            if connections[auto.index()].source_address == self.local_address {
                return self.auto_connection_id;
            }
        }
        self.main_connection_id
    }

    /// Credit byte: free space of the receive queue the peer transmits
    /// into, less one reserved slot, clamped to the field width.
    fn send_credit(&self, connections: &[Connection], is_ack: bool) -> u8 {
        let handle = if is_ack {
            self.scheduler.current_main_connection(self.main_ack_connection_id)
        } else if !self.armed.main_is_tx {
            self.scheduler.current_main_connection(self.auto_connection_id)
        } else if self.auto_connection.is_some() {
            self.scheduler.current_auto_connection(self.main_connection_id)
        } else {
            None
        };

        let mut free_slot = handle
            .map(|h| connections[h.index()].queue.free_space())
            .unwrap_or(0);
        if free_slot > CREDIT_FLOW_CONTROL_MAX_VALUE {
            free_slot = CREDIT_FLOW_CONTROL_MAX_VALUE;
        } else if free_slot > 0 {
            free_slot -= 1;
        }
        free_slot as u8
    }

    /// Decode the header of a received frame. Returns whether the frame was
    /// flagged as a stop-and-wait duplicate.
    fn run_rx_pipeline(
        &mut self,
        node: &mut Node<'_>,
        handle: ConnectionHandle,
        rx_node: u16,
        is_ack: bool,
        metrics: &PhyMetrics,
    ) -> bool {
        let plan = if is_ack {
            node.connections[handle.index()].auto_link_protocol.clone()
        } else {
            node.connections[handle.index()].link_protocol.clone()
        };
        let frame = *node.free_rx_queue.frame(rx_node);
        let mut header = [0u8; MAX_HEADER_SIZE];
        let header_len = (frame.header_size as usize).min(MAX_HEADER_SIZE);
        header[..header_len].copy_from_slice(&frame.header(node.rx_storage)[..header_len]);
        let has_payload = !frame.is_empty_frame();

        let mut duplicate = false;
        for entry in plan.entries() {
            if !entry.rx {
                continue;
            }
            let field = &header[entry.offset as usize..(entry.offset + entry.size) as usize];
            match entry.id {
                ProtoId::TimeslotSaw => {
                    let ts = TimeslotSaw::from_bytes([field[0]]);
                    let conn = &mut node.connections[handle.index()];
                    conn.stop_and_wait_arq.update_rx_seq_num(ts.seq_num());
                    // Header-only sync frames never count as duplicates.
                    if has_payload && conn.stop_and_wait_arq.is_rx_frame_duplicate() {
                        duplicate = true;
                    }
                }
                ProtoId::ChannelIndex => {
                    if self.is_network_node() {
                        self.channel_hopping.set_seq_index(field[0]);
                    }
                }
                ProtoId::Rdo => {
                    self.link_rdo.set_offset(field);
                }
                ProtoId::RangingInitiator | ProtoId::RangingResponder => {
                    if entry.size == 1 {
                        self.phase_data.local_phases_count = field[0];
                    } else {
                        self.receive_ranging_phases(node, field, metrics);
                    }
                }
                ProtoId::ConnectionId => {
                    if is_ack {
                        self.main_ack_connection_id = field[0];
                    }
                    // Main-frame connection ids were already consumed by the
                    // timeslot/connection resolution step.
                }
                ProtoId::CreditFc => {
                    self.receive_credit(node, field[0], is_ack);
                }
            }
        }

        duplicate
    }

    /// Decode a plain acknowledge header (no auto-reply connection) from the
    /// scratch buffer into the main connection's state.
    fn run_ack_rx_pipeline(
        &mut self,
        node: &mut Node<'_>,
        handle: ConnectionHandle,
        metrics: &PhyMetrics,
    ) {
        let plan = node.connections[handle.index()].auto_link_protocol.clone();
        let header = self.ack_rx_buf;

        for entry in plan.entries() {
            if !entry.rx {
                continue;
            }
            let field = &header[entry.offset as usize..(entry.offset + entry.size) as usize];
            match entry.id {
                ProtoId::Rdo => self.link_rdo.set_offset(field),
                ProtoId::RangingInitiator | ProtoId::RangingResponder => {
                    if entry.size == 1 {
                        self.phase_data.local_phases_count = field[0];
                    } else {
                        self.receive_ranging_phases(node, field, metrics);
                    }
                }
                ProtoId::ConnectionId => {
                    self.main_ack_connection_id = field[0];
                }
                ProtoId::CreditFc => {
                    self.receive_credit(node, field[0], true);
                }
                ProtoId::TimeslotSaw | ProtoId::ChannelIndex => {}
            }
        }
    }

    fn receive_ranging_phases(&mut self, node: &mut Node<'_>, field: &[u8], metrics: &PhyMetrics) {
        self.phase_data.remote_phases_count = field[0];
        self.phase_data.remote_phases_info = PhaseInfos {
            phase1: field[1],
            phase2: field[2],
            phase3: field[3],
            phase4: field[4],
            rx_waited0: 0,
            rx_waited1: 0,
        };

        if let Some(handle) = self.auto_connection.or(self.main_connection) {
            if self.phase_data.is_valid() {
                let conn = &mut node.connections[handle.index()];
                if conn.link_phase.add_data(
                    self.phase_data.last_local_phases_info,
                    self.phase_data.remote_phases_info,
                ) {
                    self.push_event(handle, EventKind::RangingDataReady);
                }
            }
        }
        self.phase_data.update(metrics.rx_wait_time);
    }

    fn receive_credit(&mut self, node: &mut Node<'_>, credit: u8, is_ack: bool) {
        let handle = if is_ack {
            self.scheduler.current_main_connection(self.main_ack_connection_id)
        } else if self.armed.main_is_tx {
            self.scheduler.current_main_connection(self.auto_connection_id)
        } else if self.auto_connection.is_some() {
            self.scheduler.current_auto_connection(self.main_connection_id)
        } else {
            None
        };
        if let Some(handle) = handle {
            node.connections[handle.index()].credit_flow_ctrl.set_credits(credit);
        }
    }

    // --- request servicing --------------------------------------------------

    /// Service at most one application request. Returns `true` when a
    /// disconnect was executed.
    fn process_next_request<P: WpsPhy>(
        &mut self,
        node: &mut Node<'_>,
        requests: &mut RequestQueues,
        phy: &mut P,
    ) -> bool {
        match requests.pop_request() {
            Some(RequestKind::PhyDisconnect) => {
                phy.disconnect();
                true
            }
            Some(RequestKind::WriteRegister) => {
                if let Some(write) = requests.pop_write() {
                    phy.write_register(write.target_register, write.data, write.cfg);
                }
                false
            }
            Some(RequestKind::ReadRegister) => {
                if let Some(read) = requests.pop_read() {
                    let value = phy.read_register(read.target_register);
                    requests.push_read_result(ReadRegisterResult {
                        target_register: read.target_register,
                        value,
                    });
                }
                false
            }
            Some(RequestKind::ScheduleRatio) => {
                if let Some(cfg) = requests.pop_schedule_ratio() {
                    if let Some(conn) = node.connections.get_mut(cfg.target.index()) {
                        conn.apply_pattern(&cfg.pattern, cfg.pattern_total_count, cfg.active_ratio);
                    }
                }
                false
            }
            None => false,
        }
    }

    // --- next-slot preparation ----------------------------------------------

    fn prepare_next_slot<P: WpsPhy>(&mut self, node: &mut Node<'_>, phy: &mut P) {
        self.scheduler.reset_sleep_time();
        self.scheduler.increment_time_slot();
        let sleep_cycles = self.scheduler.sleep_time();
        self.link_ddcm.pll_cycles_update(sleep_cycles);

        self.armed = ArmedSlot::default();
        self.empty_tx_len = 0;
        self.empty_ack_len = 0;

        let slot = *self.scheduler.current_timeslot();

        if !self.is_synced() {
            self.prepare_syncing_slot(node, phy, &slot);
            return;
        }

        let main_is_tx = slot.connection_main[0]
            .map(|e| e.source_address == self.local_address)
            .unwrap_or(false);

        // Resolve connection ids for the upcoming slot.
        if main_is_tx {
            self.main_connection_id =
                priority::highest_main_conn_index(&mut node.connections, &slot);
        } else {
            self.main_connection_id = 0;
        }
        self.auto_connection_id = if slot.auto_connection_count > 0 {
            priority::highest_auto_conn_index(&mut node.connections, &slot)
        } else {
            0
        };
        self.main_ack_connection_id = self.main_connection_id;
        self.main_connection = slot.main_connection(self.main_connection_id);
        self.auto_connection = slot.auto_connection(self.auto_connection_id);

        let main_handle = match self.main_connection {
            Some(handle) => handle,
            None => {
                // Nothing scheduled; sleep through.
                self.armed.muted = true;
                self.prepare_muted_slot(node, phy, sleep_cycles);
                return;
            }
        };

        self.armed.main_is_tx = main_is_tx;

        // Throttle: the slot only participates when the pattern bit is set.
        if main_is_tx && !node.connections[main_handle.index()].throttle_step() {
            self.armed.muted = true;
            self.prepare_muted_slot(node, phy, sleep_cycles);
            return;
        }

        self.channel_hopping.increment_index();
        self.link_rdo.update();

        if main_is_tx {
            let front = node.connections[main_handle.index()].queue.front();
            let auto_sync = node.connections[main_handle.index()].auto_sync_enable;
            if let Some(tx_node) = front {
                let header_size = node.free_tx_queue.frame(tx_node).header_size;
                let mut header = [0u8; MAX_HEADER_SIZE];
                self.run_tx_pipeline(&mut node.connections, main_handle.index(), false, &mut header);
                {
                    let frame = node.free_tx_queue.frame_mut(tx_node);
                    frame.source_address = self.local_address;
                    frame.destination_address =
                        node.connections[main_handle.index()].destination_address;
                }
                let frame = *node.free_tx_queue.frame(tx_node);
                node.tx_data
                    .get_mut(frame.buffer_offset, header_size as usize)
                    .copy_from_slice(&header[..header_size as usize]);
                self.armed.main_tx_node = Some(tx_node);
            } else if auto_sync {
                // Keep the link alive with a header-only sync frame.
                let header_size = node.connections[main_handle.index()].header_size;
                let mut header = [0u8; MAX_HEADER_SIZE];
                self.run_tx_pipeline(&mut node.connections, main_handle.index(), false, &mut header);
                self.empty_tx_buf = header;
                self.empty_tx_len = header_size;
                self.armed.main_tx_node = None;
            } else {
                // Nothing to send and no sync frames wanted.
                self.armed.muted = true;
                self.prepare_muted_slot(node, phy, sleep_cycles);
                return;
            }
        } else {
            self.armed.main_rx_node = node.free_rx_queue.get_free_node();
        }

        // Auto-reply direction.
        if let Some(auto_handle) = self.auto_connection {
            let auto_is_tx =
                node.connections[auto_handle.index()].source_address == self.local_address;
            self.armed.auto_is_tx = auto_is_tx;
            if auto_is_tx {
                if let Some(tx_node) = node.connections[auto_handle.index()].queue.front() {
                    let header_size = node.free_tx_queue.frame(tx_node).header_size;
                    let mut header = [0u8; MAX_HEADER_SIZE];
                    self.run_tx_pipeline(
                        &mut node.connections,
                        auto_handle.index(),
                        false,
                        &mut header,
                    );
                    {
                        let frame = node.free_tx_queue.frame_mut(tx_node);
                        frame.source_address = self.local_address;
                        frame.destination_address =
                            node.connections[auto_handle.index()].destination_address;
                    }
                    let frame = *node.free_tx_queue.frame(tx_node);
                    node.tx_data
                        .get_mut(frame.buffer_offset, header_size as usize)
                        .copy_from_slice(&header[..header_size as usize]);
                    self.armed.auto_tx_node = Some(tx_node);
                } else {
                    // Empty auto-reply: acknowledge with header fields only.
                    let header_size = node.connections[auto_handle.index()].header_size;
                    let mut header = [0u8; MAX_HEADER_SIZE];
                    self.run_tx_pipeline(
                        &mut node.connections,
                        auto_handle.index(),
                        false,
                        &mut header,
                    );
                    self.empty_ack_buf = header;
                    self.empty_ack_len = header_size;
                    self.armed.auto_tx_node = None;
                }
            } else {
                self.armed.auto_rx_node = node.free_rx_queue.get_free_node();
            }
        } else if node.connections[main_handle.index()].ack_frame_enable && !main_is_tx {
            // No auto-reply connection, but the acknowledge frame carries
            // fields (credit flow control, standalone ranging). On the TX
            // side the acknowledge is read back without a pre-armed node.
            self.armed.auto_is_tx = true;
            let ack_size = node.connections[main_handle.index()].ack_header_size;
            let mut header = [0u8; MAX_HEADER_SIZE];
            self.run_tx_pipeline(&mut node.connections, main_handle.index(), true, &mut header);
            self.empty_ack_buf = header;
            self.empty_ack_len = ack_size;
        }

        self.finish_prepare(node, phy, sleep_cycles, main_handle, main_is_tx);
    }

    fn prepare_syncing_slot<P: WpsPhy>(
        &mut self,
        node: &mut Node<'_>,
        phy: &mut P,
        slot: &TimeSlot,
    ) {
        // Unsynced slave: listen continuously; never transmit.
        self.main_connection_id = 0;
        self.auto_connection_id = 0;
        self.main_connection = slot.main_connection(0);
        self.auto_connection = slot.auto_connection(0);
        self.armed.main_is_tx = false;
        self.armed.main_rx_node = node.free_rx_queue.get_free_node();

        self.tdma_sync.update_rx(self.scheduler.sleep_time());
        self.output_signal.main_signal = MacSignal::Syncing;

        let (channel, rx_gain, frame_cfg, cca, destination) = self.radio_parameters(node);
        // While syncing, the address filter listens for the dedicated
        // syncing peer when one is configured.
        let destination = if self.syncing_address != 0 { self.syncing_address } else { destination };
        let prepare = PhyPrepare {
            power_up_delay: self.tdma_sync.get_pwr_up(),
            rx_timeout: self.tdma_sync.get_timeout(),
            sleep_time: self.tdma_sync.get_sleep_cycles(),
            sleep_level: self.scheduler.next_sleep_lvl(),
            channel,
            modulation: frame_cfg.modulation,
            fec: frame_cfg.fec,
            chip_repet: frame_cfg.chip_repet,
            cca,
            rdo_offset: 0,
            ddcm_offset: 0,
            rx_gain,
            local_address: self.local_address,
            destination_address: destination,
            expected_header_size: self.max_expected_header_size,
            expected_payload_size: self.max_expected_payload_size,
            main_tx: None,
            auto_tx: None,
            ack_expected: false,
            muted: false,
        };
        phy.prepare(&prepare);
    }

    /// Arm a slot nothing happens in: the radio just sleeps through it.
    fn prepare_muted_slot<P: WpsPhy>(&mut self, node: &mut Node<'_>, phy: &mut P, sleep_cycles: u32) {
        self.tdma_sync.update_tx(sleep_cycles);
        let (channel, rx_gain, frame_cfg, cca, destination) = self.radio_parameters(node);
        let prepare = PhyPrepare {
            power_up_delay: 0,
            rx_timeout: 0,
            sleep_time: self.tdma_sync.get_sleep_cycles(),
            sleep_level: self.scheduler.next_sleep_lvl(),
            channel,
            modulation: frame_cfg.modulation,
            fec: frame_cfg.fec,
            chip_repet: frame_cfg.chip_repet,
            cca,
            rdo_offset: 0,
            ddcm_offset: 0,
            rx_gain,
            local_address: self.local_address,
            destination_address: destination,
            expected_header_size: self.max_expected_header_size,
            expected_payload_size: self.max_expected_payload_size,
            main_tx: None,
            auto_tx: None,
            ack_expected: false,
            muted: true,
        };
        phy.prepare(&prepare);
        self.output_signal.main_signal = match self.output_signal.main_signal {
            MacSignal::Empty => MacSignal::PrepareDone,
            other => other,
        };
    }

    /// Radio parameters of the slot's reference (first main) connection.
    fn radio_parameters(
        &self,
        node: &Node<'_>,
    ) -> (
        crate::phy::RfChannel,
        u8,
        crate::connection::FrameConfig,
        crate::link::LinkCca,
        Address,
    ) {
        let channel_id = self.channel_hopping.current_channel() as usize;
        match self.main_connection {
            Some(handle) => {
                let conn = &node.connections[handle.index()];
                let set = conn.link_fallback.channel_set_index() as usize;
                let channel_id = channel_id % conn.channel.len();
                let channel = if set == 0 {
                    conn.channel[channel_id]
                } else {
                    conn.fallback_channel[(set - 1).min(conn.fallback_channel.len() - 1)]
                        [channel_id]
                };
                let gain = conn.gain_loop[channel_id].gain_index();
                (channel, gain, conn.frame_cfg, conn.cca, conn.destination_address)
            }
            None => (
                crate::phy::RfChannel::default(),
                0,
                crate::connection::FrameConfig::default(),
                crate::link::LinkCca::default(),
                0,
            ),
        }
    }

    fn finish_prepare<P: WpsPhy>(
        &mut self,
        node: &mut Node<'_>,
        phy: &mut P,
        sleep_cycles: u32,
        main_handle: ConnectionHandle,
        main_is_tx: bool,
    ) {
        if main_is_tx {
            self.tdma_sync.update_tx(sleep_cycles);
        } else {
            self.tdma_sync.update_rx(sleep_cycles);
        }

        let ddcm_offset = if main_is_tx { self.link_ddcm.get_offset() } else { 0 };
        let (channel, rx_gain, frame_cfg, cca, destination) = self.radio_parameters(node);
        let ack_expected = node.connections[main_handle.index()].ack_enable;

        let main_tx: Option<&[u8]> = if main_is_tx {
            match self.armed.main_tx_node {
                Some(tx_node) => {
                    let frame = node.free_tx_queue.frame(tx_node);
                    Some(frame.bytes(node.tx_data.region()))
                }
                None => Some(&self.empty_tx_buf[..self.empty_tx_len as usize]),
            }
        } else {
            None
        };

        let auto_tx: Option<&[u8]> = if self.armed.auto_is_tx {
            match self.armed.auto_tx_node {
                Some(tx_node) => {
                    let frame = node.free_tx_queue.frame(tx_node);
                    Some(frame.bytes(node.tx_data.region()))
                }
                None if self.empty_ack_len > 0 => {
                    Some(&self.empty_ack_buf[..self.empty_ack_len as usize])
                }
                None => None,
            }
        } else {
            None
        };

        let prepare = PhyPrepare {
            power_up_delay: self.tdma_sync.get_pwr_up(),
            rx_timeout: self.tdma_sync.get_timeout(),
            sleep_time: self.tdma_sync.get_sleep_cycles(),
            sleep_level: self.scheduler.next_sleep_lvl(),
            channel,
            modulation: frame_cfg.modulation,
            fec: frame_cfg.fec,
            chip_repet: frame_cfg.chip_repet,
            cca,
            rdo_offset: self.link_rdo.offset(),
            ddcm_offset,
            rx_gain,
            local_address: self.local_address,
            destination_address: destination,
            expected_header_size: self.max_expected_header_size,
            expected_payload_size: self.max_expected_payload_size,
            main_tx,
            auto_tx,
            ack_expected,
            muted: false,
        };
        phy.prepare(&prepare);
        self.output_signal.main_signal = match self.output_signal.main_signal {
            MacSignal::Empty => MacSignal::PrepareDone,
            other => other,
        };
    }

    fn push_connect_event(
        &mut self,
        handle: ConnectionHandle,
        state: crate::link::ConnectStatusState,
    ) {
        let kind = match state {
            crate::link::ConnectStatusState::Connected => EventKind::Connected,
            crate::link::ConnectStatusState::Disconnected => EventKind::Disconnected,
        };
        self.push_event(handle, kind);
    }
}

fn is_frame_outcome(signal: PhySignal) -> bool {
    matches!(
        signal,
        PhySignal::FrameReceived
            | PhySignal::FrameLost
            | PhySignal::FrameRejected
            | PhySignal::FrameSentAck
            | PhySignal::FrameSentNack
    )
}
