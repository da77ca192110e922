//! WPS facade.
//!
//! [`Node`] owns the memory plane (connection table, frame pools, byte
//! arenas); [`Wps`] owns the control plane (MAC, request queues, lifecycle
//! signal) and is the API the application talks to.
//!
//! Context contract: [`Wps::phy_callback`] is the only entry point meant
//! for the radio interrupt; [`Wps::process_callback`] runs in the
//! medium-priority worker; everything else belongs to the application
//! context. The lifecycle signal is an atomic so `disconnect` can observe
//! the interrupt-side transition while it waits.

use core::sync::atomic::{AtomicU8, Ordering};

use embedded_time::Clock;

use crate::connection::{generate_active_pattern, Connection, ConnectionConfig, ConnectionStats, FrameConfig};
use crate::link::{
    CcaFailAction, ChannelSequence, ConnectStatusCfg, TdmaSyncCfg,
};
use crate::mac::{Mac, MacProcessOutcome};
use crate::parameters::{
    DISCONNECT_TIMEOUT_MS, EMPTY_BYTE, MAX_CHANNEL_COUNT, MAX_CONNECTIONS, MAX_FALLBACK_SETS,
    PATTERN_THROTTLE_GRANULARITY,
};
use crate::phy::{RegWriteCfg, RfChannel, WpsPhy};
use crate::protocol::{self, HeaderCfg, LinkProtocol};
use crate::request::{ReadRegisterResult, ReadRequest, RequestQueues, ScheduleRatioCfg, WriteRequest};
use crate::scheduler::{SlotEntry, TimeSlot};
use crate::xlayer::{CircularData, XlayerNode, XlayerPool};
use crate::{
    Address, ChipRate, ChipRepetition, ConnectionHandle, FecLevel, IsiMitig, Modulation, Role,
    SleepLevel, SyncwordConfig, WpsError, WpsEvent, WpsSignal,
};

/// Static configuration of the local node.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    pub local_address: Address,
    pub role: Role,
    /// Preamble length in bits.
    pub preamble_len: u32,
    pub syncword_cfg: SyncwordConfig,
    pub sleep_lvl: SleepLevel,
    /// Passed through to the PHY untouched.
    pub crc_polynomial: u32,
    pub isi_mitig: IsiMitig,
    /// Fixed RX gain; passed through to the PHY untouched.
    pub rx_gain: u8,
    /// Consecutive lost-frame duration (PLL cycles) before a slave drops
    /// back to syncing.
    pub frame_lost_max_duration: u32,
    pub tx_jitter_enabled: bool,
    pub chip_rate: ChipRate,
}

/// The local node: connection table plus the shared frame memory plane.
pub struct Node<'a> {
    pub cfg: NodeConfig,
    pub connections: heapless::Vec<Connection, MAX_CONNECTIONS>,
    /// Free descriptor pool for TX frames.
    pub free_tx_queue: XlayerPool<'a>,
    /// Free descriptor pool for RX frames; each node owns a fixed slot in
    /// `rx_storage`.
    pub free_rx_queue: XlayerPool<'a>,
    /// Circular byte arena backing TX frames.
    pub tx_data: CircularData<'a>,
    /// Backing region for RX slots.
    pub rx_storage: &'a mut [u8],
    pub max_payload_size: u8,
    pub max_header_size: u8,
}

impl<'a> Node<'a> {
    pub fn new(
        cfg: NodeConfig,
        tx_nodes: &'a mut [XlayerNode],
        rx_nodes: &'a mut [XlayerNode],
        tx_storage: &'a mut [u8],
        rx_storage: &'a mut [u8],
    ) -> Self {
        Self {
            cfg,
            connections: heapless::Vec::new(),
            free_tx_queue: XlayerPool::new(tx_nodes),
            free_rx_queue: XlayerPool::new(rx_nodes),
            tx_data: CircularData::new(tx_storage),
            rx_storage,
            max_payload_size: 0,
            max_header_size: 0,
        }
    }

    /// Create a connection. Connections cannot be removed; they are
    /// configured before `connect` and live as long as the node.
    pub fn create_connection(
        &mut self,
        config: &ConnectionConfig,
    ) -> Result<ConnectionHandle, WpsError> {
        if self.connections.is_full() {
            return Err(WpsError::ConnectionLimitReached);
        }
        let connection = Connection::new(config);
        if connection.payload_size > self.max_payload_size {
            self.max_payload_size = connection.payload_size;
        }
        if config.header_length > self.max_header_size {
            self.max_header_size = config.header_length;
        }
        let handle = ConnectionHandle(self.connections.len() as u8);
        self.connections
            .push(connection)
            .map_err(|_| WpsError::ConnectionLimitReached)?;
        Ok(handle)
    }

    pub fn connection(&self, handle: ConnectionHandle) -> &Connection {
        &self.connections[handle.index()]
    }

    pub fn connection_mut(&mut self, handle: ConnectionHandle) -> &mut Connection {
        &mut self.connections[handle.index()]
    }

    /// Carve the RX storage into per-node slots once the largest frame of
    /// the deployment is known.
    fn finalize_rx_slots(&mut self) -> Result<(), WpsError> {
        let slot_size = XlayerPool::rx_slot_size(
            self.max_header_size as usize,
            self.max_payload_size as usize,
        );
        let needed =
            XlayerPool::rx_storage_bytes(self.free_rx_queue.capacity() as usize, slot_size);
        if self.rx_storage.len() < needed {
            return Err(WpsError::NotEnoughMemory);
        }
        self.free_rx_queue.assign_rx_slots(slot_size as u16);
        Ok(())
    }
}

/// The protocol stack.
pub struct Wps<'a, C: Clock> {
    pub node: Node<'a>,
    pub mac: Mac<'a>,
    pub requests: RequestQueues,
    clock: C,
    signal: AtomicU8,
    channel_sequence: Option<ChannelSequence<'a>>,
    random_channel_sequence_enabled: bool,
    network_id: u8,
}

impl<'a, C: Clock> Wps<'a, C>
where
    C::T: Into<u64>,
{
    pub fn new(node: Node<'a>, timeslots: &'a mut [TimeSlot], clock: C) -> Self {
        Self {
            node,
            mac: Mac::new(timeslots),
            requests: RequestQueues::new(),
            clock,
            signal: AtomicU8::new(WpsSignal::NotInit as u8),
            channel_sequence: None,
            random_channel_sequence_enabled: false,
            network_id: 0,
        }
    }

    pub fn signal(&self) -> WpsSignal {
        WpsSignal::from_u8(self.signal.load(Ordering::Acquire))
    }

    fn set_signal(&self, signal: WpsSignal) {
        self.signal.store(signal as u8, Ordering::Release);
    }

    fn tick_now_u64(&self) -> u64 {
        match self.clock.try_now() {
            Ok(instant) => {
                let since_epoch = instant.duration_since_epoch();
                since_epoch.integer().into()
            }
            Err(_) => 0,
        }
    }

    fn tick_now(&self) -> u32 {
        self.tick_now_u64() as u32
    }

    // --- network configuration ----------------------------------------------

    /// Configure the TDMA schedule from per-slot durations in PLL cycles.
    pub fn config_network_schedule(&mut self, durations_pll_cycles: &[u32]) -> Result<(), WpsError> {
        if !self.mac.scheduler.configure(durations_pll_cycles) {
            return Err(WpsError::NotEnoughMemory);
        }
        Ok(())
    }

    pub fn reset_schedule(&mut self) {
        self.mac.scheduler.reset();
    }

    /// Install the channel hopping sequence.
    pub fn config_network_channel_sequence(&mut self, sequence: &'a [u8]) -> Result<(), WpsError> {
        if sequence.is_empty() {
            return Err(WpsError::ChannelSequenceNotInitialized);
        }
        self.channel_sequence = Some(ChannelSequence::new(sequence));
        Ok(())
    }

    pub fn enable_random_channel_sequence(&mut self) {
        self.random_channel_sequence_enabled = true;
    }

    pub fn disable_random_channel_sequence(&mut self) {
        self.random_channel_sequence_enabled = false;
    }

    pub fn set_network_id(&mut self, network_id: u8) {
        self.network_id = network_id;
    }

    pub fn set_syncing_address(&mut self, address: Address) {
        self.mac.syncing_address = address;
    }

    /// Number of distinct channels in the configured sequence.
    pub fn channel_count(&self) -> Result<u8, WpsError> {
        self.channel_sequence
            .map(|seq| seq.channel_number)
            .ok_or(WpsError::ChannelSequenceNotInitialized)
    }

    // --- connection configuration -------------------------------------------

    pub fn create_connection(
        &mut self,
        config: &ConnectionConfig,
    ) -> Result<ConnectionHandle, WpsError> {
        self.node.create_connection(config)
    }

    /// Attach a connection to time slots, as main (`auto_reply == false`)
    /// or auto-reply. Per-slot priorities default to the connection's own.
    pub fn connection_set_timeslot(
        &mut self,
        handle: ConnectionHandle,
        timeslot_ids: &[u8],
        auto_reply: bool,
        slots_priority: Option<&[u8]>,
    ) -> Result<(), WpsError> {
        let (source_address, priority) = {
            let conn = self.node.connection(handle);
            (conn.source_address, conn.priority)
        };
        for (i, &id) in timeslot_ids.iter().enumerate() {
            if id as usize >= self.mac.scheduler.total_timeslot_count() {
                return Err(WpsError::InvalidTimeslot);
            }
            let slot_priority = slots_priority.map(|p| p[i]).unwrap_or(priority);
            let entry = SlotEntry { connection: handle, source_address };
            let attached = if auto_reply {
                self.mac.scheduler.attach_auto(id as usize, entry, slot_priority)
            } else {
                self.mac.scheduler.attach_main(id as usize, entry, slot_priority)
            };
            if attached.is_none() {
                return Err(WpsError::TimeslotConnLimitReached);
            }
        }
        self.node.connection_mut(handle).is_main = !auto_reply;
        Ok(())
    }

    /// Build the main-frame header plan for a connection. The resulting
    /// size must match the header length declared at creation.
    pub fn configure_header_connection(
        &mut self,
        handle: ConnectionHandle,
        header_cfg: HeaderCfg,
    ) -> Result<(), WpsError> {
        let plan = LinkProtocol::for_main_frame(header_cfg);
        let conn = self.node.connection_mut(handle);
        if plan.size() != conn.header_size {
            return Err(WpsError::WrongTxSize);
        }
        conn.link_protocol = plan;
        Ok(())
    }

    /// Build the acknowledge-frame header plan for a connection.
    pub fn configure_header_acknowledge(
        &mut self,
        handle: ConnectionHandle,
        header_cfg: HeaderCfg,
    ) -> Result<(), WpsError> {
        let plan = LinkProtocol::for_ack_frame(header_cfg);
        let conn = self.node.connection_mut(handle);
        if !conn.ack_frame_enable {
            return Ok(());
        }
        if plan.size() != conn.ack_header_size {
            return Err(WpsError::WrongTxSize);
        }
        conn.auto_link_protocol = plan;
        Ok(())
    }

    /// Serialized main header size for a configuration.
    pub fn connection_header_size(&self, header_cfg: HeaderCfg) -> u8 {
        protocol::main_header_size(header_cfg)
    }

    /// Serialized acknowledge header size for a configuration.
    pub fn connection_ack_header_size(&self, header_cfg: HeaderCfg) -> u8 {
        protocol::ack_header_size(header_cfg)
    }

    /// Install the register pattern for one channel of a connection.
    pub fn connection_config_channel(
        &mut self,
        handle: ConnectionHandle,
        channel_id: u8,
        channel: &RfChannel,
    ) -> Result<(), WpsError> {
        if channel_id as usize >= MAX_CHANNEL_COUNT {
            return Err(WpsError::ChannelSequenceNotInitialized);
        }
        self.node.connection_mut(handle).channel[channel_id as usize] = *channel;
        Ok(())
    }

    /// Install the register pattern for one channel of a fallback set.
    pub fn connection_config_fallback_channel(
        &mut self,
        handle: ConnectionHandle,
        fallback_index: u8,
        channel_id: u8,
        channel: &RfChannel,
    ) -> Result<(), WpsError> {
        if channel_id as usize >= MAX_CHANNEL_COUNT || fallback_index as usize >= MAX_FALLBACK_SETS
        {
            return Err(WpsError::ChannelSequenceNotInitialized);
        }
        self.node.connection_mut(handle).fallback_channel[fallback_index as usize]
            [channel_id as usize] = *channel;
        Ok(())
    }

    pub fn connection_config_frame(
        &mut self,
        handle: ConnectionHandle,
        modulation: Modulation,
        chip_repet: ChipRepetition,
        fec: FecLevel,
    ) {
        self.node.connection_mut(handle).frame_cfg =
            FrameConfig { modulation, chip_repet, fec };
    }

    pub fn connection_config_status(
        &mut self,
        handle: ConnectionHandle,
        cfg: ConnectStatusCfg,
    ) {
        self.node.connection_mut(handle).connect_status.init(cfg);
    }

    // --- feature toggles ----------------------------------------------------

    pub fn connection_enable_ack(&mut self, handle: ConnectionHandle) {
        self.node.connection_mut(handle).ack_enable = true;
    }

    pub fn connection_disable_ack(&mut self, handle: ConnectionHandle) {
        self.node.connection_mut(handle).ack_enable = false;
    }

    /// Enable the stop-and-wait ARQ. Requires acknowledges.
    pub fn connection_enable_stop_and_wait_arq(
        &mut self,
        handle: ConnectionHandle,
        retry: u16,
        deadline: u32,
    ) -> Result<(), WpsError> {
        let local_address = self.node.cfg.local_address;
        let conn = self.node.connection_mut(handle);
        if !conn.ack_enable {
            return Err(WpsError::AckDisabled);
        }
        let board_seq = local_address == conn.destination_address;
        conn.stop_and_wait_arq.init(deadline, retry, board_seq, true);
        Ok(())
    }

    pub fn connection_disable_stop_and_wait_arq(&mut self, handle: ConnectionHandle) {
        self.node
            .connection_mut(handle)
            .stop_and_wait_arq
            .init(0, 0, false, false);
    }

    pub fn connection_enable_auto_sync(&mut self, handle: ConnectionHandle) {
        self.node.connection_mut(handle).auto_sync_enable = true;
    }

    pub fn connection_disable_auto_sync(&mut self, handle: ConnectionHandle) {
        self.node.connection_mut(handle).auto_sync_enable = false;
    }

    pub fn connection_enable_cca(
        &mut self,
        handle: ConnectionHandle,
        threshold: u8,
        retry_time_pll_cycles: u16,
        max_try_count: u8,
        fail_action: CcaFailAction,
        cca_on_time_pll_cycles: u8,
    ) -> Result<(), WpsError> {
        if cca_on_time_pll_cycles == 0 {
            return Err(WpsError::InvalidCcaSettings);
        }
        self.node.connection_mut(handle).cca.init(
            threshold,
            retry_time_pll_cycles,
            cca_on_time_pll_cycles,
            max_try_count,
            fail_action,
            true,
        );
        Ok(())
    }

    pub fn connection_disable_cca(&mut self, handle: ConnectionHandle) {
        self.node.connection_mut(handle).cca.init(
            crate::parameters::DISABLE_CCA_THRESHOLD,
            0,
            0,
            0,
            CcaFailAction::ForceTx,
            false,
        );
    }

    /// Track RX gain per channel from received signal strength.
    pub fn connection_enable_gain_loop(&mut self, handle: ConnectionHandle) {
        for gain in self.node.connection_mut(handle).gain_loop.iter_mut() {
            gain.init(false, 0);
        }
    }

    /// Pin the RX gain.
    pub fn connection_disable_gain_loop(&mut self, handle: ConnectionHandle, rx_gain: u8) {
        for gain in self.node.connection_mut(handle).gain_loop.iter_mut() {
            gain.init(true, rx_gain);
        }
    }

    pub fn connection_enable_phases_acquisition(
        &mut self,
        handle: ConnectionHandle,
        sample_size: u8,
    ) {
        self.node.connection_mut(handle).link_phase.init(sample_size);
    }

    pub fn connection_enable_credit_flow_ctrl(
        &mut self,
        handle: ConnectionHandle,
        has_main_timeslot: bool,
    ) -> Result<(), WpsError> {
        let conn = self.node.connection_mut(handle);
        if !conn.ack_enable && has_main_timeslot {
            return Err(WpsError::AckDisabled);
        }
        conn.ack_frame_enable = true;
        conn.credit_flow_ctrl.init(true, crate::parameters::MIN_QUEUE_SIZE);
        Ok(())
    }

    pub fn connection_disable_credit_flow_ctrl(&mut self, handle: ConnectionHandle) {
        let conn = self.node.connection_mut(handle);
        conn.credit_flow_ctrl.init(false, 0);
        // Acknowledge frames stay on only if ranging still needs them.
        conn.ack_frame_enable = matches!(
            conn.ranging_mode,
            crate::protocol::RangingMode::StandaloneInitiator
                | crate::protocol::RangingMode::StandaloneResponder
        );
    }

    pub fn connection_enable_fallback(
        &mut self,
        handle: ConnectionHandle,
        thresholds: &[u8],
    ) {
        self.node.connection_mut(handle).link_fallback.init(thresholds);
    }

    pub fn connection_disable_fallback(&mut self, handle: ConnectionHandle) {
        self.node.connection_mut(handle).link_fallback.init(&[]);
    }

    pub fn init_rdo(&mut self, rollover_value: u16, increment_step: u16) {
        self.mac.link_rdo.init(rollover_value, increment_step);
    }

    pub fn enable_rdo(&mut self) {
        self.mac.link_rdo.enable();
    }

    pub fn disable_rdo(&mut self) {
        self.mac.link_rdo.disable();
    }

    pub fn enable_ddcm(&mut self, max_timeslot_offset: u16, sync_loss_max_duration_pll: u32) {
        self.mac.link_ddcm.init(max_timeslot_offset, sync_loss_max_duration_pll);
    }

    pub fn disable_ddcm(&mut self) {
        self.mac.link_ddcm.init(0, 0);
    }

    pub fn enable_fast_sync(&mut self) {
        self.mac.enable_fast_sync();
    }

    pub fn disable_fast_sync(&mut self) {
        self.mac.disable_fast_sync();
    }

    /// Keep the schedule running but skip every local TX slot.
    pub fn disable_tx(&mut self) {
        self.mac.scheduler.disable_tx();
    }

    pub fn enable_tx(&mut self) {
        self.mac.scheduler.enable_tx();
    }

    // --- lifecycle ----------------------------------------------------------

    /// Finish configuration: size the RX slots, configure the MAC, and move
    /// the stack to the disconnected (ready) state.
    pub fn init(&mut self) -> Result<(), WpsError> {
        let channel_sequence = self
            .channel_sequence
            .ok_or(WpsError::ChannelSequenceNotInitialized)?;
        self.node.finalize_rx_slots()?;

        let cfg = &self.node.cfg;
        let isi_mitig_pauses = cfg.isi_mitig.pauses();
        let sync_cfg = TdmaSyncCfg {
            sleep_level: cfg.sleep_lvl,
            preamble_len: cfg.preamble_len,
            syncword_len: cfg.syncword_cfg.syncword_length as u32
                * cfg.syncword_cfg.syncword_bit_cost as u32,
            isi_mitig_pauses,
            tx_jitter_enabled: cfg.tx_jitter_enabled,
            chip_rate: cfg.chip_rate,
            frame_lost_max_duration: cfg.frame_lost_max_duration,
        };
        self.mac.init(
            channel_sequence,
            sync_cfg,
            cfg.local_address,
            cfg.role,
            self.random_channel_sequence_enabled,
            self.network_id,
            self.node.max_payload_size,
            self.node.max_header_size,
        );
        self.set_signal(WpsSignal::Disconnect);
        Ok(())
    }

    /// Bring the link up. The PHY starts interrupting at slot boundaries.
    pub fn connect<P: WpsPhy>(&mut self, phy: &mut P) -> Result<(), WpsError> {
        match self.signal() {
            WpsSignal::NotInit => return Err(WpsError::NotInit),
            WpsSignal::Disconnect => {}
            WpsSignal::Connect | WpsSignal::Halt => return Err(WpsError::AlreadyConnected),
        }

        self.set_signal(WpsSignal::Connect);
        for conn in self.node.connections.iter_mut() {
            conn.first_tx_after_connect = true;
        }
        self.mac.reset();
        phy.connect();
        Ok(())
    }

    /// Bring the link down.
    ///
    /// Ordinarily this posts a request the MAC services at the next slot
    /// boundary and waits for the transition, up to
    /// [`DISCONNECT_TIMEOUT_MS`]. A node that never synced (with fast sync
    /// enabled) skips the request queue and transitions immediately.
    pub fn disconnect<P: WpsPhy>(&mut self, phy: &mut P) -> Result<(), WpsError> {
        match self.signal() {
            WpsSignal::NotInit => return Err(WpsError::NotInit),
            WpsSignal::Disconnect => return Err(WpsError::AlreadyDisconnected),
            WpsSignal::Connect | WpsSignal::Halt => {}
        }

        if self.mac.fast_sync_enabled && !self.mac.tdma_sync.is_slave_synced() {
            phy.disconnect();
            self.set_signal(WpsSignal::Disconnect);
            return Ok(());
        }

        self.requests.post_disconnect()?;

        let scaling = C::SCALING_FACTOR;
        let timeout_ticks = DISCONNECT_TIMEOUT_MS as u64 * *scaling.denominator() as u64
            / (1000 * *scaling.numerator() as u64);
        let start = self.tick_now_u64();
        while self.signal() != WpsSignal::Disconnect {
            if self.tick_now_u64().wrapping_sub(start) > timeout_ticks {
                return Err(WpsError::DisconnectTimeout);
            }
        }
        Ok(())
    }

    /// Disconnect then reconnect.
    pub fn reset<P: WpsPhy>(&mut self, phy: &mut P) -> Result<(), WpsError> {
        if self.signal() == WpsSignal::Disconnect {
            return Err(WpsError::AlreadyDisconnected);
        }
        self.disconnect(phy)?;
        self.connect(phy)
    }

    /// Park the stack: interrupts are ignored until `resume`.
    pub fn halt(&mut self) -> Result<(), WpsError> {
        if self.signal() != WpsSignal::Connect {
            return Err(WpsError::AlreadyDisconnected);
        }
        self.set_signal(WpsSignal::Halt);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), WpsError> {
        if self.signal() != WpsSignal::Halt {
            return Err(WpsError::AlreadyConnected);
        }
        self.set_signal(WpsSignal::Connect);
        Ok(())
    }

    // --- data path ----------------------------------------------------------

    /// Reserve a TX frame slot and hand its payload region out for in-place
    /// writing. Finish with [`Self::commit`] (zero-copy) or [`Self::send`].
    pub fn get_free_slot(
        &mut self,
        handle: ConnectionHandle,
        size: u16,
    ) -> Result<&mut [u8], WpsError> {
        let header_size = {
            let conn = self.node.connection(handle);
            if conn.queue.len() >= conn.queue.max_size() {
                return Err(WpsError::QueueFull);
            }
            if conn.pending_tx.is_some() {
                return Err(WpsError::QueueFull);
            }
            conn.header_size
        };

        let node_index = self
            .node
            .free_tx_queue
            .get_free_node()
            .ok_or(WpsError::QueueFull)?;

        let frame_size = header_size as usize + size as usize + EMPTY_BYTE;
        let offset = match self.node.tx_data.allocate(frame_size) {
            Some(offset) => offset,
            None => {
                self.node.free_tx_queue.free_node(node_index);
                return Err(WpsError::NotEnoughMemory);
            }
        };

        let frame = self.node.free_tx_queue.frame_mut(node_index);
        frame.set_buffer(offset, frame_size as u16, header_size as u16);
        frame.payload_memory_size = size;
        self.node.connection_mut(handle).pending_tx = Some(node_index);

        let frame = *self.node.free_tx_queue.frame(node_index);
        Ok(&mut frame.payload_capacity_mut(self.node.tx_data.region_mut())[..size as usize])
    }

    /// Queue the reserved slot with `size` payload bytes already written
    /// in place.
    pub fn commit(&mut self, handle: ConnectionHandle, size: u16) -> Result<(), WpsError> {
        let node_index = self
            .node
            .connection_mut(handle)
            .pending_tx
            .take()
            .ok_or(WpsError::QueueEmpty)?;
        self.finish_send(handle, node_index, size, None)
    }

    /// Queue a frame. Uses the slot reserved by [`Self::get_free_slot`]
    /// when one is pending, otherwise allocates one, and writes `payload`
    /// into it.
    pub fn send(&mut self, handle: ConnectionHandle, payload: &[u8]) -> Result<(), WpsError> {
        let payload_size = self.node.connection(handle).payload_size;
        if payload.len() > payload_size as usize && payload_size != 0 {
            return Err(WpsError::WrongTxSize);
        }

        let node_index = match self.node.connection_mut(handle).pending_tx.take() {
            Some(node_index) => node_index,
            None => {
                let reserved = self.get_free_slot(handle, payload.len() as u16)?;
                let _ = reserved;
                self.node
                    .connection_mut(handle)
                    .pending_tx
                    .take()
                    .ok_or(WpsError::QueueFull)?
            }
        };
        self.finish_send(handle, node_index, payload.len() as u16, Some(payload))
    }

    fn finish_send(
        &mut self,
        handle: ConnectionHandle,
        node_index: u16,
        size: u16,
        payload: Option<&[u8]>,
    ) -> Result<(), WpsError> {
        let now = self.tick_now();
        {
            let frame = self.node.free_tx_queue.frame_mut(node_index);
            if size > frame.buffer_len - frame.header_size - EMPTY_BYTE as u16 {
                let frame = *self.node.free_tx_queue.frame(node_index);
                self.node.tx_data.free(frame.buffer_offset, frame.buffer_len as usize);
                self.node.free_tx_queue.free_node(node_index);
                return Err(WpsError::WrongTxSize);
            }
            frame.payload_end = frame.payload_begin + size;
            frame.retry_count = 0;
            frame.time_stamp = now;
            frame.user_payload = true;
        }
        if let Some(payload) = payload {
            let frame = *self.node.free_tx_queue.frame(node_index);
            frame
                .payload_mut(self.node.tx_data.region_mut())
                .copy_from_slice(payload);
        }

        let conn = &mut self.node.connections[handle.index()];
        if !conn.queue.enqueue(&mut self.node.free_tx_queue, node_index) {
            let frame = *self.node.free_tx_queue.frame(node_index);
            self.node.tx_data.free(frame.buffer_offset, frame.buffer_len as usize);
            self.node.free_tx_queue.free_node(node_index);
            return Err(WpsError::QueueFull);
        }
        Ok(())
    }

    /// Borrow the payload of the oldest received frame.
    pub fn read(&self, handle: ConnectionHandle) -> Result<&[u8], WpsError> {
        let conn = self.node.connection(handle);
        let node_index = conn.queue.front().ok_or(WpsError::QueueEmpty)?;
        let frame = self.node.free_rx_queue.frame(node_index);
        Ok(frame.payload(self.node.rx_storage))
    }

    /// Size of the oldest received frame's payload.
    pub fn get_read_payload_size(&self, handle: ConnectionHandle) -> Result<u16, WpsError> {
        let conn = self.node.connection(handle);
        let node_index = conn.queue.front().ok_or(WpsError::QueueEmpty)?;
        Ok(self.node.free_rx_queue.frame(node_index).payload_len() as u16)
    }

    /// Release the oldest received frame.
    pub fn read_done(&mut self, handle: ConnectionHandle) -> Result<(), WpsError> {
        let conn = &mut self.node.connections[handle.index()];
        let node_index = conn
            .queue
            .dequeue(&mut self.node.free_rx_queue)
            .ok_or(WpsError::QueueEmpty)?;
        self.node.free_rx_queue.free_node(node_index);
        Ok(())
    }

    /// Copy the oldest received frame out and release it.
    pub fn read_to_buffer(
        &mut self,
        handle: ConnectionHandle,
        payload: &mut [u8],
    ) -> Result<usize, WpsError> {
        let size = {
            let data = self.read(handle)?;
            if data.len() > payload.len() {
                return Err(WpsError::WrongRxSize);
            }
            payload[..data.len()].copy_from_slice(data);
            data.len()
        };
        self.read_done(handle)?;
        Ok(size)
    }

    pub fn get_fifo_size(&self, handle: ConnectionHandle) -> u16 {
        self.node.connection(handle).queue.len()
    }

    pub fn get_fifo_free_space(&self, handle: ConnectionHandle) -> u16 {
        self.node.connection(handle).queue.free_space()
    }

    // --- ranging ------------------------------------------------------------

    /// Borrow the completed ranging sample batch.
    pub fn read_phase(
        &self,
        handle: ConnectionHandle,
    ) -> Result<&[crate::link::phase::PhasePair], WpsError> {
        let metrics = self.node.connection(handle).link_phase.metrics();
        if metrics.is_empty() {
            return Err(WpsError::QueueEmpty);
        }
        Ok(metrics)
    }

    /// Release the completed ranging sample batch.
    pub fn read_phase_done(&mut self, handle: ConnectionHandle) -> Result<(), WpsError> {
        if !self.node.connection_mut(handle).link_phase.done() {
            return Err(WpsError::QueueEmpty);
        }
        Ok(())
    }

    // --- throttle -----------------------------------------------------------

    /// Request a new active ratio (percent of this connection's slots that
    /// carry traffic). Takes effect between slots.
    pub fn set_active_ratio(
        &mut self,
        handle: ConnectionHandle,
        ratio_percent: u8,
    ) -> Result<(), WpsError> {
        let mut pattern = [false; PATTERN_THROTTLE_GRANULARITY];
        let total = generate_active_pattern(&mut pattern, ratio_percent.min(100));
        self.requests.post_schedule_ratio(ScheduleRatioCfg {
            target: handle,
            active_ratio: ratio_percent.min(100),
            pattern,
            pattern_total_count: total,
        })
    }

    // --- registers ----------------------------------------------------------

    pub fn request_write_register(
        &mut self,
        target_register: u8,
        data: u16,
        cfg: RegWriteCfg,
    ) -> Result<(), WpsError> {
        self.requests.post_write_register(WriteRequest { target_register, data, cfg })
    }

    pub fn request_read_register(&mut self, target_register: u8) -> Result<(), WpsError> {
        self.requests.post_read_register(ReadRequest { target_register })
    }

    /// Collect a completed register read, if any.
    pub fn read_register_result(&mut self) -> Option<ReadRegisterResult> {
        self.requests.pop_read_result()
    }

    /// Cancel a periodic register write armed with
    /// [`Self::request_write_register`].
    pub fn clear_write_register<P: WpsPhy>(&mut self, phy: &mut P) {
        phy.clear_write_register();
    }

    // --- stats & status -----------------------------------------------------

    pub fn connection_stats(&self, handle: ConnectionHandle) -> &ConnectionStats {
        &self.node.connection(handle).stats
    }

    pub fn get_phy_total_cca_events(&self, handle: ConnectionHandle) -> u32 {
        self.node.connection(handle).stats.total_cca_events
    }

    pub fn get_phy_total_cca_fail_count(&self, handle: ConnectionHandle) -> u32 {
        self.node.connection(handle).stats.total_cca_fail_count
    }

    pub fn get_phy_total_cca_tx_fail_count(&self, handle: ConnectionHandle) -> u32 {
        self.node.connection(handle).stats.total_cca_tx_fail_count
    }

    pub fn get_phy_total_pkt_dropped(&self, handle: ConnectionHandle) -> u32 {
        self.node.connection(handle).stats.total_pkt_dropped
    }

    pub fn get_connect_status(&self, handle: ConnectionHandle) -> bool {
        self.node.connection(handle).connect_status.is_connected()
    }

    pub fn get_error(&mut self, handle: ConnectionHandle) -> Option<WpsError> {
        self.node.connection_mut(handle).take_error()
    }

    // --- execution contexts -------------------------------------------------

    /// Radio interrupt entry point.
    pub fn phy_callback<P: WpsPhy>(&mut self, phy: &mut P) {
        match self.signal() {
            WpsSignal::Connect => {
                let now = self.tick_now();
                let outcome = self.mac.process(&mut self.node, &mut self.requests, phy, now);
                if outcome == MacProcessOutcome::Disconnected {
                    self.set_signal(WpsSignal::Disconnect);
                }
            }
            WpsSignal::NotInit | WpsSignal::Disconnect | WpsSignal::Halt => {}
        }
    }

    /// Callback worker entry point: folds staged statistics and delivers
    /// every deferred event to `handler`.
    pub fn process_callback<F: FnMut(WpsEvent)>(&mut self, mut handler: F) {
        self.mac.stats_staging.process(&mut self.node.connections);
        while let Some(event) = self.mac.callback_queue.pop_front() {
            handler(event);
        }
    }
}
