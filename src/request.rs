//! Out-of-band request queues.
//!
//! The application posts slow-path operations (disconnect, register
//! access, throttle changes) here; the MAC drains at most one request per
//! slot boundary so the interrupt path stays bounded. Each request kind
//! carries its payload in a per-type sidecar ring, and register reads
//! complete into a result mailbox the application polls.

use heapless::Deque;

use crate::parameters::{
    PATTERN_THROTTLE_GRANULARITY, REQUEST_QUEUE_SIZE, SIDECAR_QUEUE_SIZE,
};
use crate::phy::RegWriteCfg;
use crate::{ConnectionHandle, WpsError};

/// Discriminant of a posted request.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    PhyDisconnect,
    WriteRegister,
    ReadRegister,
    ScheduleRatio,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest {
    pub target_register: u8,
    pub data: u16,
    pub cfg: RegWriteCfg,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    pub target_register: u8,
}

/// Completed register read, waiting for the application to pick it up.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct ReadRegisterResult {
    pub target_register: u8,
    pub value: u16,
}

/// Pre-expanded throttle pattern for one connection.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleRatioCfg {
    pub target: ConnectionHandle,
    pub active_ratio: u8,
    pub pattern: [bool; PATTERN_THROTTLE_GRANULARITY],
    pub pattern_total_count: u8,
}

/// All request plumbing of one stack instance.
///
/// Single producer (application), single consumer (MAC); the result
/// mailbox flows the other way.
#[derive(Default)]
pub struct RequestQueues {
    request_queue: Deque<RequestKind, REQUEST_QUEUE_SIZE>,
    write_requests: Deque<WriteRequest, SIDECAR_QUEUE_SIZE>,
    read_requests: Deque<ReadRequest, SIDECAR_QUEUE_SIZE>,
    schedule_ratio_cfgs: Deque<ScheduleRatioCfg, SIDECAR_QUEUE_SIZE>,
    read_results: Deque<ReadRegisterResult, SIDECAR_QUEUE_SIZE>,
}

impl RequestQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.request_queue.clear();
        self.write_requests.clear();
        self.read_requests.clear();
        self.schedule_ratio_cfgs.clear();
        self.read_results.clear();
    }

    pub fn post_disconnect(&mut self) -> Result<(), WpsError> {
        self.request_queue
            .push_back(RequestKind::PhyDisconnect)
            .map_err(|_| WpsError::RequestQueueFull)
    }

    pub fn post_write_register(&mut self, request: WriteRequest) -> Result<(), WpsError> {
        if self.write_requests.is_full() {
            return Err(WpsError::WriteRequestQueueFull);
        }
        if self.request_queue.is_full() {
            return Err(WpsError::RequestQueueFull);
        }
        // Neither push can fail past the checks above.
        let _ = self.write_requests.push_back(request);
        let _ = self.request_queue.push_back(RequestKind::WriteRegister);
        Ok(())
    }

    pub fn post_read_register(&mut self, request: ReadRequest) -> Result<(), WpsError> {
        if self.read_requests.is_full() {
            return Err(WpsError::ReadRequestQueueFull);
        }
        if self.request_queue.is_full() {
            return Err(WpsError::RequestQueueFull);
        }
        let _ = self.read_requests.push_back(request);
        let _ = self.request_queue.push_back(RequestKind::ReadRegister);
        Ok(())
    }

    pub fn post_schedule_ratio(&mut self, cfg: ScheduleRatioCfg) -> Result<(), WpsError> {
        if self.schedule_ratio_cfgs.is_full() {
            return Err(WpsError::ScheduleRatioQueueFull);
        }
        if self.request_queue.is_full() {
            return Err(WpsError::RequestQueueFull);
        }
        let _ = self.schedule_ratio_cfgs.push_back(cfg);
        let _ = self.request_queue.push_back(RequestKind::ScheduleRatio);
        Ok(())
    }

    /// Take the oldest pending request. MAC side.
    pub fn pop_request(&mut self) -> Option<RequestKind> {
        self.request_queue.pop_front()
    }

    pub fn pop_write(&mut self) -> Option<WriteRequest> {
        self.write_requests.pop_front()
    }

    pub fn pop_read(&mut self) -> Option<ReadRequest> {
        self.read_requests.pop_front()
    }

    pub fn pop_schedule_ratio(&mut self) -> Option<ScheduleRatioCfg> {
        self.schedule_ratio_cfgs.pop_front()
    }

    /// Deliver a completed register read. MAC side.
    pub fn push_read_result(&mut self, result: ReadRegisterResult) {
        if self.read_results.is_full() {
            // Oldest result gives way; the application fell behind.
            let _ = self.read_results.pop_front();
        }
        let _ = self.read_results.push_back(result);
    }

    /// Collect a completed register read. Application side.
    pub fn pop_read_result(&mut self) -> Option<ReadRegisterResult> {
        self.read_results.pop_front()
    }
}
