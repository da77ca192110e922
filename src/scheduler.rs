//! TDMA schedule and slot cursor.
//!
//! The schedule is an ordered, fixed array of time slots. Each slot carries
//! up to [`MAX_CONN_PER_TIMESLOT`] main and auto-reply connections with
//! parallel priority arrays. The scheduler advances the cursor over the
//! schedule, accumulating the duration of skipped slots as sleep cycles for
//! the radio.

use crate::parameters::MAX_CONN_PER_TIMESLOT;
use crate::{Address, ConnectionHandle, SleepLevel};

/// A connection attached to a slot.
///
/// The source address is cached here so the scheduler can decide slot
/// emptiness without reaching into the connection table (a connection's
/// source address never changes after creation).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub connection: ConnectionHandle,
    pub source_address: Address,
}

/// One TDMA time slot.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct TimeSlot {
    pub connection_main: [Option<SlotEntry>; MAX_CONN_PER_TIMESLOT],
    pub connection_auto: [Option<SlotEntry>; MAX_CONN_PER_TIMESLOT],
    pub connection_main_priority: [u8; MAX_CONN_PER_TIMESLOT],
    pub connection_auto_priority: [u8; MAX_CONN_PER_TIMESLOT],
    pub main_connection_count: u8,
    pub auto_connection_count: u8,
    /// Slot duration in PLL cycles.
    pub duration_pll_cycles: u32,
    pub sleep_lvl: SleepLevel,
}

impl Default for TimeSlot {
    fn default() -> Self {
        Self {
            connection_main: [None; MAX_CONN_PER_TIMESLOT],
            connection_auto: [None; MAX_CONN_PER_TIMESLOT],
            connection_main_priority: [0; MAX_CONN_PER_TIMESLOT],
            connection_auto_priority: [0; MAX_CONN_PER_TIMESLOT],
            main_connection_count: 0,
            auto_connection_count: 0,
            duration_pll_cycles: 0,
            sleep_lvl: SleepLevel::Idle,
        }
    }
}

impl TimeSlot {
    pub fn main_connection(&self, id: u8) -> Option<ConnectionHandle> {
        self.connection_main
            .get(id as usize)
            .and_then(|e| e.map(|e| e.connection))
    }

    pub fn auto_connection(&self, id: u8) -> Option<ConnectionHandle> {
        self.connection_auto
            .get(id as usize)
            .and_then(|e| e.map(|e| e.connection))
    }
}

/// Slot cursor over the schedule.
pub struct Scheduler<'a> {
    schedule: &'a mut [TimeSlot],
    /// Number of slots actually configured (`<= schedule.len()`).
    size: usize,
    current_time_slot_num: u8,
    current_sleep_lvl: SleepLevel,
    next_sleep_lvl: SleepLevel,
    sleep_cycles: u32,
    local_addr: Address,
    tx_disabled: bool,
    timeslot_mismatch: bool,
}

impl<'a> Scheduler<'a> {
    pub fn new(schedule: &'a mut [TimeSlot]) -> Self {
        Self {
            schedule,
            size: 0,
            current_time_slot_num: 0,
            current_sleep_lvl: SleepLevel::Idle,
            next_sleep_lvl: SleepLevel::Idle,
            sleep_cycles: 0,
            local_addr: 0,
            tx_disabled: false,
            timeslot_mismatch: false,
        }
    }

    /// (Re)arm the cursor for a fresh connection cycle.
    ///
    /// The schedule itself is configured separately and survives this.
    pub fn init(&mut self, local_addr: Address) {
        self.current_time_slot_num = 0;
        self.sleep_cycles = 0;
        self.local_addr = local_addr;
        self.tx_disabled = false;
        self.timeslot_mismatch = false;
    }

    /// Tear the schedule down entirely.
    pub fn reset(&mut self) {
        for slot in self.schedule.iter_mut() {
            *slot = TimeSlot::default();
        }
        self.size = 0;
        self.current_time_slot_num = 0;
        self.sleep_cycles = 0;
        self.tx_disabled = false;
    }

    /// Configure the slot durations, fixing the schedule size.
    pub fn configure(&mut self, durations_pll_cycles: &[u32]) -> bool {
        if durations_pll_cycles.len() > self.schedule.len() {
            return false;
        }
        self.size = durations_pll_cycles.len();
        for (slot, &duration) in self.schedule.iter_mut().zip(durations_pll_cycles) {
            *slot = TimeSlot { duration_pll_cycles: duration, ..TimeSlot::default() };
        }
        true
    }

    /// Advance to the next non-empty slot, summing the duration of every
    /// slot passed over (including the one being left) into the sleep-cycle
    /// accumulator. Returns the number of increments performed.
    ///
    /// A slot is empty when it has no main connection, or when TX is
    /// disabled and the local node is the source of its first main
    /// connection. An empty schedule returns 0.
    pub fn increment_time_slot(&mut self) -> u8 {
        let mut inc_count = 0;

        self.timeslot_mismatch = false;

        if self.size != 0 {
            let mut i = self.current_time_slot_num as usize;

            self.current_sleep_lvl = self.schedule[i].sleep_lvl;
            loop {
                self.sleep_cycles = self
                    .sleep_cycles
                    .wrapping_add(self.schedule[i].duration_pll_cycles);
                i = (i + 1) % self.size;
                inc_count += 1;
                if !self.time_slot_is_empty(&self.schedule[i]) {
                    break;
                }
                if inc_count as usize >= self.size {
                    // Every slot is empty; one full traversal is enough.
                    break;
                }
            }

            self.current_time_slot_num = i as u8;
            self.next_sleep_lvl = self.schedule[i].sleep_lvl;
        }

        inc_count
    }

    fn time_slot_is_empty(&self, time_slot: &TimeSlot) -> bool {
        let first = match time_slot.connection_main[0] {
            Some(entry) => entry,
            None => return true,
        };

        self.tx_disabled && first.source_address == self.local_addr
    }

    pub fn set_time_slot_i(&mut self, time_slot_i: u8) {
        self.current_time_slot_num = time_slot_i;
    }

    /// Bias the cursor so the first advance lands on slot 0. No-op for
    /// schedules of one slot or fewer.
    pub fn set_first_time_slot(&mut self) {
        if self.size > 1 {
            self.set_time_slot_i(self.size as u8 - 1);
        }
    }

    pub fn enable_tx(&mut self) {
        self.tx_disabled = false;
    }

    pub fn disable_tx(&mut self) {
        self.tx_disabled = true;
    }

    pub fn tx_disabled(&self) -> bool {
        self.tx_disabled
    }

    pub fn current_timeslot(&self) -> &TimeSlot {
        &self.schedule[self.current_time_slot_num as usize]
    }

    /// Slot the cursor most recently left, or `None` while the schedule is
    /// unconfigured.
    pub fn previous_timeslot(&self) -> Option<&TimeSlot> {
        let previous = if self.current_time_slot_num == 0 {
            self.size.checked_sub(1)?
        } else {
            self.current_time_slot_num as usize - 1
        };
        self.schedule.get(previous)
    }

    pub fn current_main_connection(&self, id: u8) -> Option<ConnectionHandle> {
        self.current_timeslot().main_connection(id)
    }

    pub fn current_auto_connection(&self, id: u8) -> Option<ConnectionHandle> {
        self.current_timeslot().auto_connection(id)
    }

    pub fn total_timeslot_count(&self) -> usize {
        self.size
    }

    /// Index of the slot the cursor currently points at (the slot the next
    /// over-the-air exchange belongs to).
    pub fn next_timeslot_index(&self) -> u8 {
        self.current_time_slot_num
    }

    pub fn sleep_time(&self) -> u32 {
        self.sleep_cycles
    }

    /// Must be called once per traversal, before incrementing.
    pub fn reset_sleep_time(&mut self) {
        self.sleep_cycles = 0;
    }

    pub fn current_sleep_lvl(&self) -> SleepLevel {
        self.current_sleep_lvl
    }

    pub fn next_sleep_lvl(&self) -> SleepLevel {
        self.next_sleep_lvl
    }

    pub fn set_mismatch(&mut self) {
        self.timeslot_mismatch = true;
    }

    pub fn mismatch(&self) -> bool {
        self.timeslot_mismatch
    }

    /// Attach a connection to a slot's main table. Returns the position, or
    /// `None` when the slot is full.
    pub fn attach_main(
        &mut self,
        time_slot_i: usize,
        entry: SlotEntry,
        priority: u8,
    ) -> Option<usize> {
        let slot = self.schedule.get_mut(time_slot_i)?;
        let count = slot.main_connection_count as usize;
        if count >= MAX_CONN_PER_TIMESLOT {
            return None;
        }
        slot.connection_main[count] = Some(entry);
        slot.connection_main_priority[count] = priority;
        slot.main_connection_count += 1;
        Some(count)
    }

    /// Attach a connection to a slot's auto-reply table.
    pub fn attach_auto(
        &mut self,
        time_slot_i: usize,
        entry: SlotEntry,
        priority: u8,
    ) -> Option<usize> {
        let slot = self.schedule.get_mut(time_slot_i)?;
        let count = slot.auto_connection_count as usize;
        if count >= MAX_CONN_PER_TIMESLOT {
            return None;
        }
        slot.connection_auto[count] = Some(entry);
        slot.connection_auto_priority[count] = priority;
        slot.auto_connection_count += 1;
        Some(count)
    }
}
