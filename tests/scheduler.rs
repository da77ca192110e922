use wps::scheduler::{Scheduler, SlotEntry, TimeSlot};
use wps::ConnectionHandle;

fn entry(connection: ConnectionHandle, source_address: u16) -> SlotEntry {
    SlotEntry { connection, source_address }
}

fn handle(i: u8) -> ConnectionHandle {
    ConnectionHandle::from_index(i)
}

#[test]
fn empty_schedule_does_not_advance() {
    let mut slots = [TimeSlot::default(); 4];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);

    assert_eq!(scheduler.increment_time_slot(), 0);
    assert_eq!(scheduler.sleep_time(), 0);
}

#[test]
fn advance_skips_slots_without_main_connection() {
    let mut slots = [TimeSlot::default(); 4];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[100, 200, 300, 400]));

    // Only slots 0 and 2 are populated.
    scheduler.attach_main(0, entry(handle(0), 0x01), 0).unwrap();
    scheduler.attach_main(2, entry(handle(1), 0x02), 0).unwrap();

    scheduler.reset_sleep_time();
    let inc = scheduler.increment_time_slot();
    // 0 -> 1 (empty) -> 2
    assert_eq!(inc, 2);
    assert_eq!(scheduler.next_timeslot_index(), 2);
    assert_eq!(scheduler.sleep_time(), 100 + 200);

    scheduler.reset_sleep_time();
    let inc = scheduler.increment_time_slot();
    // 2 -> 3 (empty) -> 0
    assert_eq!(inc, 2);
    assert_eq!(scheduler.next_timeslot_index(), 0);
    assert_eq!(scheduler.sleep_time(), 300 + 400);
}

#[test]
fn full_traversal_sums_every_duration() {
    let mut slots = [TimeSlot::default(); 4];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[10, 20, 30, 40]));
    for i in 0..4 {
        scheduler.attach_main(i, entry(handle(i as u8), 0x01), 0).unwrap();
    }

    scheduler.reset_sleep_time();
    let mut total_inc = 0;
    let start = scheduler.next_timeslot_index();
    loop {
        total_inc += scheduler.increment_time_slot();
        if scheduler.next_timeslot_index() == start {
            break;
        }
    }
    assert_eq!(total_inc, 4);
    assert_eq!(scheduler.sleep_time(), 10 + 20 + 30 + 40);
}

#[test]
fn tx_disabled_skips_local_source_slots() {
    let mut slots = [TimeSlot::default(); 2];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[100, 200]));
    // Slot 0 transmits from the local node, slot 1 from the peer.
    scheduler.attach_main(0, entry(handle(0), 0x01), 0).unwrap();
    scheduler.attach_main(1, entry(handle(1), 0x02), 0).unwrap();

    scheduler.disable_tx();
    scheduler.set_time_slot_i(1);
    scheduler.reset_sleep_time();
    let inc = scheduler.increment_time_slot();
    // 1 -> 0 (local TX, skipped) -> 1
    assert_eq!(inc, 2);
    assert_eq!(scheduler.next_timeslot_index(), 1);
    assert_eq!(scheduler.sleep_time(), 200 + 100);
}

#[test]
fn single_slot_schedule_with_tx_disabled_terminates() {
    let mut slots = [TimeSlot::default(); 1];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[500]));
    scheduler.attach_main(0, entry(handle(0), 0x01), 0).unwrap();
    scheduler.disable_tx();

    scheduler.reset_sleep_time();
    let inc = scheduler.increment_time_slot();
    assert_eq!(inc, 1);
    assert_eq!(scheduler.sleep_time(), 500);
    assert_eq!(scheduler.next_timeslot_index(), 0);
}

#[test]
fn set_first_time_slot_biases_to_last_index() {
    let mut slots = [TimeSlot::default(); 3];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[10, 10, 10]));
    for i in 0..3 {
        scheduler.attach_main(i, entry(handle(i as u8), 0x01), 0).unwrap();
    }

    scheduler.set_first_time_slot();
    assert_eq!(scheduler.next_timeslot_index(), 2);
    scheduler.increment_time_slot();
    assert_eq!(scheduler.next_timeslot_index(), 0);
}

#[test]
fn set_first_time_slot_is_a_no_op_for_single_slot() {
    let mut slots = [TimeSlot::default(); 1];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[10]));
    scheduler.attach_main(0, entry(handle(0), 0x01), 0).unwrap();

    scheduler.set_first_time_slot();
    assert_eq!(scheduler.next_timeslot_index(), 0);
}

#[test]
fn previous_timeslot_requires_a_configured_schedule() {
    let mut slots = [TimeSlot::default(); 3];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);

    // Nothing to look back at before the schedule exists.
    assert!(scheduler.previous_timeslot().is_none());

    assert!(scheduler.configure(&[10, 20, 30]));
    for i in 0..3 {
        scheduler.attach_main(i, entry(handle(i as u8), 0x01), 0).unwrap();
    }

    // Cursor at 0 wraps back to the last slot.
    assert_eq!(scheduler.previous_timeslot().unwrap().duration_pll_cycles, 30);
    scheduler.increment_time_slot();
    assert_eq!(scheduler.next_timeslot_index(), 1);
    assert_eq!(scheduler.previous_timeslot().unwrap().duration_pll_cycles, 10);
}

#[test]
fn mismatch_flag_is_cleared_by_advance() {
    let mut slots = [TimeSlot::default(); 2];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[10, 10]));
    scheduler.attach_main(0, entry(handle(0), 0x01), 0).unwrap();
    scheduler.attach_main(1, entry(handle(1), 0x01), 0).unwrap();

    scheduler.set_mismatch();
    assert!(scheduler.mismatch());
    scheduler.increment_time_slot();
    assert!(!scheduler.mismatch());
}

#[test]
fn slot_connection_table_is_bounded() {
    let mut slots = [TimeSlot::default(); 1];
    let mut scheduler = Scheduler::new(&mut slots);
    scheduler.init(0x01);
    assert!(scheduler.configure(&[10]));

    for i in 0..wps::parameters::MAX_CONN_PER_TIMESLOT {
        assert!(scheduler.attach_main(0, entry(handle(i as u8), 0x01), 0).is_some());
    }
    assert!(scheduler.attach_main(0, entry(handle(7), 0x01), 0).is_none());
}
