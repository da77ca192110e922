//! Per-slot connection arbitration.
//!
//! A slot may carry several main connections and several auto-reply
//! connections with per-slot priorities (lower value wins). Without credit
//! flow control, the highest-priority connection with pending data takes
//! the slot. With it, a starved connection yields to lower priorities for a
//! bounded number of frames, after which it is forced through anyway to
//! probe the peer (the credit refresh rides on the acknowledge it
//! provokes). Auto-reply selection instead ages every connection and picks
//! the one that has waited the longest for a credit notification.

use crate::connection::Connection;
use crate::parameters::{
    CREDIT_FLOW_CTRL_SKIPPED_FRAMES_THRESHOLD, MAX_CONN_PER_TIMESLOT, MAX_CONN_PRIORITY,
    NOTIFY_MISSED_CREDITS_HIGH_CONN_EXTRA_POINTS,
};
use crate::scheduler::TimeSlot;

fn slot_conn_index(slot: &TimeSlot, i: usize) -> usize {
    slot.connection_main[i]
        .map(|e| e.connection.index())
        .unwrap_or(0)
}

fn slot_auto_index(slot: &TimeSlot, i: usize) -> usize {
    slot.connection_auto[i]
        .map(|e| e.connection.index())
        .unwrap_or(0)
}

/// Index (into the slot's main table) of the highest-priority enabled
/// connection with pending data. Defaults to 0.
fn highest_by_priority(
    connections: &[Connection],
    slot: &TimeSlot,
    priorities: &[u8; MAX_CONN_PER_TIMESLOT],
    count: u8,
    auto_table: bool,
) -> u8 {
    let mut min_prio = MAX_CONN_PRIORITY + 1;
    let mut min_index = 0;

    for i in 0..count as usize {
        let conn = if auto_table {
            &connections[slot_auto_index(slot, i)]
        } else {
            &connections[slot_conn_index(slot, i)]
        };
        let has_data = conn.currently_enabled && conn.queue.front().is_some();
        if has_data && priorities[i] < min_prio {
            min_prio = priorities[i];
            min_index = i as u8;
            if min_prio == 0 {
                break;
            }
        }
    }

    min_index
}

/// Pick the main connection for a TX slot.
pub fn highest_main_conn_index(connections: &mut [Connection], slot: &TimeSlot) -> u8 {
    let count = slot.main_connection_count;
    if count == 0 {
        return 0;
    }

    let first = slot_conn_index(slot, 0);
    if !connections[first].credit_flow_ctrl.enabled {
        return highest_by_priority(
            connections,
            slot,
            &slot.connection_main_priority,
            count,
            false,
        );
    }

    let mut priorities = slot.connection_main_priority;
    // Walk candidates best-first, skipping starved connections until one
    // with credits (or one past its skip budget) is found.
    for _depth in 0..count {
        let candidate = highest_by_priority(connections, slot, &priorities, count, false);
        let conn = &mut connections[slot_conn_index(slot, candidate as usize)];

        if conn.credit_flow_ctrl.credits_count > 0 {
            return candidate;
        }
        if conn.credit_flow_ctrl.skipped_frames_count >= CREDIT_FLOW_CTRL_SKIPPED_FRAMES_THRESHOLD {
            return candidate;
        }
        conn.credit_flow_ctrl.skipped_frames_count =
            conn.credit_flow_ctrl.skipped_frames_count.saturating_add(1);
        // Take this candidate out of the running and retry.
        priorities[candidate as usize] = MAX_CONN_PRIORITY + 1;
    }

    // Everyone is starved and inside their skip budget: fall back to plain
    // priority order.
    highest_by_priority(
        connections,
        slot,
        &slot.connection_main_priority,
        count,
        false,
    )
}

/// Pick the auto-reply connection for a slot.
pub fn highest_auto_conn_index(connections: &mut [Connection], slot: &TimeSlot) -> u8 {
    let count = slot.auto_connection_count;
    if count == 0 {
        return 0;
    }

    let first = slot_auto_index(slot, 0);
    if !connections[first].credit_flow_ctrl.enabled {
        return highest_by_priority(
            connections,
            slot,
            &slot.connection_auto_priority,
            count,
            true,
        );
    }

    let high_priority = highest_by_priority(
        connections,
        slot,
        &slot.connection_auto_priority,
        count,
        true,
    );

    for i in 0..count as usize {
        let conn = &mut connections[slot_auto_index(slot, i)];
        if conn.currently_enabled {
            conn.credit_flow_ctrl.notify_missed_credits_count =
                conn.credit_flow_ctrl.notify_missed_credits_count.saturating_add(1);
        }
    }

    // The best-priority connection only gets its bonus when it actually has
    // something to transmit.
    {
        let conn = &mut connections[slot_auto_index(slot, high_priority as usize)];
        if conn.queue.front().is_some() {
            conn.credit_flow_ctrl.notify_missed_credits_count = conn
                .credit_flow_ctrl
                .notify_missed_credits_count
                .saturating_add(NOTIFY_MISSED_CREDITS_HIGH_CONN_EXTRA_POINTS);
        }
    }

    let mut max_notify = 0;
    let mut high_notify = 0;
    for i in 0..count as usize {
        let conn = &connections[slot_auto_index(slot, i)];
        if conn.currently_enabled
            && conn.credit_flow_ctrl.notify_missed_credits_count > max_notify
        {
            max_notify = conn.credit_flow_ctrl.notify_missed_credits_count;
            high_notify = i as u8;
        }
    }

    high_notify
}
