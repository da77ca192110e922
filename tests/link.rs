use wps::link::{
    CcaFailAction, ChannelHopping, ChannelSequence, ConnectStatus, ConnectStatusCfg,
    ConnectStatusState, CreditFlowCtrl, GainLoop, LinkCca, LinkDdcm, LinkFallback, LinkPhase,
    LinkRdo, PhaseInfos, SawArq,
};
use wps::parameters::UNSYNC_TX_OFFSET_PLL_CYCLES;

// --- stop-and-wait ----------------------------------------------------------

#[test]
fn saw_seq_bit_toggles_on_ack() {
    let mut saw = SawArq::default();
    saw.init(1000, 3, false, true);

    assert!(!saw.seq_num());
    saw.increment_seq_num();
    assert!(saw.seq_num());
    saw.increment_seq_num();
    assert!(!saw.seq_num());
}

#[test]
fn saw_flags_repeated_rx_bit_as_duplicate() {
    let mut saw = SawArq::default();
    // Receiving end: the seed bit differs from the peer's first frame.
    saw.init(1000, 3, true, true);

    saw.update_rx_seq_num(false);
    assert!(!saw.is_rx_frame_duplicate());

    // Retransmission with the same bit.
    saw.update_rx_seq_num(false);
    assert!(saw.is_rx_frame_duplicate());

    // Next frame toggles.
    saw.update_rx_seq_num(true);
    assert!(!saw.is_rx_frame_duplicate());
}

#[test]
fn saw_disabled_never_flags_duplicates() {
    let mut saw = SawArq::default();
    saw.init(0, 0, false, false);

    saw.update_rx_seq_num(true);
    saw.update_rx_seq_num(true);
    assert!(!saw.is_rx_frame_duplicate());
    assert!(!saw.should_drop(0, 1_000_000, 1000));
}

#[test]
fn saw_drops_on_retry_budget_and_deadline() {
    let mut saw = SawArq::default();
    saw.init(1000, 3, false, true);

    assert!(!saw.should_drop(0, 10, 2));
    assert!(saw.should_drop(0, 10, 3));
    assert!(!saw.should_drop(0, 1000, 0));
    assert!(saw.should_drop(0, 1001, 0));
}

// --- DDCM -------------------------------------------------------------------

#[test]
fn ddcm_disabled_reports_zero_offset() {
    let mut ddcm = LinkDdcm::default();
    ddcm.init(0, 1000);
    ddcm.pll_cycles_update(500);
    ddcm.post_tx_update(3, 100, true);
    assert_eq!(ddcm.get_offset(), 0);
}

#[test]
fn ddcm_drains_target_offset_bounded_per_slot() {
    let mut ddcm = LinkDdcm::default();
    ddcm.init(16, 1_000_000);

    // Successful TX that burned 3 CCA probes at 100 cycles each:
    // target = (3 - 1) * 100 + 16 = 216.
    ddcm.pll_cycles_update(500);
    ddcm.post_tx_update(3, 100, true);
    assert_eq!(ddcm.target_offset(), 216);

    // Drained 16 cycles at a time, monotone non-increasing.
    let mut last = ddcm.target_offset();
    let mut applied = 0u32;
    while ddcm.target_offset() > 0 {
        let step = ddcm.get_offset();
        assert!(step <= 16);
        applied += step as u32;
        assert!(ddcm.target_offset() <= last);
        last = ddcm.target_offset();
    }
    assert_eq!(applied, 216);
    assert_eq!(ddcm.get_offset(), 0);
}

#[test]
fn ddcm_does_not_drift_after_a_failed_tx() {
    let mut ddcm = LinkDdcm::default();
    ddcm.init(16, 1_000_000);
    ddcm.pll_cycles_update(500);
    ddcm.post_tx_update(2, 100, true);
    ddcm.pll_cycles_update(500);
    ddcm.post_tx_update(0, 100, false);
    assert_eq!(ddcm.get_offset(), 0);
}

#[test]
fn ddcm_applies_unsync_offset_when_loss_budget_is_exhausted() {
    let mut ddcm = LinkDdcm::default();
    ddcm.init(16, 1000);

    ddcm.pll_cycles_update(600);
    ddcm.post_tx_update(0, 100, false);
    ddcm.pll_cycles_update(600);
    ddcm.post_tx_update(0, 100, false);
    assert!(ddcm.sync_loss_duration_pll() >= 1000);

    assert_eq!(ddcm.get_offset(), UNSYNC_TX_OFFSET_PLL_CYCLES);
    // The budget resets once the unsync offset fires.
    assert_eq!(ddcm.sync_loss_duration_pll(), 0);
}

#[test]
fn ddcm_successful_tx_pays_down_the_loss_budget() {
    let mut ddcm = LinkDdcm::default();
    ddcm.init(16, 10_000);

    ddcm.pll_cycles_update(600);
    ddcm.post_tx_update(0, 100, false);
    assert_eq!(ddcm.sync_loss_duration_pll(), 600);

    ddcm.pll_cycles_update(400);
    ddcm.post_tx_update(0, 100, true);
    assert_eq!(ddcm.sync_loss_duration_pll(), 200);

    ddcm.pll_cycles_update(400);
    ddcm.post_tx_update(0, 100, true);
    assert_eq!(ddcm.sync_loss_duration_pll(), 0);
}

// --- RDO --------------------------------------------------------------------

#[test]
fn rdo_counter_wraps_at_rollover() {
    let mut rdo = LinkRdo::default();
    rdo.init(10, 3);
    rdo.enable();

    let mut seen = Vec::new();
    for _ in 0..5 {
        rdo.update();
        seen.push(rdo.offset());
    }
    assert_eq!(seen, vec![3, 6, 9, 2, 5]);
}

#[test]
fn rdo_offset_round_trips_through_the_header_field() {
    let mut tx = LinkRdo::default();
    tx.init(500, 7);
    tx.enable();
    tx.update();

    let mut field = [0u8; 2];
    tx.send_offset(&mut field);

    let mut rx = LinkRdo::default();
    rx.init(500, 7);
    rx.enable();
    rx.set_offset(&field);
    assert_eq!(rx.offset(), tx.offset());
}

#[test]
fn rdo_disabled_reports_zero() {
    let mut rdo = LinkRdo::default();
    rdo.init(10, 3);
    rdo.update();
    assert_eq!(rdo.offset(), 0);
}

// --- CCA --------------------------------------------------------------------

#[test]
fn cca_zero_try_budget_is_disabled() {
    let mut cca = LinkCca::default();
    cca.init(40, 100, 16, 0, CcaFailAction::AbortTx, true);
    assert!(!cca.enabled());
}

#[test]
fn cca_classifies_a_burned_budget() {
    let mut cca = LinkCca::default();
    cca.init(40, 100, 16, 4, CcaFailAction::AbortTx, true);
    assert!(cca.enabled());
    assert!(!cca.all_probes_failed(3));
    assert!(cca.all_probes_failed(4));
}

// --- fallback ---------------------------------------------------------------

#[test]
fn fallback_selects_channel_set_from_rssi_thresholds() {
    let mut fallback = LinkFallback::default();
    fallback.init(&[0x60, 0xA0]);

    fallback.update(0x10);
    assert_eq!(fallback.channel_set_index(), 0);
    fallback.update(0x70);
    assert_eq!(fallback.channel_set_index(), 1);
    fallback.update(0xB0);
    assert_eq!(fallback.channel_set_index(), 2);
}

#[test]
fn fallback_disabled_stays_on_primary() {
    let mut fallback = LinkFallback::default();
    fallback.init(&[]);
    fallback.update(0xFF);
    assert_eq!(fallback.channel_set_index(), 0);
}

// --- credit flow control ----------------------------------------------------

#[test]
fn credits_are_consumed_and_refreshed() {
    let mut credit = CreditFlowCtrl::default();
    credit.init(true, 2);

    assert!(credit.has_credits());
    credit.consume();
    credit.consume();
    assert!(!credit.has_credits());

    credit.set_credits(5);
    assert!(credit.has_credits());
    assert_eq!(credit.credits_count, 5);
}

#[test]
fn disabled_credit_flow_always_has_credits() {
    let mut credit = CreditFlowCtrl::default();
    credit.init(false, 0);
    assert!(credit.has_credits());
}

// --- connect status ---------------------------------------------------------

#[test]
fn connect_status_debounces_both_transitions() {
    let mut status = ConnectStatus::default();
    status.init(ConnectStatusCfg { connect_count: 2, disconnect_count: 3 });

    assert_eq!(status.update(true), None);
    assert_eq!(status.update(true), Some(ConnectStatusState::Connected));
    assert!(status.is_connected());

    assert_eq!(status.update(false), None);
    assert_eq!(status.update(false), None);
    assert_eq!(status.update(false), Some(ConnectStatusState::Disconnected));
    assert!(!status.is_connected());

    // A single loss does not reset an established link.
    status.update(true);
    status.update(true);
    assert!(status.is_connected());
    status.update(false);
    assert!(status.is_connected());
}

// --- gain loop --------------------------------------------------------------

#[test]
fn gain_loop_tracks_within_bounds() {
    let mut gain = GainLoop::default();
    gain.init(false, 0);

    for _ in 0..20 {
        gain.update(0xF0);
    }
    let high = gain.gain_index();
    assert!(high > 0);

    for _ in 0..20 {
        gain.update(0x10);
    }
    assert_eq!(gain.gain_index(), 0);
}

#[test]
fn fixed_gain_ignores_measurements() {
    let mut gain = GainLoop::default();
    gain.init(true, 3);
    gain.update(0xF0);
    gain.update(0xF0);
    assert_eq!(gain.gain_index(), 3);
}

// --- ranging phase buffer ---------------------------------------------------

#[test]
fn phase_batch_completes_at_the_requested_size() {
    let mut phase = LinkPhase::default();
    phase.init(2);

    let local = PhaseInfos { phase1: 1, ..Default::default() };
    let remote = PhaseInfos { phase1: 2, ..Default::default() };

    assert!(!phase.add_data(local, remote));
    assert!(phase.metrics().is_empty());
    assert!(phase.add_data(local, remote));
    assert_eq!(phase.metrics().len(), 2);

    assert!(phase.done());
    assert!(phase.metrics().is_empty());
    assert!(!phase.done());
}

// --- channel hopping --------------------------------------------------------

#[test]
fn channel_sequence_counts_unique_channels() {
    assert_eq!(ChannelSequence::new(&[0, 1, 2, 1, 0]).channel_number, 3);
    assert_eq!(ChannelSequence::new(&[0, 0, 0]).channel_number, 1);
    assert_eq!(ChannelSequence::new(&[4]).channel_number, 1);
}

#[test]
fn sequential_hopping_walks_the_sequence() {
    let sequence = ChannelSequence::new(&[3, 1, 4]);
    let mut hopping = ChannelHopping::new(sequence, false, 0);

    assert_eq!(hopping.current_channel(), 3);
    hopping.increment_index();
    assert_eq!(hopping.current_channel(), 1);
    hopping.increment_index();
    assert_eq!(hopping.current_channel(), 4);
    hopping.increment_index();
    assert_eq!(hopping.current_channel(), 3);
}

#[test]
fn random_hopping_is_identical_on_both_ends() {
    let sequence = ChannelSequence::new(&[0, 1, 2, 3, 4, 5, 6, 7]);
    let mut a = ChannelHopping::new(sequence, true, 0x2A);
    let mut b = ChannelHopping::new(sequence, true, 0x2A);

    for _ in 0..64 {
        a.increment_index();
        b.increment_index();
        assert_eq!(a.seq_index(), b.seq_index());
    }
}

#[test]
fn random_hopping_never_repeats_an_index_back_to_back() {
    let sequence = ChannelSequence::new(&[0, 1, 2, 3, 4]);
    let mut hopping = ChannelHopping::new(sequence, true, 7);

    let mut previous = hopping.seq_index();
    for _ in 0..64 {
        hopping.increment_index();
        assert_ne!(hopping.seq_index(), previous);
        previous = hopping.seq_index();
    }
}

#[test]
fn rx_resync_adopts_in_range_indices_only() {
    let sequence = ChannelSequence::new(&[0, 1, 2]);
    let mut hopping = ChannelHopping::new(sequence, false, 0);

    hopping.set_seq_index(2);
    assert_eq!(hopping.seq_index(), 2);
    hopping.set_seq_index(9);
    assert_eq!(hopping.seq_index(), 2);
}
