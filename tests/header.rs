use wps::protocol::{
    ack_header_size, main_header_size, HeaderCfg, LinkProtocol, ProtoId, RangingMode, TimeslotSaw,
};

#[test]
fn timeslot_saw_packs_sequence_bit_into_bit_7() {
    let ts = TimeslotSaw::new().with_time_slot_id(5).with_seq_num(true);
    assert_eq!(&ts.into_bytes()[..], hex::decode("85").unwrap());

    let ts = TimeslotSaw::new().with_time_slot_id(0x7F).with_seq_num(false);
    assert_eq!(&ts.into_bytes()[..], hex::decode("7f").unwrap());

    let ts = TimeslotSaw::from_bytes([0xC2]);
    assert!(ts.seq_num());
    assert_eq!(ts.time_slot_id(), 0x42);
}

#[test]
fn minimal_main_header_is_timeslot_and_channel() {
    let cfg = HeaderCfg { main_connection: true, ..Default::default() };
    let plan = LinkProtocol::for_main_frame(cfg);

    assert_eq!(plan.size(), 2);
    assert_eq!(plan.offset_of(ProtoId::TimeslotSaw), Some(0));
    assert_eq!(plan.offset_of(ProtoId::ChannelIndex), Some(1));
    assert_eq!(plan.offset_of(ProtoId::CreditFc), None);
}

#[test]
fn full_main_header_layout_is_stable() {
    let cfg = HeaderCfg {
        main_connection: true,
        rdo_enabled: true,
        connection_id: true,
        credit_fc_enabled: true,
        ranging_mode: RangingMode::InitiatorRx,
    };
    let plan = LinkProtocol::for_main_frame(cfg);

    // timeslot_saw | channel | rdo(2) | phases(5) | conn_id | credit
    assert_eq!(plan.size(), 11);
    assert_eq!(plan.offset_of(ProtoId::TimeslotSaw), Some(0));
    assert_eq!(plan.offset_of(ProtoId::ChannelIndex), Some(1));
    assert_eq!(plan.offset_of(ProtoId::Rdo), Some(2));
    assert_eq!(plan.offset_of(ProtoId::RangingInitiator), Some(4));
    assert_eq!(plan.offset_of(ProtoId::ConnectionId), Some(9));
    assert_eq!(plan.offset_of(ProtoId::CreditFc), Some(10));
    assert_eq!(main_header_size(cfg), 11);
}

#[test]
fn ranging_direction_selects_field_size_and_direction() {
    let tx_count = LinkProtocol::for_main_frame(HeaderCfg {
        main_connection: true,
        ranging_mode: RangingMode::StandaloneInitiator,
        ..Default::default()
    });
    let entry = tx_count
        .entries()
        .iter()
        .find(|e| e.id == ProtoId::RangingInitiator)
        .unwrap();
    assert_eq!(entry.size, 1);
    assert!(entry.tx);
    assert!(!entry.rx);

    let rx_phases = LinkProtocol::for_main_frame(HeaderCfg {
        main_connection: true,
        ranging_mode: RangingMode::InitiatorRx,
        ..Default::default()
    });
    let entry = rx_phases
        .entries()
        .iter()
        .find(|e| e.id == ProtoId::RangingInitiator)
        .unwrap();
    assert_eq!(entry.size, 5);
    assert!(!entry.tx);
    assert!(entry.rx);
}

#[test]
fn ack_header_omits_timeslot_and_channel_fields() {
    let cfg = HeaderCfg {
        main_connection: true,
        rdo_enabled: true,
        connection_id: true,
        credit_fc_enabled: true,
        ranging_mode: RangingMode::None,
    };
    let plan = LinkProtocol::for_ack_frame(cfg);

    assert_eq!(plan.offset_of(ProtoId::TimeslotSaw), None);
    assert_eq!(plan.offset_of(ProtoId::ChannelIndex), None);
    // rdo(2) | conn_id | credit
    assert_eq!(plan.size(), 4);
    assert_eq!(ack_header_size(cfg), 4);
}

#[test]
fn standalone_ranging_rides_phases_on_the_ack() {
    let cfg = HeaderCfg {
        main_connection: true,
        ranging_mode: RangingMode::StandaloneResponder,
        ..Default::default()
    };
    let plan = LinkProtocol::for_ack_frame(cfg);
    let entry = plan
        .entries()
        .iter()
        .find(|e| e.id == ProtoId::RangingResponder)
        .unwrap();
    assert_eq!(entry.size, 5);
    assert!(entry.tx);
}

#[test]
fn header_size_is_the_sum_of_registered_fields() {
    let cfg = HeaderCfg {
        main_connection: true,
        rdo_enabled: true,
        connection_id: false,
        credit_fc_enabled: true,
        ranging_mode: RangingMode::None,
    };
    let plan = LinkProtocol::for_main_frame(cfg);
    let total: u8 = plan.entries().iter().map(|e| e.size).sum();
    assert_eq!(plan.size(), total);
}
