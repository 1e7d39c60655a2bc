mod common;

use angry_monitor::crypto::ccmp;
use angry_monitor::ieee80211::Header;
use angry_monitor::replay::Pn;
use angry_monitor::{BssCounter, InjectProtection, MacAddress, MonitorError, StaCounter};

use common::*;

const PAYLOAD: [u8; 10] = [0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x00, 0x45, 0x00];

#[test]
fn injected_frames_decrypt_with_tracked_keys() {
    let mut mon = monitor();
    connect_and_handshake(&mut mon);
    let plain = data(true, &PAYLOAD);

    let mut sent: Vec<Vec<u8>> = Vec::new();
    mon.inject(&AP, Some(&STA), &plain, InjectProtection::Protected, &mut sent)
        .unwrap();
    mon.inject(&AP, Some(&STA), &plain, InjectProtection::Normal, &mut sent)
        .unwrap();
    assert_eq!(sent.len(), 2);

    let pns: Vec<Pn> = sent
        .iter()
        .map(|f| {
            let hdr = Header::parse(f).unwrap();
            assert!(hdr.fc().protected());
            ccmp::get_pn(&f[hdr.len()..]).unwrap()
        })
        .collect();
    assert!(pns[1] > pns[0]);

    // The monitor accepts its own frames as fresh traffic.
    for frame in &sent {
        assert_eq!(mon.process(frame), Some(plain.clone()));
    }
    let sta = mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap();
    assert_eq!(sta.counter(StaCounter::Injected), 2);
    assert_eq!(sta.counter(StaCounter::DecryptOk), 2);
}

#[test]
fn incorrect_key_fails_decryption() {
    let mut mon = monitor();
    connect_and_handshake(&mut mon);
    let mut sent: Vec<Vec<u8>> = Vec::new();
    mon.inject(
        &AP,
        Some(&STA),
        &data(true, &PAYLOAD),
        InjectProtection::IncorrectKey,
        &mut sent,
    )
    .unwrap();

    assert_eq!(mon.process(&sent[0]), None);
    let sta = mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap();
    assert_eq!(sta.counter(StaCounter::DecryptFailure), 1);
}

#[test]
fn group_injection_uses_gtk_above_rsc() {
    let mut mon = monitor();
    connect_and_handshake(&mut mon);
    let bcast = group_data(&PAYLOAD);

    let mut sent: Vec<Vec<u8>> = Vec::new();
    mon.inject(&AP, None, &bcast, InjectProtection::Group, &mut sent)
        .unwrap();
    let hdr = Header::parse(&sent[0]).unwrap();
    let body = &sent[0][hdr.len()..];
    assert_eq!(angry_monitor::crypto::key_id(body), Some(GTK_IDX));
    assert_eq!(ccmp::get_pn(body).unwrap(), Pn::from_u64(GTK_RSC + 1));

    assert_eq!(mon.process(&sent[0]), Some(bcast));
    let bss = mon.bss_find(&AP).unwrap();
    assert_eq!(bss.counter(BssCounter::GroupDecryptOk), 1);
}

#[test]
fn unprotected_and_keyless_injection() {
    let mut mon = monitor();
    connect(&mut mon);
    let plain = data(true, &PAYLOAD);
    let mut sent: Vec<Vec<u8>> = Vec::new();

    mon.inject(&AP, Some(&STA), &plain, InjectProtection::Normal, &mut sent)
        .unwrap();
    mon.inject(&AP, Some(&STA), &plain, InjectProtection::Unprotected, &mut sent)
        .unwrap();
    assert_eq!(sent, vec![plain.clone(), plain.clone()]);

    let err = mon.inject(&AP, Some(&STA), &plain, InjectProtection::Protected, &mut sent);
    assert!(matches!(err, Err(MonitorError::MissingKey(_))));
    assert_eq!(sent.len(), 2);
}

#[test]
fn normal_injection_without_station_goes_out_plain() {
    let mut mon = monitor();
    connect_and_handshake(&mut mon);
    let bcast = group_data(&PAYLOAD);
    let mut sent: Vec<Vec<u8>> = Vec::new();

    mon.inject(&AP, None, &bcast, InjectProtection::Normal, &mut sent)
        .unwrap();
    assert_eq!(sent, vec![bcast.clone()]);
    assert!(matches!(
        mon.inject(&AP, None, &bcast, InjectProtection::Protected, &mut sent),
        Err(MonitorError::MissingKey(_))
    ));
    assert_eq!(sent.len(), 1);
}

#[test]
fn unknown_peers_are_rejected() {
    let mut mon = monitor();
    mon.process(&beacon());
    let other = MacAddress([0x02, 0, 0, 0, 0, 0x99]);
    let mut sent: Vec<Vec<u8>> = Vec::new();

    assert!(matches!(
        mon.inject(&other, None, &beacon(), InjectProtection::Unprotected, &mut sent),
        Err(MonitorError::UnknownBss(_))
    ));
    assert!(matches!(
        mon.inject(&AP, Some(&other), &beacon(), InjectProtection::Normal, &mut sent),
        Err(MonitorError::UnknownStation(_))
    ));
    assert!(sent.is_empty());
}
