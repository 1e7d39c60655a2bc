#![allow(dead_code)]

use angry_monitor::crypto::keywrap::aes_wrap;
use angry_monitor::crypto::rc4::rc4_skip;
use angry_monitor::crypto::DataCipher;
use angry_monitor::eapol::{build_eapol_key, KeyInfo, KEY_DESC_TYPE_RSN, KEY_DESC_TYPE_WPA};
use angry_monitor::elements::build_rsn_ie;
use angry_monitor::ieee80211::LLC_EAPOL;
use angry_monitor::keys::Ptk;
use angry_monitor::replay::Pn;
use angry_monitor::{MacAddress, Monitor, MonitorConfig, Passphrase};

pub const AP: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x01]);
pub const STA: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x02]);
pub const HOST: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x03]);

pub const SSID: &str = "corp-net";
pub const PASSPHRASE: &str = "secret passphrase";
pub const ANONCE: [u8; 32] = [0x11; 32];
pub const SNONCE: [u8; 32] = [0x22; 32];
pub const GTK: [u8; 16] = [0x5c; 16];
pub const GTK_IDX: u8 = 1;
pub const GTK_RSC: u64 = 7;

pub const WPA_GTK: [u8; 32] = [0x6d; 32];
pub const WPA_GTK_IDX: u8 = 2;
pub const WPA_GTK_RSC: u64 = 3;

const VER1: u16 = 1;
const VER2: u16 = 2;
const CIPHER_CCMP: u8 = 4;
const AKM_PSK: u8 = 2;

pub fn monitor() -> Monitor {
    let config = MonitorConfig::default().passphrases(vec![Passphrase::new(SSID, PASSPHRASE)]);
    Monitor::new(config).unwrap()
}

pub fn rsn_ie() -> Vec<u8> {
    build_rsn_ie(CIPHER_CCMP, CIPHER_CCMP, AKM_PSK, 0)
}

pub fn mgmt(stype: u8, da: MacAddress, sa: MacAddress, body: &[u8]) -> Vec<u8> {
    let mut f = vec![stype << 4, 0x00, 0x00, 0x00];
    f.extend_from_slice(da.as_bytes());
    f.extend_from_slice(sa.as_bytes());
    f.extend_from_slice(AP.as_bytes());
    f.extend_from_slice(&[0x00, 0x00]);
    f.extend_from_slice(body);
    f
}

/// WPA vendor element: TKIP group and pairwise ciphers, PSK.
pub fn wpa_ie() -> Vec<u8> {
    vec![
        0xdd, 0x16, 0x00, 0x50, 0xf2, 0x01, 0x01, 0x00, 0x00, 0x50, 0xf2, 0x02, 0x01, 0x00,
        0x00, 0x50, 0xf2, 0x02, 0x01, 0x00, 0x00, 0x50, 0xf2, 0x02,
    ]
}

pub fn beacon() -> Vec<u8> {
    beacon_with(&rsn_ie())
}

pub fn wpa_beacon() -> Vec<u8> {
    beacon_with(&wpa_ie())
}

fn beacon_with(security_ie: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; 8];
    body.extend_from_slice(&[0x64, 0x00, 0x11, 0x04]);
    body.extend_from_slice(&[0x00, SSID.len() as u8]);
    body.extend_from_slice(SSID.as_bytes());
    body.extend_from_slice(&[0x03, 0x01, 0x06]);
    body.extend_from_slice(security_ie);
    mgmt(8, MacAddress::BROADCAST, AP, &body)
}

pub fn auth(da: MacAddress, sa: MacAddress, seq: u16) -> Vec<u8> {
    let mut body = vec![0x00, 0x00];
    body.extend_from_slice(&seq.to_le_bytes());
    body.extend_from_slice(&[0x00, 0x00]);
    mgmt(11, da, sa, &body)
}

pub fn assoc_req() -> Vec<u8> {
    assoc_req_with(&rsn_ie())
}

pub fn wpa_assoc_req() -> Vec<u8> {
    assoc_req_with(&wpa_ie())
}

fn assoc_req_with(security_ie: &[u8]) -> Vec<u8> {
    let mut body = vec![0x11, 0x04, 0x0a, 0x00];
    body.extend_from_slice(&[0x00, SSID.len() as u8]);
    body.extend_from_slice(SSID.as_bytes());
    body.extend_from_slice(security_ie);
    mgmt(0, AP, STA, &body)
}

pub fn assoc_resp() -> Vec<u8> {
    let mut body = vec![0x11, 0x04, 0x00, 0x00];
    body.extend_from_slice(&(0xc000u16 | 1).to_le_bytes());
    mgmt(1, STA, AP, &body)
}

/// Data frame between the AP and the station, unprotected.
pub fn data(from_ap: bool, payload: &[u8]) -> Vec<u8> {
    let mut f = if from_ap {
        let mut f = vec![0x08, 0x02, 0x00, 0x00];
        f.extend_from_slice(STA.as_bytes());
        f.extend_from_slice(AP.as_bytes());
        f.extend_from_slice(HOST.as_bytes());
        f
    } else {
        let mut f = vec![0x08, 0x01, 0x00, 0x00];
        f.extend_from_slice(AP.as_bytes());
        f.extend_from_slice(STA.as_bytes());
        f.extend_from_slice(HOST.as_bytes());
        f
    };
    f.extend_from_slice(&[0x00, 0x00]);
    f.extend_from_slice(payload);
    f
}

/// Broadcast data frame sent by the AP.
pub fn group_data(payload: &[u8]) -> Vec<u8> {
    let mut f = vec![0x08, 0x02, 0x00, 0x00];
    f.extend_from_slice(MacAddress::BROADCAST.as_bytes());
    f.extend_from_slice(AP.as_bytes());
    f.extend_from_slice(HOST.as_bytes());
    f.extend_from_slice(&[0x00, 0x00]);
    f.extend_from_slice(payload);
    f
}

pub fn eapol(from_ap: bool, key: &[u8]) -> Vec<u8> {
    let mut payload = LLC_EAPOL.to_vec();
    payload.extend_from_slice(key);
    data(from_ap, &payload)
}

pub fn ptk_for(passphrase: &str) -> Ptk {
    let pmk = angry_monitor::crypto::kdf::pmk_from_passphrase(passphrase, SSID.as_bytes());
    Ptk::derive(&pmk, &AP, &STA, &ANONCE, &SNONCE, false, DataCipher::Ccmp).unwrap()
}

pub fn ptk() -> Ptk {
    ptk_for(PASSPHRASE)
}

/// PTK of the WPA/TKIP handshake: 32-byte TK.
pub fn wpa_ptk() -> Ptk {
    let pmk = angry_monitor::crypto::kdf::pmk_from_passphrase(PASSPHRASE, SSID.as_bytes());
    Ptk::derive(&pmk, &AP, &STA, &ANONCE, &SNONCE, false, DataCipher::Tkip).unwrap()
}

pub fn msg1() -> Vec<u8> {
    let ki = KeyInfo::TYPE_PAIRWISE | KeyInfo::ACK | VER2;
    let key = build_eapol_key(KEY_DESC_TYPE_RSN, ki, 16, 1, &ANONCE, Pn::ZERO, &[], None).unwrap();
    eapol(true, &key)
}

pub fn msg2(ptk: &Ptk) -> Vec<u8> {
    let ki = KeyInfo::TYPE_PAIRWISE | KeyInfo::MIC | VER2;
    let key = build_eapol_key(
        KEY_DESC_TYPE_RSN,
        ki,
        0,
        1,
        &SNONCE,
        Pn::ZERO,
        &rsn_ie(),
        Some(&ptk.kck),
    )
    .unwrap();
    eapol(false, &key)
}

pub fn msg3(ptk: &Ptk) -> Vec<u8> {
    let mut plain = rsn_ie();
    plain.extend_from_slice(&[0xdd, 22, 0x00, 0x0f, 0xac, 0x01, GTK_IDX, 0x00]);
    plain.extend_from_slice(&GTK);
    plain.extend_from_slice(&[0xdd, 0x00]);
    let wrapped = aes_wrap(&ptk.kek, &plain).unwrap();

    let ki = KeyInfo::TYPE_PAIRWISE
        | KeyInfo::INSTALL
        | KeyInfo::ACK
        | KeyInfo::MIC
        | KeyInfo::SECURE
        | KeyInfo::ENCR_KEY_DATA
        | VER2;
    let key = build_eapol_key(
        KEY_DESC_TYPE_RSN,
        ki,
        16,
        2,
        &ANONCE,
        Pn::from_u64(GTK_RSC),
        &wrapped,
        Some(&ptk.kck),
    )
    .unwrap();
    eapol(true, &key)
}

pub fn msg4(ptk: &Ptk) -> Vec<u8> {
    let ki = KeyInfo::TYPE_PAIRWISE | KeyInfo::MIC | KeyInfo::SECURE | VER2;
    let key = build_eapol_key(
        KEY_DESC_TYPE_RSN,
        ki,
        0,
        2,
        &[0u8; 32],
        Pn::ZERO,
        &[],
        Some(&ptk.kck),
    )
    .unwrap();
    eapol(false, &key)
}

/// RSN group key message 1/2 delivering `gtk` in a GTK KDE.
pub fn group_msg1(ptk: &Ptk, idx: u8, gtk: &[u8], rsc: u64) -> Vec<u8> {
    let mut plain = vec![0xdd, 6 + gtk.len() as u8, 0x00, 0x0f, 0xac, 0x01, idx, 0x00];
    plain.extend_from_slice(gtk);
    plain.push(0xdd);
    while plain.len() % 8 != 0 {
        plain.push(0x00);
    }
    let wrapped = aes_wrap(&ptk.kek, &plain).unwrap();

    let ki = KeyInfo::ACK | KeyInfo::MIC | KeyInfo::SECURE | KeyInfo::ENCR_KEY_DATA | VER2;
    build_eapol_key(
        KEY_DESC_TYPE_RSN,
        ki,
        0,
        3,
        &[0u8; 32],
        Pn::from_u64(rsc),
        &wrapped,
        Some(&ptk.kck),
    )
    .unwrap()
}

pub fn group_msg2(ptk: &Ptk) -> Vec<u8> {
    let ki = KeyInfo::MIC | KeyInfo::SECURE | VER2;
    build_eapol_key(
        KEY_DESC_TYPE_RSN,
        ki,
        0,
        3,
        &[0u8; 32],
        Pn::ZERO,
        &[],
        Some(&ptk.kck),
    )
    .unwrap()
}

/// WPA 4-way handshake: descriptor 254, HMAC-MD5 MICs, WPA element in
/// messages 2 and 3.
pub fn wpa_handshake(ptk: &Ptk) -> [Vec<u8>; 4] {
    let key = |ki: u16, key_len: u16, replay: u64, nonce: &[u8; 32], data: &[u8], mic: bool| {
        let kck = if mic { Some(&ptk.kck[..]) } else { None };
        build_eapol_key(KEY_DESC_TYPE_WPA, ki | VER1, key_len, replay, nonce, Pn::ZERO, data, kck)
            .unwrap()
    };
    let pw = KeyInfo::TYPE_PAIRWISE;
    [
        eapol(true, &key(pw | KeyInfo::ACK, 32, 1, &ANONCE, &[], false)),
        eapol(false, &key(pw | KeyInfo::MIC, 0, 1, &SNONCE, &wpa_ie(), true)),
        eapol(
            true,
            &key(
                pw | KeyInfo::INSTALL | KeyInfo::ACK | KeyInfo::MIC,
                32,
                2,
                &ANONCE,
                &wpa_ie(),
                true,
            ),
        ),
        eapol(false, &key(pw | KeyInfo::MIC, 0, 2, &[0u8; 32], &[], true)),
    ]
}

/// WPA group key message 1/2: the bare GTK, RC4 encrypted with IV | KEK.
pub fn wpa_group_msg1(ptk: &Ptk, idx: u8, gtk: &[u8], rsc: u64) -> Vec<u8> {
    // build_eapol_key leaves the Key IV zeroed.
    let mut rc4_key = vec![0u8; 16];
    rc4_key.extend_from_slice(&ptk.kek);
    let mut data = gtk.to_vec();
    rc4_skip(&rc4_key, 256, &mut data);

    let ki = KeyInfo::ACK | KeyInfo::MIC | KeyInfo::SECURE | (u16::from(idx) << 4) | VER1;
    build_eapol_key(
        KEY_DESC_TYPE_WPA,
        ki,
        gtk.len() as u16,
        3,
        &[0u8; 32],
        Pn::from_u64(rsc),
        &data,
        Some(&ptk.kck),
    )
    .unwrap()
}

pub fn wpa_group_msg2(ptk: &Ptk) -> Vec<u8> {
    let ki = KeyInfo::MIC | KeyInfo::SECURE | VER1;
    build_eapol_key(
        KEY_DESC_TYPE_WPA,
        ki,
        0,
        3,
        &[0u8; 32],
        Pn::ZERO,
        &[],
        Some(&ptk.kck),
    )
    .unwrap()
}

/// Beacon, open authentication and association for the test station.
pub fn connect(mon: &mut Monitor) {
    mon.process(&beacon());
    mon.process(&auth(AP, STA, 1));
    mon.process(&auth(STA, AP, 2));
    mon.process(&assoc_req());
    mon.process(&assoc_resp());
}

/// Same as `connect` on a WPA/TKIP network, followed by the handshake.
pub fn connect_wpa_and_handshake(mon: &mut Monitor) {
    mon.process(&wpa_beacon());
    mon.process(&auth(AP, STA, 1));
    mon.process(&auth(STA, AP, 2));
    mon.process(&wpa_assoc_req());
    mon.process(&assoc_resp());
    for frame in wpa_handshake(&wpa_ptk()) {
        mon.process(&frame);
    }
}

/// Full connection including the 4-way handshake.
pub fn connect_and_handshake(mon: &mut Monitor) {
    connect(mon);
    let ptk = ptk();
    for frame in [msg1(), msg2(&ptk), msg3(&ptk), msg4(&ptk)] {
        mon.process(&frame);
    }
}
