//! Data frame processing: EAPOL extraction, decryption and replay checks.

use log::{debug, trace, warn};

use crate::bss::BssCounter;
use crate::crypto::{self, DataCipher};
use crate::eapol::rx_eapol;
use crate::error::{CryptoError, MonitorError, Result};
use crate::ieee80211::{Header, LLC_EAPOL, STYPE_DATA_NULL_BIT};
use crate::mac::MacAddress;
use crate::monitor::Monitor;
use crate::replay::{slot_for, Direction};
use crate::station::StaCounter;

pub(crate) fn rx_data(mon: &mut Monitor, frame: &[u8]) -> Result<Option<Vec<u8>>> {
    let hdr = Header::parse(frame)?;
    let fc = hdr.fc();
    if fc.subtype() & STYPE_DATA_NULL_BIT != 0 {
        trace!("{}: null data frame", hdr.addr2());
        return Ok(None);
    }

    let (bssid, sta_addr, dir) = match (fc.to_ds(), fc.from_ds()) {
        (true, false) => (hdr.addr1(), hdr.addr2(), Direction::ToDs),
        (false, true) => (hdr.addr2(), hdr.addr1(), Direction::FromDs),
        _ => {
            // this is part of a WDS (mesh/bridging) or IBSS network; no
            // BSS state to track, so ignore it.
            debug!("{} -> {}: WDS/IBSS data frame ignored", hdr.addr2(), hdr.addr1());
            return Ok(None);
        }
    };
    let body = &frame[hdr.len()..];

    if !fc.protected() {
        let bss = mon.bss.get(bssid);
        if sta_addr.is_real_device() {
            let sta = bss.sta_get(sta_addr);
            sta.inc(StaCounter::DataUnprotected);
            if sta.ptk_set() && !body.starts_with(&LLC_EAPOL) {
                debug!("{}: unprotected data frame with PTK in place", sta_addr);
            }
        }
        if body.starts_with(&LLC_EAPOL) {
            let pmks = &mon.pmks;
            let bss = mon.bss.get(bssid);
            rx_eapol(bss, pmks, hdr.addr2(), hdr.addr1(), &body[LLC_EAPOL.len()..])?;
        }
        return Ok(None);
    }

    let plain = if sta_addr.is_multicast() {
        decrypt_group(mon, &hdr, bssid, body)?
    } else {
        decrypt_unicast(mon, &hdr, bssid, sta_addr, dir, body)?
    };

    if plain.starts_with(&LLC_EAPOL) {
        let pmks = &mon.pmks;
        let bss = mon.bss.get(bssid);
        if let Err(e) = rx_eapol(bss, pmks, hdr.addr2(), hdr.addr1(), &plain[LLC_EAPOL.len()..]) {
            debug!("{}: protected EAPOL frame: {}", sta_addr, e);
        }
    }
    Ok(Some(hdr.with_plaintext(&plain)))
}

fn decrypt_unicast(
    mon: &mut Monitor,
    hdr: &Header<'_>,
    bssid: MacAddress,
    sta_addr: MacAddress,
    dir: Direction,
    body: &[u8],
) -> Result<Vec<u8>> {
    let bss = mon
        .bss
        .find_mut(&bssid)
        .ok_or(MonitorError::UnknownBss(bssid))?;
    let bss_suite = bss.params.pairwise_cipher;
    let sta = bss
        .sta_find_mut(&sta_addr)
        .ok_or(MonitorError::UnknownStation(sta_addr))?;
    sta.inc(StaCounter::DataProtected);

    let Some(ptk) = sta.ptk() else {
        trace!("{}: no PTK for protected data frame", sta_addr);
        return Err(MonitorError::MissingKey("PTK"));
    };
    let tk = ptk.tk.clone();
    let suite = if sta.params.pairwise_cipher.is_empty() {
        bss_suite
    } else {
        sta.params.pairwise_cipher
    };
    let cipher = DataCipher::for_key(tk.as_slice(), suite)
        .ok_or(MonitorError::MissingKey("pairwise cipher"))?;

    let slot = slot_for(hdr.tid());
    let pn = cipher.get_pn(body)?;
    if let Err(e) = sta.rsc(dir).check(slot, pn) {
        warn!("{}: {:?} replay on slot {}: {}", sta_addr, dir, slot, e);
        sta.inc(StaCounter::Replay);
        return Err(e);
    }

    match cipher.decrypt(tk.as_slice(), hdr, body) {
        Ok(plain) => {
            sta.rsc_mut(dir).commit(slot, pn);
            sta.inc(StaCounter::DecryptOk);
            Ok(plain)
        }
        Err(e) => {
            if e == CryptoError::MichaelMicFailure {
                warn!("{}: Michael MIC failure", sta_addr);
                sta.inc(StaCounter::MichaelMicFailure);
            } else {
                debug!("{}: decryption failed: {}", sta_addr, e);
                sta.inc(StaCounter::DecryptFailure);
            }
            Err(e.into())
        }
    }
}

fn decrypt_group(
    mon: &mut Monitor,
    hdr: &Header<'_>,
    bssid: MacAddress,
    body: &[u8],
) -> Result<Vec<u8>> {
    let bss = mon
        .bss
        .find_mut(&bssid)
        .ok_or(MonitorError::UnknownBss(bssid))?;
    let idx = crypto::key_id(body).ok_or(CryptoError::Truncated(body.len()))?;
    let gtk = bss
        .gtk
        .get(idx)
        .map(|k| k.key.clone())
        .ok_or(MonitorError::MissingKey("GTK"))?;
    let cipher = DataCipher::for_key(gtk.as_slice(), bss.params.group_cipher)
        .ok_or(MonitorError::MissingKey("group cipher"))?;

    let pn = cipher.get_pn(body)?;
    if let Err(e) = bss.gtk.check(idx, pn) {
        warn!("{}: group replay on GTK {}: {}", bssid, idx, e);
        bss.inc(BssCounter::GroupReplay);
        return Err(e);
    }
    match cipher.decrypt(gtk.as_slice(), hdr, body) {
        Ok(plain) => {
            bss.gtk.commit(idx, pn);
            bss.inc(BssCounter::GroupDecryptOk);
            Ok(plain)
        }
        Err(e) => {
            debug!("{}: group decryption failed: {}", bssid, e);
            bss.inc(BssCounter::GroupDecryptFailure);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ccmp;
    use crate::eapol::{build_eapol_key, KeyInfo, KEY_DESC_TYPE_RSN};
    use crate::ieee80211::tests::qos_data_header;
    use crate::keys::Ptk;
    use crate::monitor::MonitorConfig;
    use crate::replay::Pn;

    const AP: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x01]);
    const STA: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x02]);

    fn monitor_with_ptk(tk: &[u8; 16]) -> Monitor {
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        let mut raw = vec![0u8; 32];
        raw.extend_from_slice(tk);
        let sta = mon.bss_get(AP).sta_get(STA);
        sta.ptk_state_mut().install(Ptk::from_bytes(&raw).unwrap());
        mon
    }

    fn protected_frame(tk: &[u8; 16], pn: u64) -> Vec<u8> {
        let mut frame = qos_data_header();
        frame.extend_from_slice(&[0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x00, 0x45, 0x00]);
        ccmp::encrypt(tk, &frame, Pn::from_u64(pn), 0).unwrap()
    }

    fn sta_counter(mon: &Monitor, c: StaCounter) -> u32 {
        mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap().counter(c)
    }

    #[test]
    fn decrypts_and_rejects_replays() {
        let tk = [0x42u8; 16];
        let mut mon = monitor_with_ptk(&tk);

        let out = mon.process(&protected_frame(&tk, 5)).unwrap();
        assert_eq!(&out[26..], &[0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x00, 0x45, 0x00]);
        assert_eq!(out[1] & 0x40, 0);

        assert!(mon.process(&protected_frame(&tk, 5)).is_none());
        assert!(mon.process(&protected_frame(&tk, 4)).is_none());
        assert!(mon.process(&protected_frame(&tk, 6)).is_some());

        assert_eq!(sta_counter(&mon, StaCounter::DecryptOk), 2);
        assert_eq!(sta_counter(&mon, StaCounter::Replay), 2);
        let sta = mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap();
        assert_eq!(sta.rsc(Direction::ToDs).get(5), Pn::from_u64(6));
        assert_eq!(sta.rsc(Direction::FromDs).get(5), Pn::ZERO);
    }

    #[test]
    fn failed_decryption_keeps_counter() {
        let tk = [0x42u8; 16];
        let mut mon = monitor_with_ptk(&tk);
        let mut frame = protected_frame(&tk, 9);
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(mon.process(&frame).is_none());
        assert_eq!(sta_counter(&mon, StaCounter::DecryptFailure), 1);
        // The genuine frame with the same PN is still accepted.
        assert!(mon.process(&protected_frame(&tk, 9)).is_some());
    }

    #[test]
    fn protected_frame_without_ptk() {
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        mon.bss_get(AP).sta_get(STA);
        assert!(mon.process(&protected_frame(&[1u8; 16], 1)).is_none());
        assert_eq!(sta_counter(&mon, StaCounter::DataProtected), 1);
    }

    #[test]
    fn group_frames_use_gtk_rsc() {
        let gtk = [0x77u8; 16];
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        mon.bss_get(AP).gtk.install(1, &gtk, Pn::from_u64(10)).unwrap();

        let mut frame = vec![0x08, 0x02, 0x00, 0x00];
        frame.extend_from_slice(MacAddress::BROADCAST.as_bytes());
        frame.extend_from_slice(AP.as_bytes());
        frame.extend_from_slice(AP.as_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&[0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x06]);

        let old = ccmp::encrypt(&gtk, &frame, Pn::from_u64(10), 1).unwrap();
        let new = ccmp::encrypt(&gtk, &frame, Pn::from_u64(11), 1).unwrap();
        assert!(mon.process(&old).is_none());
        assert!(mon.process(&new).is_some());

        let bss = mon.bss_find(&AP).unwrap();
        assert_eq!(bss.counter(BssCounter::GroupReplay), 1);
        assert_eq!(bss.counter(BssCounter::GroupDecryptOk), 1);
        assert_eq!(bss.gtk.get(1).unwrap().rsc, Pn::from_u64(11));
    }

    #[test]
    fn eapol_message_1_stores_anonce() {
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        let m1 = build_eapol_key(
            KEY_DESC_TYPE_RSN,
            KeyInfo::TYPE_PAIRWISE | KeyInfo::ACK | 2,
            16,
            1,
            &[0x5a; 32],
            Pn::ZERO,
            &[],
            None,
        )
        .unwrap();
        let mut frame = vec![0x08, 0x02, 0x00, 0x00];
        frame.extend_from_slice(STA.as_bytes());
        frame.extend_from_slice(AP.as_bytes());
        frame.extend_from_slice(AP.as_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&LLC_EAPOL);
        frame.extend_from_slice(&m1);

        mon.process(&frame);
        mon.process(&frame);
        let sta = mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap();
        assert_eq!(sta.anonce, Some([0x5a; 32]));
        assert_eq!(sta.counter(StaCounter::Retransmission), 1);
    }

    #[test]
    fn wds_frames_are_ignored() {
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        let mut frame = vec![0x08, 0x03, 0x00, 0x00];
        frame.extend_from_slice(&[0u8; 26]);
        frame.extend_from_slice(&[0xaa; 8]);
        assert!(mon.process(&frame).is_none());
        assert_eq!(mon.bss_iter().count(), 0);
    }
}
