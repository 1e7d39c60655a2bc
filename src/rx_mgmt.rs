//! Management frame processing.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::bss::{Bss, BssCounter};
use crate::crypto::{bip, DataCipher};
use crate::elements::parse_elements;
use crate::error::{MonitorError, ParseError, Result};
use crate::ieee80211::*;
use crate::mac::MacAddress;
use crate::monitor::Monitor;
use crate::replay::{check_fresh, slot_for, Direction};
use crate::station::StaCounter;

const BEACON_FIXED_LEN: usize = 12;
const AUTH_FIXED_LEN: usize = 6;
const ASSOC_REQ_FIXED_LEN: usize = 4;
const REASSOC_REQ_FIXED_LEN: usize = 10;
const ASSOC_RESP_FIXED_LEN: usize = 6;

const AUTH_ALG_SHARED_KEY: u16 = 1;
const WLAN_STATUS_SUCCESS: u16 = 0;

const CATEGORY_SA_QUERY: u8 = 8;
const SA_QUERY_REQUEST: u8 = 0;
const SA_QUERY_RESPONSE: u8 = 1;

/// Outcome of checking a group-addressed robust management frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BipVerdict {
    Valid,
    Invalid,
    Missing,
    NotProtected,
}

fn need(body: &[u8], len: usize) -> std::result::Result<(), ParseError> {
    if body.len() < len {
        return Err(ParseError::Truncated {
            needed: len,
            have: body.len(),
        });
    }
    Ok(())
}

pub(crate) fn rx_mgmt(mon: &mut Monitor, frame: &[u8]) -> Result<Option<Vec<u8>>> {
    let hdr = Header::parse(frame)?;
    let stype = hdr.fc().subtype();

    if hdr.fc().protected() {
        let plain = decrypt_robust(mon, &hdr, &frame[hdr.len()..])?;
        let decrypted = hdr.with_plaintext(&plain);
        let inner = Header::parse(&decrypted)?;
        handle(mon, &inner, &decrypted, stype, true)?;
        return Ok(Some(decrypted));
    }
    handle(mon, &hdr, frame, stype, false)?;
    Ok(None)
}

fn handle(
    mon: &mut Monitor,
    hdr: &Header<'_>,
    frame: &[u8],
    stype: u8,
    protected: bool,
) -> Result<()> {
    let body = &frame[hdr.len()..];
    match stype {
        STYPE_BEACON | STYPE_PROBE_RESP => rx_beacon(mon, hdr, body, stype),
        STYPE_AUTH => rx_auth(mon, hdr, body),
        STYPE_ASSOC_REQ | STYPE_REASSOC_REQ => rx_assoc_req(mon, hdr, body, stype),
        STYPE_ASSOC_RESP | STYPE_REASSOC_RESP => rx_assoc_resp(mon, hdr, body),
        STYPE_DEAUTH | STYPE_DISASSOC => rx_deauth_disassoc(mon, hdr, frame, stype, protected),
        STYPE_ACTION => rx_action(mon, hdr, frame, protected),
        _ => {
            debug!("{}: management subtype {} ignored", hdr.addr2(), stype);
            Ok(())
        }
    }
}

fn rx_beacon(mon: &mut Monitor, hdr: &Header<'_>, body: &[u8], stype: u8) -> Result<()> {
    need(body, BEACON_FIXED_LEN)?;
    let elems = parse_elements(&body[BEACON_FIXED_LEN..])?;
    let passphrases = &mon.config.passphrases;
    let bss = mon.bss.get(hdr.addr3());
    bss.update(&elems, passphrases)?;
    bss.capab_info = LittleEndian::read_u16(&body[10..12]);
    if stype == STYPE_PROBE_RESP {
        bss.proberesp_seen = true;
        bss.inc(BssCounter::ProbeResp);
    } else {
        bss.inc(BssCounter::Beacon);
    }
    Ok(())
}

/// Returns the station address and whether the AP sent the frame.
fn peers(hdr: &Header<'_>) -> (MacAddress, bool) {
    let bssid = hdr.addr3();
    if hdr.addr2() == bssid {
        (hdr.addr1(), true)
    } else {
        (hdr.addr2(), false)
    }
}

fn rx_auth(mon: &mut Monitor, hdr: &Header<'_>, body: &[u8]) -> Result<()> {
    need(body, AUTH_FIXED_LEN)?;
    let alg = LittleEndian::read_u16(&body[0..2]);
    let seq = LittleEndian::read_u16(&body[2..4]);
    let status = LittleEndian::read_u16(&body[4..6]);
    let (sta_addr, from_ap) = peers(hdr);
    if !sta_addr.is_real_device() {
        return Err(ParseError::Unsupported("group-addressed authentication").into());
    }
    debug!(
        "{} -> {}: authentication alg={} seq={} status={}",
        hdr.addr2(),
        hdr.addr1(),
        alg,
        seq,
        status
    );

    let sta = mon.bss.get(hdr.addr3()).sta_get(sta_addr);
    sta.inc(if from_ap {
        StaCounter::AuthRx
    } else {
        StaCounter::AuthTx
    });
    let final_seq = if alg == AUTH_ALG_SHARED_KEY { 4 } else { 2 };
    if from_ap && status == WLAN_STATUS_SUCCESS && seq == final_seq {
        sta.authenticated();
    }
    Ok(())
}

fn rx_assoc_req(mon: &mut Monitor, hdr: &Header<'_>, body: &[u8], stype: u8) -> Result<()> {
    let fixed = if stype == STYPE_REASSOC_REQ {
        REASSOC_REQ_FIXED_LEN
    } else {
        ASSOC_REQ_FIXED_LEN
    };
    need(body, fixed)?;
    let capab = LittleEndian::read_u16(&body[0..2]);
    let listen = LittleEndian::read_u16(&body[2..4]);
    let sta_addr = hdr.addr2();

    let bss = mon.bss.get(hdr.addr3());
    let params = bss.params;
    let sta = bss.sta_get(sta_addr);
    sta.inc(if stype == STYPE_REASSOC_REQ {
        StaCounter::ReassocReqTx
    } else {
        StaCounter::AssocReqTx
    });
    let mismatches = sta.update_assoc(capab, listen, &body[fixed..], &params)?;
    if !mismatches.is_empty() {
        sta.inc(StaCounter::Anomaly);
    }
    Ok(())
}

fn rx_assoc_resp(mon: &mut Monitor, hdr: &Header<'_>, body: &[u8]) -> Result<()> {
    need(body, ASSOC_RESP_FIXED_LEN)?;
    let status = LittleEndian::read_u16(&body[2..4]);
    let aid = LittleEndian::read_u16(&body[4..6]) & 0x3fff;
    let sta = mon.bss.get(hdr.addr3()).sta_get(hdr.addr1());
    if status != WLAN_STATUS_SUCCESS {
        debug!("{}: association rejected, status {}", hdr.addr1(), status);
        return Ok(());
    }
    if let Err(e) = sta.associated(aid) {
        sta.inc(StaCounter::Anomaly);
        return Err(e);
    }
    info!("{}: associated with {} (AID {})", hdr.addr1(), hdr.addr3(), aid);
    Ok(())
}

/// Checks the MMIE of a group-addressed robust management frame sent by
/// the AP. Valid IPNs are committed.
fn check_bip(bss: &mut Bss, frame: &[u8]) -> BipVerdict {
    let bssid = bss.bssid();
    let mmie = match bip::parse_mmie(frame) {
        Ok(mmie) => mmie,
        Err(_) if bss.params.mfp_capable() => {
            warn!("{}: group-addressed robust frame without MMIE", bssid);
            bss.inc(BssCounter::MissingBipMmie);
            return BipVerdict::Missing;
        }
        Err(_) => return BipVerdict::NotProtected,
    };
    let Some((igtk, ipn)) = bss.igtk.get(mmie.key_id).map(|(k, ipn)| (k.clone(), ipn)) else {
        debug!("{}: no IGTK {} to check MMIE", bssid, mmie.key_id);
        return BipVerdict::NotProtected;
    };
    if check_fresh(ipn, mmie.ipn).is_err() {
        warn!("{}: BIP replay, IPN {} <= {}", bssid, mmie.ipn, ipn);
        bss.inc(BssCounter::BipReplay);
        return BipVerdict::Invalid;
    }
    match bip::verify(igtk.as_slice(), frame) {
        Ok(_) => {
            bss.igtk.commit(mmie.key_id, mmie.ipn);
            bss.inc(BssCounter::ValidBipMmie);
            BipVerdict::Valid
        }
        Err(e) => {
            warn!("{}: invalid MMIE: {}", bssid, e);
            bss.inc(BssCounter::InvalidBipMmie);
            BipVerdict::Invalid
        }
    }
}

fn rx_deauth_disassoc(
    mon: &mut Monitor,
    hdr: &Header<'_>,
    frame: &[u8],
    stype: u8,
    protected: bool,
) -> Result<()> {
    let body = &frame[hdr.len()..];
    need(body, 2)?;
    let reason = LittleEndian::read_u16(&body[0..2]);
    let deauth = stype == STYPE_DEAUTH;
    let kind = if deauth { "deauthentication" } else { "disassociation" };
    let bss = mon.bss.get(hdr.addr3());

    if hdr.addr1().is_multicast() {
        let verdict = check_bip(bss, frame);
        if verdict == BipVerdict::Valid {
            bss.inc(if deauth {
                BssCounter::BipDeauth
            } else {
                BssCounter::BipDisassoc
            });
        }
        if matches!(verdict, BipVerdict::Invalid | BipVerdict::Missing) {
            return Ok(());
        }
        info!("{}: broadcast {}, reason {}", hdr.addr3(), kind, reason);
        for addr in bss.stations().map(|s| s.addr()).collect::<Vec<_>>() {
            let sta = bss.sta_get(addr);
            if deauth {
                sta.deauthenticated();
            } else {
                sta.disassociated();
            }
        }
        return Ok(());
    }

    let (sta_addr, from_ap) = peers(hdr);
    let params = bss.params;
    let sta = bss.sta_get(sta_addr);
    let counter = |valid: bool| match (deauth, from_ap, valid) {
        (true, true, true) => StaCounter::ValidDeauthRx,
        (true, false, true) => StaCounter::ValidDeauthTx,
        (true, true, false) => StaCounter::InvalidDeauthRx,
        (true, false, false) => StaCounter::InvalidDeauthTx,
        (false, true, true) => StaCounter::ValidDisassocRx,
        (false, false, true) => StaCounter::ValidDisassocTx,
        (false, true, false) => StaCounter::InvalidDisassocRx,
        (false, false, false) => StaCounter::InvalidDisassocTx,
    };

    if !protected && sta.mfp_active(&params) {
        warn!(
            "{}: unprotected {} while MFP is in use, reason {}",
            sta_addr, kind, reason
        );
        sta.inc(counter(false));
        return Ok(());
    }
    sta.inc(counter(true));
    info!("{}: {}, reason {}", sta_addr, kind, reason);
    if deauth {
        sta.deauthenticated();
    } else {
        sta.disassociated();
    }
    Ok(())
}

fn rx_action(mon: &mut Monitor, hdr: &Header<'_>, frame: &[u8], protected: bool) -> Result<()> {
    let body = &frame[hdr.len()..];
    need(body, 1)?;
    let bss = mon.bss.get(hdr.addr3());
    if hdr.addr1().is_multicast() {
        check_bip(bss, frame);
        return Ok(());
    }
    if body[0] != CATEGORY_SA_QUERY {
        debug!("{}: action category {}", hdr.addr2(), body[0]);
        return Ok(());
    }
    need(body, 4)?;
    let action = body[1];
    let trans_id = [body[2], body[3]];
    let (sta_addr, from_ap) = peers(hdr);
    let params = bss.params;
    let sta = bss.sta_get(sta_addr);
    if !protected && sta.mfp_active(&params) {
        warn!("{}: unprotected SA Query while MFP is in use", sta_addr);
        sta.inc(StaCounter::Anomaly);
    }

    match (action, from_ap) {
        (SA_QUERY_REQUEST, true) => {
            sta.ap_sa_query_tr = trans_id;
            sta.inc(StaCounter::SaQueryReqRx);
        }
        (SA_QUERY_REQUEST, false) => {
            sta.sta_sa_query_tr = trans_id;
            sta.inc(StaCounter::SaQueryReqTx);
        }
        (SA_QUERY_RESPONSE, true) => {
            if sta.sta_sa_query_tr == trans_id {
                sta.inc(StaCounter::SaQueryRespRx);
            } else {
                warn!("{}: SA Query response with unknown transaction id", sta_addr);
                sta.inc(StaCounter::InvalidSaQueryResp);
            }
        }
        (SA_QUERY_RESPONSE, false) => {
            if sta.ap_sa_query_tr == trans_id {
                sta.inc(StaCounter::SaQueryRespTx);
            } else {
                warn!("{}: SA Query response with unknown transaction id", sta_addr);
                sta.inc(StaCounter::InvalidSaQueryResp);
            }
        }
        _ => debug!("{}: SA Query action {}", sta_addr, action),
    }
    Ok(())
}

/// Decrypts a unicast robust management frame with the station's PTK.
/// Management frames use the non-QoS replay slot.
fn decrypt_robust(mon: &mut Monitor, hdr: &Header<'_>, data: &[u8]) -> Result<Vec<u8>> {
    let bss = mon
        .bss
        .find_mut(&hdr.addr3())
        .ok_or(MonitorError::UnknownBss(hdr.addr3()))?;
    let suite = bss.params.pairwise_cipher;
    let (sta_addr, from_ap) = peers(hdr);
    let sta = bss
        .sta_find_mut(&sta_addr)
        .ok_or(MonitorError::UnknownStation(sta_addr))?;
    let Some(ptk) = sta.ptk() else {
        debug!("{}: protected management frame without PTK", sta_addr);
        return Err(MonitorError::MissingKey("PTK"));
    };
    let tk = ptk.tk.clone();
    let cipher = match DataCipher::for_key(tk.as_slice(), suite) {
        Some(DataCipher::Tkip) | None => {
            sta.inc(StaCounter::DecryptFailure);
            return Err(MonitorError::Protocol(
                "protected management frame without CCMP".to_string(),
            ));
        }
        Some(cipher) => cipher,
    };
    let dir = if from_ap {
        Direction::FromDs
    } else {
        Direction::ToDs
    };
    let slot = slot_for(None);
    let pn = cipher.get_pn(data)?;
    if let Err(e) = sta.rsc(dir).check(slot, pn) {
        warn!("{}: management frame replay: {}", sta_addr, e);
        sta.inc(StaCounter::Replay);
        return Err(e);
    }
    match cipher.decrypt(tk.as_slice(), hdr, data) {
        Ok(plain) => {
            sta.rsc_mut(dir).commit(slot, pn);
            sta.inc(StaCounter::DecryptOk);
            Ok(plain)
        }
        Err(e) => {
            warn!("{}: management frame decryption failed: {}", sta_addr, e);
            sta.inc(StaCounter::DecryptFailure);
            Err(MonitorError::Crypto(e))
        }
    }
}
