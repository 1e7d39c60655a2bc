//! Per-BSS station state.

use std::fmt;

use log::{debug, info, warn};
use strum::EnumCount;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter};

use crate::crypto::kdf::{EAPOL_MIC_LEN, WPA_NONCE_LEN};
use crate::elements::{parse_elements, parse_wpa_ie, IeCopy, SecurityParams};
use crate::error::{MonitorError, ParseError, Result};
use crate::keys::{Ptk, PtkState};
use crate::mac::MacAddress;
use crate::replay::{Direction, Pn, RscTable};

/// IEEE 802.11 station states, ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
    Associated,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Unauthenticated => "State 1 (unauthenticated)",
            AuthState::Authenticated => "State 2 (authenticated)",
            AuthState::Associated => "State 3 (associated)",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCountMacro, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StaCounter {
    AuthTx,
    AuthRx,
    AssocReqTx,
    ReassocReqTx,
    PtkLearned,
    ValidDeauthTx,
    ValidDeauthRx,
    InvalidDeauthTx,
    InvalidDeauthRx,
    ValidDisassocTx,
    ValidDisassocRx,
    InvalidDisassocTx,
    InvalidDisassocRx,
    SaQueryReqTx,
    SaQueryReqRx,
    SaQueryRespTx,
    SaQueryRespRx,
    InvalidSaQueryResp,
    DataProtected,
    DataUnprotected,
    DecryptOk,
    DecryptFailure,
    MichaelMicFailure,
    Replay,
    Anomaly,
    Retransmission,
    Injected,
}

/// What identifies a retransmitted EAPOL-Key message 2/4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFingerprint {
    pub replay_counter: [u8; 8],
    pub snonce: [u8; WPA_NONCE_LEN],
    pub mic: [u8; EAPOL_MIC_LEN],
}

#[derive(Debug, Clone)]
pub struct Station {
    addr: MacAddress,
    state: AuthState,
    pub aid: u16,
    pub rsn_ie: IeCopy,
    pub params: SecurityParams,
    pub anonce: Option<[u8; WPA_NONCE_LEN]>,
    pub snonce: Option<[u8; WPA_NONCE_LEN]>,
    ptk: PtkState,
    rsc_tods: RscTable,
    rsc_fromds: RscTable,
    pub ap_sa_query_tr: [u8; 2],
    pub sta_sa_query_tr: [u8; 2],
    pub assocreq_capab_info: u16,
    pub assocreq_listen_int: u16,
    assocreq_ies: Vec<u8>,
    pub last_msg2: Option<HandshakeFingerprint>,
    tx_pn: Pn,
    counters: [u32; StaCounter::COUNT],
}

impl Station {
    pub fn new(addr: MacAddress) -> Self {
        Station {
            addr,
            state: AuthState::default(),
            aid: 0,
            rsn_ie: IeCopy::default(),
            params: SecurityParams::default(),
            anonce: None,
            snonce: None,
            ptk: PtkState::default(),
            rsc_tods: RscTable::default(),
            rsc_fromds: RscTable::default(),
            ap_sa_query_tr: [0u8; 2],
            sta_sa_query_tr: [0u8; 2],
            assocreq_capab_info: 0,
            assocreq_listen_int: 0,
            assocreq_ies: Vec::new(),
            last_msg2: None,
            tx_pn: Pn::ZERO,
            counters: [0; StaCounter::COUNT],
        }
    }

    pub fn addr(&self) -> MacAddress {
        self.addr
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Successful authentication. Never moves an associated station back.
    pub fn authenticated(&mut self) {
        if self.state < AuthState::Authenticated {
            debug!("{}: {} -> {}", self.addr, self.state, AuthState::Authenticated);
            self.state = AuthState::Authenticated;
        }
    }

    /// Successful (re)association. Requires prior authentication.
    pub fn associated(&mut self, aid: u16) -> Result<()> {
        if self.state == AuthState::Unauthenticated {
            return Err(MonitorError::Protocol(format!(
                "{} associated without authenticating",
                self.addr
            )));
        }
        if self.state != AuthState::Associated {
            debug!("{}: {} -> {}", self.addr, self.state, AuthState::Associated);
        }
        self.state = AuthState::Associated;
        self.aid = aid;
        Ok(())
    }

    /// Disassociation drops back to State 2.
    pub fn disassociated(&mut self) {
        if self.state == AuthState::Associated {
            debug!("{}: {} -> {}", self.addr, self.state, AuthState::Authenticated);
            self.state = AuthState::Authenticated;
        }
        self.aid = 0;
    }

    /// Deauthentication resets the station, including its pairwise keys.
    pub fn deauthenticated(&mut self) {
        if self.state != AuthState::Unauthenticated {
            debug!("{}: {} -> {}", self.addr, self.state, AuthState::Unauthenticated);
        }
        self.state = AuthState::Unauthenticated;
        self.aid = 0;
        self.ptk.clear();
        self.anonce = None;
        self.snonce = None;
        self.last_msg2 = None;
        self.rsc_tods.reset();
        self.rsc_fromds.reset();
    }

    pub fn ptk_state(&self) -> &PtkState {
        &self.ptk
    }

    pub(crate) fn ptk_state_mut(&mut self) -> &mut PtkState {
        &mut self.ptk
    }

    /// Installed pairwise key, if the handshake has been validated.
    pub fn ptk(&self) -> Option<&Ptk> {
        self.ptk.installed()
    }

    pub fn ptk_set(&self) -> bool {
        self.ptk.is_installed()
    }

    pub fn rsc(&self, dir: Direction) -> &RscTable {
        match dir {
            Direction::ToDs => &self.rsc_tods,
            Direction::FromDs => &self.rsc_fromds,
        }
    }

    pub fn rsc_mut(&mut self, dir: Direction) -> &mut RscTable {
        match dir {
            Direction::ToDs => &mut self.rsc_tods,
            Direction::FromDs => &mut self.rsc_fromds,
        }
    }

    pub fn reset_rsc(&mut self) {
        self.rsc_tods.reset();
        self.rsc_fromds.reset();
    }

    /// Next transmit PN for frames sent in `dir`: strictly above anything
    /// already observed or sent in that direction.
    pub fn next_tx_pn(&mut self, dir: Direction) -> Pn {
        let seen = self.rsc(dir).max().max(self.tx_pn);
        self.tx_pn = seen.next();
        self.tx_pn
    }

    pub fn assocreq_ies(&self) -> &[u8] {
        &self.assocreq_ies
    }

    pub fn counter(&self, counter: StaCounter) -> u32 {
        self.counters[counter as usize]
    }

    pub fn inc(&mut self, counter: StaCounter) {
        let c = &mut self.counters[counter as usize];
        *c = c.saturating_add(1);
    }

    pub fn reset_counters(&mut self) {
        self.counters = [0; StaCounter::COUNT];
    }

    /// Refreshes association request fields from the request body and
    /// re-derives the station's negotiated security parameters, reporting
    /// any disagreement with what the BSS advertises.
    pub fn update_assoc(
        &mut self,
        capab_info: u16,
        listen_int: u16,
        ies: &[u8],
        bss: &SecurityParams,
    ) -> std::result::Result<Vec<String>, ParseError> {
        let elems = parse_elements(ies)?;
        self.assocreq_capab_info = capab_info;
        self.assocreq_listen_int = listen_int;
        self.assocreq_ies = ies.to_vec();

        let ie = match elems.rsn_ie.or(elems.wpa_ie) {
            Some(ie) => ie,
            None => {
                self.rsn_ie.clear();
                self.params = SecurityParams::default();
                debug!("{}: association request without RSN/WPA element", self.addr);
                return Ok(Vec::new());
            }
        };
        self.rsn_ie.set(ie)?;
        let data = parse_wpa_ie(ie)?;
        self.params = SecurityParams::default();
        self.params.merge(&data);
        if self.params.mgmt_group_cipher.is_empty() {
            self.params.mgmt_group_cipher = bss.mgmt_group_cipher;
        }

        let mut mismatches = Vec::new();
        if !bss.proto.is_empty() && !bss.proto.contains(self.params.proto) {
            mismatches.push(format!(
                "protocol {:?} not advertised ({:?})",
                self.params.proto, bss.proto
            ));
        }
        if !bss.pairwise_cipher.is_empty() && !bss.pairwise_cipher.contains(self.params.pairwise_cipher)
        {
            mismatches.push(format!(
                "pairwise cipher {:?} not advertised ({:?})",
                self.params.pairwise_cipher, bss.pairwise_cipher
            ));
        }
        if !bss.group_cipher.is_empty() && self.params.group_cipher != bss.group_cipher {
            mismatches.push(format!(
                "group cipher {:?} differs from {:?}",
                self.params.group_cipher, bss.group_cipher
            ));
        }
        if self.params.mfp_capable() && !bss.mfp_capable() {
            mismatches.push("MFP capable station on a BSS without MFP".to_string());
        }
        if bss.mfp_required() && !self.params.mfp_capable() {
            mismatches.push("BSS requires MFP but station is not MFP capable".to_string());
        }
        for m in &mismatches {
            warn!("{}: {}", self.addr, m);
        }
        info!(
            "{}: negotiated proto={:?} pairwise={:?} key_mgmt={:?}",
            self.addr, self.params.proto, self.params.pairwise_cipher, self.params.key_mgmt
        );
        Ok(mismatches)
    }

    /// MFP is in use when both ends advertised it and a PTK protects
    /// management frames.
    pub fn mfp_active(&self, bss: &SecurityParams) -> bool {
        self.ptk_set() && self.params.mfp_capable() && bss.mfp_capable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{build_rsn_ie, Cipher, KeyMgmt, Proto, RsnCapab};
    use strum::IntoEnumIterator;

    fn sta() -> Station {
        Station::new(MacAddress([0x02, 0, 0, 0, 0, 0x02]))
    }

    #[test]
    fn transitions_only_move_forward() {
        let mut s = sta();
        assert!(s.associated(1).is_err());
        assert_eq!(s.state(), AuthState::Unauthenticated);

        s.authenticated();
        s.associated(1).unwrap();
        assert_eq!(s.state(), AuthState::Associated);

        // Re-authentication while associated does not demote.
        s.authenticated();
        assert_eq!(s.state(), AuthState::Associated);

        s.disassociated();
        assert_eq!(s.state(), AuthState::Authenticated);
        s.deauthenticated();
        assert_eq!(s.state(), AuthState::Unauthenticated);
    }

    #[test]
    fn deauth_drops_keys() {
        let mut s = sta();
        s.ptk_state_mut().install(Ptk::from_bytes(&[1u8; 48]).unwrap());
        s.rsc_mut(Direction::ToDs).commit(0, Pn::from_u64(5));
        assert!(s.ptk_set());
        s.deauthenticated();
        assert!(!s.ptk_set());
        assert_eq!(s.rsc(Direction::ToDs).max(), Pn::ZERO);
    }

    #[test]
    fn update_assoc_replaces_ie_copy() {
        let bss = SecurityParams {
            proto: Proto::RSN,
            pairwise_cipher: Cipher::CCMP,
            group_cipher: Cipher::CCMP,
            key_mgmt: KeyMgmt::PSK,
            ..Default::default()
        };
        let mut s = sta();
        let ies = build_rsn_ie(4, 4, 2, 0);
        assert!(s.update_assoc(0x0431, 10, &ies, &bss).unwrap().is_empty());
        assert_eq!(s.rsn_ie.as_slice(), &ies[..]);
        assert_eq!(s.assocreq_listen_int, 10);

        let tkip = build_rsn_ie(4, 2, 2, RsnCapab::MFPC.bits());
        let mismatches = s.update_assoc(0x0431, 3, &tkip, &bss).unwrap();
        assert_eq!(mismatches.len(), 2);
        assert_eq!(s.assocreq_ies(), &tkip[..]);
        assert_eq!(s.params.pairwise_cipher, Cipher::TKIP);
    }

    #[test]
    fn tx_pn_stays_above_observed() {
        let mut s = sta();
        s.rsc_mut(Direction::FromDs).commit(3, Pn::from_u64(41));
        assert_eq!(s.next_tx_pn(Direction::FromDs), Pn::from_u64(42));
        assert_eq!(s.next_tx_pn(Direction::FromDs), Pn::from_u64(43));
    }

    #[test]
    fn counters_cover_every_kind() {
        let mut s = sta();
        for c in StaCounter::iter() {
            s.inc(c);
        }
        assert!(StaCounter::iter().all(|c| s.counter(c) == 1));
        assert_eq!(StaCounter::Anomaly.to_string(), "anomaly");
    }
}
