//! Network (BSS) state and the BSS registry.

use std::collections::hash_map::{Entry, HashMap};
use std::collections::VecDeque;

use log::{debug, info, warn};
use strum::EnumCount;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter};

use crate::crypto::kdf::{pmk_from_passphrase, PMK_LEN};
use crate::elements::{parse_wpa_ie, Elements, IeCopy, SecurityParams, Ssid, MAX_SSID_LEN};
use crate::error::ParseError;
use crate::keys::{GtkTable, IgtkTable};
use crate::mac::MacAddress;
use crate::monitor::Passphrase;
use crate::replay::Pn;
use crate::station::Station;

/// PMKs kept per BSS; the oldest is evicted first.
pub const MAX_BSS_PMKS: usize = 16;

pub type Pmk = [u8; PMK_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCountMacro, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BssCounter {
    Beacon,
    ProbeResp,
    ValidBipMmie,
    InvalidBipMmie,
    MissingBipMmie,
    BipDeauth,
    BipDisassoc,
    BipReplay,
    GroupDecryptOk,
    GroupDecryptFailure,
    GroupReplay,
    MalformedFrame,
}

/// Once a malformed frame has been reported for a BSS, further ones are
/// only logged at debug level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseErrorLatch {
    #[default]
    Clear,
    Reported,
}

impl ParseErrorLatch {
    pub fn report(&mut self, bssid: &MacAddress, err: &ParseError) {
        match self {
            ParseErrorLatch::Clear => {
                warn!("{}: malformed frame: {}", bssid, err);
                *self = ParseErrorLatch::Reported;
            }
            ParseErrorLatch::Reported => debug!("{}: malformed frame: {}", bssid, err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bss {
    bssid: MacAddress,
    pub capab_info: u16,
    ssid: Ssid,
    pub channel: Option<u8>,
    pub proberesp_seen: bool,
    pub parse_error: ParseErrorLatch,
    wpa_ie: IeCopy,
    rsn_ie: IeCopy,
    pub params: SecurityParams,
    stations: HashMap<MacAddress, Station>,
    pmks: VecDeque<Pmk>,
    pub gtk: GtkTable,
    pub igtk: IgtkTable,
    tx_pn: Pn,
    tx_ipn: Pn,
    counters: [u32; BssCounter::COUNT],
}

impl Bss {
    pub fn new(bssid: MacAddress) -> Self {
        Bss {
            bssid,
            capab_info: 0,
            ssid: Ssid::default(),
            channel: None,
            proberesp_seen: false,
            parse_error: ParseErrorLatch::default(),
            wpa_ie: IeCopy::default(),
            rsn_ie: IeCopy::default(),
            params: SecurityParams::default(),
            stations: HashMap::new(),
            pmks: VecDeque::new(),
            gtk: GtkTable::default(),
            igtk: IgtkTable::default(),
            tx_pn: Pn::ZERO,
            tx_ipn: Pn::ZERO,
            counters: [0; BssCounter::COUNT],
        }
    }

    pub fn bssid(&self) -> MacAddress {
        self.bssid
    }

    pub fn ssid(&self) -> &[u8] {
        self.ssid.as_slice()
    }

    pub fn ssid_str(&self) -> String {
        String::from_utf8_lossy(self.ssid.as_slice()).into_owned()
    }

    pub fn rsn_ie(&self) -> &[u8] {
        self.rsn_ie.as_slice()
    }

    pub fn wpa_ie(&self) -> &[u8] {
        self.wpa_ie.as_slice()
    }

    /// Applies the elements of a Beacon or Probe Response.
    pub fn update(
        &mut self,
        elems: &Elements<'_>,
        passphrases: &[Passphrase],
    ) -> Result<(), ParseError> {
        let ssid = elems.ssid.ok_or(ParseError::MissingSsid)?;
        if ssid.len() > MAX_SSID_LEN {
            return Err(ParseError::TooLong {
                len: ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        // Validate both elements before touching any state.
        let rsn = elems.rsn_ie.map(parse_wpa_ie).transpose()?;
        let wpa = elems.wpa_ie.map(parse_wpa_ie).transpose()?;
        if let Some(ch) = elems.ds_channel {
            self.channel = Some(ch);
        }

        if self.ssid.as_slice() != ssid {
            self.ssid.set(ssid)?;
            info!("{}: SSID '{}'", self.bssid, self.ssid_str());
            self.add_passphrase_pmks(passphrases);
        }

        match elems.rsn_ie {
            Some(ie) if ie != self.rsn_ie.as_slice() => {
                if !self.rsn_ie.is_empty() {
                    info!("{}: RSN element changed", self.bssid);
                }
                self.rsn_ie.set(ie)?;
            }
            None if !self.rsn_ie.is_empty() => {
                info!("{}: RSN element removed", self.bssid);
                self.rsn_ie.clear();
            }
            _ => {}
        }
        match elems.wpa_ie {
            Some(ie) if ie != self.wpa_ie.as_slice() => {
                if !self.wpa_ie.is_empty() {
                    info!("{}: WPA element changed", self.bssid);
                }
                self.wpa_ie.set(ie)?;
            }
            None if !self.wpa_ie.is_empty() => {
                info!("{}: WPA element removed", self.bssid);
                self.wpa_ie.clear();
            }
            _ => {}
        }

        let mut params = SecurityParams::default();
        for data in rsn.iter().chain(wpa.iter()) {
            params.merge(data);
        }
        if params != self.params {
            debug!("{}: security parameters {:?}", self.bssid, params);
        }
        self.params = params;
        Ok(())
    }

    pub(crate) fn add_passphrase_pmks(&mut self, passphrases: &[Passphrase]) {
        let bssid = self.bssid;
        let ssid = self.ssid.as_slice().to_vec();
        for p in passphrases.iter().filter(|p| p.matches(&ssid, &bssid)) {
            let pmk = pmk_from_passphrase(&p.passphrase, &ssid);
            debug!("{}: PMK {} from passphrase", bssid, hex::encode(pmk));
            self.add_pmk(pmk);
        }
    }

    /// Adds a PMK candidate. Duplicates are ignored.
    pub fn add_pmk(&mut self, pmk: Pmk) {
        if self.pmks.contains(&pmk) {
            return;
        }
        if self.pmks.len() == MAX_BSS_PMKS {
            self.pmks.pop_front();
        }
        self.pmks.push_back(pmk);
    }

    pub fn pmks(&self) -> impl Iterator<Item = &Pmk> {
        self.pmks.iter()
    }

    pub fn sta_find(&self, addr: &MacAddress) -> Option<&Station> {
        self.stations.get(addr)
    }

    pub fn sta_find_mut(&mut self, addr: &MacAddress) -> Option<&mut Station> {
        self.stations.get_mut(addr)
    }

    /// Existing station or a fresh one inserted for `addr`.
    pub fn sta_get(&mut self, addr: MacAddress) -> &mut Station {
        match self.stations.entry(addr) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                debug!("{}: new station {}", self.bssid, addr);
                e.insert(Station::new(addr))
            }
        }
    }

    pub fn sta_remove(&mut self, addr: &MacAddress) -> Option<Station> {
        self.stations.remove(addr)
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Next PN for group-addressed frames sent by the AP.
    pub fn next_tx_pn(&mut self) -> Pn {
        let seen = self
            .gtk
            .current()
            .map(|(_, k)| k.rsc)
            .unwrap_or_default()
            .max(self.tx_pn);
        self.tx_pn = seen.next();
        self.tx_pn
    }

    /// Next IPN for BIP-protected frames sent by the AP.
    pub fn next_tx_ipn(&mut self, idx: u16) -> Pn {
        let seen = self
            .igtk
            .get(idx)
            .map(|(_, ipn)| ipn)
            .unwrap_or_default()
            .max(self.tx_ipn);
        self.tx_ipn = seen.next();
        self.tx_ipn
    }

    pub fn counter(&self, counter: BssCounter) -> u32 {
        self.counters[counter as usize]
    }

    pub fn inc(&mut self, counter: BssCounter) {
        let c = &mut self.counters[counter as usize];
        *c = c.saturating_add(1);
    }

    pub fn reset_counters(&mut self) {
        self.counters = [0; BssCounter::COUNT];
    }
}

/// All observed networks, keyed by BSSID.
#[derive(Debug, Default)]
pub struct BssRegistry {
    entries: HashMap<MacAddress, Bss>,
}

impl BssRegistry {
    pub fn find(&self, bssid: &MacAddress) -> Option<&Bss> {
        self.entries.get(bssid)
    }

    pub fn find_mut(&mut self, bssid: &MacAddress) -> Option<&mut Bss> {
        self.entries.get_mut(bssid)
    }

    pub fn get(&mut self, bssid: MacAddress) -> &mut Bss {
        match self.entries.entry(bssid) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                debug!("new BSS {}", bssid);
                e.insert(Bss::new(bssid))
            }
        }
    }

    pub fn remove(&mut self, bssid: &MacAddress) -> Option<Bss> {
        self.entries.remove(bssid)
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bss> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Bss> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
