//! The monitor context: configuration, registries and frame dispatch.

use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use derive_setters::Setters;
use log::{debug, info, trace, warn};

use crate::bss::{Bss, BssCounter, BssRegistry, Pmk};
use crate::capture::CaptureSink;
use crate::crypto::kdf::PMK_LEN;
use crate::error::{MonitorError, ParseError, Result};
use crate::ieee80211::{frame_control, FrameType, Header};
use crate::inject::{self, InjectProtection, Transmitter};
use crate::mac::MacAddress;
use crate::wired::RadiusTracker;
use crate::{rx_data, rx_mgmt, wired};

pub const FCS_LEN: usize = 4;
pub const MAX_RADIUS_SECRET_LEN: usize = 128;

/// A configured passphrase. An empty SSID matches every network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passphrase {
    pub ssid: Vec<u8>,
    pub bssid: Option<MacAddress>,
    pub passphrase: String,
}

impl Passphrase {
    pub fn new(ssid: &str, passphrase: &str) -> Self {
        Passphrase {
            ssid: ssid.as_bytes().to_vec(),
            bssid: None,
            passphrase: passphrase.to_string(),
        }
    }

    /// Passphrase tried against every network.
    pub fn any(passphrase: &str) -> Self {
        Passphrase::new("", passphrase)
    }

    pub fn with_bssid(mut self, bssid: MacAddress) -> Self {
        self.bssid = Some(bssid);
        self
    }

    pub fn matches(&self, ssid: &[u8], bssid: &MacAddress) -> bool {
        (self.ssid.is_empty() || self.ssid == ssid) && self.bssid.map_or(true, |b| b == *bssid)
    }
}

/// `SSID:passphrase`, or a bare passphrase for any network.
impl FromStr for Passphrase {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let p = match s.split_once(':') {
            Some((ssid, pass)) => Passphrase::new(ssid, pass),
            None => Passphrase::any(s),
        };
        if !(8..=63).contains(&p.passphrase.len()) {
            return Err(MonitorError::Config(format!(
                "passphrase must be 8-63 characters, got {}",
                p.passphrase.len()
            )));
        }
        Ok(p)
    }
}

#[derive(Debug, Clone, Default, Setters)]
pub struct MonitorConfig {
    pub passphrases: Vec<Passphrase>,
    pub radius_secrets: Vec<String>,
    /// Frames carry a trailing FCS that must be checked and stripped.
    pub fcs: bool,
}

/// Process-wide frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub rx_mgmt: u64,
    pub rx_ctrl: u64,
    pub rx_data: u64,
    pub rx_wired: u64,
    pub fcs_error: u64,
    pub malformed: u64,
}

pub struct Monitor {
    pub(crate) config: MonitorConfig,
    pub(crate) bss: BssRegistry,
    pub(crate) pmks: Vec<Pmk>,
    pub(crate) radius: RadiusTracker,
    pub(crate) counters: Counters,
    sink: Option<Box<dyn CaptureSink>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        if let Some(s) = config
            .radius_secrets
            .iter()
            .find(|s| s.len() > MAX_RADIUS_SECRET_LEN)
        {
            return Err(MonitorError::Config(format!(
                "RADIUS secret longer than {} bytes ({})",
                MAX_RADIUS_SECRET_LEN,
                s.len()
            )));
        }
        Ok(Monitor {
            config,
            bss: BssRegistry::default(),
            pmks: Vec::new(),
            radius: RadiusTracker::default(),
            counters: Counters::default(),
            sink: None,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Every processed frame, and its decrypted form when there is one,
    /// is handed to `sink`.
    pub fn set_sink(&mut self, sink: Box<dyn CaptureSink>) {
        self.sink = Some(sink);
    }

    pub fn take_sink(&mut self) -> Option<Box<dyn CaptureSink>> {
        self.sink.take()
    }

    /// Adds a passphrase and derives PMKs for the networks already known.
    pub fn add_passphrase(&mut self, passphrase: Passphrase) {
        let list = std::slice::from_ref(&passphrase);
        for bss in self.bss.iter_mut().filter(|b| !b.ssid().is_empty()) {
            bss.add_passphrase_pmks(list);
        }
        self.config.passphrases.push(passphrase);
    }

    /// Adds a PMK tried against every network.
    pub fn add_pmk(&mut self, pmk: Pmk) {
        if !self.pmks.contains(&pmk) {
            debug!("global PMK {}", hex::encode(pmk));
            self.pmks.push(pmk);
        }
    }

    /// Turns MSK material from an EAP exchange into a PMK.
    pub fn add_msk(&mut self, msk: &[u8]) -> Result<()> {
        if msk.len() < PMK_LEN {
            return Err(MonitorError::Protocol(format!(
                "MSK too short ({} bytes)",
                msk.len()
            )));
        }
        let mut pmk = [0u8; PMK_LEN];
        pmk.copy_from_slice(&msk[..PMK_LEN]);
        info!("learned PMK from MSK");
        self.add_pmk(pmk);
        Ok(())
    }

    pub fn pmks(&self) -> &[Pmk] {
        &self.pmks
    }

    pub fn bss_find(&self, bssid: &MacAddress) -> Option<&Bss> {
        self.bss.find(bssid)
    }

    pub fn bss_find_mut(&mut self, bssid: &MacAddress) -> Option<&mut Bss> {
        self.bss.find_mut(bssid)
    }

    pub fn bss_get(&mut self, bssid: MacAddress) -> &mut Bss {
        self.bss.get(bssid)
    }

    pub fn bss_remove(&mut self, bssid: &MacAddress) -> Option<Bss> {
        self.bss.remove(bssid)
    }

    pub fn bss_flush(&mut self) {
        self.bss.flush();
    }

    pub fn bss_iter(&self) -> impl Iterator<Item = &Bss> {
        self.bss.iter()
    }

    /// Processes one 802.11 frame (radiotap removed). Returns the decrypted
    /// frame when the frame was protected and a key was available.
    pub fn process(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.config.fcs {
            return self.process_fcs(frame);
        }
        self.dispatch(frame)
    }

    /// Checks and strips the trailing FCS before processing.
    pub fn process_fcs(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < FCS_LEN {
            self.counters.malformed += 1;
            return None;
        }
        let (body, fcs) = frame.split_at(frame.len() - FCS_LEN);
        if crc32fast::hash(body) != LittleEndian::read_u32(fcs) {
            self.counters.fcs_error += 1;
            debug!("dropping frame with bad FCS");
            return None;
        }
        self.dispatch(body)
    }

    fn dispatch(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let fc = match frame_control(frame) {
            Ok(fc) => fc,
            Err(e) => {
                self.counters.malformed += 1;
                debug!("dropping frame: {}", e);
                return None;
            }
        };
        trace!("rx {:?} subtype {} ({} bytes)", fc.frame_type(), fc.subtype(), frame.len());

        let result = match fc.frame_type() {
            FrameType::Management => {
                self.counters.rx_mgmt += 1;
                rx_mgmt::rx_mgmt(self, frame)
            }
            FrameType::Control => {
                self.counters.rx_ctrl += 1;
                Ok(None)
            }
            FrameType::Data => {
                self.counters.rx_data += 1;
                rx_data::rx_data(self, frame)
            }
            FrameType::Extension => Ok(None),
        };

        let decrypted = match result {
            Ok(decrypted) => decrypted,
            Err(e) => {
                self.report(frame, &e);
                None
            }
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.write_frame(frame, decrypted.as_deref());
        }
        decrypted
    }

    /// Malformed input is reported once per BSS; other failures have
    /// already been counted where they were detected.
    fn report(&mut self, frame: &[u8], err: &MonitorError) {
        match err {
            MonitorError::Parse(e) => {
                self.counters.malformed += 1;
                let bss = Header::parse(frame)
                    .ok()
                    .and_then(|h| h.bssid())
                    .and_then(|bssid| self.bss.find_mut(&bssid));
                match bss {
                    Some(bss) => {
                        bss.inc(BssCounter::MalformedFrame);
                        let bssid = bss.bssid();
                        bss.parse_error.report(&bssid, e);
                    }
                    None => debug!("malformed frame: {}", e),
                }
            }
            MonitorError::Crypto(_) | MonitorError::Protocol(_) => debug!("frame dropped: {}", err),
            _ => debug!("{}", err),
        }
    }

    /// Processes one Ethernet frame from the wired side of the network.
    pub fn process_wired(&mut self, frame: &[u8]) {
        self.counters.rx_wired += 1;
        if let Err(e) = wired::rx_wired(self, frame) {
            match e {
                MonitorError::Parse(ParseError::Unsupported(what)) => {
                    trace!("wired: ignoring {}", what)
                }
                e => debug!("wired: {}", e),
            }
        }
    }

    /// Protects `frame` according to `protection` with the state kept for
    /// `bssid`/`sta` and hands it to `tx`.
    pub fn inject(
        &mut self,
        bssid: &MacAddress,
        sta: Option<&MacAddress>,
        frame: &[u8],
        protection: InjectProtection,
        tx: &mut dyn Transmitter,
    ) -> Result<()> {
        let bss = self
            .bss
            .find_mut(bssid)
            .ok_or(MonitorError::UnknownBss(*bssid))?;
        if let Some(sta) = sta {
            if bss.sta_find(sta).is_none() {
                warn!("{}: inject for unknown station {}", bssid, sta);
                return Err(MonitorError::UnknownStation(*sta));
            }
        }
        inject::inject(bss, sta, frame, protection, tx)
    }
}
