//! Frame injection: protect a frame with the tracked key state and hand it
//! to a transmit path.

use log::{debug, info};
use rand::RngCore;
use strum_macros::{Display, EnumString};

use crate::bss::Bss;
use crate::crypto::{bip, DataCipher};
use crate::error::{MonitorError, Result};
use crate::ieee80211::{Header, STYPE_ACTION, STYPE_DEAUTH, STYPE_DISASSOC};
use crate::mac::MacAddress;
use crate::replay::Direction;
use crate::station::StaCounter;

/// BIP key IDs, tried in order.
const IGTK_KEY_IDS: [u16; 2] = [4, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum InjectProtection {
    /// Encrypt with the PTK when one is installed, otherwise send as is.
    Normal,
    /// Encrypt with the PTK; fails without one.
    Protected,
    Unprotected,
    /// Encrypt with a random key the receiver cannot know.
    IncorrectKey,
    /// Protect with the current GTK (data) or IGTK (management).
    Group,
}

/// Where injected frames go. The monitor never opens sockets itself.
pub trait Transmitter {
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;
}

/// Collects frames in memory.
impl Transmitter for Vec<Vec<u8>> {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.push(frame.to_vec());
        Ok(())
    }
}

fn is_robust_mgmt(hdr: &Header<'_>) -> bool {
    hdr.fc().is_mgmt()
        && matches!(
            hdr.fc().subtype(),
            STYPE_DEAUTH | STYPE_DISASSOC | STYPE_ACTION
        )
}

pub(crate) fn inject(
    bss: &mut Bss,
    sta: Option<&MacAddress>,
    frame: &[u8],
    protection: InjectProtection,
    tx: &mut dyn Transmitter,
) -> Result<()> {
    let hdr = Header::parse(frame)?;
    let out = match protection {
        InjectProtection::Unprotected => frame.to_vec(),
        InjectProtection::Group => protect_group(bss, &hdr, frame)?,
        // Without a station there is no pairwise key to use.
        InjectProtection::Normal if sta.is_none() => frame.to_vec(),
        InjectProtection::Normal | InjectProtection::Protected | InjectProtection::IncorrectKey => {
            let sta = sta.ok_or(MonitorError::MissingKey("station for pairwise protection"))?;
            protect_pairwise(bss, sta, &hdr, frame, protection)?
        }
    };
    tx.transmit(&out)?;
    if let Some(sta) = sta.and_then(|a| bss.sta_find_mut(a)) {
        sta.inc(StaCounter::Injected);
    }
    debug!(
        "{}: injected {} bytes ({})",
        bss.bssid(),
        out.len(),
        protection
    );
    Ok(())
}

fn protect_pairwise(
    bss: &mut Bss,
    sta_addr: &MacAddress,
    hdr: &Header<'_>,
    frame: &[u8],
    protection: InjectProtection,
) -> Result<Vec<u8>> {
    let bssid = bss.bssid();
    let bss_suite = bss.params.pairwise_cipher;
    let sta = bss
        .sta_find_mut(sta_addr)
        .ok_or(MonitorError::UnknownStation(*sta_addr))?;
    let suite = if sta.params.pairwise_cipher.is_empty() {
        bss_suite
    } else {
        sta.params.pairwise_cipher
    };

    let tk = match (sta.ptk(), protection) {
        (Some(ptk), InjectProtection::IncorrectKey) => {
            let mut tk = vec![0u8; ptk.tk.len()];
            rand::thread_rng().fill_bytes(&mut tk);
            info!("{}: injecting with a random key", sta_addr);
            tk
        }
        (Some(ptk), _) => ptk.tk.as_slice().to_vec(),
        (None, InjectProtection::Normal) => return Ok(frame.to_vec()),
        (None, _) => return Err(MonitorError::MissingKey("PTK")),
    };
    let cipher = DataCipher::for_key(&tk, suite).ok_or(MonitorError::MissingKey("pairwise cipher"))?;
    if cipher == DataCipher::Tkip && hdr.fc().is_mgmt() {
        return Err(MonitorError::Protocol(
            "TKIP cannot protect management frames".to_string(),
        ));
    }
    let dir = if hdr.addr2() == bssid {
        Direction::FromDs
    } else {
        Direction::ToDs
    };
    let pn = sta.next_tx_pn(dir);
    Ok(cipher.encrypt(&tk, frame, pn, 0)?)
}

fn protect_group(bss: &mut Bss, hdr: &Header<'_>, frame: &[u8]) -> Result<Vec<u8>> {
    if is_robust_mgmt(hdr) {
        let key_id = IGTK_KEY_IDS
            .into_iter()
            .find(|&id| bss.igtk.is_installed(id))
            .ok_or(MonitorError::MissingKey("IGTK"))?;
        let igtk = bss
            .igtk
            .get(key_id)
            .map(|(k, _)| k.clone())
            .ok_or(MonitorError::MissingKey("IGTK"))?;
        let ipn = bss.next_tx_ipn(key_id);
        return Ok(bip::protect(igtk.as_slice(), key_id, ipn, frame)?);
    }

    let (idx, gtk) = bss
        .gtk
        .current()
        .map(|(idx, k)| (idx, k.key.clone()))
        .ok_or(MonitorError::MissingKey("GTK"))?;
    let cipher = DataCipher::for_key(gtk.as_slice(), bss.params.group_cipher)
        .ok_or(MonitorError::MissingKey("group cipher"))?;
    let pn = bss.next_tx_pn();
    Ok(cipher.encrypt(gtk.as_slice(), frame, pn, idx)?)
}
