//! EAPOL-Key frames and the 4-way / group key handshakes.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::bss::{Bss, Pmk};
use crate::crypto::kdf::{
    constant_time_eq, eapol_mic, EAPOL_MIC_LEN, KEY_DESC_VER_AES_128_CMAC,
    KEY_DESC_VER_HMAC_MD5_RC4, KEY_DESC_VER_HMAC_SHA1_AES, WPA_NONCE_LEN,
};
use crate::crypto::keywrap::aes_unwrap;
use crate::crypto::rc4::rc4_skip;
use crate::crypto::DataCipher;
use crate::elements::{Cipher, EID_RSN, EID_VENDOR};
use crate::error::{CryptoError, MonitorError, ParseError, Result};
use crate::keys::Ptk;
use crate::mac::MacAddress;
use crate::replay::Pn;
use crate::station::{HandshakeFingerprint, StaCounter};

pub const EAPOL_HDR_LEN: usize = 4;
pub const EAPOL_TYPE_KEY: u8 = 3;
/// Fixed part of the key descriptor, up to and including Key Data Length.
pub const KEY_DESC_FIXED_LEN: usize = 95;

pub const KEY_DESC_TYPE_RSN: u8 = 2;
pub const KEY_DESC_TYPE_WPA: u8 = 254;

const OFF_KEY_INFO: usize = 5;
const OFF_KEY_LEN: usize = 7;
const OFF_REPLAY: usize = 9;
const OFF_NONCE: usize = 17;
const OFF_IV: usize = 49;
const OFF_RSC: usize = 65;
const OFF_MIC: usize = 81;
const OFF_DATA_LEN: usize = 97;
const OFF_DATA: usize = 99;

const KDE_OUI: [u8; 3] = [0x00, 0x0f, 0xac];
const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
const KDE_GTK: u8 = 1;
const KDE_IGTK: u8 = 9;

/// Key Information field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo(pub u16);

impl KeyInfo {
    pub const TYPE_PAIRWISE: u16 = 0x0008;
    pub const INSTALL: u16 = 0x0040;
    pub const ACK: u16 = 0x0080;
    pub const MIC: u16 = 0x0100;
    pub const SECURE: u16 = 0x0200;
    pub const ERROR: u16 = 0x0400;
    pub const REQUEST: u16 = 0x0800;
    pub const ENCR_KEY_DATA: u16 = 0x1000;

    pub fn version(self) -> u8 {
        (self.0 & 0x0007) as u8
    }

    pub fn pairwise(self) -> bool {
        self.0 & Self::TYPE_PAIRWISE != 0
    }

    /// Group key index, meaningful for WPA group messages.
    pub fn key_index(self) -> u8 {
        ((self.0 >> 4) & 0x03) as u8
    }

    pub fn install(self) -> bool {
        self.0 & Self::INSTALL != 0
    }

    pub fn ack(self) -> bool {
        self.0 & Self::ACK != 0
    }

    pub fn mic(self) -> bool {
        self.0 & Self::MIC != 0
    }

    pub fn secure(self) -> bool {
        self.0 & Self::SECURE != 0
    }

    pub fn error(self) -> bool {
        self.0 & Self::ERROR != 0
    }

    pub fn request(self) -> bool {
        self.0 & Self::REQUEST != 0
    }

    pub fn encrypted_key_data(self) -> bool {
        self.0 & Self::ENCR_KEY_DATA != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMessage {
    M1,
    M2,
    M3,
    M4,
    Group1,
    Group2,
}

impl KeyMessage {
    /// Messages sent by the authenticator.
    pub fn from_authenticator(self) -> bool {
        matches!(self, KeyMessage::M1 | KeyMessage::M3 | KeyMessage::Group1)
    }
}

impl fmt::Display for KeyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyMessage::M1 => "EAPOL-Key 1/4",
            KeyMessage::M2 => "EAPOL-Key 2/4",
            KeyMessage::M3 => "EAPOL-Key 3/4",
            KeyMessage::M4 => "EAPOL-Key 4/4",
            KeyMessage::Group1 => "EAPOL-Key group 1/2",
            KeyMessage::Group2 => "EAPOL-Key group 2/2",
        };
        f.write_str(s)
    }
}

/// A bounds-checked view of an EAPOL-Key frame.
#[derive(Debug, Clone, Copy)]
pub struct EapolKey<'a> {
    raw: &'a [u8],
}

impl<'a> EapolKey<'a> {
    /// Parses an EAPOL frame starting at its version byte. Trailing bytes
    /// past the EAPOL length are ignored.
    pub fn parse(eapol: &'a [u8]) -> std::result::Result<Self, ParseError> {
        if eapol.len() < EAPOL_HDR_LEN {
            return Err(ParseError::Truncated {
                needed: EAPOL_HDR_LEN,
                have: eapol.len(),
            });
        }
        if eapol[1] != EAPOL_TYPE_KEY {
            return Err(ParseError::NotEapolKey);
        }
        let body_len = BigEndian::read_u16(&eapol[2..4]) as usize;
        let total = EAPOL_HDR_LEN + body_len;
        if eapol.len() < total {
            return Err(ParseError::Truncated {
                needed: total,
                have: eapol.len(),
            });
        }
        if body_len < KEY_DESC_FIXED_LEN {
            return Err(ParseError::Truncated {
                needed: EAPOL_HDR_LEN + KEY_DESC_FIXED_LEN,
                have: total,
            });
        }
        let raw = &eapol[..total];
        match raw[4] {
            KEY_DESC_TYPE_RSN | KEY_DESC_TYPE_WPA => {}
            _ => return Err(ParseError::Unsupported("key descriptor type")),
        }
        let data_len = BigEndian::read_u16(&raw[OFF_DATA_LEN..OFF_DATA]) as usize;
        if OFF_DATA + data_len > total {
            return Err(ParseError::Truncated {
                needed: OFF_DATA + data_len,
                have: total,
            });
        }
        Ok(EapolKey { raw })
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn descriptor_type(&self) -> u8 {
        self.raw[4]
    }

    pub fn key_info(&self) -> KeyInfo {
        KeyInfo(BigEndian::read_u16(&self.raw[OFF_KEY_INFO..OFF_KEY_LEN]))
    }

    pub fn key_len(&self) -> usize {
        BigEndian::read_u16(&self.raw[OFF_KEY_LEN..OFF_REPLAY]) as usize
    }

    pub fn replay_counter(&self) -> [u8; 8] {
        let mut rc = [0u8; 8];
        rc.copy_from_slice(&self.raw[OFF_REPLAY..OFF_NONCE]);
        rc
    }

    pub fn nonce(&self) -> [u8; WPA_NONCE_LEN] {
        let mut n = [0u8; WPA_NONCE_LEN];
        n.copy_from_slice(&self.raw[OFF_NONCE..OFF_IV]);
        n
    }

    pub fn iv(&self) -> &'a [u8] {
        &self.raw[OFF_IV..OFF_RSC]
    }

    /// Key RSC field, little-endian on the wire.
    pub fn rsc(&self) -> Pn {
        Pn::from_le_slice(&self.raw[OFF_RSC..OFF_RSC + 8])
    }

    pub fn mic(&self) -> [u8; EAPOL_MIC_LEN] {
        let mut m = [0u8; EAPOL_MIC_LEN];
        m.copy_from_slice(&self.raw[OFF_MIC..OFF_MIC + EAPOL_MIC_LEN]);
        m
    }

    pub fn key_data(&self) -> &'a [u8] {
        let len = BigEndian::read_u16(&self.raw[OFF_DATA_LEN..OFF_DATA]) as usize;
        &self.raw[OFF_DATA..OFF_DATA + len]
    }

    pub fn classify(&self) -> KeyMessage {
        let ki = self.key_info();
        match (ki.pairwise(), ki.ack()) {
            (true, true) if ki.install() => KeyMessage::M3,
            (true, true) => KeyMessage::M1,
            (true, false) if self.key_data().is_empty() => KeyMessage::M4,
            (true, false) => KeyMessage::M2,
            (false, true) => KeyMessage::Group1,
            (false, false) => KeyMessage::Group2,
        }
    }

    pub fn fingerprint(&self) -> HandshakeFingerprint {
        HandshakeFingerprint {
            replay_counter: self.replay_counter(),
            snonce: self.nonce(),
            mic: self.mic(),
        }
    }

    /// Checks the MIC under `kck`, recomputed with the MIC field zeroed.
    pub fn verify_mic(&self, kck: &[u8]) -> std::result::Result<(), CryptoError> {
        let mut buf = self.raw.to_vec();
        buf[OFF_MIC..OFF_MIC + EAPOL_MIC_LEN].fill(0);
        let mic = eapol_mic(self.key_info().version(), kck, &buf)?;
        if !constant_time_eq(&mic, &self.mic()) {
            return Err(CryptoError::IntegrityFailure);
        }
        Ok(())
    }

    /// Key data in the clear: RC4 keyed with IV || KEK for descriptor
    /// version 1, AES key unwrap otherwise.
    pub fn decrypt_key_data(&self, kek: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
        let data = self.key_data();
        if !self.key_info().encrypted_key_data() && self.descriptor_type() == KEY_DESC_TYPE_RSN {
            return Ok(data.to_vec());
        }
        match self.key_info().version() {
            KEY_DESC_VER_HMAC_MD5_RC4 => {
                let mut key = Vec::with_capacity(32);
                key.extend_from_slice(self.iv());
                key.extend_from_slice(kek);
                let mut out = data.to_vec();
                rc4_skip(&key, 256, &mut out);
                Ok(out)
            }
            KEY_DESC_VER_HMAC_SHA1_AES | KEY_DESC_VER_AES_128_CMAC => aes_unwrap(kek, data),
            v => Err(CryptoError::UnsupportedKeyVersion(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtkKde<'a> {
    pub index: u8,
    pub tx: bool,
    pub key: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgtkKde<'a> {
    pub key_id: u16,
    pub ipn: Pn,
    pub key: &'a [u8],
}

/// Elements and KDEs found in decrypted key data.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyData<'a> {
    pub rsn_ie: Option<&'a [u8]>,
    pub wpa_ie: Option<&'a [u8]>,
    pub gtk: Option<GtkKde<'a>>,
    pub igtk: Option<IgtkKde<'a>>,
}

/// Walks key data. A vendor element header with zero length marks the
/// start of padding.
pub fn parse_key_data(data: &[u8]) -> std::result::Result<KeyData<'_>, ParseError> {
    let mut out = KeyData::default();
    let mut pos = 0;
    while pos + 2 <= data.len() {
        let id = data[pos];
        let len = data[pos + 1] as usize;
        if id == EID_VENDOR && len == 0 {
            break;
        }
        let end = pos + 2 + len;
        if end > data.len() {
            return Err(ParseError::ElementOverrun { id });
        }
        let body = &data[pos + 2..end];
        match id {
            EID_RSN => out.rsn_ie = Some(&data[pos..end]),
            EID_VENDOR if len >= 4 && body[..3] == KDE_OUI => {
                let kde = &body[4..];
                match body[3] {
                    KDE_GTK if kde.len() > 2 => {
                        out.gtk = Some(GtkKde {
                            index: kde[0] & 0x03,
                            tx: kde[0] & 0x04 != 0,
                            key: &kde[2..],
                        })
                    }
                    KDE_IGTK if kde.len() > 8 => {
                        out.igtk = Some(IgtkKde {
                            key_id: LittleEndian::read_u16(&kde[0..2]),
                            ipn: Pn::from_le_slice(&kde[2..8]),
                            key: &kde[8..],
                        })
                    }
                    KDE_GTK | KDE_IGTK => return Err(ParseError::ElementOverrun { id }),
                    _ => {}
                }
            }
            EID_VENDOR if len >= 4 && body[..3] == WPA_OUI && body[3] == 1 => {
                out.wpa_ie = Some(&data[pos..end])
            }
            _ => {}
        }
        pos = end;
    }
    Ok(out)
}

fn pairwise_cipher(version: u8, negotiated: Cipher) -> DataCipher {
    match version {
        KEY_DESC_VER_HMAC_MD5_RC4 => DataCipher::Tkip,
        _ if negotiated.contains(Cipher::CCMP_256) && !negotiated.contains(Cipher::CCMP) => {
            DataCipher::Ccmp256
        }
        _ => DataCipher::Ccmp,
    }
}

/// Processes one EAPOL frame exchanged between `src` and `dst` inside
/// `bss`. Returns the message kind for EAPOL-Key frames and `None` for
/// other EAPOL packet types. Cryptographic and ordering failures count as
/// station anomalies.
pub fn rx_eapol(
    bss: &mut Bss,
    global_pmks: &[Pmk],
    src: MacAddress,
    dst: MacAddress,
    eapol: &[u8],
) -> Result<Option<KeyMessage>> {
    let key = match EapolKey::parse(eapol) {
        Ok(key) => key,
        Err(ParseError::NotEapolKey) => {
            debug!("{} -> {}: non-key EAPOL frame", src, dst);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let msg = key.classify();
    let from_ap = src == bss.bssid();
    let sta_addr = if from_ap { dst } else { src };
    if !sta_addr.is_real_device() {
        return Err(MonitorError::Protocol(format!(
            "{} with non-unicast station {}",
            msg, sta_addr
        )));
    }
    debug!("{} -> {}: {}", src, dst, msg);

    let result = if msg.from_authenticator() != from_ap {
        Err(MonitorError::Protocol(format!(
            "{} sent in the wrong direction",
            msg
        )))
    } else {
        match msg {
            KeyMessage::M1 => rx_msg1(bss, sta_addr, &key),
            KeyMessage::M2 => rx_msg2(bss, global_pmks, sta_addr, &key),
            KeyMessage::M3 => rx_msg3(bss, sta_addr, &key),
            KeyMessage::M4 => rx_msg4(bss, sta_addr, &key),
            KeyMessage::Group1 => rx_group1(bss, sta_addr, &key),
            KeyMessage::Group2 => rx_group2(bss, sta_addr, &key),
        }
    };

    match result {
        Ok(()) => Ok(Some(msg)),
        Err(e) => {
            if matches!(
                e,
                MonitorError::Protocol(_) | MonitorError::Crypto(_) | MonitorError::MissingKey(_)
            ) {
                warn!("{}: {}: {}", sta_addr, msg, e);
                bss.sta_get(sta_addr).inc(StaCounter::Anomaly);
            }
            Err(e)
        }
    }
}

fn rx_msg1(bss: &mut Bss, sta_addr: MacAddress, key: &EapolKey<'_>) -> Result<()> {
    let sta = bss.sta_get(sta_addr);
    let anonce = key.nonce();
    if sta.anonce == Some(anonce) {
        debug!("{}: ANonce retransmitted", sta_addr);
        sta.inc(StaCounter::Retransmission);
    }
    sta.anonce = Some(anonce);
    Ok(())
}

fn rx_msg2(
    bss: &mut Bss,
    global_pmks: &[Pmk],
    sta_addr: MacAddress,
    key: &EapolKey<'_>,
) -> Result<()> {
    let bssid = bss.bssid();
    let bss_params = bss.params;
    let pmks: Vec<Pmk> = bss.pmks().chain(global_pmks.iter()).copied().collect();
    let sta = bss.sta_get(sta_addr);

    let anonce = sta.anonce.ok_or_else(|| {
        MonitorError::Protocol("message 2/4 without a preceding ANonce".to_string())
    })?;

    let fingerprint = key.fingerprint();
    if sta.last_msg2 == Some(fingerprint) {
        debug!("{}: message 2/4 retransmitted", sta_addr);
        sta.inc(StaCounter::Retransmission);
        return Ok(());
    }

    let snonce = key.nonce();
    sta.snonce = Some(snonce);

    if pmks.is_empty() {
        debug!("{}: no PMK available to derive the PTK", sta_addr);
        return Ok(());
    }

    let version = key.key_info().version();
    let suite = if sta.params.pairwise_cipher.is_empty() {
        bss_params.pairwise_cipher
    } else {
        sta.params.pairwise_cipher
    };
    let akm = if sta.params.key_mgmt.is_empty() {
        bss_params.key_mgmt
    } else {
        sta.params.key_mgmt
    };
    let use_sha256 = version == KEY_DESC_VER_AES_128_CMAC || akm.uses_sha256();
    let cipher = pairwise_cipher(version, suite);

    for pmk in &pmks {
        let ptk = Ptk::derive(pmk, &bssid, &sta_addr, &anonce, &snonce, use_sha256, cipher)?;
        if key.verify_mic(&ptk.kck).is_ok() {
            info!("{}: derived PTK, awaiting message 3/4", sta_addr);
            debug!("{}: PTK {:?}", sta_addr, ptk);
            sta.ptk_state_mut().set_pending(ptk);
            sta.last_msg2 = Some(fingerprint);
            return Ok(());
        }
    }
    Err(CryptoError::IntegrityFailure.into())
}

fn rx_msg3(bss: &mut Bss, sta_addr: MacAddress, key: &EapolKey<'_>) -> Result<()> {
    let descriptor = key.descriptor_type();
    let sta = bss.sta_get(sta_addr);

    let (ptk, fresh) = match (sta.ptk_state().pending(), sta.ptk_state().installed()) {
        (Some(ptk), _) => (ptk.clone(), true),
        (None, Some(ptk)) => (ptk.clone(), false),
        (None, None) => return Err(MonitorError::MissingKey("PTK for message 3/4")),
    };
    key.verify_mic(&ptk.kck)?;

    if let Some(anonce) = sta.anonce {
        if anonce != key.nonce() {
            warn!("{}: message 3/4 ANonce differs from message 1/4", sta_addr);
            sta.inc(StaCounter::Anomaly);
        }
    }

    if fresh {
        sta.ptk_state_mut().install_pending();
        sta.reset_rsc();
        sta.inc(StaCounter::PtkLearned);
        info!("{}: PTK installed", sta_addr);
    } else {
        debug!("{}: message 3/4 retransmitted", sta_addr);
        sta.inc(StaCounter::Retransmission);
    }

    if descriptor != KEY_DESC_TYPE_RSN {
        return Ok(());
    }
    let plain = key.decrypt_key_data(&ptk.kek)?;
    install_group_keys(bss, key, &plain)
}

fn install_group_keys(bss: &mut Bss, key: &EapolKey<'_>, plain: &[u8]) -> Result<()> {
    let kd = parse_key_data(plain)?;
    let bssid = bss.bssid();
    if let Some(gtk) = kd.gtk {
        bss.gtk.install(gtk.index, gtk.key, key.rsc())?;
        info!("{}: GTK[{}] installed", bssid, gtk.index);
        debug!("{}: GTK[{}] {}", bssid, gtk.index, hex::encode(gtk.key));
    }
    if let Some(igtk) = kd.igtk {
        bss.igtk.install(igtk.key_id, igtk.key, igtk.ipn)?;
        info!("{}: IGTK[{}] installed", bssid, igtk.key_id);
        debug!("{}: IGTK[{}] {}", bssid, igtk.key_id, hex::encode(igtk.key));
    }
    Ok(())
}

fn rx_msg4(bss: &mut Bss, sta_addr: MacAddress, key: &EapolKey<'_>) -> Result<()> {
    let sta = bss.sta_get(sta_addr);
    let ptk = sta
        .ptk()
        .cloned()
        .ok_or(MonitorError::MissingKey("PTK for message 4/4"))?;
    key.verify_mic(&ptk.kck)?;
    debug!("{}: 4-way handshake completed", sta_addr);
    Ok(())
}

fn rx_group1(bss: &mut Bss, sta_addr: MacAddress, key: &EapolKey<'_>) -> Result<()> {
    let sta = bss.sta_get(sta_addr);
    let ptk = sta
        .ptk()
        .cloned()
        .ok_or(MonitorError::MissingKey("PTK for group message 1/2"))?;
    key.verify_mic(&ptk.kck)?;
    let plain = key.decrypt_key_data(&ptk.kek)?;

    if key.descriptor_type() == KEY_DESC_TYPE_RSN {
        return install_group_keys(bss, key, &plain);
    }

    // WPA carries the bare GTK; its length is the Key Length field.
    let len = key.key_len();
    if len == 0 || len > plain.len() {
        return Err(ParseError::Truncated {
            needed: len,
            have: plain.len(),
        }
        .into());
    }
    let idx = key.key_info().key_index();
    bss.gtk.install(idx, &plain[..len], key.rsc())?;
    info!("{}: GTK[{}] installed", bss.bssid(), idx);
    Ok(())
}

fn rx_group2(bss: &mut Bss, sta_addr: MacAddress, key: &EapolKey<'_>) -> Result<()> {
    let sta = bss.sta_get(sta_addr);
    let ptk = sta
        .ptk()
        .cloned()
        .ok_or(MonitorError::MissingKey("PTK for group message 2/2"))?;
    key.verify_mic(&ptk.kck)?;
    Ok(())
}

/// Builds an EAPOL-Key frame and, when `kck` is given, fills in its MIC.
/// Used to synthesize handshake traffic.
pub fn build_eapol_key(
    descriptor: u8,
    key_info: u16,
    key_len: u16,
    replay_counter: u64,
    nonce: &[u8; WPA_NONCE_LEN],
    rsc: Pn,
    key_data: &[u8],
    kck: Option<&[u8]>,
) -> std::result::Result<Vec<u8>, CryptoError> {
    let body_len = KEY_DESC_FIXED_LEN + key_data.len();
    let mut f = vec![0u8; EAPOL_HDR_LEN + body_len];
    f[0] = 2;
    f[1] = EAPOL_TYPE_KEY;
    BigEndian::write_u16(&mut f[2..4], body_len as u16);
    f[4] = descriptor;
    BigEndian::write_u16(&mut f[OFF_KEY_INFO..OFF_KEY_LEN], key_info);
    BigEndian::write_u16(&mut f[OFF_KEY_LEN..OFF_REPLAY], key_len);
    BigEndian::write_u64(&mut f[OFF_REPLAY..OFF_NONCE], replay_counter);
    f[OFF_NONCE..OFF_IV].copy_from_slice(nonce);
    f[OFF_RSC..OFF_RSC + 6].copy_from_slice(&rsc.to_le_bytes());
    BigEndian::write_u16(&mut f[OFF_DATA_LEN..OFF_DATA], key_data.len() as u16);
    f[OFF_DATA..].copy_from_slice(key_data);
    if let Some(kck) = kck {
        let mic = eapol_mic(KeyInfo(key_info).version(), kck, &f)?;
        f[OFF_MIC..OFF_MIC + EAPOL_MIC_LEN].copy_from_slice(&mic);
    }
    Ok(f)
}
