//! Information element parsing and the RSN/WPA security summary.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::error::ParseError;

pub const EID_SSID: u8 = 0;
pub const EID_DS_PARAMS: u8 = 3;
pub const EID_RSN: u8 = 48;
pub const EID_MMIE: u8 = 76;
pub const EID_VENDOR: u8 = 221;

pub const MAX_SSID_LEN: usize = 32;
/// Element header plus the largest possible element body.
pub const MAX_IE_LEN: usize = 2 + 255;

const RSN_OUI: [u8; 3] = [0x00, 0x0f, 0xac];
const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
const WPA_OUI_TYPE: u8 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Proto: u8 {
        const WPA = 0x01;
        const RSN = 0x02;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Cipher: u16 {
        const NONE = 0x0001;
        const WEP40 = 0x0002;
        const WEP104 = 0x0004;
        const TKIP = 0x0008;
        const CCMP = 0x0010;
        const BIP_CMAC_128 = 0x0020;
        const GCMP = 0x0040;
        const CCMP_256 = 0x0080;
        const GCMP_256 = 0x0100;
        const BIP_GMAC_128 = 0x0200;
        const BIP_GMAC_256 = 0x0400;
        const BIP_CMAC_256 = 0x0800;
        const GROUP_NOT_ALLOWED = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct KeyMgmt: u16 {
        const IEEE8021X = 0x0001;
        const PSK = 0x0002;
        const FT_IEEE8021X = 0x0004;
        const FT_PSK = 0x0008;
        const IEEE8021X_SHA256 = 0x0010;
        const PSK_SHA256 = 0x0020;
        const SAE = 0x0040;
        const FT_SAE = 0x0080;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct RsnCapab: u16 {
        const PREAUTH = 0x0001;
        const NO_PAIRWISE = 0x0002;
        const MFPR = 0x0040;
        const MFPC = 0x0080;
    }
}

impl KeyMgmt {
    /// AKMs whose PTK derivation uses the SHA-256 KDF.
    pub fn uses_sha256(self) -> bool {
        self.intersects(
            KeyMgmt::IEEE8021X_SHA256
                | KeyMgmt::PSK_SHA256
                | KeyMgmt::SAE
                | KeyMgmt::FT_IEEE8021X
                | KeyMgmt::FT_PSK
                | KeyMgmt::FT_SAE,
        )
    }
}

/// Owned byte buffer with a fixed upper bound; longer input is rejected.
#[derive(Clone)]
pub struct BoundedBytes<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for BoundedBytes<N> {
    fn default() -> Self {
        BoundedBytes {
            buf: [0u8; N],
            len: 0,
        }
    }
}

impl<const N: usize> BoundedBytes<N> {
    pub fn from_slice(data: &[u8]) -> Result<Self, ParseError> {
        let mut out = Self::default();
        out.set(data)?;
        Ok(out)
    }

    pub fn set(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if data.len() > N {
            return Err(ParseError::TooLong {
                len: data.len(),
                max: N,
            });
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> PartialEq for BoundedBytes<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const N: usize> Eq for BoundedBytes<N> {}

impl<const N: usize> std::fmt::Debug for BoundedBytes<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_slice()))
    }
}

pub type Ssid = BoundedBytes<MAX_SSID_LEN>;
pub type IeCopy = BoundedBytes<MAX_IE_LEN>;

/// Elements this monitor cares about. `rsn_ie` and `wpa_ie` include their
/// two-byte element header so they can be stored verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct Elements<'a> {
    pub ssid: Option<&'a [u8]>,
    pub ds_channel: Option<u8>,
    pub rsn_ie: Option<&'a [u8]>,
    pub wpa_ie: Option<&'a [u8]>,
    pub mmie: Option<&'a [u8]>,
}

/// Walks a sequence of information elements. Any element whose length runs
/// past the end of the buffer fails the whole parse.
pub fn parse_elements(data: &[u8]) -> Result<Elements<'_>, ParseError> {
    let mut elems = Elements::default();
    let mut pos = 0;
    while pos < data.len() {
        if pos + 2 > data.len() {
            return Err(ParseError::Truncated {
                needed: pos + 2,
                have: data.len(),
            });
        }
        let id = data[pos];
        let len = data[pos + 1] as usize;
        let end = pos + 2 + len;
        if end > data.len() {
            return Err(ParseError::ElementOverrun { id });
        }
        let body = &data[pos + 2..end];
        match id {
            EID_SSID => elems.ssid = Some(body),
            EID_DS_PARAMS if len == 1 => elems.ds_channel = Some(body[0]),
            EID_RSN => elems.rsn_ie = Some(&data[pos..end]),
            EID_MMIE => elems.mmie = Some(body),
            EID_VENDOR if len >= 4 && body[..3] == WPA_OUI && body[3] == WPA_OUI_TYPE => {
                elems.wpa_ie = Some(&data[pos..end])
            }
            _ => {}
        }
        pos = end;
    }
    Ok(elems)
}

/// Negotiated or advertised security parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityParams {
    pub proto: Proto,
    pub pairwise_cipher: Cipher,
    pub group_cipher: Cipher,
    pub mgmt_group_cipher: Cipher,
    pub key_mgmt: KeyMgmt,
    pub rsn_capab: RsnCapab,
}

impl SecurityParams {
    pub fn merge(&mut self, ie: &IeData) {
        self.proto |= ie.proto;
        self.pairwise_cipher |= ie.pairwise_cipher;
        self.group_cipher |= ie.group_cipher;
        self.mgmt_group_cipher |= ie.mgmt_group_cipher;
        self.key_mgmt |= ie.key_mgmt;
        self.rsn_capab |= ie.capabilities;
    }

    pub fn mfp_capable(&self) -> bool {
        self.rsn_capab.contains(RsnCapab::MFPC)
    }

    pub fn mfp_required(&self) -> bool {
        self.rsn_capab.contains(RsnCapab::MFPR)
    }
}

/// Decoded RSN or WPA element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IeData {
    pub proto: Proto,
    pub pairwise_cipher: Cipher,
    pub group_cipher: Cipher,
    pub mgmt_group_cipher: Cipher,
    pub key_mgmt: KeyMgmt,
    pub capabilities: RsnCapab,
    pub num_pmkid: usize,
}

fn rsn_cipher(suite: &[u8]) -> Cipher {
    if suite[..3] != RSN_OUI {
        return Cipher::empty();
    }
    match suite[3] {
        0 => Cipher::NONE,
        1 => Cipher::WEP40,
        2 => Cipher::TKIP,
        4 => Cipher::CCMP,
        5 => Cipher::WEP104,
        6 => Cipher::BIP_CMAC_128,
        7 => Cipher::GROUP_NOT_ALLOWED,
        8 => Cipher::GCMP,
        9 => Cipher::GCMP_256,
        10 => Cipher::CCMP_256,
        11 => Cipher::BIP_GMAC_128,
        12 => Cipher::BIP_GMAC_256,
        13 => Cipher::BIP_CMAC_256,
        _ => Cipher::empty(),
    }
}

fn rsn_akm(suite: &[u8]) -> KeyMgmt {
    if suite[..3] != RSN_OUI {
        return KeyMgmt::empty();
    }
    match suite[3] {
        1 => KeyMgmt::IEEE8021X,
        2 => KeyMgmt::PSK,
        3 => KeyMgmt::FT_IEEE8021X,
        4 => KeyMgmt::FT_PSK,
        5 => KeyMgmt::IEEE8021X_SHA256,
        6 => KeyMgmt::PSK_SHA256,
        8 => KeyMgmt::SAE,
        9 => KeyMgmt::FT_SAE,
        _ => KeyMgmt::empty(),
    }
}

fn wpa_cipher(suite: &[u8]) -> Cipher {
    if suite[..3] != WPA_OUI {
        return Cipher::empty();
    }
    match suite[3] {
        0 => Cipher::NONE,
        1 => Cipher::WEP40,
        2 => Cipher::TKIP,
        4 => Cipher::CCMP,
        5 => Cipher::WEP104,
        _ => Cipher::empty(),
    }
}

fn wpa_akm(suite: &[u8]) -> KeyMgmt {
    if suite[..3] != WPA_OUI {
        return KeyMgmt::empty();
    }
    match suite[3] {
        1 => KeyMgmt::IEEE8021X,
        2 => KeyMgmt::PSK,
        _ => KeyMgmt::empty(),
    }
}

/// Cursor over the suite lists shared by RSN and WPA elements.
struct SuiteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SuiteReader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(LittleEndian::read_u16)
    }

    /// Reads a counted list of suites. A count that runs past the element is
    /// an error rather than a silent truncation.
    fn suites<T: Default + std::ops::BitOrAssign>(
        &mut self,
        what: &'static str,
        map: fn(&[u8]) -> T,
    ) -> Result<Option<T>, ParseError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let count = self.u16().ok_or(ParseError::SuiteList(what))? as usize;
        if count == 0 || count * 4 > self.remaining() {
            return Err(ParseError::SuiteList(what));
        }
        let mut out = T::default();
        for _ in 0..count {
            let suite = self.take(4).ok_or(ParseError::SuiteList(what))?;
            out |= map(suite);
        }
        Ok(Some(out))
    }
}

/// Parses a complete RSN (id 48) or WPA (vendor 00:50:f2/1) element,
/// header included. Missing trailing fields take the standard defaults.
pub fn parse_wpa_ie(ie: &[u8]) -> Result<IeData, ParseError> {
    if ie.len() < 2 {
        return Err(ParseError::Truncated {
            needed: 2,
            have: ie.len(),
        });
    }
    let len = ie[1] as usize;
    if ie.len() < 2 + len {
        return Err(ParseError::ElementOverrun { id: ie[0] });
    }
    let body = &ie[2..2 + len];
    match ie[0] {
        EID_RSN => parse_rsn_body(body),
        EID_VENDOR => parse_wpa_body(body),
        _ => Err(ParseError::Unsupported("security element")),
    }
}

fn parse_rsn_body(body: &[u8]) -> Result<IeData, ParseError> {
    let mut rd = SuiteReader { data: body, pos: 0 };
    let version = rd.u16().ok_or(ParseError::Truncated {
        needed: 2,
        have: body.len(),
    })?;
    if version != 1 {
        return Err(ParseError::Version(version));
    }

    let mut data = IeData {
        proto: Proto::RSN,
        pairwise_cipher: Cipher::CCMP,
        group_cipher: Cipher::CCMP,
        key_mgmt: KeyMgmt::IEEE8021X,
        ..Default::default()
    };

    if rd.remaining() == 0 {
        return Ok(data);
    }
    data.group_cipher = rd
        .take(4)
        .map(rsn_cipher)
        .ok_or(ParseError::SuiteList("group"))?;

    if let Some(pairwise) = rd.suites("pairwise", rsn_cipher)? {
        data.pairwise_cipher = pairwise;
    }
    if let Some(akm) = rd.suites("key management", rsn_akm)? {
        data.key_mgmt = akm;
    }
    if let Some(capab) = rd.u16() {
        data.capabilities = RsnCapab::from_bits_truncate(capab);
    }
    if data.capabilities.contains(RsnCapab::MFPC) {
        data.mgmt_group_cipher = Cipher::BIP_CMAC_128;
    }
    if let Some(count) = rd.u16() {
        let count = count as usize;
        rd.take(count * 16).ok_or(ParseError::SuiteList("PMKID"))?;
        data.num_pmkid = count;
    }
    if let Some(suite) = rd.take(4) {
        data.mgmt_group_cipher = rsn_cipher(suite);
    }
    Ok(data)
}

fn parse_wpa_body(body: &[u8]) -> Result<IeData, ParseError> {
    let mut rd = SuiteReader { data: body, pos: 0 };
    let header = rd.take(4).ok_or(ParseError::Truncated {
        needed: 4,
        have: body.len(),
    })?;
    if header[..3] != WPA_OUI || header[3] != WPA_OUI_TYPE {
        return Err(ParseError::Unsupported("vendor element"));
    }
    let version = rd.u16().ok_or(ParseError::Truncated {
        needed: 6,
        have: body.len(),
    })?;
    if version != 1 {
        return Err(ParseError::Version(version));
    }

    let mut data = IeData {
        proto: Proto::WPA,
        pairwise_cipher: Cipher::TKIP,
        group_cipher: Cipher::TKIP,
        key_mgmt: KeyMgmt::IEEE8021X,
        ..Default::default()
    };

    if rd.remaining() == 0 {
        return Ok(data);
    }
    data.group_cipher = rd
        .take(4)
        .map(wpa_cipher)
        .ok_or(ParseError::SuiteList("group"))?;
    if let Some(pairwise) = rd.suites("pairwise", wpa_cipher)? {
        data.pairwise_cipher = pairwise;
    }
    if let Some(akm) = rd.suites("key management", wpa_akm)? {
        data.key_mgmt = akm;
    }
    Ok(data)
}

/// RSN element advertising the given group/pairwise cipher and a single AKM.
pub fn build_rsn_ie(group: u8, pairwise: u8, akm: u8, capab: u16) -> Vec<u8> {
    let mut ie = vec![EID_RSN, 20, 0x01, 0x00];
    ie.extend_from_slice(&RSN_OUI);
    ie.push(group);
    ie.extend_from_slice(&[0x01, 0x00]);
    ie.extend_from_slice(&RSN_OUI);
    ie.push(pairwise);
    ie.extend_from_slice(&[0x01, 0x00]);
    ie.extend_from_slice(&RSN_OUI);
    ie.push(akm);
    ie.extend_from_slice(&capab.to_le_bytes());
    ie
}
