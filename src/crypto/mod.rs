//! Frame and key cryptography.

pub mod bip;
pub mod ccmp;
pub mod kdf;
pub mod keywrap;
pub mod michael;
pub mod rc4;
pub mod tkip;

use crate::elements::Cipher;
use crate::error::CryptoError;
use crate::ieee80211::Header;
use crate::replay::Pn;

/// Data confidentiality protocol used to protect a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCipher {
    Ccmp,
    Ccmp256,
    Tkip,
}

impl DataCipher {
    /// Picks the strongest supported protocol out of a negotiated set.
    pub fn from_suite(cipher: Cipher) -> Option<Self> {
        if cipher.contains(Cipher::CCMP_256) {
            Some(DataCipher::Ccmp256)
        } else if cipher.contains(Cipher::CCMP) {
            Some(DataCipher::Ccmp)
        } else if cipher.contains(Cipher::TKIP) {
            Some(DataCipher::Tkip)
        } else {
            None
        }
    }

    pub fn tk_len(self) -> usize {
        match self {
            DataCipher::Ccmp => ccmp::CCMP_TK_LEN,
            DataCipher::Ccmp256 => ccmp::CCMP_256_TK_LEN,
            DataCipher::Tkip => tkip::TKIP_TK_LEN,
        }
    }

    /// Picks the protocol from the length of the key it will be used with.
    /// TKIP and CCMP-256 share a length, so the negotiated suite decides.
    pub fn for_key(tk: &[u8], negotiated: Cipher) -> Option<Self> {
        match (tk.len(), Self::from_suite(negotiated)) {
            (ccmp::CCMP_TK_LEN, _) => Some(DataCipher::Ccmp),
            (32, Some(DataCipher::Tkip)) => Some(DataCipher::Tkip),
            (32, _) => Some(DataCipher::Ccmp256),
            _ => None,
        }
    }

    pub fn get_pn(self, data: &[u8]) -> Result<Pn, CryptoError> {
        match self {
            DataCipher::Ccmp | DataCipher::Ccmp256 => ccmp::get_pn(data),
            DataCipher::Tkip => tkip::get_pn(data),
        }
    }

    pub fn decrypt(self, tk: &[u8], hdr: &Header<'_>, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            DataCipher::Ccmp | DataCipher::Ccmp256 => ccmp::decrypt(tk, hdr, data),
            DataCipher::Tkip => tkip::decrypt(tk, hdr, data),
        }
    }

    pub fn encrypt(self, tk: &[u8], frame: &[u8], pn: Pn, keyid: u8) -> Result<Vec<u8>, CryptoError> {
        match self {
            DataCipher::Ccmp | DataCipher::Ccmp256 => ccmp::encrypt(tk, frame, pn, keyid),
            DataCipher::Tkip => tkip::encrypt(tk, frame, pn, keyid),
        }
    }
}

/// Key ID carried in the fourth byte of a CCMP or TKIP header.
pub fn key_id(data: &[u8]) -> Option<u8> {
    data.get(3).map(|b| b >> 6)
}
