//! WPA/WPA2 key hierarchy: PMK from passphrase, PTK expansion and the
//! EAPOL-Key MIC for each descriptor version.

use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use md5::Md5;
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::mac::MacAddress;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacMd5 = Hmac<Md5>;
type Aes128Cmac = Cmac<Aes128>;

pub const PMK_LEN: usize = 32;
pub const WPA_NONCE_LEN: usize = 32;
pub const EAPOL_MIC_LEN: usize = 16;

const PTK_LABEL: &[u8] = b"Pairwise key expansion";
const PSK_ITERATIONS: u32 = 4096;

/// EAPOL-Key descriptor versions (low three bits of Key Information).
pub const KEY_DESC_VER_HMAC_MD5_RC4: u8 = 1;
pub const KEY_DESC_VER_HMAC_SHA1_AES: u8 = 2;
pub const KEY_DESC_VER_AES_128_CMAC: u8 = 3;

/// PMK = PBKDF2-HMAC-SHA1(passphrase, SSID, 4096, 256 bits).
pub fn pmk_from_passphrase(passphrase: &str, ssid: &[u8]) -> [u8; PMK_LEN] {
    let mut pmk = [0u8; PMK_LEN];
    pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), ssid, PSK_ITERATIONS, &mut pmk);
    pmk
}

/// IEEE 802.11 PRF built on HMAC-SHA1: label, a zero octet, data and a
/// one-octet counter per 20-byte block.
pub fn prf_sha1(key: &[u8], label: &[u8], data: &[u8], out: &mut [u8]) {
    let mut counter: u8 = 0;
    for chunk in out.chunks_mut(20) {
        // HMAC accepts keys of any length.
        let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
            return;
        };
        mac.update(label);
        mac.update(&[0]);
        mac.update(data);
        mac.update(&[counter]);
        let hash = mac.finalize().into_bytes();
        chunk.copy_from_slice(&hash[..chunk.len()]);
        counter = counter.wrapping_add(1);
    }
}

/// SHA-256 based KDF: i (LE16) || label || data || length in bits (LE16).
pub fn kdf_sha256(key: &[u8], label: &[u8], data: &[u8], out: &mut [u8]) {
    let bits = (out.len() * 8) as u16;
    for (i, chunk) in out.chunks_mut(32).enumerate() {
        let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
            return;
        };
        mac.update(&((i + 1) as u16).to_le_bytes());
        mac.update(label);
        mac.update(data);
        mac.update(&bits.to_le_bytes());
        let hash = mac.finalize().into_bytes();
        chunk.copy_from_slice(&hash[..chunk.len()]);
    }
}

/// Expands a PMK into `ptk_len` bytes of KCK | KEK | TK.
pub fn pmk_to_ptk(
    pmk: &[u8],
    aa: &MacAddress,
    spa: &MacAddress,
    anonce: &[u8; WPA_NONCE_LEN],
    snonce: &[u8; WPA_NONCE_LEN],
    use_sha256: bool,
    ptk_len: usize,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 * 6 + 2 * WPA_NONCE_LEN);
    let (lo, hi) = if aa < spa { (aa, spa) } else { (spa, aa) };
    data.extend_from_slice(lo.as_bytes());
    data.extend_from_slice(hi.as_bytes());
    let (lo, hi) = if anonce < snonce {
        (anonce, snonce)
    } else {
        (snonce, anonce)
    };
    data.extend_from_slice(lo);
    data.extend_from_slice(hi);

    let mut ptk = vec![0u8; ptk_len];
    if use_sha256 {
        kdf_sha256(pmk, PTK_LABEL, &data, &mut ptk);
    } else {
        prf_sha1(pmk, PTK_LABEL, &data, &mut ptk);
    }
    ptk
}

/// EAPOL-Key MIC over `data` (the whole EAPOL frame with the MIC zeroed).
pub fn eapol_mic(ver: u8, kck: &[u8], data: &[u8]) -> Result<[u8; EAPOL_MIC_LEN], CryptoError> {
    let mut mic = [0u8; EAPOL_MIC_LEN];
    match ver {
        KEY_DESC_VER_HMAC_MD5_RC4 => {
            let mut mac = HmacMd5::new_from_slice(kck)
                .map_err(|_| CryptoError::InvalidKeyLength(kck.len()))?;
            mac.update(data);
            mic.copy_from_slice(&mac.finalize().into_bytes());
        }
        KEY_DESC_VER_HMAC_SHA1_AES => {
            let mut mac = HmacSha1::new_from_slice(kck)
                .map_err(|_| CryptoError::InvalidKeyLength(kck.len()))?;
            mac.update(data);
            mic.copy_from_slice(&mac.finalize().into_bytes()[..EAPOL_MIC_LEN]);
        }
        KEY_DESC_VER_AES_128_CMAC => {
            let mut mac = <Aes128Cmac as Mac>::new_from_slice(kck)
                .map_err(|_| CryptoError::InvalidKeyLength(kck.len()))?;
            mac.update(data);
            mic.copy_from_slice(&mac.finalize().into_bytes());
        }
        other => return Err(CryptoError::UnsupportedKeyVersion(other)),
    }
    Ok(mic)
}

/// Constant-time equality for MICs and other authenticators.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
