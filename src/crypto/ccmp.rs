//! CCMP (AES-CCM) frame protection, 128-bit and 256-bit variants.

use aes::{Aes128, Aes256};
use byteorder::{ByteOrder, LittleEndian};
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit, Payload};
use ccm::consts::{U13, U16, U8};
use ccm::Ccm;

use crate::error::CryptoError;
use crate::ieee80211::{Header, FC_MOREDATA, FC_ORDER, FC_PROTECTED, FC_PWRMGT, FC_RETRY};
use crate::replay::Pn;

pub const CCMP_HDR_LEN: usize = 8;
pub const CCMP_MIC_LEN: usize = 8;
pub const CCMP_256_MIC_LEN: usize = 16;
pub const CCMP_TK_LEN: usize = 16;
pub const CCMP_256_TK_LEN: usize = 32;

type Ccmp128 = Ccm<Aes128, U8, U13>;
type Ccmp256 = Ccm<Aes256, U16, U13>;

const NONCE_LEN: usize = 13;

fn mic_len(tk: &[u8]) -> Result<usize, CryptoError> {
    match tk.len() {
        CCMP_TK_LEN => Ok(CCMP_MIC_LEN),
        CCMP_256_TK_LEN => Ok(CCMP_256_MIC_LEN),
        n => Err(CryptoError::InvalidKeyLength(n)),
    }
}

/// Builds the CCM AAD and nonce for `hdr` and packet number `pn`.
fn aad_nonce(hdr: &Header<'_>, pn: Pn) -> (Vec<u8>, [u8; NONCE_LEN]) {
    let raw = hdr.bytes();
    let fc = hdr.fc();

    let mut masked = fc.0;
    if fc.is_data() {
        masked &= !0x0070;
    }
    masked &= !(FC_RETRY | FC_PWRMGT | FC_MOREDATA);
    masked |= FC_PROTECTED;
    let qos = hdr.qos_control();
    if qos.is_some() {
        masked &= !FC_ORDER;
    }

    let mut aad = Vec::with_capacity(30);
    aad.extend_from_slice(&masked.to_le_bytes());
    aad.extend_from_slice(&raw[4..22]);
    aad.extend_from_slice(&(hdr.seq_ctrl() & 0x000f).to_le_bytes());
    if let Some(a4) = hdr.addr4() {
        aad.extend_from_slice(a4.as_bytes());
    }
    if let Some(qc) = qos {
        aad.extend_from_slice(&[qc[0] & 0x0f, 0x00]);
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = hdr.tid().unwrap_or(0);
    if fc.is_mgmt() {
        nonce[0] |= 0x10;
    }
    nonce[1..7].copy_from_slice(hdr.addr2().as_bytes());
    nonce[7..].copy_from_slice(&pn.to_be_bytes());
    (aad, nonce)
}

/// Extracts the PN from a CCMP header without decrypting.
pub fn get_pn(data: &[u8]) -> Result<Pn, CryptoError> {
    if data.len() < CCMP_HDR_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    if data[3] & 0x20 == 0 {
        return Err(CryptoError::MissingExtIv);
    }
    Ok(Pn::from_be_bytes([
        data[7], data[6], data[5], data[4], data[1], data[0],
    ]))
}

fn seal(tk: &[u8], nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, CryptoError> {
    let nonce = GenericArray::from_slice(nonce);
    match tk.len() {
        CCMP_TK_LEN => Ccmp128::new_from_slice(tk)
            .map_err(|_| CryptoError::InvalidKeyLength(tk.len()))?
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::IntegrityFailure),
        _ => Ccmp256::new_from_slice(tk)
            .map_err(|_| CryptoError::InvalidKeyLength(tk.len()))?
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::IntegrityFailure),
    }
}

fn open(tk: &[u8], nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, CryptoError> {
    let nonce = GenericArray::from_slice(nonce);
    match tk.len() {
        CCMP_TK_LEN => Ccmp128::new_from_slice(tk)
            .map_err(|_| CryptoError::InvalidKeyLength(tk.len()))?
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::IntegrityFailure),
        _ => Ccmp256::new_from_slice(tk)
            .map_err(|_| CryptoError::InvalidKeyLength(tk.len()))?
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::IntegrityFailure),
    }
}

/// Decrypts the protected body `data` (CCMP header onward). Plaintext is
/// returned only when the MIC verifies.
pub fn decrypt(tk: &[u8], hdr: &Header<'_>, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mic = mic_len(tk)?;
    if data.len() < CCMP_HDR_LEN + mic {
        return Err(CryptoError::Truncated(data.len()));
    }
    let pn = get_pn(data)?;
    let (aad, nonce) = aad_nonce(hdr, pn);
    open(
        tk,
        &nonce,
        Payload {
            msg: &data[CCMP_HDR_LEN..],
            aad: &aad,
        },
    )
}

/// Protects an unprotected frame with `pn` and `keyid`. Returns the header
/// with the Protected bit set, the CCMP header, ciphertext and MIC.
pub fn encrypt(tk: &[u8], frame: &[u8], pn: Pn, keyid: u8) -> Result<Vec<u8>, CryptoError> {
    mic_len(tk)?;
    let hdr = Header::parse(frame).map_err(|_| CryptoError::InvalidHeader)?;
    let hdrlen = hdr.len();
    let (aad, nonce) = aad_nonce(&hdr, pn);
    let sealed = seal(
        tk,
        &nonce,
        Payload {
            msg: &frame[hdrlen..],
            aad: &aad,
        },
    )?;

    let p = pn.to_be_bytes();
    let mut out = Vec::with_capacity(hdrlen + CCMP_HDR_LEN + sealed.len());
    out.extend_from_slice(&frame[..hdrlen]);
    let fc = LittleEndian::read_u16(&out[0..2]) | FC_PROTECTED;
    LittleEndian::write_u16(&mut out[0..2], fc);
    out.extend_from_slice(&[
        p[5],
        p[4],
        0x00,
        0x20 | ((keyid & 0x03) << 6),
        p[3],
        p[2],
        p[1],
        p[0],
    ]);
    out.extend_from_slice(&sealed);
    Ok(out)
}
