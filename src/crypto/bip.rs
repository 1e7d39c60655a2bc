//! Broadcast/multicast Integrity Protocol (BIP-CMAC-128) over management
//! frames carrying a Management MIC element (MMIE).

use aes::Aes128;
use byteorder::{ByteOrder, LittleEndian};
use cmac::{Cmac, Mac};

use crate::crypto::kdf::constant_time_eq;
use crate::elements::EID_MMIE;
use crate::error::CryptoError;
use crate::ieee80211::{FC_MOREDATA, FC_PWRMGT, FC_RETRY, MGMT_HDR_LEN};
use crate::replay::Pn;

pub const MMIE_LEN: usize = 2 + 16;
pub const BIP_MIC_LEN: usize = 8;

/// Decoded MMIE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mmie {
    pub key_id: u16,
    pub ipn: Pn,
    pub mic: [u8; BIP_MIC_LEN],
}

/// Reads the MMIE, which must be the final element of the frame.
pub fn parse_mmie(frame: &[u8]) -> Result<Mmie, CryptoError> {
    if frame.len() < MGMT_HDR_LEN + MMIE_LEN {
        return Err(CryptoError::Truncated(frame.len()));
    }
    let mmie = &frame[frame.len() - MMIE_LEN..];
    if mmie[0] != EID_MMIE || mmie[1] != 16 {
        return Err(CryptoError::InvalidHeader);
    }
    let mut mic = [0u8; BIP_MIC_LEN];
    mic.copy_from_slice(&mmie[10..18]);
    Ok(Mmie {
        key_id: LittleEndian::read_u16(&mmie[2..4]),
        ipn: Pn::from_le_slice(&mmie[4..10]),
        mic,
    })
}

fn compute_mic(igtk: &[u8], frame: &[u8]) -> Result<[u8; BIP_MIC_LEN], CryptoError> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(igtk)
        .map_err(|_| CryptoError::InvalidKeyLength(igtk.len()))?;

    let fc = LittleEndian::read_u16(&frame[0..2]) & !(FC_RETRY | FC_PWRMGT | FC_MOREDATA);
    mac.update(&fc.to_le_bytes());
    mac.update(&frame[4..22]);
    let body = &frame[MGMT_HDR_LEN..frame.len() - BIP_MIC_LEN];
    mac.update(body);
    mac.update(&[0u8; BIP_MIC_LEN]);

    let full = mac.finalize().into_bytes();
    let mut mic = [0u8; BIP_MIC_LEN];
    mic.copy_from_slice(&full[..BIP_MIC_LEN]);
    Ok(mic)
}

/// Verifies the MMIE of a received frame and returns it on success.
pub fn verify(igtk: &[u8], frame: &[u8]) -> Result<Mmie, CryptoError> {
    let mmie = parse_mmie(frame)?;
    let mic = compute_mic(igtk, frame)?;
    if !constant_time_eq(&mic, &mmie.mic) {
        return Err(CryptoError::IntegrityFailure);
    }
    Ok(mmie)
}

/// Appends an MMIE for `key_id`/`ipn` to an unprotected management frame.
pub fn protect(igtk: &[u8], key_id: u16, ipn: Pn, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < MGMT_HDR_LEN {
        return Err(CryptoError::Truncated(frame.len()));
    }
    let mut out = Vec::with_capacity(frame.len() + MMIE_LEN);
    out.extend_from_slice(frame);
    out.extend_from_slice(&[EID_MMIE, 16]);
    out.extend_from_slice(&key_id.to_le_bytes());
    out.extend_from_slice(&ipn.to_le_bytes());
    out.extend_from_slice(&[0u8; BIP_MIC_LEN]);
    let mic = compute_mic(igtk, &out)?;
    let at = out.len() - BIP_MIC_LEN;
    out[at..].copy_from_slice(&mic);
    Ok(out)
}
