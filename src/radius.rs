//! RADIUS boundary: packet decoding and MS-MPPE key recovery (RFC 2548).

use byteorder::{BigEndian, ByteOrder};
use md5::{Digest, Md5};

use crate::error::ParseError;

pub const RADIUS_HDR_LEN: usize = 20;
pub const RADIUS_AUTH_LEN: usize = 16;

pub const CODE_ACCESS_REQUEST: u8 = 1;
pub const CODE_ACCESS_ACCEPT: u8 = 2;

const ATTR_VENDOR_SPECIFIC: u8 = 26;
const VENDOR_MICROSOFT: u32 = 311;
const MS_MPPE_SEND_KEY: u8 = 16;
const MS_MPPE_RECV_KEY: u8 = 17;

/// A decoded RADIUS packet.
#[derive(Debug, Clone, Copy)]
pub struct RadiusPacket<'a> {
    raw: &'a [u8],
}

impl<'a> RadiusPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < RADIUS_HDR_LEN {
            return Err(ParseError::Truncated {
                needed: RADIUS_HDR_LEN,
                have: data.len(),
            });
        }
        let len = BigEndian::read_u16(&data[2..4]) as usize;
        if len < RADIUS_HDR_LEN || len > data.len() {
            return Err(ParseError::Truncated {
                needed: len.max(RADIUS_HDR_LEN),
                have: data.len(),
            });
        }
        Ok(RadiusPacket { raw: &data[..len] })
    }

    pub fn code(&self) -> u8 {
        self.raw[0]
    }

    pub fn identifier(&self) -> u8 {
        self.raw[1]
    }

    pub fn authenticator(&self) -> [u8; RADIUS_AUTH_LEN] {
        let mut a = [0u8; RADIUS_AUTH_LEN];
        a.copy_from_slice(&self.raw[4..RADIUS_HDR_LEN]);
        a
    }

    /// Attributes as (type, value). Iteration stops at the first
    /// malformed attribute.
    pub fn attributes(&self) -> impl Iterator<Item = (u8, &'a [u8])> {
        let mut rest = &self.raw[RADIUS_HDR_LEN..];
        std::iter::from_fn(move || {
            if rest.len() < 2 {
                return None;
            }
            let len = rest[1] as usize;
            if len < 2 || len > rest.len() {
                return None;
            }
            let attr = (rest[0], &rest[2..len]);
            rest = &rest[len..];
            Some(attr)
        })
    }

    /// Microsoft vendor-specific sub-attribute `vtype`.
    pub fn ms_attribute(&self, vtype: u8) -> Option<&'a [u8]> {
        self.attributes()
            .filter(|(t, v)| {
                *t == ATTR_VENDOR_SPECIFIC
                    && v.len() > 6
                    && BigEndian::read_u32(&v[0..4]) == VENDOR_MICROSOFT
            })
            .find_map(|(_, v)| {
                let len = v[5] as usize;
                (v[4] == vtype && len >= 2 && 4 + len <= v.len()).then(|| &v[6..4 + len])
            })
    }

    /// Checks the Response Authenticator against the authenticator of the
    /// matching request.
    pub fn verify_response(&self, req_auth: &[u8; RADIUS_AUTH_LEN], secret: &[u8]) -> bool {
        let mut md5 = Md5::new();
        md5.update(&self.raw[..4]);
        md5.update(req_auth);
        md5.update(&self.raw[RADIUS_HDR_LEN..]);
        md5.update(secret);
        md5.finalize().as_slice() == &self.raw[4..RADIUS_HDR_LEN]
    }

    /// MSK from an Access-Accept: MS-MPPE-Recv-Key followed by
    /// MS-MPPE-Send-Key.
    pub fn msk(&self, req_auth: &[u8; RADIUS_AUTH_LEN], secret: &[u8]) -> Option<Vec<u8>> {
        let recv = decrypt_mppe_key(self.ms_attribute(MS_MPPE_RECV_KEY)?, req_auth, secret)?;
        let send = decrypt_mppe_key(self.ms_attribute(MS_MPPE_SEND_KEY)?, req_auth, secret)?;
        let mut msk = recv;
        msk.extend_from_slice(&send);
        Some(msk)
    }
}

/// Decrypts an MS-MPPE-Send/Recv-Key value (salt followed by the encrypted
/// string). Returns `None` for malformed values or an impossible key length.
pub fn decrypt_mppe_key(
    value: &[u8],
    req_auth: &[u8; RADIUS_AUTH_LEN],
    secret: &[u8],
) -> Option<Vec<u8>> {
    if value.len() < 2 + 16 || (value.len() - 2) % 16 != 0 {
        return None;
    }
    let (salt, cipher) = value.split_at(2);
    // Salt must have the high bit set.
    if salt[0] & 0x80 == 0 {
        return None;
    }

    let mut plain = Vec::with_capacity(cipher.len());
    let mut prev: Vec<u8> = [req_auth.as_slice(), salt].concat();
    for block in cipher.chunks(16) {
        let mut md5 = Md5::new();
        md5.update(secret);
        md5.update(&prev);
        let b = md5.finalize();
        plain.extend(block.iter().zip(b.iter()).map(|(c, k)| c ^ k));
        prev = block.to_vec();
    }

    let key_len = plain[0] as usize;
    if key_len == 0 || key_len > plain.len() - 1 {
        return None;
    }
    Some(plain[1..1 + key_len].to_vec())
}
