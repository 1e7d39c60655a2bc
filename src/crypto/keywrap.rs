//! AES Key Wrap (RFC 3394), used to protect EAPOL-Key data.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};

use crate::error::CryptoError;

const DEFAULT_IV: [u8; 8] = [0xa6; 8];

enum Kek {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl Kek {
    fn new(kek: &[u8]) -> Result<Self, CryptoError> {
        match kek.len() {
            16 => Aes128::new_from_slice(kek)
                .map(Kek::Aes128)
                .map_err(|_| CryptoError::InvalidKeyLength(kek.len())),
            32 => Aes256::new_from_slice(kek)
                .map(Kek::Aes256)
                .map_err(|_| CryptoError::InvalidKeyLength(kek.len())),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    fn encrypt(&self, block: &mut [u8; 16]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            Kek::Aes128(c) => c.encrypt_block(b),
            Kek::Aes256(c) => c.encrypt_block(b),
        }
    }

    fn decrypt(&self, block: &mut [u8; 16]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            Kek::Aes128(c) => c.decrypt_block(b),
            Kek::Aes256(c) => c.decrypt_block(b),
        }
    }
}

/// Unwraps `cipher` (n + 1 64-bit blocks) and checks the integrity value.
pub fn aes_unwrap(kek: &[u8], cipher: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if cipher.len() < 24 || cipher.len() % 8 != 0 {
        return Err(CryptoError::Truncated(cipher.len()));
    }
    let aes = Kek::new(kek)?;
    let n = cipher.len() / 8 - 1;

    let mut a = [0u8; 8];
    a.copy_from_slice(&cipher[..8]);
    let mut r = cipher[8..].to_vec();

    let mut block = [0u8; 16];
    for j in (0..6).rev() {
        for i in (1..=n).rev() {
            let t = (n * j + i) as u64;
            for (x, y) in a.iter_mut().zip(t.to_be_bytes()) {
                *x ^= y;
            }
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(&r[(i - 1) * 8..i * 8]);
            aes.decrypt(&mut block);
            a.copy_from_slice(&block[..8]);
            r[(i - 1) * 8..i * 8].copy_from_slice(&block[8..]);
        }
    }

    if a != DEFAULT_IV {
        return Err(CryptoError::UnwrapFailure);
    }
    Ok(r)
}

/// Wraps `plain` (a multiple of 8 bytes, at least 16).
pub fn aes_wrap(kek: &[u8], plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plain.len() < 16 || plain.len() % 8 != 0 {
        return Err(CryptoError::Truncated(plain.len()));
    }
    let aes = Kek::new(kek)?;
    let n = plain.len() / 8;

    let mut a = DEFAULT_IV;
    let mut r = plain.to_vec();
    let mut block = [0u8; 16];
    for j in 0..6 {
        for i in 1..=n {
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(&r[(i - 1) * 8..i * 8]);
            aes.encrypt(&mut block);
            a.copy_from_slice(&block[..8]);
            let t = (n * j + i) as u64;
            for (x, y) in a.iter_mut().zip(t.to_be_bytes()) {
                *x ^= y;
            }
            r[(i - 1) * 8..i * 8].copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(8 + r.len());
    out.extend_from_slice(&a);
    out.extend_from_slice(&r);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3394_128_bit_kek() {
        let kek = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let data = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let wrapped = aes_wrap(&kek, &data).unwrap();
        assert_eq!(
            hex::encode(&wrapped),
            "1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe5"
        );
        assert_eq!(aes_unwrap(&kek, &wrapped).unwrap(), data);
    }

    #[test]
    fn detects_corruption() {
        let kek = [0x5au8; 16];
        let mut wrapped = aes_wrap(&kek, &[0x11u8; 32]).unwrap();
        wrapped[10] ^= 0x01;
        assert_eq!(aes_unwrap(&kek, &wrapped), Err(CryptoError::UnwrapFailure));
        assert_eq!(aes_unwrap(&kek, &[0u8; 20]), Err(CryptoError::Truncated(20)));
    }
}
