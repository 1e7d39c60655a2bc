//! TKIP: per-packet key mixing, RC4 encapsulation, CRC32 ICV and Michael.

use byteorder::{ByteOrder, LittleEndian};

use crate::crypto::michael::{michael_mic, MICHAEL_MIC_LEN};
use crate::crypto::rc4::rc4_skip;
use crate::error::CryptoError;
use crate::ieee80211::{Header, FC_PROTECTED};
use crate::mac::MacAddress;
use crate::replay::Pn;

pub const TKIP_TK_LEN: usize = 32;
pub const TKIP_HDR_LEN: usize = 8;
pub const TKIP_ICV_LEN: usize = 4;

const PHASE1_LOOP_COUNT: u16 = 8;

const fn aes_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    let mut p: u8 = 1;
    let mut q: u8 = 1;
    loop {
        p = p ^ (p << 1) ^ if p & 0x80 != 0 { 0x1b } else { 0 };
        q ^= q << 1;
        q ^= q << 2;
        q ^= q << 4;
        if q & 0x80 != 0 {
            q ^= 0x09;
        }
        let x = q ^ q.rotate_left(1) ^ q.rotate_left(2) ^ q.rotate_left(3) ^ q.rotate_left(4);
        sbox[p as usize] = x ^ 0x63;
        if p == 1 {
            break;
        }
    }
    sbox[0] = 0x63;
    sbox
}

const fn xtime(v: u8) -> u8 {
    (v << 1) ^ if v & 0x80 != 0 { 0x1b } else { 0 }
}

/// Key mixing S-box: each entry packs 2*S[i] and 3*S[i] from the AES S-box.
const fn mixing_sbox() -> [u16; 256] {
    let aes = aes_sbox();
    let mut out = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let s = aes[i];
        let s2 = xtime(s);
        out[i] = ((s2 as u16) << 8) | ((s2 ^ s) as u16);
        i += 1;
    }
    out
}

static SBOX: [u16; 256] = mixing_sbox();

fn s(v: u16) -> u16 {
    SBOX[(v & 0xff) as usize] ^ SBOX[(v >> 8) as usize].swap_bytes()
}

fn mk16(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

fn phase1(tk: &[u8], ta: &MacAddress, iv32: u32) -> [u16; 5] {
    let ta = ta.as_bytes();
    let mut ttak = [
        (iv32 & 0xffff) as u16,
        (iv32 >> 16) as u16,
        mk16(ta[1], ta[0]),
        mk16(ta[3], ta[2]),
        mk16(ta[5], ta[4]),
    ];
    for i in 0..PHASE1_LOOP_COUNT {
        let j = 2 * (i as usize & 1);
        ttak[0] = ttak[0].wrapping_add(s(ttak[4] ^ mk16(tk[1 + j], tk[j])));
        ttak[1] = ttak[1].wrapping_add(s(ttak[0] ^ mk16(tk[5 + j], tk[4 + j])));
        ttak[2] = ttak[2].wrapping_add(s(ttak[1] ^ mk16(tk[9 + j], tk[8 + j])));
        ttak[3] = ttak[3].wrapping_add(s(ttak[2] ^ mk16(tk[13 + j], tk[12 + j])));
        ttak[4] = ttak[4]
            .wrapping_add(s(ttak[3] ^ mk16(tk[1 + j], tk[j])))
            .wrapping_add(i);
    }
    ttak
}

fn phase2(tk: &[u8], ttak: &[u16; 5], iv16: u16) -> [u8; 16] {
    let mut ppk = [0u16; 6];
    ppk[..5].copy_from_slice(ttak);
    ppk[5] = ttak[4].wrapping_add(iv16);

    ppk[0] = ppk[0].wrapping_add(s(ppk[5] ^ mk16(tk[1], tk[0])));
    ppk[1] = ppk[1].wrapping_add(s(ppk[0] ^ mk16(tk[3], tk[2])));
    ppk[2] = ppk[2].wrapping_add(s(ppk[1] ^ mk16(tk[5], tk[4])));
    ppk[3] = ppk[3].wrapping_add(s(ppk[2] ^ mk16(tk[7], tk[6])));
    ppk[4] = ppk[4].wrapping_add(s(ppk[3] ^ mk16(tk[9], tk[8])));
    ppk[5] = ppk[5].wrapping_add(s(ppk[4] ^ mk16(tk[11], tk[10])));

    ppk[0] = ppk[0].wrapping_add((ppk[5] ^ mk16(tk[13], tk[12])).rotate_right(1));
    ppk[1] = ppk[1].wrapping_add((ppk[0] ^ mk16(tk[15], tk[14])).rotate_right(1));
    ppk[2] = ppk[2].wrapping_add(ppk[1].rotate_right(1));
    ppk[3] = ppk[3].wrapping_add(ppk[2].rotate_right(1));
    ppk[4] = ppk[4].wrapping_add(ppk[3].rotate_right(1));
    ppk[5] = ppk[5].wrapping_add(ppk[4].rotate_right(1));

    let mut seed = [0u8; 16];
    let [hi, lo] = iv16.to_be_bytes();
    seed[0] = hi;
    seed[1] = (hi | 0x20) & 0x7f;
    seed[2] = lo;
    seed[3] = (((ppk[5] ^ mk16(tk[1], tk[0])) >> 1) & 0xff) as u8;
    for (i, v) in ppk.iter().enumerate() {
        LittleEndian::write_u16(&mut seed[4 + 2 * i..6 + 2 * i], *v);
    }
    seed
}

/// Per-packet RC4 key for transmitter `ta` and sequence counter `tsc`.
pub fn rc4_key(tk: &[u8], ta: &MacAddress, tsc: Pn) -> [u8; 16] {
    let v = tsc.as_u64();
    let iv32 = (v >> 16) as u32;
    let iv16 = (v & 0xffff) as u16;
    phase2(tk, &phase1(tk, ta, iv32), iv16)
}

/// Extracts the TSC from a TKIP header, most significant byte first.
pub fn get_pn(data: &[u8]) -> Result<Pn, CryptoError> {
    if data.len() < TKIP_HDR_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    if data[3] & 0x20 == 0 {
        return Err(CryptoError::MissingExtIv);
    }
    Ok(Pn::from_be_bytes([
        data[7], data[6], data[5], data[4], data[0], data[2],
    ]))
}

fn mic_key(tk: &[u8], hdr: &Header<'_>) -> [u8; 8] {
    let off = if hdr.fc().from_ds() { 16 } else { 24 };
    let mut key = [0u8; 8];
    key.copy_from_slice(&tk[off..off + 8]);
    key
}

fn check_tk(tk: &[u8]) -> Result<(), CryptoError> {
    if tk.len() != TKIP_TK_LEN {
        return Err(CryptoError::InvalidKeyLength(tk.len()));
    }
    Ok(())
}

/// Decrypts the protected body `data` (TKIP header onward) of a frame with
/// header `hdr`. The ICV is checked before the Michael MIC, so the two
/// failures are reported separately.
pub fn decrypt(tk: &[u8], hdr: &Header<'_>, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_tk(tk)?;
    if data.len() < TKIP_HDR_LEN + TKIP_ICV_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    let tsc = get_pn(data)?;
    let key = rc4_key(tk, &hdr.addr2(), tsc);

    let mut plain = data[TKIP_HDR_LEN..].to_vec();
    rc4_skip(&key, 0, &mut plain);

    let icv_at = plain.len() - TKIP_ICV_LEN;
    let rx_icv = LittleEndian::read_u32(&plain[icv_at..]);
    if crc32fast::hash(&plain[..icv_at]) != rx_icv {
        return Err(CryptoError::IcvMismatch);
    }
    plain.truncate(icv_at);

    if plain.len() < MICHAEL_MIC_LEN {
        return Err(CryptoError::Truncated(data.len()));
    }
    let mic_at = plain.len() - MICHAEL_MIC_LEN;
    let mic = michael_mic(
        &mic_key(tk, hdr),
        &hdr.da(),
        &hdr.sa(),
        hdr.tid().unwrap_or(0),
        &plain[..mic_at],
    );
    if mic[..] != plain[mic_at..] {
        return Err(CryptoError::MichaelMicFailure);
    }
    plain.truncate(mic_at);
    Ok(plain)
}

/// Encrypts an unprotected frame into a new buffer. The header is copied
/// with the Protected bit set; the TKIP header and ciphertext follow.
pub fn encrypt(tk: &[u8], frame: &[u8], tsc: Pn, keyid: u8) -> Result<Vec<u8>, CryptoError> {
    check_tk(tk)?;
    let hdr = Header::parse(frame).map_err(|_| CryptoError::InvalidHeader)?;
    let hdrlen = hdr.len();
    let payload = &frame[hdrlen..];

    let mic = michael_mic(
        &mic_key(tk, &hdr),
        &hdr.da(),
        &hdr.sa(),
        hdr.tid().unwrap_or(0),
        payload,
    );
    let mut body = Vec::with_capacity(payload.len() + MICHAEL_MIC_LEN + TKIP_ICV_LEN);
    body.extend_from_slice(payload);
    body.extend_from_slice(&mic);
    let icv = crc32fast::hash(&body);
    body.extend_from_slice(&icv.to_le_bytes());

    let key = rc4_key(tk, &hdr.addr2(), tsc);
    rc4_skip(&key, 0, &mut body);

    let pn = tsc.to_be_bytes();
    let mut out = Vec::with_capacity(hdrlen + TKIP_HDR_LEN + body.len());
    out.extend_from_slice(&frame[..hdrlen]);
    out[1] |= (FC_PROTECTED >> 8) as u8;
    out.extend_from_slice(&[
        pn[4],
        (pn[4] | 0x20) & 0x7f,
        pn[5],
        0x20 | ((keyid & 0x03) << 6),
        pn[3],
        pn[2],
        pn[1],
        pn[0],
    ]);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ieee80211::tests::qos_data_header;
    use rand::{thread_rng, Rng};

    #[test]
    fn sbox_matches_reference_entries() {
        assert_eq!(SBOX[0], 0xc6a5);
        assert_eq!(SBOX[1], 0xf884);
        assert_eq!(SBOX[255], 0x2c3a);
    }

    #[test]
    fn per_packet_key_known_answer() {
        let tk = hex::decode("12345678901234567890123456789012").unwrap();
        let ta = MacAddress([0x10, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(
            hex::encode(rc4_key(&tk, &ta, Pn::ZERO)),
            "002000c0de810afe1205d7b05f18927f"
        );
        assert_eq!(
            hex::encode(rc4_key(&tk, &ta, Pn::from_u64(1))),
            "002001f0e4abca34b7476aa25634f221"
        );
    }

    #[test]
    fn mpdu_known_answer() {
        let tk = hex::decode(
            "12345678901234567890123456789012a1a2a3a4a5a6a7a8b1b2b3b4b5b6b7b8",
        )
        .unwrap();
        let mut frame = hex::decode("080100000203040506071022334455660203040506081000").unwrap();
        let payload =
            hex::decode("aaaa030000000800450000140001000040060000c0a80001c0a80002").unwrap();
        frame.extend_from_slice(&payload);

        let enc = encrypt(&tk, &frame, Pn::from_u64(1), 0).unwrap();
        assert_eq!(
            hex::encode(&enc),
            "084100000203040506071022334455660203040506081000\
             0020012000000000\
             58b1dd7519ae6ff14baa8b91a3333f29100de6bd31d446f650bc9f07\
             d104fbd2ae50566a\
             8da9f785"
        );

        let hdr = Header::parse(&enc).unwrap();
        assert_eq!(decrypt(&tk, &hdr, &enc[hdr.len()..]).unwrap(), payload);
    }

    #[test]
    fn round_trip_and_pn() {
        let mut rng = thread_rng();
        let tk: [u8; 32] = rng.gen();
        let mut frame = qos_data_header();
        let payload: Vec<u8> = (0..77).map(|_| rng.gen()).collect();
        frame.extend_from_slice(&payload);

        let tsc = Pn::from_u64(0x0102_0304_0506);
        let enc = encrypt(&tk, &frame, tsc, 1).unwrap();
        let hdr = Header::parse(&enc).unwrap();
        assert!(hdr.fc().protected());
        let body = &enc[hdr.len()..];
        assert_eq!(get_pn(body).unwrap(), tsc);
        assert_eq!(body[3] >> 6, 1);
        assert_eq!(decrypt(&tk, &hdr, body).unwrap(), payload);
    }

    #[test]
    fn distinguishes_icv_from_michael_failure() {
        let tk = [0x11u8; 32];
        let mut frame = qos_data_header();
        frame.extend_from_slice(b"some payload bytes");
        let enc = encrypt(&tk, &frame, Pn::from_u64(1), 0).unwrap();
        let hdr = Header::parse(&enc).unwrap();

        let mut flipped = enc[hdr.len()..].to_vec();
        flipped[TKIP_HDR_LEN] ^= 0x01;
        assert_eq!(
            decrypt(&tk, &hdr, &flipped),
            Err(CryptoError::IcvMismatch)
        );

        // Same TK/TA/TSC but the receiving side uses the other Michael key.
        let mut wrong_mic_key = tk;
        wrong_mic_key[24] ^= 0xff;
        assert_eq!(
            decrypt(&wrong_mic_key, &hdr, &enc[hdr.len()..]),
            Err(CryptoError::MichaelMicFailure)
        );
    }

    #[test]
    fn rejects_short_and_non_extiv() {
        assert_eq!(get_pn(&[0u8; 4]), Err(CryptoError::Truncated(4)));
        assert_eq!(get_pn(&[0u8; 8]), Err(CryptoError::MissingExtIv));
    }
}
