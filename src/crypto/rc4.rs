//! RC4 stream cipher, used by TKIP and by descriptor version 1 key data.

pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Runs the key schedule. `key` must not be empty.
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, j as usize);
            }
        }
        Rc4 { s, i: 0, j: 0 }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[idx as usize]
    }

    /// Discards the first `n` keystream bytes.
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.next_byte();
        }
    }

    /// XORs the keystream into `data` in place.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b ^= self.next_byte();
        }
    }
}

/// One-shot helper: `skip` keystream bytes, then encrypt/decrypt `data`.
pub fn rc4_skip(key: &[u8], skip: usize, data: &mut [u8]) {
    let mut rc4 = Rc4::new(key);
    rc4.skip(skip);
    rc4.apply_keystream(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_answer() {
        let mut data = *b"Plaintext";
        rc4_skip(b"Key", 0, &mut data);
        assert_eq!(hex::encode(data), "bbf316e8d940af0ad3");

        rc4_skip(b"Key", 0, &mut data);
        assert_eq!(&data, b"Plaintext");
    }

    #[test]
    fn skip_matches_discarded_prefix() {
        let mut full = [0u8; 300];
        rc4_skip(b"Secret", 0, &mut full);
        let mut tail = [0u8; 44];
        rc4_skip(b"Secret", 256, &mut tail);
        assert_eq!(&full[256..], &tail[..]);
    }
}
