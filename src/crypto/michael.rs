//! Michael message integrity code (TKIP).

use byteorder::{ByteOrder, LittleEndian};

use crate::mac::MacAddress;

pub const MICHAEL_MIC_LEN: usize = 8;

fn block(mut l: u32, mut r: u32) -> (u32, u32) {
    r ^= l.rotate_left(17);
    l = l.wrapping_add(r);
    r ^= ((l & 0xff00ff00) >> 8) | ((l & 0x00ff00ff) << 8);
    l = l.wrapping_add(r);
    r ^= l.rotate_left(3);
    l = l.wrapping_add(r);
    r ^= l.rotate_right(2);
    l = l.wrapping_add(r);
    (l, r)
}

struct Michael {
    l: u32,
    r: u32,
    pending: [u8; 4],
    pending_len: usize,
}

impl Michael {
    fn new(key: &[u8; 8]) -> Self {
        Michael {
            l: LittleEndian::read_u32(&key[0..4]),
            r: LittleEndian::read_u32(&key[4..8]),
            pending: [0u8; 4],
            pending_len: 0,
        }
    }

    fn word(&mut self, w: u32) {
        self.l ^= w;
        (self.l, self.r) = block(self.l, self.r);
    }

    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.pending[self.pending_len] = b;
            self.pending_len += 1;
            if self.pending_len == 4 {
                let w = LittleEndian::read_u32(&self.pending);
                self.word(w);
                self.pending_len = 0;
            }
        }
    }

    fn finalize(mut self) -> [u8; MICHAEL_MIC_LEN] {
        // 0x5a, zero fill to a word boundary, then one all-zero word.
        let mut last = [0u8; 4];
        last[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
        last[self.pending_len] = 0x5a;
        self.word(LittleEndian::read_u32(&last));
        self.word(0);

        let mut mic = [0u8; MICHAEL_MIC_LEN];
        LittleEndian::write_u32(&mut mic[0..4], self.l);
        LittleEndian::write_u32(&mut mic[4..8], self.r);
        mic
    }
}

/// Raw Michael over an arbitrary message.
pub fn michael(key: &[u8; 8], data: &[u8]) -> [u8; MICHAEL_MIC_LEN] {
    let mut m = Michael::new(key);
    m.update(data);
    m.finalize()
}

/// Michael MIC over an MSDU: DA, SA, priority and three reserved bytes
/// precede the payload.
pub fn michael_mic(
    key: &[u8; 8],
    da: &MacAddress,
    sa: &MacAddress,
    priority: u8,
    data: &[u8],
) -> [u8; MICHAEL_MIC_LEN] {
    let mut m = Michael::new(key);
    m.update(da.as_bytes());
    m.update(sa.as_bytes());
    m.update(&[priority, 0, 0, 0]);
    m.update(data);
    m.finalize()
}
