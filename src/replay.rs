//! Packet numbers and receive sequence counters.
//!
//! PNs are kept as 6 big-endian bytes so that the derived ordering of the
//! byte array matches the numeric ordering of the 48-bit counter.

use std::fmt;

use crate::error::MonitorError;

pub const PN_LEN: usize = 6;

/// 16 QoS traffic identifiers plus one slot for non-QoS data and robust
/// management frames.
pub const RSC_SLOTS: usize = 16 + 1;
pub const LEGACY_SLOT: usize = 16;

const PN_MAX: u64 = (1 << 48) - 1;

/// 48-bit CCMP packet number / TKIP sequence counter.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pn([u8; PN_LEN]);

impl Pn {
    pub const ZERO: Pn = Pn([0u8; PN_LEN]);

    pub fn from_be_bytes(bytes: [u8; PN_LEN]) -> Self {
        Pn(bytes)
    }

    /// Key RSC fields and MMIE IPNs are carried little-endian on the wire.
    /// Only the first six bytes are significant.
    pub fn from_le_slice(bytes: &[u8]) -> Self {
        let mut pn = [0u8; PN_LEN];
        for (i, b) in bytes.iter().take(PN_LEN).enumerate() {
            pn[PN_LEN - 1 - i] = *b;
        }
        Pn(pn)
    }

    pub fn from_u64(value: u64) -> Self {
        let be = (value & PN_MAX).to_be_bytes();
        let mut pn = [0u8; PN_LEN];
        pn.copy_from_slice(&be[2..]);
        Pn(pn)
    }

    pub fn as_u64(&self) -> u64 {
        let mut be = [0u8; 8];
        be[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(be)
    }

    pub fn to_be_bytes(self) -> [u8; PN_LEN] {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; PN_LEN] {
        let mut le = self.0;
        le.reverse();
        le
    }

    /// Next PN, wrapping at 2^48.
    pub fn next(&self) -> Pn {
        Pn::from_u64(self.as_u64().wrapping_add(1) & PN_MAX)
    }
}

impl fmt::Display for Pn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Pn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pn({})", self)
    }
}

/// Strict monotonicity check shared by pairwise, group and integrity keys.
pub fn check_fresh(stored: Pn, received: Pn) -> Result<(), MonitorError> {
    if received <= stored {
        return Err(MonitorError::Replay { stored, received });
    }
    Ok(())
}

/// Frame direction relative to the distribution system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Station to AP.
    ToDs,
    /// AP to station.
    FromDs,
}

/// Maps a QoS TID (or its absence) to a counter slot.
pub fn slot_for(tid: Option<u8>) -> usize {
    match tid {
        Some(tid) => (tid & 0x0f) as usize,
        None => LEGACY_SLOT,
    }
}

/// One direction's worth of per-TID receive sequence counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RscTable {
    slots: [Pn; RSC_SLOTS],
}

impl RscTable {
    pub fn get(&self, slot: usize) -> Pn {
        self.slots.get(slot).copied().unwrap_or_default()
    }

    /// Pre-check before decrypting; never mutates.
    pub fn check(&self, slot: usize, pn: Pn) -> Result<(), MonitorError> {
        check_fresh(self.get(slot), pn)
    }

    /// Records an accepted PN. Callers must have passed `check` and
    /// authenticated the frame first.
    pub fn commit(&mut self, slot: usize, pn: Pn) {
        if let Some(stored) = self.slots.get_mut(slot) {
            if pn > *stored {
                *stored = pn;
            }
        }
    }

    /// Highest PN seen across all slots.
    pub fn max(&self) -> Pn {
        self.slots.iter().copied().max().unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.slots = [Pn::ZERO; RSC_SLOTS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pn_byte_orders() {
        let pn = Pn::from_u64(0x0000_b503_9776_e70c);
        assert_eq!(pn.to_be_bytes(), [0xb5, 0x03, 0x97, 0x76, 0xe7, 0x0c]);
        assert_eq!(pn.to_le_bytes(), [0x0c, 0xe7, 0x76, 0x97, 0x03, 0xb5]);
        assert_eq!(Pn::from_le_slice(&pn.to_le_bytes()), pn);
        assert_eq!(pn.as_u64(), 0xb503_9776_e70c);
    }

    #[test]
    fn pn_ordering_is_numeric() {
        assert!(Pn::from_u64(0x1_0000) > Pn::from_u64(0xffff));
        assert!(Pn::from_u64(1) > Pn::ZERO);
        assert_eq!(Pn::from_u64(PN_MAX).next(), Pn::ZERO);
    }

    #[test]
    fn replay_rejects_equal_and_lower() {
        let mut table = RscTable::default();
        let slot = slot_for(Some(3));

        assert!(table.check(slot, Pn::from_u64(1)).is_ok());
        table.commit(slot, Pn::from_u64(10));

        assert!(table.check(slot, Pn::from_u64(10)).is_err());
        assert!(table.check(slot, Pn::from_u64(9)).is_err());
        assert!(table.check(slot, Pn::from_u64(11)).is_ok());
        assert_eq!(table.get(slot), Pn::from_u64(10));

        // Other slots are independent.
        assert!(table.check(LEGACY_SLOT, Pn::from_u64(1)).is_ok());
    }

    #[test]
    fn commit_never_moves_backwards() {
        let mut table = RscTable::default();
        table.commit(0, Pn::from_u64(20));
        table.commit(0, Pn::from_u64(5));
        assert_eq!(table.get(0), Pn::from_u64(20));
        assert_eq!(table.max(), Pn::from_u64(20));
        table.reset();
        assert_eq!(table.max(), Pn::ZERO);
    }
}
