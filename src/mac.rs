use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

pub const ETH_ALEN: usize = 6;

/// 48-bit IEEE MAC address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; ETH_ALEN]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; ETH_ALEN]);
    pub const ZERO: MacAddress = MacAddress([0u8; ETH_ALEN]);

    /// Reads an address from the first six bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        let addr: [u8; ETH_ALEN] = bytes
            .get(..ETH_ALEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(ParseError::Truncated {
                needed: ETH_ALEN,
                have: bytes.len(),
            })?;
        Ok(MacAddress(addr))
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set (multicast or broadcast).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Unicast and non-zero, i.e. something that can be a BSS or station.
    pub fn is_real_device(&self) -> bool {
        !self.is_multicast() && !self.is_zero()
    }

    pub fn as_bytes(&self) -> &[u8; ETH_ALEN] {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&compact).map_err(|_| ParseError::Unsupported("MAC address"))?;
        if bytes.len() != ETH_ALEN {
            return Err(ParseError::Truncated {
                needed: ETH_ALEN,
                have: bytes.len(),
            });
        }
        MacAddress::from_slice(&bytes)
    }
}

impl From<[u8; ETH_ALEN]> for MacAddress {
    fn from(value: [u8; ETH_ALEN]) -> Self {
        MacAddress(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let mac = MacAddress::from_str("02:00:00:00:01:00").unwrap();
        assert_eq!(mac.0, [0x02, 0, 0, 0, 0x01, 0]);
        assert_eq!(mac.to_string(), "02:00:00:00:01:00");
        assert!(MacAddress::from_str("02:00:00").is_err());
    }

    #[test]
    fn group_bits() {
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress([0x01, 0x00, 0x5e, 0, 0, 1]).is_multicast());
        assert!(!MacAddress::ZERO.is_real_device());
        assert!(MacAddress([0x02, 0, 0, 0, 0, 1]).is_real_device());
    }
}
