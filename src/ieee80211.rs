//! IEEE 802.11 MAC header decoding.
//!
//! Every accessor works on a bounds-checked view; `Header::parse` refuses
//! anything shorter than the header implied by the frame control field.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::ParseError;
use crate::mac::{MacAddress, ETH_ALEN};

pub const FC_TODS: u16 = 0x0100;
pub const FC_FROMDS: u16 = 0x0200;
pub const FC_MOREFRAG: u16 = 0x0400;
pub const FC_RETRY: u16 = 0x0800;
pub const FC_PWRMGT: u16 = 0x1000;
pub const FC_MOREDATA: u16 = 0x2000;
pub const FC_PROTECTED: u16 = 0x4000;
pub const FC_ORDER: u16 = 0x8000;

pub const MGMT_HDR_LEN: usize = 24;

// Management subtypes.
pub const STYPE_ASSOC_REQ: u8 = 0;
pub const STYPE_ASSOC_RESP: u8 = 1;
pub const STYPE_REASSOC_REQ: u8 = 2;
pub const STYPE_REASSOC_RESP: u8 = 3;
pub const STYPE_PROBE_REQ: u8 = 4;
pub const STYPE_PROBE_RESP: u8 = 5;
pub const STYPE_BEACON: u8 = 8;
pub const STYPE_DISASSOC: u8 = 10;
pub const STYPE_AUTH: u8 = 11;
pub const STYPE_DEAUTH: u8 = 12;
pub const STYPE_ACTION: u8 = 13;

// Data subtype bits.
pub const STYPE_DATA_NULL_BIT: u8 = 0x04;
pub const STYPE_DATA_QOS_BIT: u8 = 0x08;

/// LLC/SNAP header announcing an EAPOL payload.
pub const LLC_EAPOL: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e];
pub const ETH_P_EAPOL: u16 = 0x888e;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management,
    Control,
    Data,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl(pub u16);

impl FrameControl {
    pub fn frame_type(self) -> FrameType {
        match (self.0 >> 2) & 0x3 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }

    pub fn subtype(self) -> u8 {
        ((self.0 >> 4) & 0xf) as u8
    }

    pub fn to_ds(self) -> bool {
        self.0 & FC_TODS != 0
    }

    pub fn from_ds(self) -> bool {
        self.0 & FC_FROMDS != 0
    }

    pub fn protected(self) -> bool {
        self.0 & FC_PROTECTED != 0
    }

    pub fn order(self) -> bool {
        self.0 & FC_ORDER != 0
    }

    pub fn is_data(self) -> bool {
        self.frame_type() == FrameType::Data
    }

    pub fn is_mgmt(self) -> bool {
        self.frame_type() == FrameType::Management
    }

    pub fn is_qos_data(self) -> bool {
        self.is_data() && self.subtype() & STYPE_DATA_QOS_BIT != 0
    }

    pub fn has_four_addresses(self) -> bool {
        self.to_ds() && self.from_ds()
    }
}

/// Reads the frame control field of any frame with at least two bytes.
pub fn frame_control(frame: &[u8]) -> Result<FrameControl, ParseError> {
    if frame.len() < 2 {
        return Err(ParseError::Truncated {
            needed: 2,
            have: frame.len(),
        });
    }
    Ok(FrameControl(LittleEndian::read_u16(&frame[0..2])))
}

/// Borrowed, validated management/data header.
#[derive(Debug, Clone, Copy)]
pub struct Header<'a> {
    raw: &'a [u8],
    fc: FrameControl,
    qos_offset: Option<usize>,
    len: usize,
}

impl<'a> Header<'a> {
    pub fn parse(frame: &'a [u8]) -> Result<Self, ParseError> {
        let fc = frame_control(frame)?;
        let mut len = match fc.frame_type() {
            FrameType::Management | FrameType::Data => MGMT_HDR_LEN,
            FrameType::Control => return Err(ParseError::Unsupported("control frame")),
            FrameType::Extension => return Err(ParseError::Unsupported("extension frame")),
        };
        let mut qos_offset = None;
        if fc.is_data() {
            if fc.has_four_addresses() {
                len += ETH_ALEN;
            }
            if fc.is_qos_data() {
                qos_offset = Some(len);
                len += 2;
            }
        }
        // HT Control follows in +HTC management and QoS data frames.
        if fc.order() && (fc.is_mgmt() || fc.is_qos_data()) {
            len += 4;
        }
        if frame.len() < len {
            return Err(ParseError::Truncated {
                needed: len,
                have: frame.len(),
            });
        }
        Ok(Header {
            raw: &frame[..len],
            fc,
            qos_offset,
            len,
        })
    }

    pub fn fc(&self) -> FrameControl {
        self.fc
    }

    /// Header length in bytes, including QoS and HT control fields.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.raw
    }

    fn addr_at(&self, offset: usize) -> MacAddress {
        let mut addr = [0u8; ETH_ALEN];
        addr.copy_from_slice(&self.raw[offset..offset + ETH_ALEN]);
        MacAddress(addr)
    }

    pub fn addr1(&self) -> MacAddress {
        self.addr_at(4)
    }

    pub fn addr2(&self) -> MacAddress {
        self.addr_at(10)
    }

    pub fn addr3(&self) -> MacAddress {
        self.addr_at(16)
    }

    pub fn addr4(&self) -> Option<MacAddress> {
        if self.fc.is_data() && self.fc.has_four_addresses() {
            Some(self.addr_at(24))
        } else {
            None
        }
    }

    pub fn seq_ctrl(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[22..24])
    }

    pub fn qos_control(&self) -> Option<[u8; 2]> {
        self.qos_offset
            .map(|off| [self.raw[off], self.raw[off + 1]])
    }

    pub fn tid(&self) -> Option<u8> {
        self.qos_control().map(|qc| qc[0] & 0x0f)
    }

    /// Final destination of the MSDU.
    pub fn da(&self) -> MacAddress {
        if self.fc.to_ds() {
            self.addr3()
        } else {
            self.addr1()
        }
    }

    /// Original source of the MSDU.
    pub fn sa(&self) -> MacAddress {
        match (self.fc.to_ds(), self.fc.from_ds()) {
            (false, false) | (true, false) => self.addr2(),
            (false, true) => self.addr3(),
            (true, true) => self.addr4().unwrap_or_else(|| self.addr2()),
        }
    }

    /// BSSID implied by the DS bits. `None` for control and WDS frames.
    pub fn bssid(&self) -> Option<MacAddress> {
        if !(self.fc.is_mgmt() || self.fc.is_data()) {
            return None;
        }
        match (self.fc.to_ds(), self.fc.from_ds()) {
            (false, false) => Some(self.addr3()),
            (true, false) => Some(self.addr1()),
            (false, true) => Some(self.addr2()),
            (true, true) => None,
        }
    }

    /// Copy of the header with the Protected bit cleared, followed by
    /// `plain`.
    pub fn with_plaintext(&self, plain: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len + plain.len());
        out.extend_from_slice(self.raw);
        out[1] &= !((FC_PROTECTED >> 8) as u8);
        out.extend_from_slice(plain);
        out
    }
}
