//! Pairwise, group and integrity key storage.

use std::fmt;

use crate::crypto::kdf::{pmk_to_ptk, WPA_NONCE_LEN};
use crate::crypto::DataCipher;
use crate::elements::BoundedBytes;
use crate::error::{MonitorError, ParseError, Result};
use crate::mac::MacAddress;
use crate::replay::{check_fresh, Pn};

pub const KCK_LEN: usize = 16;
pub const KEK_LEN: usize = 16;
pub const MAX_TK_LEN: usize = 32;
pub const MAX_GTK_LEN: usize = 32;
pub const GTK_SLOTS: usize = 4;
pub const IGTK_SLOTS: usize = 6;

pub type GroupKeyBytes = BoundedBytes<MAX_GTK_LEN>;

/// Pairwise transient key split into its three parts.
#[derive(Clone, PartialEq, Eq)]
pub struct Ptk {
    pub kck: [u8; KCK_LEN],
    pub kek: [u8; KEK_LEN],
    pub tk: BoundedBytes<MAX_TK_LEN>,
}

impl Ptk {
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        if bytes.len() < KCK_LEN + KEK_LEN + 16 {
            return Err(ParseError::Truncated {
                needed: KCK_LEN + KEK_LEN + 16,
                have: bytes.len(),
            });
        }
        let mut kck = [0u8; KCK_LEN];
        let mut kek = [0u8; KEK_LEN];
        kck.copy_from_slice(&bytes[..KCK_LEN]);
        kek.copy_from_slice(&bytes[KCK_LEN..KCK_LEN + KEK_LEN]);
        Ok(Ptk {
            kck,
            kek,
            tk: BoundedBytes::from_slice(&bytes[KCK_LEN + KEK_LEN..])?,
        })
    }

    /// Runs the PTK derivation for one PMK candidate.
    pub fn derive(
        pmk: &[u8],
        aa: &MacAddress,
        spa: &MacAddress,
        anonce: &[u8; WPA_NONCE_LEN],
        snonce: &[u8; WPA_NONCE_LEN],
        use_sha256: bool,
        cipher: DataCipher,
    ) -> Result<Self> {
        let len = KCK_LEN + KEK_LEN + cipher.tk_len();
        let raw = pmk_to_ptk(pmk, aa, spa, anonce, snonce, use_sha256, len);
        Ok(Ptk::from_bytes(&raw)?)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KCK_LEN + KEK_LEN + self.tk.len());
        out.extend_from_slice(&self.kck);
        out.extend_from_slice(&self.kek);
        out.extend_from_slice(self.tk.as_slice());
        out
    }
}

impl fmt::Debug for Ptk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptk")
            .field("kck", &hex::encode(self.kck))
            .field("kek", &hex::encode(self.kek))
            .field("tk", &self.tk)
            .finish()
    }
}

/// Pairwise key lifecycle for one station.
///
/// A derived key is `Pending` until message 3/4 validates under it. A new
/// handshake on a station that already has a key keeps the old key usable
/// (`Rekeying`) until the new one is confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PtkState {
    #[default]
    None,
    Pending(Ptk),
    Installed(Ptk),
    Rekeying { installed: Ptk, pending: Ptk },
}

impl PtkState {
    pub fn installed(&self) -> Option<&Ptk> {
        match self {
            PtkState::Installed(ptk) | PtkState::Rekeying { installed: ptk, .. } => Some(ptk),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&Ptk> {
        match self {
            PtkState::Pending(ptk) | PtkState::Rekeying { pending: ptk, .. } => Some(ptk),
            _ => None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed().is_some()
    }

    pub fn set_pending(&mut self, ptk: Ptk) {
        *self = match std::mem::take(self) {
            PtkState::None | PtkState::Pending(_) => PtkState::Pending(ptk),
            PtkState::Installed(installed) | PtkState::Rekeying { installed, .. } => {
                PtkState::Rekeying {
                    installed,
                    pending: ptk,
                }
            }
        };
    }

    /// Promotes the pending key. Returns false if there was none.
    pub fn install_pending(&mut self) -> bool {
        match std::mem::take(self) {
            PtkState::Pending(ptk) | PtkState::Rekeying { pending: ptk, .. } => {
                *self = PtkState::Installed(ptk);
                true
            }
            other => {
                *self = other;
                false
            }
        }
    }

    /// Installs a key directly, bypassing the handshake.
    pub fn install(&mut self, ptk: Ptk) {
        *self = PtkState::Installed(ptk);
    }

    pub fn clear(&mut self) {
        *self = PtkState::None;
    }
}

/// Group key with its receive sequence counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupKey {
    pub key: GroupKeyBytes,
    pub rsc: Pn,
}

/// Indexed group temporal keys (0-3).
#[derive(Debug, Clone, Default)]
pub struct GtkTable {
    keys: [Option<GroupKey>; GTK_SLOTS],
    current: Option<u8>,
}

impl GtkTable {
    /// Replaces the key at `idx` and resets its counter to `rsc`.
    pub fn install(&mut self, idx: u8, key: &[u8], rsc: Pn) -> Result<()> {
        let slot = self
            .keys
            .get_mut(idx as usize)
            .ok_or(MonitorError::KeyIndex(idx))?;
        *slot = Some(GroupKey {
            key: GroupKeyBytes::from_slice(key)?,
            rsc,
        });
        self.current = Some(idx);
        Ok(())
    }

    pub fn get(&self, idx: u8) -> Option<&GroupKey> {
        self.keys.get(idx as usize).and_then(Option::as_ref)
    }

    /// Index of the most recently installed key, if any.
    pub fn current(&self) -> Option<(u8, &GroupKey)> {
        let idx = self.current?;
        self.get(idx).map(|k| (idx, k))
    }

    pub fn check(&self, idx: u8, pn: Pn) -> Result<()> {
        let key = self.get(idx).ok_or(MonitorError::MissingKey("GTK"))?;
        check_fresh(key.rsc, pn)
    }

    pub fn commit(&mut self, idx: u8, pn: Pn) {
        if let Some(Some(key)) = self.keys.get_mut(idx as usize) {
            if pn > key.rsc {
                key.rsc = pn;
            }
        }
    }

    pub fn clear(&mut self) {
        self.keys = Default::default();
        self.current = None;
    }
}

/// Integrity group key slot with explicit presence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IgtkSlot {
    #[default]
    Absent,
    Installed { key: GroupKeyBytes, ipn: Pn },
}

/// Indexed integrity group temporal keys (0-5, BIP uses 4 and 5).
#[derive(Debug, Clone, Default)]
pub struct IgtkTable {
    slots: [IgtkSlot; IGTK_SLOTS],
}

impl IgtkTable {
    pub fn install(&mut self, idx: u16, key: &[u8], ipn: Pn) -> Result<()> {
        let slot = self
            .slots
            .get_mut(idx as usize)
            .ok_or(MonitorError::KeyIndex(idx as u8))?;
        *slot = IgtkSlot::Installed {
            key: GroupKeyBytes::from_slice(key)?,
            ipn,
        };
        Ok(())
    }

    pub fn get(&self, idx: u16) -> Option<(&GroupKeyBytes, Pn)> {
        match self.slots.get(idx as usize) {
            Some(IgtkSlot::Installed { key, ipn }) => Some((key, *ipn)),
            _ => None,
        }
    }

    pub fn is_installed(&self, idx: u16) -> bool {
        self.get(idx).is_some()
    }

    pub fn commit(&mut self, idx: u16, received: Pn) {
        if let Some(IgtkSlot::Installed { ipn, .. }) = self.slots.get_mut(idx as usize) {
            if received > *ipn {
                *ipn = received;
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}
