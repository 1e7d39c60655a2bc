//! Passive IEEE 802.11 security state tracking.
//!
//! A [`Monitor`] follows networks and stations through authentication,
//! association and the EAPOL-Key handshakes, learns the resulting keys and
//! uses them to decrypt and replay-check traffic. The same key state can
//! protect injected frames.

pub mod bss;
pub mod capture;
pub mod crypto;
pub mod eapol;
pub mod elements;
pub mod error;
pub mod ieee80211;
pub mod inject;
pub mod keys;
pub mod mac;
pub mod monitor;
pub mod radius;
pub mod replay;
mod rx_data;
mod rx_mgmt;
pub mod station;
pub mod wired;

pub use bss::{Bss, BssCounter};
pub use error::{CryptoError, MonitorError, ParseError, Result};
pub use inject::{InjectProtection, Transmitter};
pub use mac::MacAddress;
pub use monitor::{Monitor, MonitorConfig, Passphrase};
pub use station::{AuthState, StaCounter, Station};
