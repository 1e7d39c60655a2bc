//! Error types for the monitor core.

use thiserror::Error;

use crate::mac::MacAddress;
use crate::replay::Pn;

/// Malformed or truncated attacker-controlled input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("truncated input: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("element {id} overruns the frame")]
    ElementOverrun { id: u8 },

    #[error("missing SSID element")]
    MissingSsid,

    #[error("value of {len} bytes exceeds the {max} byte limit")]
    TooLong { len: usize, max: usize },

    #[error("unsupported version {0}")]
    Version(u16),

    #[error("invalid {0} suite list")]
    SuiteList(&'static str),

    #[error("invalid {0} length")]
    BadLength(&'static str),

    #[error("not an EAPOL-Key frame")]
    NotEapolKey,

    #[error("unsupported frame: {0}")]
    Unsupported(&'static str),
}

/// Cryptographic validation failures. None of these advance state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("protected payload too short ({0} bytes)")]
    Truncated(usize),

    #[error("invalid key length {0}")]
    InvalidKeyLength(usize),

    #[error("frame does not carry an extended IV")]
    MissingExtIv,

    #[error("integrity check failed")]
    IntegrityFailure,

    #[error("ICV mismatch")]
    IcvMismatch,

    #[error("Michael MIC failure")]
    MichaelMicFailure,

    #[error("AES key unwrap integrity check failed")]
    UnwrapFailure,

    #[error("unsupported EAPOL-Key descriptor version {0}")]
    UnsupportedKeyVersion(u8),

    #[error("invalid frame header")]
    InvalidHeader,
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("replay detected: received {received}, last accepted {stored}")]
    Replay { stored: Pn, received: Pn },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no {0} available for the requested protection")]
    MissingKey(&'static str),

    #[error("unknown BSS {0}")]
    UnknownBss(MacAddress),

    #[error("unknown station {0}")]
    UnknownStation(MacAddress),

    #[error("key index {0} out of range")]
    KeyIndex(u8),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
