//! Error types for the M17 gateway.

use std::io;

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    // Wire protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Reflector link errors
    #[error("reflector error: {0}")]
    Reflector(#[from] ReflectorError),

    // Session errors
    #[error("{0}")]
    Session(#[from] SessionError),

    // Audio pipeline errors
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// M17 wire-format parsing and building errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown control magic")]
    BadMagic,

    #[error("invalid {magic} length: {len}")]
    BadLength { magic: &'static str, len: usize },

    #[error("invalid LSF/LSD length: {0}")]
    InvalidLsfLength(usize),

    #[error("LSF CRC mismatch")]
    LsfCrcMismatch,

    #[error("stream packet CRC mismatch")]
    StreamCrcMismatch,

    #[error("callsign too long: max 9 characters")]
    CallsignTooLong,

    #[error("invalid character in callsign: {0}")]
    InvalidCallsignChar(char),
}

/// Reflector client errors.
#[derive(Error, Debug)]
pub enum ReflectorError {
    #[error("cannot resolve reflector address {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("reflector connection closed")]
    Closed,
}

/// Session state-machine errors.
///
/// Display strings double as the user-visible `error` message payload, so
/// they stay in the exact wording the browser client matches on.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("maximum sessions reached")]
    MaxSessionsReached,

    #[error("no reflector connected")]
    NoReflector,

    #[error("no active stream handler")]
    NoActiveStream,

    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("{kind} frame too large: {len}")]
    FrameTooLarge { kind: &'static str, len: usize },

    #[error("Invalid PCM frame length: {0}")]
    InvalidPcmLength(usize),
}

/// Audio codec errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AudioError {
    #[error("invalid PCM block length: {0}")]
    InvalidPcmBlock(usize),

    #[error("invalid codec frame length: {0}")]
    InvalidCodecFrame(usize),
}

impl Error {
    /// Check if the error is a transient I/O condition worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Reflector(ReflectorError::SendFailed(_))
        )
    }
}
