//! # m17-gateway
//!
//! Gateway that lets browser clients participate in M17 digital-voice
//! reflector networks.
//!
//! A browser opens a WebSocket carrying typed JSON control messages and
//! binary audio frames. On the browser's behalf the gateway speaks the M17
//! reflector protocol over UDP, transcoding between linear PCM or G.711
//! µ-law on the browser side and Codec2-3200 framed into M17 stream packets
//! on the reflector side.
//!
//! ## Architecture
//!
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Browser (WebSocket: JSON + PCM/µ-law)         │
//! ├───────────────────────────────────────────────────────────────┤
//! │        Transport (axum WebSocket, serialized writes)          │
//! ├───────────────────────────────────────────────────────────────┤
//! │   Session (PTT / rx-active state, demux task, audio ingest)   │
//! ├───────────────────────┬───────────────────────────────────────┤
//! │   Stream handler      │        Reflector client               │
//! │  (Codec2-3200 pacing) │  (CONN/ACKN/PING/PONG/DISC, watchdog) │
//! ├───────────────────────┴───────────────────────────────────────┤
//! │                 M17 wire codec (UDP, big-endian)              │
//! └───────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)] // Intentional sample/field narrowing
#![allow(clippy::cast_sign_loss)] // PCM <-> unsigned wire fields
#![allow(clippy::cast_possible_wrap)] // Intentional for sample arithmetic
#![allow(clippy::doc_markdown)] // ASCII diagrams in docs

pub mod audio;
pub mod config;
pub mod error;
pub mod m17;
pub mod metrics;
pub mod reflector;
pub mod server;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP/WebSocket listen port
pub const DEFAULT_PORT: u16 = 8090;
