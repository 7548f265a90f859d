//! M17 wire protocol.
//!
//! Defines the callsign address codec, CRC, control packets, and streaming
//! packets exchanged with a reflector over UDP. All multi-byte fields are
//! big-endian.
//!
//! ## Stream Packet Format (54 bytes)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ "M17 " (4) │ Stream-ID (2) │           LSD (28)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Frame Number (2) │        Payload (16)        │    CRC-16 (2)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The frame number's high bit marks the final packet of a stream. The LSD
//! is the 28-byte prefix of a Link Setup Frame (LSF): destination (6),
//! source (6), type (2), meta (14); a full LSF appends a CRC-16 (2).

mod callsign;
mod codec2;
mod control;
mod crc;
mod handler;
mod stream;

pub use callsign::{decode_callsign, encode_callsign, validate_callsign};
pub use codec2::{Codec3200, CODEC2_FRAME_BYTES, CODEC2_FRAME_SAMPLES};
pub use control::{
    build_conn, build_disc, build_pong, parse_control_packet, ControlPacket,
};
pub use crc::crc16;
pub use handler::StreamHandler;
pub use stream::{
    build_lsf, build_stream_packet, lsf_to_lsd, parse_lsf, parse_stream_packet,
    parse_stream_packet_with_lsf, Lsf, StreamPacket,
};

/// Magic prefix of a stream packet. The trailing byte is a literal space
/// (0x20); the same constant classifies incoming datagrams.
pub const STREAM_MAGIC: &[u8; 4] = b"M17 ";

/// Total size of a stream packet in bytes.
pub const STREAM_PACKET_SIZE: usize = 54;

/// Size of a Link Setup Frame in bytes (with trailing CRC).
pub const LSF_SIZE: usize = 30;

/// Size of the Link Setup Data embedded in every stream packet.
pub const LSD_SIZE: usize = 28;

/// Size of an encoded callsign address in bytes.
pub const CALLSIGN_SIZE: usize = 6;

/// PCM samples carried by one stream packet (two Codec2 frames).
pub const SAMPLES_PER_PACKET: usize = 2 * CODEC2_FRAME_SAMPLES;
