//! Reflector control packets.
//!
//! Control packets are a 4-byte ASCII magic, optionally followed by a
//! 6-byte encoded callsign and, for CONN, a single module letter:
//!
//! | Magic | Length | Fields                      |
//! |-------|--------|-----------------------------|
//! | CONN  | 11     | callsign (6), module (1)    |
//! | ACKN  | 4      | none                        |
//! | NACK  | 4      | none                        |
//! | PING  | 10     | callsign (6)                |
//! | PONG  | 10     | callsign (6)                |
//! | DISC  | 4 / 10 | callsign (6) when length ≥10|

use crate::error::ProtocolError;

use super::{decode_callsign, encode_callsign};

pub const MAGIC_CONN: &[u8; 4] = b"CONN";
pub const MAGIC_ACKN: &[u8; 4] = b"ACKN";
pub const MAGIC_NACK: &[u8; 4] = b"NACK";
pub const MAGIC_PING: &[u8; 4] = b"PING";
pub const MAGIC_PONG: &[u8; 4] = b"PONG";
pub const MAGIC_DISC: &[u8; 4] = b"DISC";

/// A parsed reflector control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    Conn { callsign: String, module: u8 },
    Ackn,
    Nack,
    Ping { callsign: String },
    Pong { callsign: String },
    Disc { callsign: Option<String> },
}

/// Parse a control packet.
///
/// Unknown magics fail with `BadMagic`; short packets with `BadLength`.
pub fn parse_control_packet(data: &[u8]) -> Result<ControlPacket, ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::BadLength {
            magic: "control",
            len: data.len(),
        });
    }

    let magic: &[u8; 4] = data[..4].try_into().expect("slice length checked");

    match magic {
        m if m == MAGIC_CONN => {
            if data.len() < 11 {
                return Err(ProtocolError::BadLength {
                    magic: "CONN",
                    len: data.len(),
                });
            }
            Ok(ControlPacket::Conn {
                callsign: decode_callsign(&data[4..10]),
                module: data[10],
            })
        }
        m if m == MAGIC_ACKN => Ok(ControlPacket::Ackn),
        m if m == MAGIC_NACK => Ok(ControlPacket::Nack),
        m if m == MAGIC_PING => {
            if data.len() < 10 {
                return Err(ProtocolError::BadLength {
                    magic: "PING",
                    len: data.len(),
                });
            }
            Ok(ControlPacket::Ping {
                callsign: decode_callsign(&data[4..10]),
            })
        }
        m if m == MAGIC_PONG => {
            if data.len() < 10 {
                return Err(ProtocolError::BadLength {
                    magic: "PONG",
                    len: data.len(),
                });
            }
            Ok(ControlPacket::Pong {
                callsign: decode_callsign(&data[4..10]),
            })
        }
        m if m == MAGIC_DISC => {
            // A bare DISC is legal; with a callsign it must carry all six bytes.
            if data.len() == 4 {
                return Ok(ControlPacket::Disc { callsign: None });
            }
            if data.len() < 10 {
                return Err(ProtocolError::BadLength {
                    magic: "DISC",
                    len: data.len(),
                });
            }
            Ok(ControlPacket::Disc {
                callsign: Some(decode_callsign(&data[4..10])),
            })
        }
        _ => Err(ProtocolError::BadMagic),
    }
}

/// Build a CONN packet announcing `callsign` on `module`.
pub fn build_conn(callsign: &str, module: u8) -> Result<Vec<u8>, ProtocolError> {
    let mut pkt = build_control_packet(MAGIC_CONN, callsign)?;
    pkt.push(module);
    Ok(pkt)
}

/// Build a PONG reply.
pub fn build_pong(callsign: &str) -> Result<Vec<u8>, ProtocolError> {
    build_control_packet(MAGIC_PONG, callsign)
}

/// Build a DISC announcement.
pub fn build_disc(callsign: &str) -> Result<Vec<u8>, ProtocolError> {
    build_control_packet(MAGIC_DISC, callsign)
}

fn build_control_packet(magic: &[u8; 4], callsign: &str) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(11);
    buf.extend_from_slice(magic);
    buf.extend_from_slice(&encode_callsign(callsign)?);
    Ok(buf)
}
