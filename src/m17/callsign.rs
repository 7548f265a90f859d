//! Base-40 callsign address codec.
//!
//! M17 addresses pack up to nine characters from the alphabet
//! `' '  A-Z  0-9  -  /  .` into a 48-bit integer, transmitted as six
//! big-endian bytes. The leftmost character is the least significant digit.

use byteorder::{BigEndian, ByteOrder};

use crate::error::ProtocolError;

use super::CALLSIGN_SIZE;

const BASE40_CHARS: &[u8; 40] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-/.";

const MAX_CALLSIGN_LEN: usize = 9;

fn char_value(c: u8) -> Option<u64> {
    match c {
        b' ' => Some(0),
        b'A'..=b'Z' => Some(u64::from(c - b'A') + 1),
        b'0'..=b'9' => Some(u64::from(c - b'0') + 27),
        b'-' => Some(37),
        b'/' => Some(38),
        b'.' => Some(39),
        _ => None,
    }
}

/// Uppercase and validate a callsign without padding it.
///
/// Returns the normalized form used for the rest of the session.
pub fn validate_callsign(callsign: &str) -> Result<String, ProtocolError> {
    let callsign = callsign.to_uppercase();

    if callsign.len() > MAX_CALLSIGN_LEN {
        return Err(ProtocolError::CallsignTooLong);
    }

    for c in callsign.chars() {
        if !c.is_ascii() || char_value(c as u8).is_none() {
            return Err(ProtocolError::InvalidCallsignChar(c));
        }
    }

    Ok(callsign)
}

/// Encode a callsign into its 6-byte base-40 address.
///
/// The input is uppercased and right-padded with spaces to nine characters.
pub fn encode_callsign(callsign: &str) -> Result<[u8; CALLSIGN_SIZE], ProtocolError> {
    let mut callsign = callsign.to_uppercase();

    if callsign.len() > MAX_CALLSIGN_LEN {
        return Err(ProtocolError::CallsignTooLong);
    }
    while callsign.len() < MAX_CALLSIGN_LEN {
        callsign.push(' ');
    }

    let mut address: u64 = 0;
    for c in callsign.chars().rev() {
        if !c.is_ascii() {
            return Err(ProtocolError::InvalidCallsignChar(c));
        }
        let val = char_value(c as u8).ok_or(ProtocolError::InvalidCallsignChar(c))?;
        address = address * 40 + val;
    }

    let mut encoded = [0u8; CALLSIGN_SIZE];
    BigEndian::write_u48(&mut encoded, address);
    Ok(encoded)
}

/// Decode a 6-byte base-40 address back to a callsign.
///
/// Returns an empty string when `encoded` is not exactly six bytes.
pub fn decode_callsign(encoded: &[u8]) -> String {
    if encoded.len() != CALLSIGN_SIZE {
        return String::new();
    }

    let mut address = BigEndian::read_u48(encoded);

    let mut chars = String::with_capacity(MAX_CALLSIGN_LEN);
    while address > 0 {
        let idx = (address % 40) as usize;
        chars.push(BASE40_CHARS[idx] as char);
        address /= 40;
    }

    chars.trim_matches(' ').to_string()
}
