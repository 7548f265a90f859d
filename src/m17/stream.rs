//! Link Setup Frames and stream packets.

use byteorder::{BigEndian, ByteOrder};

use crate::error::ProtocolError;

use super::{
    crc16, decode_callsign, encode_callsign, LSD_SIZE, LSF_SIZE, STREAM_MAGIC,
    STREAM_PACKET_SIZE,
};

/// Stream type field for voice streams (stream mode, Codec2-3200).
pub const LSF_TYPE_STREAM_VOICE: u16 = 0x0005;

/// Frame-number bit marking the final packet of a stream.
const LAST_FRAME_BIT: u16 = 0x8000;

/// A parsed 54-byte stream packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub stream_id: u16,
    pub lsd: [u8; LSD_SIZE],
    pub frame_num: u16,
    pub payload: [u8; 16],
}

impl StreamPacket {
    /// Whether this packet closes its stream.
    pub fn is_last(&self) -> bool {
        self.frame_num & LAST_FRAME_BIT != 0
    }
}

/// A parsed Link Setup Frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lsf {
    pub destination: String,
    pub source: String,
    pub stream_type: u16,
    pub meta: [u8; 14],
}

/// Build a 30-byte LSF for a voice stream from `dst` to `src`.
pub fn build_lsf(dst: &str, src: &str, meta: [u8; 14]) -> Result<[u8; LSF_SIZE], ProtocolError> {
    let mut lsf = [0u8; LSF_SIZE];

    lsf[0..6].copy_from_slice(&encode_callsign(dst)?);
    lsf[6..12].copy_from_slice(&encode_callsign(src)?);
    BigEndian::write_u16(&mut lsf[12..14], LSF_TYPE_STREAM_VOICE);
    lsf[14..28].copy_from_slice(&meta);

    let crc = crc16(&lsf[..28]);
    BigEndian::write_u16(&mut lsf[28..30], crc);

    Ok(lsf)
}

/// Parse a 30-byte LSF or a 28-byte LSD.
///
/// The 30-byte form carries a CRC over the first 28 bytes which must match.
pub fn parse_lsf(data: &[u8]) -> Result<Lsf, ProtocolError> {
    if data.len() != LSD_SIZE && data.len() != LSF_SIZE {
        return Err(ProtocolError::InvalidLsfLength(data.len()));
    }

    if data.len() == LSF_SIZE {
        let expected = BigEndian::read_u16(&data[28..30]);
        if crc16(&data[..28]) != expected {
            return Err(ProtocolError::LsfCrcMismatch);
        }
    }

    let mut meta = [0u8; 14];
    meta.copy_from_slice(&data[14..28]);

    Ok(Lsf {
        destination: decode_callsign(&data[0..6]),
        source: decode_callsign(&data[6..12]),
        stream_type: BigEndian::read_u16(&data[12..14]),
        meta,
    })
}

/// Truncate an LSF to the 28-byte LSD carried in every stream packet.
pub fn lsf_to_lsd(lsf: [u8; LSF_SIZE]) -> [u8; LSD_SIZE] {
    let mut lsd = [0u8; LSD_SIZE];
    lsd.copy_from_slice(&lsf[..LSD_SIZE]);
    lsd
}

/// Build a 54-byte stream packet.
///
/// `is_last` sets the frame number's high bit.
pub fn build_stream_packet(
    stream_id: u16,
    lsd: [u8; LSD_SIZE],
    mut frame_num: u16,
    is_last: bool,
    payload: [u8; 16],
) -> Vec<u8> {
    if is_last {
        frame_num |= LAST_FRAME_BIT;
    }

    let mut buf = vec![0u8; STREAM_PACKET_SIZE];

    buf[0..4].copy_from_slice(STREAM_MAGIC);
    BigEndian::write_u16(&mut buf[4..6], stream_id);
    buf[6..34].copy_from_slice(&lsd);
    BigEndian::write_u16(&mut buf[34..36], frame_num);
    buf[36..52].copy_from_slice(&payload);

    let crc = crc16(&buf[..52]);
    BigEndian::write_u16(&mut buf[52..54], crc);

    buf
}

/// Parse a stream packet, verifying magic and CRC.
pub fn parse_stream_packet(data: &[u8]) -> Result<StreamPacket, ProtocolError> {
    if data.len() < STREAM_PACKET_SIZE {
        return Err(ProtocolError::BadLength {
            magic: "M17 stream",
            len: data.len(),
        });
    }

    if &data[0..4] != STREAM_MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let expected = BigEndian::read_u16(&data[52..54]);
    if crc16(&data[..52]) != expected {
        return Err(ProtocolError::StreamCrcMismatch);
    }

    let mut lsd = [0u8; LSD_SIZE];
    lsd.copy_from_slice(&data[6..34]);

    let mut payload = [0u8; 16];
    payload.copy_from_slice(&data[36..52]);

    Ok(StreamPacket {
        stream_id: BigEndian::read_u16(&data[4..6]),
        lsd,
        frame_num: BigEndian::read_u16(&data[34..36]),
        payload,
    })
}

/// Parse a stream packet together with the LSF embedded in its LSD.
pub fn parse_stream_packet_with_lsf(data: &[u8]) -> Result<(StreamPacket, Lsf), ProtocolError> {
    let pkt = parse_stream_packet(data)?;
    let lsf = parse_lsf(&pkt.lsd)?;
    Ok((pkt, lsf))
}
