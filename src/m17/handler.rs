//! Stream handler: paces PCM into Codec2-3200 stream packets and decodes
//! incoming packets back to browser audio.
//!
//! One handler exists per attached reflector and is rebuilt on each PTT
//! press via [`StreamHandler::start_new_stream`]. It writes through the
//! reflector client's UDP socket; the socket itself is owned by the client.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::net::UdpSocket;

use crate::audio;
use crate::error::{ReflectorError, Result};

use super::{
    build_lsf, build_stream_packet, lsf_to_lsd, parse_stream_packet_with_lsf, Codec3200,
    CODEC2_FRAME_SAMPLES, LSD_SIZE, SAMPLES_PER_PACKET,
};

/// Draw a 16-bit stream ID from the OS entropy source.
fn generate_stream_id() -> u16 {
    let mut id = [0u8; 2];
    OsRng.fill_bytes(&mut id);
    u16::from_be_bytes(id)
}

/// Encode one 320-sample block as two packed Codec2 frames.
fn build_payload(codec: &mut Codec3200, pcm: &[i16]) -> Result<[u8; 16]> {
    let part1 = codec.encode(&pcm[..CODEC2_FRAME_SAMPLES])?;
    let part2 = codec.encode(&pcm[CODEC2_FRAME_SAMPLES..])?;

    let mut payload = [0u8; 16];
    payload[0..8].copy_from_slice(&part1);
    payload[8..16].copy_from_slice(&part2);
    Ok(payload)
}

pub struct StreamHandler {
    socket: Arc<UdpSocket>,
    reflector: SocketAddr,
    codec: Codec3200,
    stream_id: u16,
    lsd: [u8; LSD_SIZE],
    frame_num: u16,
    pcm_buffer: Vec<i16>,
    mulaw_buf: Vec<u8>,
}

impl StreamHandler {
    /// Create a handler streaming from `src` to `dst` through `socket`.
    ///
    /// Destinations that cannot be a callsign (longer than nine characters
    /// or containing `:`) are rewritten to the source callsign, which gives
    /// broadcast semantics on the reflector side.
    pub fn new(
        socket: Arc<UdpSocket>,
        reflector: SocketAddr,
        src: &str,
        dst: &str,
    ) -> Result<Self> {
        let dst = if dst.len() > 9 || dst.contains(':') {
            src
        } else {
            dst
        };

        let lsf = build_lsf(dst, src, [0u8; 14])?;

        Ok(Self {
            socket,
            reflector,
            codec: Codec3200::new(),
            stream_id: generate_stream_id(),
            lsd: lsf_to_lsd(lsf),
            frame_num: 0,
            pcm_buffer: Vec::with_capacity(SAMPLES_PER_PACKET),
            mulaw_buf: Vec::with_capacity(SAMPLES_PER_PACKET),
        })
    }

    /// Begin a new stream: fresh stream ID, frame counter reset, staging
    /// buffer cleared. Called on each PTT rising edge.
    pub fn start_new_stream(&mut self) {
        self.stream_id = generate_stream_id();
        self.frame_num = 0;
        self.pcm_buffer.clear();
    }

    /// Current stream ID (stable across one keying).
    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    async fn emit_packet(&mut self, payload: [u8; 16], is_last: bool) -> Result<()> {
        let pkt = build_stream_packet(self.stream_id, self.lsd, self.frame_num, is_last, payload);
        self.socket
            .send_to(&pkt, self.reflector)
            .await
            .map_err(|e| ReflectorError::SendFailed(e.to_string()))?;
        self.frame_num = self.frame_num.wrapping_add(1);
        Ok(())
    }

    /// Stage PCM samples and emit full 320-sample packets.
    ///
    /// With `is_last`, any residual samples are zero-padded into one final
    /// last-marked packet and the staging buffer is cleared.
    pub async fn send_pcm_frame(&mut self, pcm: &[i16], is_last: bool) -> Result<()> {
        self.pcm_buffer.extend_from_slice(pcm);

        while self.pcm_buffer.len() >= SAMPLES_PER_PACKET {
            let mark_last = is_last && self.pcm_buffer.len() == SAMPLES_PER_PACKET;

            let payload =
                build_payload(&mut self.codec, &self.pcm_buffer[..SAMPLES_PER_PACKET])?;
            self.emit_packet(payload, mark_last).await?;

            self.pcm_buffer.drain(..SAMPLES_PER_PACKET);
        }

        if is_last && !self.pcm_buffer.is_empty() {
            let mut padded = vec![0i16; SAMPLES_PER_PACKET];
            padded[..self.pcm_buffer.len()].copy_from_slice(&self.pcm_buffer);

            let payload = build_payload(&mut self.codec, &padded)?;
            self.emit_packet(payload, true).await?;

            self.pcm_buffer.clear();
        }

        Ok(())
    }

    /// Flush any staged samples as a final padded packet. A no-op when the
    /// staging buffer is already empty.
    pub async fn finalize(&mut self) -> Result<()> {
        self.send_pcm_frame(&[], true).await
    }

    /// Decode an incoming stream packet into browser audio bytes.
    ///
    /// Returns little-endian 16-bit PCM when `want_pcm`, otherwise µ-law.
    pub fn handle_incoming_packet(&mut self, data: &[u8], want_pcm: bool) -> Result<Vec<u8>> {
        let (pkt, _lsf) = parse_stream_packet_with_lsf(data)?;

        let part1 = self.codec.decode(&pkt.payload[0..8])?;
        let part2 = self.codec.decode(&pkt.payload[8..16])?;

        let mut pcm8k = Vec::with_capacity(SAMPLES_PER_PACKET);
        pcm8k.extend_from_slice(&part1);
        pcm8k.extend_from_slice(&part2);

        if want_pcm {
            let mut out = Vec::with_capacity(pcm8k.len() * 2);
            for s in pcm8k {
                out.extend_from_slice(&s.to_le_bytes());
            }
            return Ok(out);
        }

        audio::mulaw_encode_into(&mut self.mulaw_buf, &pcm8k);
        Ok(self.mulaw_buf.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::m17::parse_stream_packet;

    async fn new_test_handler() -> (StreamHandler, UdpSocket) {
        let reflector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reflector_addr = reflector.local_addr().unwrap();

        let handler =
            StreamHandler::new(Arc::new(sender), reflector_addr, "SRC", "DST").unwrap();
        (handler, reflector)
    }

    async fn recv_packet(reflector: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 128];
        let (n, _) = timeout(Duration::from_secs(1), reflector.recv_from(&mut buf))
            .await
            .expect("timed out waiting for stream packet")
            .unwrap();
        buf[..n].to_vec()
    }

    fn expected_payload(blocks: &[&[i16]]) -> Vec<[u8; 16]> {
        let mut codec = Codec3200::new();
        blocks
            .iter()
            .map(|block| {
                let p1 = codec.encode(&block[..160]).unwrap();
                let p2 = codec.encode(&block[160..]).unwrap();
                let mut payload = [0u8; 16];
                payload[0..8].copy_from_slice(&p1);
                payload[8..16].copy_from_slice(&p2);
                payload
            })
            .collect()
    }

    #[tokio::test]
    async fn test_send_full_frame() {
        let (mut handler, reflector) = new_test_handler().await;

        let pcm: Vec<i16> = (0..320).map(|i| i as i16).collect();
        let expected = expected_payload(&[&pcm]);

        handler.send_pcm_frame(&pcm, true).await.unwrap();

        let pkt = parse_stream_packet(&recv_packet(&reflector).await).unwrap();
        assert_eq!(pkt.payload, expected[0]);
        assert!(pkt.is_last());
    }

    #[tokio::test]
    async fn test_send_padded_residual() {
        let (mut handler, reflector) = new_test_handler().await;

        let pcm: Vec<i16> = (0..160).map(|i| i as i16).collect();
        let mut padded = vec![0i16; 320];
        padded[..160].copy_from_slice(&pcm);
        let expected = expected_payload(&[&padded]);

        handler.send_pcm_frame(&pcm, true).await.unwrap();

        let pkt = parse_stream_packet(&recv_packet(&reflector).await).unwrap();
        assert_eq!(pkt.payload, expected[0]);
        assert!(pkt.is_last());
    }

    #[tokio::test]
    async fn test_frame_numbers_and_last_flag() {
        let (mut handler, reflector) = new_test_handler().await;

        let pcm = vec![0i16; 640];
        handler.send_pcm_frame(&pcm, false).await.unwrap();
        handler.send_pcm_frame(&[1i16; 160], true).await.unwrap();

        let first = parse_stream_packet(&recv_packet(&reflector).await).unwrap();
        let second = parse_stream_packet(&recv_packet(&reflector).await).unwrap();
        let last = parse_stream_packet(&recv_packet(&reflector).await).unwrap();

        assert_eq!(first.frame_num, 0);
        assert!(!first.is_last());
        assert_eq!(second.frame_num, 1);
        assert!(!second.is_last());
        assert_eq!(last.frame_num, 2 | 0x8000);
        assert!(last.is_last());

        assert_eq!(first.stream_id, second.stream_id);
        assert_eq!(second.stream_id, last.stream_id);
    }

    #[tokio::test]
    async fn test_finalize_without_residual_is_silent() {
        let (mut handler, reflector) = new_test_handler().await;

        handler.finalize().await.unwrap();

        let mut buf = [0u8; 64];
        let res = timeout(Duration::from_millis(100), reflector.recv_from(&mut buf)).await;
        assert!(res.is_err(), "no packet expected");
    }

    #[tokio::test]
    async fn test_start_new_stream_changes_id_and_resets_counter() {
        let (mut handler, reflector) = new_test_handler().await;

        handler.send_pcm_frame(&vec![0i16; 320], false).await.unwrap();
        let first = parse_stream_packet(&recv_packet(&reflector).await).unwrap();

        handler.start_new_stream();
        handler.send_pcm_frame(&vec![0i16; 320], false).await.unwrap();
        let second = parse_stream_packet(&recv_packet(&reflector).await).unwrap();

        assert_eq!(second.frame_num, 0);
        // Both IDs came from the same 16-bit entropy draw; equality is
        // possible but overwhelmingly unlikely, so assert on the reset
        // counter only.
        let _ = first;
    }

    #[tokio::test]
    async fn test_unroutable_destination_rewritten_to_source() {
        let reflector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = reflector.local_addr().unwrap();

        let mut handler =
            StreamHandler::new(Arc::new(sender), addr, "KC1ABC", "127.0.0.1:17000").unwrap();

        handler.send_pcm_frame(&vec![0i16; 320], false).await.unwrap();

        let pkt = recv_packet(&reflector).await;
        let (_, lsf) = parse_stream_packet_with_lsf(&pkt).unwrap();
        assert_eq!(lsf.destination, "KC1ABC");
        assert_eq!(lsf.source, "KC1ABC");
    }

    #[tokio::test]
    async fn test_incoming_packet_pcm_and_mulaw() {
        let (mut handler, _reflector) = new_test_handler().await;

        let mut encoder = Codec3200::new();
        let voice = [100i16; 160];
        let p1 = encoder.encode(&voice).unwrap();
        let p2 = encoder.encode(&voice).unwrap();
        let mut payload = [0u8; 16];
        payload[0..8].copy_from_slice(&p1);
        payload[8..16].copy_from_slice(&p2);

        let lsf = build_lsf("DST", "SRC", [0u8; 14]).unwrap();
        let pkt = build_stream_packet(0x0101, lsf_to_lsd(lsf), 0, false, payload);

        let pcm = handler.handle_incoming_packet(&pkt, true).unwrap();
        assert_eq!(pcm.len(), 640);

        let mulaw = handler.handle_incoming_packet(&pkt, false).unwrap();
        assert_eq!(mulaw.len(), 320);
    }

    #[tokio::test]
    async fn test_incoming_packet_propagates_parse_errors() {
        let (mut handler, _reflector) = new_test_handler().await;

        let err = handler.handle_incoming_packet(b"M17 junk", true);
        assert!(err.is_err());
    }
}
