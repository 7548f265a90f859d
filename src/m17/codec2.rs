//! Codec2-3200 vocoder wrapper.
//!
//! Enforces the framing contract the rest of the crate relies on: one codec
//! frame is exactly 160 PCM samples in and 8 packed bytes out. The vocoder
//! itself comes from the `codec2` crate.

use codec2::{Codec2, Codec2Mode};

use crate::error::AudioError;

/// PCM samples per Codec2-3200 frame (20 ms at 8 kHz).
pub const CODEC2_FRAME_SAMPLES: usize = 160;

/// Packed bytes per Codec2-3200 frame (64 bits at 3200 bit/s).
pub const CODEC2_FRAME_BYTES: usize = 8;

/// A Codec2-3200 encoder/decoder instance.
///
/// The vocoder is stateful; one instance per stream handler.
pub struct Codec3200 {
    inner: Codec2,
}

impl Codec3200 {
    pub fn new() -> Self {
        Self {
            inner: Codec2::new(Codec2Mode::MODE_3200),
        }
    }

    /// Encode exactly 160 PCM samples into 8 packed bytes.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<[u8; CODEC2_FRAME_BYTES], AudioError> {
        if pcm.len() != CODEC2_FRAME_SAMPLES {
            return Err(AudioError::InvalidPcmBlock(pcm.len()));
        }

        let mut bits = [0u8; CODEC2_FRAME_BYTES];
        self.inner.encode(&mut bits, pcm);
        Ok(bits)
    }

    /// Decode 8 packed bytes back into 160 PCM samples.
    pub fn decode(&mut self, bits: &[u8]) -> Result<[i16; CODEC2_FRAME_SAMPLES], AudioError> {
        if bits.len() != CODEC2_FRAME_BYTES {
            return Err(AudioError::InvalidCodecFrame(bits.len()));
        }

        let mut pcm = [0i16; CODEC2_FRAME_SAMPLES];
        self.inner.decode(&mut pcm, bits);
        Ok(pcm)
    }
}

impl Default for Codec3200 {
    fn default() -> Self {
        Self::new()
    }
}
