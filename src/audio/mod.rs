//! Browser-side audio codecs.
//!
//! The gateway accepts linear 16-bit PCM or G.711 µ-law from the browser;
//! everything toward the reflector is Codec2 (see [`crate::m17`]).

mod mulaw;

pub use mulaw::{mulaw_decode, mulaw_decode_into, mulaw_encode, mulaw_encode_into};
