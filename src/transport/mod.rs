//! Browser-facing transport.
//!
//! One WebSocket per browser carries typed JSON control messages and binary
//! audio frames in both directions. Writes from all producers (direct
//! replies, the demux task, the keepalive pinger) are serialized through a
//! single sink lock.

mod messages;
pub(crate) mod sink;
mod ws;

pub use messages::{ClientMessage, FormatRequest, JoinRequest, PttRequest, ServerMessage};
pub use sink::{send_error, BrowserSink, DisconnectNotifier};
pub use ws::{ws_handler, WsSink};

use std::time::Duration;

/// Upper bound for one WebSocket message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Per-write deadline toward the browser.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
