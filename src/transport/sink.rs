//! Browser-facing write side.
//!
//! The session core talks to the browser through [`BrowserSink`], an opaque
//! ordered channel: JSON control messages and binary audio frames. The
//! WebSocket implementation lives in [`super::ws`]; tests substitute a
//! collector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

use super::messages::ServerMessage;

/// Ordered writer toward one browser.
///
/// Implementations serialize concurrent writers internally; callers never
/// coordinate.
#[async_trait]
pub trait BrowserSink: Send + Sync {
    /// Send a typed control message.
    async fn send_message(&self, msg: &ServerMessage) -> Result<()>;

    /// Send a binary audio frame.
    async fn send_audio(&self, frame: &[u8]) -> Result<()>;
}

/// Send an `error` message, logging if even that fails.
pub async fn send_error(sink: &dyn BrowserSink, message: &str) {
    let msg = ServerMessage::Error {
        message: message.to_string(),
    };
    if let Err(e) = sink.send_message(&msg).await {
        warn!(err = %e, "error sending error message");
    }
}

/// Once-only `disconnected` notifier shared by the watchers that can race
/// to report a dropped reflector (done watcher, NACK watcher, explicit
/// disconnect).
pub struct DisconnectNotifier {
    sink: Arc<dyn BrowserSink>,
    sent: AtomicBool,
}

impl DisconnectNotifier {
    pub fn new(sink: Arc<dyn BrowserSink>) -> Self {
        Self {
            sink,
            sent: AtomicBool::new(false),
        }
    }

    /// Emit `disconnected` exactly once across all callers.
    pub async fn notify(&self) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sink.send_message(&ServerMessage::Disconnected).await {
            warn!(err = %e, "error sending disconnected message");
        }
    }
}
