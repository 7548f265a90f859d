//! Session reactions to browser control messages and binary audio frames.
//!
//! Each handler parses its payload, mutates session state, and replies
//! through the [`BrowserSink`]. All user-visible failures become a single
//! `error` message; the frame or message that caused them is dropped.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::m17::validate_callsign;
use crate::reflector::{ReflectorEvent, ReflectorFactory};
use crate::transport::{send_error, BrowserSink, DisconnectNotifier, ServerMessage};
use crate::transport::{FormatRequest, JoinRequest, PttRequest};

use super::{Session, MAX_G711_FRAME_BYTES, MAX_PCM_FRAME_BYTES};

impl Session {
    /// `ping` → `pong`.
    pub async fn handle_ping(&self, sink: &dyn BrowserSink) {
        if let Err(e) = sink.send_message(&ServerMessage::Pong).await {
            warn!(session = %self.id(), err = %e, "error sending pong");
        }
    }

    /// `join {callsign, reflector, module}` → attach a reflector client and
    /// start the stream handler.
    pub async fn handle_join(
        &self,
        sink: &dyn BrowserSink,
        data: Value,
        factory: &Arc<dyn ReflectorFactory>,
        notifier: &Arc<DisconnectNotifier>,
    ) {
        let payload: JoinRequest = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id(), err = %e, "invalid join payload");
                send_error(sink, &format!("Invalid join payload: {e}")).await;
                return;
            }
        };

        let callsign = match validate_callsign(&payload.callsign) {
            Ok(c) => c,
            Err(e) => {
                warn!(session = %self.id(), callsign = %payload.callsign, err = %e, "invalid callsign");
                send_error(sink, &format!("Invalid callsign: {e}")).await;
                return;
            }
        };
        self.set_callsign(&callsign);

        let module = if payload.module.is_empty() {
            b'A'
        } else {
            payload.module.as_bytes()[0]
        };
        if payload.module.len() > 1 || !module.is_ascii_uppercase() {
            warn!(session = %self.id(), module = %payload.module, "invalid module");
            send_error(
                sink,
                &SessionError::InvalidModule(payload.module).to_string(),
            )
            .await;
            return;
        }

        let client = match factory.connect(&payload.reflector, &callsign, module).await {
            Ok(c) => c,
            Err(e) => {
                warn!(session = %self.id(), err = %e, "failed to connect to reflector");
                send_error(sink, &format!("Failed to connect to reflector: {e}")).await;
                return;
            }
        };
        self.set_reflector(Arc::clone(&client));

        // Report `disconnected` once, however the link ends.
        {
            let done = client.done();
            let notifier = Arc::clone(notifier);
            tokio::spawn(async move {
                done.cancelled().await;
                notifier.notify().await;
            });
        }

        // NACK surfaces as its own message before the disconnect report.
        if let Some(mut events) = client.take_events() {
            let session = self.strong();
            let notifier = Arc::clone(notifier);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        ReflectorEvent::Nack => {
                            warn!(session = %session.id(), "session received NACK from reflector");
                            session.post_message(ServerMessage::Nack);
                            notifier.notify().await;
                        }
                    }
                }
            });
        }

        if let Err(e) = self.start_stream_handler().await {
            warn!(session = %self.id(), err = %e, "failed to start stream handler");
            send_error(sink, &format!("Failed to start stream handler: {e}")).await;
            return;
        }

        info!(
            session = %self.id(),
            reflector = %payload.reflector,
            module = %(module as char),
            callsign = %callsign,
            "session joined reflector"
        );
        self.metrics.record_session_started();

        let joined = ServerMessage::Joined {
            reflector: payload.reflector,
            module: (module as char).to_string(),
            callsign,
        };
        if let Err(e) = sink.send_message(&joined).await {
            warn!(session = %self.id(), err = %e, "error sending joined message");
        }
    }

    /// `ptt {active}`: rising edge starts a new stream, falling edge
    /// flushes it with the last-packet flag.
    pub async fn handle_ptt(&self, sink: &dyn BrowserSink, data: Value) {
        let payload: PttRequest = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id(), err = %e, "invalid PTT payload");
                send_error(sink, &format!("Invalid PTT payload: {e}")).await;
                return;
            }
        };

        info!(session = %self.id(), active = payload.active, "session PTT");
        self.metrics.record_ptt();

        if let Some(stream) = self.shared_stream() {
            if payload.active {
                stream.lock().await.start_new_stream();
            } else if let Err(e) = stream.lock().await.finalize().await {
                warn!(session = %self.id(), err = %e, "failed to finalize stream");
            }
        }

        let resp = ServerMessage::Ptt {
            active: payload.active,
        };
        if let Err(e) = sink.send_message(&resp).await {
            warn!(session = %self.id(), err = %e, "error sending ptt message");
        }
    }

    /// `format {audio}`: switch between PCM and µ-law browser audio.
    pub async fn handle_format(&self, sink: &dyn BrowserSink, data: Value) {
        let payload: FormatRequest = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id(), err = %e, "invalid format payload");
                send_error(sink, &format!("Invalid format payload: {e}")).await;
                return;
            }
        };

        let format = payload.audio.to_lowercase();
        match format.as_str() {
            "pcm" => self.set_use_pcm(true),
            "g711" => self.set_use_pcm(false),
            _ => {
                warn!(session = %self.id(), format = %payload.audio, "unknown audio format");
                send_error(sink, &format!("Unknown audio format: {}", payload.audio)).await;
                return;
            }
        }

        let resp = ServerMessage::Format { audio: format };
        if let Err(e) = sink.send_message(&resp).await {
            warn!(session = %self.id(), err = %e, "error sending format message");
        }
    }

    /// `disconnect`: drop the reflector and confirm.
    pub async fn handle_disconnect(&self, notifier: &Arc<DisconnectNotifier>) {
        info!(session = %self.id(), "session requested disconnect");
        if let Some(reflector) = self.take_reflector() {
            reflector.disconnect().await;
        }
        notifier.notify().await;
    }

    /// Anything with an unrecognized `type`.
    pub async fn handle_unknown(&self, sink: &dyn BrowserSink, msg_type: &str) {
        warn!(session = %self.id(), msg_type = %msg_type, "unknown message type");
        send_error(sink, &format!("Unknown message type: {msg_type}")).await;
    }

    /// A binary audio frame, interpreted per the session's current format.
    pub async fn handle_audio(&self, sink: &dyn BrowserSink, frame: &[u8]) {
        if !self.has_stream() {
            warn!(session = %self.id(), "received audio but no active stream handler");
            send_error(
                sink,
                &format!(
                    "Received audio but no active stream handler (session {})",
                    self.id()
                ),
            )
            .await;
            return;
        }

        if self.use_pcm() {
            self.ingest_pcm(sink, frame).await;
        } else {
            self.ingest_g711(sink, frame).await;
        }
    }

    async fn ingest_pcm(&self, sink: &dyn BrowserSink, frame: &[u8]) {
        if frame.len() > MAX_PCM_FRAME_BYTES {
            warn!(session = %self.id(), length = frame.len(), "PCM frame too large");
            send_error(
                sink,
                &SessionError::FrameTooLarge {
                    kind: "PCM",
                    len: frame.len(),
                }
                .to_string(),
            )
            .await;
            return;
        }

        let result = async {
            if frame.len() % 2 != 0 {
                return Err(SessionError::InvalidPcmLength(frame.len()).into());
            }
            let mut pcm = vec![0i16; frame.len() / 2];
            LittleEndian::read_i16_into(frame, &mut pcm);
            self.handle_pcm_frame(&pcm, false).await
        }
        .await;

        if let Err(e) = result {
            warn!(session = %self.id(), err = %e, "error handling PCM frame");
            send_error(sink, &format!("Error handling PCM frame: {e}")).await;
        }
    }

    async fn ingest_g711(&self, sink: &dyn BrowserSink, frame: &[u8]) {
        if frame.len() > MAX_G711_FRAME_BYTES {
            warn!(session = %self.id(), length = frame.len(), "G711 frame too large");
            send_error(
                sink,
                &SessionError::FrameTooLarge {
                    kind: "G711",
                    len: frame.len(),
                }
                .to_string(),
            )
            .await;
            return;
        }

        if let Err(e) = self.handle_g711_frame(frame, false).await {
            warn!(session = %self.id(), err = %e, "error handling G711 frame");
            send_error(sink, &format!("Error handling G711 frame: {e}")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    use crate::error::Result;
    use crate::metrics::GatewayMetrics;
    use crate::reflector::ReflectorClient;
    use crate::session::SessionConfig;
    use crate::transport::sink::testing::RecordingSink;

    use super::*;

    /// Factory that connects to the test's stand-in reflector regardless of
    /// the address the browser asked for.
    struct TestFactory {
        addr: String,
    }

    #[async_trait]
    impl ReflectorFactory for TestFactory {
        async fn connect(
            &self,
            _addr: &str,
            callsign: &str,
            module: u8,
        ) -> Result<Arc<ReflectorClient>> {
            ReflectorClient::connect(&self.addr, callsign, module).await
        }
    }

    struct Harness {
        session: Arc<Session>,
        sink: Arc<RecordingSink>,
        factory: Arc<dyn ReflectorFactory>,
        notifier: Arc<DisconnectNotifier>,
        reflector: UdpSocket,
    }

    async fn new_harness() -> Harness {
        let reflector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = reflector.local_addr().unwrap().to_string();

        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let session = Session::new(uuid::Uuid::new_v4(), &SessionConfig::default(), metrics);
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(DisconnectNotifier::new(sink.clone()));

        Harness {
            session,
            sink,
            factory: Arc::new(TestFactory { addr }),
            notifier,
            reflector,
        }
    }

    fn join_payload(callsign: &str, module: &str) -> Value {
        serde_json::json!({
            "callsign": callsign,
            "reflector": "127.0.0.1:17000",
            "module": module,
        })
    }

    async fn join(h: &Harness, callsign: &str, module: &str) {
        h.session
            .handle_join(
                h.sink.as_ref(),
                join_payload(callsign, module),
                &h.factory,
                &h.notifier,
            )
            .await;
    }

    fn last_message(sink: &RecordingSink) -> ServerMessage {
        sink.messages.lock().last().cloned().expect("no messages")
    }

    #[tokio::test]
    async fn test_join_happy_path() {
        let h = new_harness().await;
        join(&h, "KC1ABC", "A").await;

        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Joined {
                reflector: "127.0.0.1:17000".into(),
                module: "A".into(),
                callsign: "KC1ABC".into(),
            }
        );
        assert!(h.session.has_stream());

        // The reflector saw the CONN with module A.
        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(1), h.reflector.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..4], b"CONN");
        assert_eq!(buf[n - 1], b'A');
    }

    #[tokio::test]
    async fn test_join_module_validation() {
        for (module, expect) in [
            ("b", "Invalid module: b"),
            ("AB", "Invalid module: AB"),
            ("1", "Invalid module: 1"),
        ] {
            let h = new_harness().await;
            join(&h, "KC1ABC", module).await;
            assert_eq!(
                last_message(&h.sink),
                ServerMessage::Error {
                    message: expect.into()
                },
                "module {module:?}"
            );
            assert!(!h.session.has_stream());
        }
    }

    #[tokio::test]
    async fn test_join_empty_module_defaults_to_a() {
        let h = new_harness().await;
        join(&h, "KC1ABC", "").await;

        assert!(matches!(
            last_message(&h.sink),
            ServerMessage::Joined { module, .. } if module == "A"
        ));
    }

    #[tokio::test]
    async fn test_join_invalid_callsign() {
        let h = new_harness().await;
        join(&h, "BAD$", "A").await;

        match last_message(&h.sink) {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("Invalid callsign:"), "{message}");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ptt_replies_and_counts() {
        let h = new_harness().await;
        join(&h, "KC1ABC", "A").await;

        h.session
            .handle_ptt(h.sink.as_ref(), serde_json::json!({"active": true}))
            .await;
        assert_eq!(last_message(&h.sink), ServerMessage::Ptt { active: true });

        h.session
            .handle_ptt(h.sink.as_ref(), serde_json::json!({"active": false}))
            .await;
        assert_eq!(last_message(&h.sink), ServerMessage::Ptt { active: false });

        assert_eq!(h.session.metrics.ptt_events.get(), 2);
    }

    #[tokio::test]
    async fn test_format_switches_and_rejects() {
        let h = new_harness().await;

        h.session
            .handle_format(h.sink.as_ref(), serde_json::json!({"audio": "PCM"}))
            .await;
        assert!(h.session.use_pcm());
        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Format {
                audio: "pcm".into()
            }
        );

        h.session
            .handle_format(h.sink.as_ref(), serde_json::json!({"audio": "g711"}))
            .await;
        assert!(!h.session.use_pcm());

        h.session
            .handle_format(h.sink.as_ref(), serde_json::json!({"audio": "opus"}))
            .await;
        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Error {
                message: "Unknown audio format: opus".into()
            }
        );
    }

    #[tokio::test]
    async fn test_audio_without_stream() {
        let h = new_harness().await;
        h.session.handle_audio(h.sink.as_ref(), &[0u8; 320]).await;

        match last_message(&h.sink) {
            ServerMessage::Error { message } => {
                assert!(
                    message.contains("no active stream handler"),
                    "{message}"
                );
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_audio_pcm_validation() {
        let h = new_harness().await;
        join(&h, "KC1ABC", "A").await;
        h.session
            .handle_format(h.sink.as_ref(), serde_json::json!({"audio": "pcm"}))
            .await;

        // Oversized frame.
        h.session.handle_audio(h.sink.as_ref(), &[0u8; 642]).await;
        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Error {
                message: "PCM frame too large: 642".into()
            }
        );

        // Odd byte count.
        h.session.handle_audio(h.sink.as_ref(), &[0u8; 3]).await;
        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Error {
                message: "Error handling PCM frame: Invalid PCM frame length: 3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_audio_g711_validation() {
        let h = new_harness().await;
        join(&h, "KC1ABC", "A").await;

        h.session.handle_audio(h.sink.as_ref(), &[0u8; 321]).await;
        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Error {
                message: "G711 frame too large: 321".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_message_type() {
        let h = new_harness().await;
        h.session.handle_unknown(h.sink.as_ref(), "bogus").await;
        assert_eq!(
            last_message(&h.sink),
            ServerMessage::Error {
                message: "Unknown message type: bogus".into()
            }
        );
    }

    #[tokio::test]
    async fn test_disconnect_notifies_once() {
        let h = new_harness().await;
        join(&h, "KC1ABC", "A").await;

        h.session.handle_disconnect(&h.notifier).await;
        h.session.handle_disconnect(&h.notifier).await;

        let disconnects = h
            .sink
            .messages
            .lock()
            .iter()
            .filter(|m| matches!(m, ServerMessage::Disconnected))
            .count();
        assert_eq!(disconnects, 1);
        assert!(h.session.reflector().is_none());
    }
}
