//! Per-browser sessions.
//!
//! A session binds one browser channel to at most one reflector client and
//! one stream handler. It owns the reflector-demux task that turns incoming
//! stream packets into browser audio and `rx` state transitions.

mod handlers;
mod manager;

pub use manager::SessionManager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio;
use crate::error::{Result, SessionError};
use crate::m17::{parse_stream_packet_with_lsf, StreamHandler, STREAM_MAGIC};
use crate::metrics::GatewayMetrics;
use crate::reflector::ReflectorClient;
use crate::transport::ServerMessage;

/// Capacity of the outgoing browser-audio channel.
pub const OUTGOING_AUDIO_CAPACITY: usize = 100;

/// Capacity of the outgoing control-message channel.
pub const OUTGOING_MESSAGES_CAPACITY: usize = 20;

/// Largest accepted binary PCM frame from the browser (320 samples).
pub const MAX_PCM_FRAME_BYTES: usize = 640;

/// Largest accepted binary µ-law frame from the browser.
pub const MAX_G711_FRAME_BYTES: usize = 320;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum concurrent sessions (0 = unbounded).
    pub max_sessions: usize,
    /// Stream-packet silence after which receive is considered over.
    pub reflector_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 0,
            reflector_timeout: Duration::from_secs(2),
        }
    }
}

type SharedStream = Arc<tokio::sync::Mutex<StreamHandler>>;

struct DemuxTask {
    stop: CancellationToken,
    handle: JoinHandle<mpsc::Receiver<Vec<u8>>>,
}

pub struct Session {
    id: Uuid,
    /// Self-handle for tasks the session spawns.
    weak: Weak<Session>,
    callsign: Mutex<String>,
    use_pcm: AtomicBool,

    reflector: Mutex<Option<Arc<ReflectorClient>>>,
    stream: Mutex<Option<SharedStream>>,
    demux: tokio::sync::Mutex<Option<DemuxTask>>,
    /// Packet receiver parked between demux runs.
    packets_cache: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,

    audio_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    audio_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    msgs_tx: Mutex<Option<mpsc::Sender<ServerMessage>>>,
    msgs_rx: Mutex<Option<mpsc::Receiver<ServerMessage>>>,

    /// Scratch buffer reused for µ-law decoding of browser frames.
    pcm_scratch: tokio::sync::Mutex<Vec<i16>>,

    reflector_timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    pub fn new(id: Uuid, config: &SessionConfig, metrics: Arc<GatewayMetrics>) -> Arc<Self> {
        let (audio_tx, audio_rx) = mpsc::channel(OUTGOING_AUDIO_CAPACITY);
        let (msgs_tx, msgs_rx) = mpsc::channel(OUTGOING_MESSAGES_CAPACITY);

        Arc::new_cyclic(|weak| Self {
            id,
            weak: weak.clone(),
            callsign: Mutex::new(String::new()),
            use_pcm: AtomicBool::new(false),
            reflector: Mutex::new(None),
            stream: Mutex::new(None),
            demux: tokio::sync::Mutex::new(None),
            packets_cache: Mutex::new(None),
            audio_tx: Mutex::new(Some(audio_tx)),
            audio_rx: Mutex::new(Some(audio_rx)),
            msgs_tx: Mutex::new(Some(msgs_tx)),
            msgs_rx: Mutex::new(Some(msgs_rx)),
            pcm_scratch: tokio::sync::Mutex::new(Vec::new()),
            reflector_timeout: config.reflector_timeout,
            metrics,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Strong self-handle. Sessions only exist behind the `Arc` returned by
    /// [`new`](Self::new), so the upgrade cannot fail while `&self` lives.
    pub(crate) fn strong(&self) -> Arc<Self> {
        self.weak.upgrade().expect("session dropped while in use")
    }

    pub fn callsign(&self) -> String {
        self.callsign.lock().clone()
    }

    pub fn set_callsign(&self, callsign: &str) {
        *self.callsign.lock() = callsign.to_string();
    }

    /// Whether browser audio flows as PCM (`true`) or µ-law (`false`).
    pub fn use_pcm(&self) -> bool {
        self.use_pcm.load(Ordering::Acquire)
    }

    pub fn set_use_pcm(&self, pcm: bool) {
        self.use_pcm.store(pcm, Ordering::Release);
    }

    pub fn reflector(&self) -> Option<Arc<ReflectorClient>> {
        self.reflector.lock().clone()
    }

    /// Attach a reflector client, discarding any parked packet receiver
    /// from a previous attachment.
    pub fn set_reflector(&self, client: Arc<ReflectorClient>) {
        *self.packets_cache.lock() = None;
        *self.reflector.lock() = Some(client);
    }

    pub(crate) fn take_reflector(&self) -> Option<Arc<ReflectorClient>> {
        self.reflector.lock().take()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.lock().is_some()
    }

    fn shared_stream(&self) -> Option<SharedStream> {
        self.stream.lock().clone()
    }

    /// Take the browser-audio receiver (transport writer side).
    pub fn take_outgoing_audio(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.audio_rx.lock().take()
    }

    /// Take the control-message receiver (transport writer side).
    pub fn take_outgoing_messages(&self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.msgs_rx.lock().take()
    }

    /// Queue a control message toward the browser; never blocks, drops on a
    /// full or closed channel.
    pub(crate) fn post_message(&self, msg: ServerMessage) {
        if let Some(tx) = self.msgs_tx.lock().as_ref() {
            let _ = tx.try_send(msg);
        }
    }

    /// Queue an audio frame toward the browser; never blocks, drops and
    /// counts on a full channel.
    fn post_audio(&self, frame: Vec<u8>) {
        if let Some(tx) = self.audio_tx.lock().as_ref() {
            if tx.try_send(frame).is_err() {
                warn!(session = %self.id, "dropping audio frame; outgoing channel full");
                self.metrics.record_audio_frame_dropped();
            }
        }
    }

    fn notify_rx_active(&self, src: &str) {
        self.post_message(ServerMessage::Rx {
            active: true,
            src: Some(src.to_string()),
        });
    }

    fn notify_rx_inactive(&self) {
        self.post_message(ServerMessage::Rx {
            active: false,
            src: None,
        });
    }

    /// Drop the outgoing channel senders so the transport writer observes
    /// channel close. Called only from session cleanup.
    pub(crate) fn close_outgoing_channels(&self) {
        *self.audio_tx.lock() = None;
        *self.msgs_tx.lock() = None;
    }

    /// Build a stream handler for the attached reflector and start the
    /// demux task. Any previous handler is stopped first.
    pub async fn start_stream_handler(&self) -> Result<()> {
        self.stop_stream_handler().await?;

        let reflector = self.reflector().ok_or(SessionError::NoReflector)?;

        let dst = format!("{} {}", reflector.designator(), reflector.module() as char);
        let handler = StreamHandler::new(
            reflector.socket(),
            reflector.remote_addr(),
            &self.callsign(),
            &dst,
        )?;
        let stream: SharedStream = Arc::new(tokio::sync::Mutex::new(handler));
        *self.stream.lock() = Some(Arc::clone(&stream));

        let packets = self
            .packets_cache
            .lock()
            .take()
            .or_else(|| reflector.take_packets())
            .ok_or_else(|| anyhow::anyhow!("reflector packet stream unavailable"))?;

        let stop = CancellationToken::new();
        let handle = tokio::spawn(run_demux(
            self.strong(),
            stream,
            packets,
            reflector.done(),
            stop.clone(),
        ));
        *self.demux.lock().await = Some(DemuxTask { stop, handle });

        Ok(())
    }

    /// Stop the demux task and drop the stream handler. No packet is
    /// processed after this returns. Errors only if the demux task
    /// panicked; the handler is dropped regardless.
    pub async fn stop_stream_handler(&self) -> Result<()> {
        let task = self.demux.lock().await.take();
        let mut res = Ok(());

        if let Some(task) = task {
            task.stop.cancel();
            match task.handle.await {
                Ok(packets) => {
                    *self.packets_cache.lock() = Some(packets);
                }
                Err(e) => {
                    res = Err(anyhow::anyhow!("demux task failed: {e}").into());
                }
            }
        }

        *self.stream.lock() = None;
        res
    }

    /// Forward linear PCM samples from the browser to the reflector.
    pub async fn handle_pcm_frame(&self, pcm: &[i16], is_last: bool) -> Result<()> {
        let stream = self.shared_stream().ok_or(SessionError::NoActiveStream)?;
        let result = stream.lock().await.send_pcm_frame(pcm, is_last).await;
        result
    }

    /// µ-law decode a browser frame, then forward it.
    pub async fn handle_g711_frame(&self, frame: &[u8], is_last: bool) -> Result<()> {
        let stream = self.shared_stream().ok_or(SessionError::NoActiveStream)?;
        let mut scratch = self.pcm_scratch.lock().await;
        audio::mulaw_decode_into(&mut scratch, frame);
        let result = stream.lock().await.send_pcm_frame(&scratch, is_last).await;
        result
    }

    async fn process_packet(&self, stream: &SharedStream, pkt: &[u8], rx_active: &mut bool) {
        if pkt.len() < 4 || pkt[..4] != STREAM_MAGIC[..] {
            return;
        }

        let (spkt, lsf) = match parse_stream_packet_with_lsf(pkt) {
            Ok(v) => v,
            Err(e) => {
                warn!(session = %self.id, err = %e, "failed to parse incoming stream");
                return;
            }
        };

        debug!(
            session = %self.id,
            stream_id = spkt.stream_id,
            src = %lsf.source,
            dst = %lsf.destination,
            "incoming stream"
        );

        if !*rx_active {
            *rx_active = true;
            self.notify_rx_active(&lsf.source);
        }

        match stream
            .lock()
            .await
            .handle_incoming_packet(pkt, self.use_pcm())
        {
            Ok(frame) if !frame.is_empty() => self.post_audio(frame),
            Ok(_) => {}
            Err(e) => {
                warn!(session = %self.id, err = %e, "failed to decode incoming stream");
                return;
            }
        }

        if spkt.is_last() && *rx_active {
            *rx_active = false;
            self.notify_rx_inactive();
        }
    }
}

/// Reflector-demux loop: one task per session while a stream handler is
/// attached. Returns the packet receiver so a later handler can resume
/// consuming the same reflector.
async fn run_demux(
    session: Arc<Session>,
    stream: SharedStream,
    mut packets: mpsc::Receiver<Vec<u8>>,
    reflector_done: CancellationToken,
    stop: CancellationToken,
) -> mpsc::Receiver<Vec<u8>> {
    let rx_timeout = session.reflector_timeout;
    let timer = tokio::time::sleep(rx_timeout);
    tokio::pin!(timer);

    let mut rx_active = false;

    loop {
        tokio::select! {
            () = stop.cancelled() => {
                if rx_active {
                    session.notify_rx_inactive();
                }
                return packets;
            }

            () = reflector_done.cancelled() => {
                if rx_active {
                    session.notify_rx_inactive();
                }
                return packets;
            }

            pkt = packets.recv() => {
                let Some(pkt) = pkt else {
                    if rx_active {
                        session.notify_rx_inactive();
                    }
                    return packets;
                };

                session.process_packet(&stream, &pkt, &mut rx_active).await;
                if rx_active {
                    timer.as_mut().reset(tokio::time::Instant::now() + rx_timeout);
                }
            }

            () = &mut timer => {
                if rx_active {
                    rx_active = false;
                    session.notify_rx_inactive();
                }
                timer.as_mut().reset(tokio::time::Instant::now() + rx_timeout);
            }
        }
    }
}
