//! Prometheus metrics.
//!
//! All collectors live in an owned registry so tests can build isolated
//! instances; the `/metrics` route encodes it on demand.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Gateway metrics registry and collectors.
pub struct GatewayMetrics {
    registry: Registry,

    pub sessions_started: IntCounter,
    pub sessions_ended: IntCounter,
    pub sessions_active: IntGauge,
    pub ptt_events: IntCounter,
    pub heartbeats: IntCounter,
    pub audio_frames_dropped: IntCounter,
}

impl GatewayMetrics {
    /// Create a metrics instance with all collectors registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sessions_started = IntCounter::new(
            "m17_sessions_started_total",
            "Total number of sessions started",
        )?;
        let sessions_ended = IntCounter::new(
            "m17_sessions_ended_total",
            "Total number of sessions ended",
        )?;
        let sessions_active =
            IntGauge::new("m17_sessions_active", "Current number of active sessions")?;
        let ptt_events = IntCounter::new(
            "m17_ptt_events_total",
            "Total number of push-to-talk events",
        )?;
        let heartbeats =
            IntCounter::new("m17_heartbeat_total", "Total number of heartbeat ticks")?;
        let audio_frames_dropped = IntCounter::new(
            "m17_audio_frames_dropped_total",
            "Total number of audio frames dropped",
        )?;

        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(sessions_ended.clone()))?;
        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(ptt_events.clone()))?;
        registry.register(Box::new(heartbeats.clone()))?;
        registry.register(Box::new(audio_frames_dropped.clone()))?;

        Ok(Self {
            registry,
            sessions_started,
            sessions_ended,
            sessions_active,
            ptt_events,
            heartbeats,
            audio_frames_dropped,
        })
    }

    pub fn record_session_started(&self) {
        self.sessions_started.inc();
        self.sessions_active.inc();
    }

    pub fn record_session_ended(&self) {
        self.sessions_ended.inc();
        self.sessions_active.dec();
    }

    pub fn record_ptt(&self) {
        self.ptt_events.inc();
    }

    /// Heartbeat tick; re-anchors the active gauge to the session count.
    pub fn record_heartbeat(&self, session_count: usize) {
        self.heartbeats.inc();
        self.sessions_active.set(session_count as i64);
    }

    pub fn record_audio_frame_dropped(&self) {
        self.audio_frames_dropped.inc();
    }

    /// Encode the registry in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
