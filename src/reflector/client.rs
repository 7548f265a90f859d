//! UDP client for one M17 reflector.
//!
//! The client owns its socket and two background tasks: a listen loop that
//! demultiplexes incoming datagrams into stream packets and control
//! handling, and a ping watchdog that closes the link after prolonged
//! silence. Closing is latched once-only and best-effort sends DISC.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ReflectorError, Result};
use crate::m17::{
    build_conn, build_disc, build_pong, parse_control_packet, ControlPacket, STREAM_MAGIC,
};

/// Capacity of the stream-packet channel.
pub const PACKET_CAPACITY: usize = 100;

/// Capacity of the protocol-event channel.
pub const EVENT_CAPACITY: usize = 10;

/// Rolling read deadline for the listen loop.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the watchdog checks for reflector silence.
const PING_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Silence after which a connected reflector is presumed gone.
const PING_SILENCE_LIMIT: Duration = Duration::from_secs(30);

/// Protocol events surfaced to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectorEvent {
    /// The reflector denied the connection.
    Nack,
}

pub struct ReflectorClient {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    callsign: String,
    module: u8,
    designator: Mutex<String>,
    connected: AtomicBool,
    last_heard: Mutex<Instant>,
    cancel: CancellationToken,
    closed: AtomicBool,

    packets_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    events_rx: Mutex<Option<mpsc::Receiver<ReflectorEvent>>>,
    events_tx: Mutex<Option<mpsc::Sender<ReflectorEvent>>>,
}

impl ReflectorClient {
    /// Resolve `reflector_addr`, open a UDP socket of the matching address
    /// family, and send CONN. The listen loop and ping watchdog start only
    /// when the CONN send succeeds.
    pub async fn connect(reflector_addr: &str, callsign: &str, module: u8) -> Result<Arc<Self>> {
        let remote = lookup_host(reflector_addr)
            .await
            .map_err(|e| ReflectorError::Resolve {
                addr: reflector_addr.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ReflectorError::Resolve {
                addr: reflector_addr.to_string(),
                reason: "no addresses".to_string(),
            })?;

        let bind: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().expect("valid bind address")
        } else {
            "0.0.0.0:0".parse().expect("valid bind address")
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| ReflectorError::BindFailed(e.to_string()))?;

        let (packets_tx, packets_rx) = mpsc::channel(PACKET_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let client = Arc::new(Self {
            socket: Arc::new(socket),
            remote_addr: remote,
            callsign: callsign.to_string(),
            module,
            designator: Mutex::new(String::new()),
            connected: AtomicBool::new(false),
            last_heard: Mutex::new(Instant::now()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            packets_rx: Mutex::new(Some(packets_rx)),
            events_rx: Mutex::new(Some(events_rx)),
            events_tx: Mutex::new(Some(events_tx)),
        });

        let conn = build_conn(&client.callsign, client.module)?;
        if let Err(e) = client.socket.send_to(&conn, remote).await {
            error!(err = %e, reflector = %remote, "error sending CONN");
            return Err(ReflectorError::SendFailed(e.to_string()).into());
        }

        tokio::spawn(Arc::clone(&client).listen(packets_tx));
        tokio::spawn(Arc::clone(&client).monitor_ping());

        Ok(client)
    }

    /// Shared handle to the socket, used by the stream handler for writes.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn module(&self) -> u8 {
        self.module
    }

    /// Human label for the reflector, resolved from the directory.
    pub fn designator(&self) -> String {
        self.designator.lock().clone()
    }

    pub fn set_designator(&self, designator: &str) {
        *self.designator.lock() = designator.to_string();
    }

    /// Whether the reflector has acknowledged the CONN.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Token cancelled when the client closes, for `disconnected` watchers.
    pub fn done(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Take the stream-packet receiver. Present until first taken; the
    /// channel closes when the listen loop exits.
    pub fn take_packets(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.packets_rx.lock().take()
    }

    /// Take the protocol-event receiver.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ReflectorEvent>> {
        self.events_rx.lock().take()
    }

    fn touch(&self) {
        *self.last_heard.lock() = Instant::now();
    }

    async fn send_control(&self, pkt: &[u8]) -> Result<()> {
        self.socket
            .send_to(pkt, self.remote_addr)
            .await
            .map_err(|e| ReflectorError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn listen(self: Arc<Self>, packets_tx: mpsc::Sender<Vec<u8>>) {
        // Dropping packets_tx on exit closes the channel for the demux side.
        let mut buf = vec![0u8; 512];

        loop {
            let recv = tokio::select! {
                () = self.cancel.cancelled() => return,
                r = timeout(READ_TIMEOUT, self.socket.recv_from(&mut buf)) => r,
            };

            let (n, addr) = match recv {
                // Rolling read deadline elapsed; go around and re-check.
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!(err = %e, reflector = %self.designator(), "UDP read error");
                    continue;
                }
                Ok(Ok(v)) => v,
            };

            if self.cancel.is_cancelled() {
                return;
            }

            if addr != self.remote_addr {
                warn!(
                    source = %addr,
                    reflector = %self.designator(),
                    "ignoring packet from unexpected source"
                );
                continue;
            }

            let data = buf[..n].to_vec();

            if n >= 4 && data[..4] == STREAM_MAGIC[..] {
                if packets_tx.try_send(data).is_err() {
                    warn!(
                        reflector = %self.designator(),
                        "packet channel full, dropping stream packet"
                    );
                }
            } else {
                self.handle_control_packet(&data).await;
            }
        }
    }

    async fn handle_control_packet(&self, data: &[u8]) {
        let packet = match parse_control_packet(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, reflector = %self.designator(), "unknown/invalid control packet");
                return;
            }
        };

        match packet {
            ControlPacket::Ackn => {
                self.connected.store(true, Ordering::Release);
                self.touch();
                info!(
                    callsign = %self.callsign,
                    reflector = %self.designator(),
                    "reflector ACKN: connected"
                );
            }

            ControlPacket::Nack => {
                error!(reflector = %self.designator(), "reflector NACK: connection denied");
                if let Some(tx) = self.events_tx.lock().as_ref() {
                    let _ = tx.try_send(ReflectorEvent::Nack);
                }
                self.close().await;
            }

            ControlPacket::Ping { callsign } => {
                debug!(
                    from = %callsign,
                    reflector = %self.designator(),
                    "reflector PING -> sending PONG"
                );
                self.touch();
                match build_pong(&self.callsign) {
                    Ok(pong) => {
                        if let Err(e) = self.send_control(&pong).await {
                            warn!(err = %e, reflector = %self.designator(), "failed to send PONG");
                        }
                    }
                    Err(e) => {
                        warn!(err = %e, reflector = %self.designator(), "failed to build PONG");
                    }
                }
            }

            ControlPacket::Disc { .. } => {
                info!(reflector = %self.designator(), "reflector DISC: disconnected by reflector");
                self.close().await;
            }

            other => {
                warn!(
                    packet = ?other,
                    reflector = %self.designator(),
                    "unhandled control packet type"
                );
            }
        }
    }

    async fn monitor_ping(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(PING_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let silent = self.last_heard.lock().elapsed() > PING_SILENCE_LIMIT;
                    if silent && self.is_connected() {
                        warn!(
                            reflector = %self.designator(),
                            "no PING from reflector; assuming disconnected"
                        );
                        self.close().await;
                        return;
                    }
                }
            }
        }
    }

    /// Alias for [`close`](Self::close), matching the session's vocabulary.
    pub async fn disconnect(&self) {
        self.close().await;
    }

    /// Close the link: cancel both tasks, best-effort send DISC, and close
    /// the event channel. Safe to call more than once; only the first call
    /// acts. DISC is sent even if the reflector never ACKed, mirroring the
    /// handshake's symmetry.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();

        match build_disc(&self.callsign) {
            Ok(disc) => {
                if let Err(e) = self.send_control(&disc).await {
                    warn!(err = %e, reflector = %self.designator(), "error sending DISC");
                }
            }
            Err(e) => {
                warn!(err = %e, reflector = %self.designator(), "error building DISC");
            }
        }

        *self.events_tx.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::m17::{build_lsf, build_stream_packet, lsf_to_lsd};

    /// Bind a UDP socket standing in for a reflector.
    async fn bind_reflector() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    /// Read the client's CONN and return its source address.
    async fn expect_conn(server: &UdpSocket) -> SocketAddr {
        let mut buf = [0u8; 64];
        let (n, addr) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("timed out waiting for CONN")
            .unwrap();
        assert_eq!(&buf[..4], b"CONN");
        assert_eq!(n, 11);
        addr
    }

    #[tokio::test]
    async fn test_connect_sends_conn() {
        let server = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();

        expect_conn(&server).await;
        client.close().await;
    }

    #[tokio::test]
    async fn test_connect_to_port_zero_fails() {
        // Sending CONN to port 0 fails, so construction must fail.
        let res = ReflectorClient::connect("127.0.0.1:0", "TEST", b'A').await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_ipv6_loopback() {
        let server = match UdpSocket::bind("[::1]:0").await {
            Ok(s) => s,
            Err(_) => return, // no IPv6 on this host
        };
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();

        let addr = expect_conn(&server).await;
        assert!(addr.is_ipv6());
        client.close().await;
    }

    #[tokio::test]
    async fn test_stream_vs_control_classification() {
        let server = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();
        let client_addr = expect_conn(&server).await;
        let mut packets = client.take_packets().unwrap();

        // Anything starting with the stream magic lands on the packet
        // channel, even a bare magic.
        server.send_to(b"M17 ", client_addr).await.unwrap();
        let pkt = timeout(Duration::from_secs(1), packets.recv())
            .await
            .expect("expected stream packet")
            .unwrap();
        assert_eq!(pkt, b"M17 ");

        // A short datagram that is not a stream packet goes to the control
        // path and must not appear on the packet channel.
        server.send_to(b"M17", client_addr).await.unwrap();
        let res = timeout(Duration::from_millis(200), packets.recv()).await;
        assert!(res.is_err(), "short datagram treated as stream");

        client.close().await;
    }

    #[tokio::test]
    async fn test_ackn_marks_connected_and_ping_gets_pong() {
        let server = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();
        let client_addr = expect_conn(&server).await;

        assert!(!client.is_connected());
        server.send_to(b"ACKN", client_addr).await.unwrap();

        // PING carries the reflector's callsign; the client answers PONG
        // with its own.
        let ping = {
            let mut p = b"PING".to_vec();
            p.extend_from_slice(&crate::m17::encode_callsign("M17-REF").unwrap());
            p
        };
        server.send_to(&ping, client_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("timed out waiting for PONG")
            .unwrap();
        assert_eq!(&buf[..4], b"PONG");
        assert_eq!(
            parse_control_packet(&buf[..n]).unwrap(),
            ControlPacket::Pong {
                callsign: "TEST".into()
            }
        );
        assert!(client.is_connected());

        client.close().await;
    }

    #[tokio::test]
    async fn test_nack_emits_event_and_closes() {
        let server = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();
        let client_addr = expect_conn(&server).await;
        let mut events = client.take_events().unwrap();
        let done = client.done();

        server.send_to(b"NACK", client_addr).await.unwrap();

        let evt = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("expected NACK event")
            .unwrap();
        assert_eq!(evt, ReflectorEvent::Nack);

        timeout(Duration::from_secs(1), done.cancelled())
            .await
            .expect("client did not close after NACK");

        // The event channel closes once the client is down.
        let end = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("expected event channel close");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_disc_closes_client_and_packet_channel() {
        let server = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();
        let client_addr = expect_conn(&server).await;
        let mut packets = client.take_packets().unwrap();
        let done = client.done();

        server.send_to(b"DISC", client_addr).await.unwrap();

        timeout(Duration::from_secs(1), done.cancelled())
            .await
            .expect("client did not close after DISC");

        // Listen loop exit closes the packet channel.
        let end = timeout(Duration::from_secs(1), packets.recv())
            .await
            .expect("expected packet channel close");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_packets_from_unexpected_source_dropped() {
        let server = bind_reflector().await;
        let intruder = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();
        let client_addr = expect_conn(&server).await;
        let mut packets = client.take_packets().unwrap();

        let lsf = build_lsf("DST", "SRC", [0u8; 14]).unwrap();
        let pkt = build_stream_packet(1, lsf_to_lsd(lsf), 0, false, [0u8; 16]);
        intruder.send_to(&pkt, client_addr).await.unwrap();

        let res = timeout(Duration::from_millis(200), packets.recv()).await;
        assert!(res.is_err(), "packet from unexpected source delivered");

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_sends_disc() {
        let server = bind_reflector().await;
        let client = ReflectorClient::connect(
            &server.local_addr().unwrap().to_string(),
            "TEST",
            b'A',
        )
        .await
        .unwrap();
        expect_conn(&server).await;

        client.close().await;
        client.close().await;

        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("timed out waiting for DISC")
            .unwrap();
        assert_eq!(&buf[..4], b"DISC");
        assert_eq!(n, 10);

        // Only one DISC despite the double close.
        let res = timeout(Duration::from_millis(200), server.recv_from(&mut buf)).await;
        assert!(res.is_err(), "second DISC after repeated close");
    }
}
