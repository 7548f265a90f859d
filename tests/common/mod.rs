//! Shared test support: a scripted stand-in reflector.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;

use m17_gateway::m17::{build_lsf, build_stream_packet, lsf_to_lsd};

/// Minimal reflector: ACKs the first CONN, records stream packets, and can
/// inject traffic toward the connected client.
pub struct FakeReflector {
    pub addr: SocketAddr,
    socket: Arc<UdpSocket>,
    client_addr: Arc<Mutex<Option<SocketAddr>>>,
    stream_packets: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeReflector {
    pub async fn spawn() -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let client_addr = Arc::new(Mutex::new(None));
        let stream_packets = Arc::new(Mutex::new(Vec::new()));

        {
            let socket = Arc::clone(&socket);
            let client_addr = Arc::clone(&client_addr);
            let stream_packets = Arc::clone(&stream_packets);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    let Ok((n, src)) = socket.recv_from(&mut buf).await else {
                        return;
                    };
                    let data = buf[..n].to_vec();
                    if data.starts_with(b"CONN") {
                        *client_addr.lock() = Some(src);
                        let _ = socket.send_to(b"ACKN", src).await;
                    } else if data.starts_with(b"M17 ") {
                        stream_packets.lock().push(data);
                    }
                    // PONG and DISC need no reaction here.
                }
            });
        }

        Self {
            addr,
            socket,
            client_addr,
            stream_packets,
        }
    }

    /// Address of the gateway's reflector socket, once it has connected.
    pub async fn client_addr(&self) -> SocketAddr {
        for _ in 0..200 {
            if let Some(addr) = *self.client_addr.lock() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no client connected to fake reflector");
    }

    /// Inject a datagram toward the connected client.
    pub async fn send_to_client(&self, data: &[u8]) {
        let addr = self.client_addr().await;
        self.socket.send_to(data, addr).await.unwrap();
    }

    pub fn stream_packets(&self) -> Vec<Vec<u8>> {
        self.stream_packets.lock().clone()
    }

    pub fn stream_packet_count(&self) -> usize {
        self.stream_packets.lock().len()
    }

    /// Wait until at least `count` stream packets arrived.
    pub async fn wait_for_stream_packets(&self, count: usize) {
        for _ in 0..200 {
            if self.stream_packet_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} stream packets, got {}",
            self.stream_packet_count()
        );
    }
}

/// A valid voice stream packet from `KC1ABC` with an all-zero payload.
pub fn voice_packet(stream_id: u16, frame_num: u16, is_last: bool) -> Vec<u8> {
    let lsf = build_lsf("GATEWAY A", "KC1ABC", [0u8; 14]).unwrap();
    build_stream_packet(stream_id, lsf_to_lsd(lsf), frame_num, is_last, [0u8; 16])
}
