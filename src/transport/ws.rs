//! axum WebSocket endpoint: the bidirectional browser channel.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::server::{origin_allowed, AppState};

use super::messages::{ClientMessage, ServerMessage};
use super::sink::{send_error, BrowserSink, DisconnectNotifier};
use super::{MAX_MESSAGE_SIZE, WRITE_TIMEOUT};

/// WebSocket implementation of [`BrowserSink`]: a split sink behind one
/// async lock, every write under a deadline.
pub struct WsSink {
    sink: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: tokio::sync::Mutex::new(sink),
        }
    }

    async fn send(&self, msg: Message) -> Result<()> {
        let mut sink = self.sink.lock().await;
        timeout(WRITE_TIMEOUT, sink.send(msg))
            .await
            .map_err(|_| anyhow::anyhow!("websocket write timeout"))?
            .map_err(|e| anyhow::anyhow!("websocket send: {e}"))?;
        Ok(())
    }

    /// Keepalive ping; not part of [`BrowserSink`] because only the
    /// transport's own pinger uses it.
    async fn send_ping(&self) -> Result<()> {
        self.send(Message::Ping(Vec::new())).await
    }
}

#[async_trait]
impl BrowserSink for WsSink {
    async fn send_message(&self, msg: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(msg).map_err(|e| anyhow::anyhow!("encode: {e}"))?;
        self.send(Message::Text(text)).await
    }

    async fn send_audio(&self, frame: &[u8]) -> Result<()> {
        self.send(Message::Binary(frame.to_vec())).await
    }
}

/// `GET /ws` upgrade handler with origin checking.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let same_host = !origin.is_empty()
        && (origin == format!("http://{host}") || origin == format!("https://{host}"));
    if origin.is_empty() || (!same_host && !origin_allowed(&state.origin_rules, origin)) {
        warn!(origin = %origin, "websocket origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Receive from an optional channel; a `None` slot parks forever so the
/// select can keep draining the other channel.
async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(receiver) => match receiver.recv().await {
            Some(v) => Some(v),
            None => {
                *rx = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = socket.split();
    let sink = Arc::new(WsSink::new(ws_tx));
    let browser: Arc<dyn BrowserSink> = sink.clone();

    let session = match state.manager.add_session() {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "session not accepted");
            send_error(browser.as_ref(), &e.to_string()).await;
            return; // dropping the socket closes the channel
        }
    };
    info!(session = %session.id(), "new session connected");

    let notifier = Arc::new(DisconnectNotifier::new(Arc::clone(&browser)));

    // Writer: drain outgoing audio and control messages until the session
    // teardown closes both channels.
    let writer = {
        let sink = Arc::clone(&browser);
        let session_id = session.id();
        let mut audio_rx = session.take_outgoing_audio();
        let mut msgs_rx = session.take_outgoing_messages();
        tokio::spawn(async move {
            while audio_rx.is_some() || msgs_rx.is_some() {
                tokio::select! {
                    frame = recv_or_pending(&mut audio_rx) => {
                        if let Some(frame) = frame {
                            if let Err(e) = sink.send_audio(&frame).await {
                                warn!(session = %session_id, err = %e, "error sending audio to browser");
                                return;
                            }
                        }
                    }
                    msg = recv_or_pending(&mut msgs_rx) => {
                        if let Some(msg) = msg {
                            if let Err(e) = sink.send_message(&msg).await {
                                warn!(session = %session_id, err = %e, "error sending message to browser");
                                return;
                            }
                        }
                    }
                }
            }
        })
    };

    // Keepalive pinger.
    let pinger = {
        let sink = Arc::clone(&sink);
        let interval = state.ping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = sink.send_ping().await {
                    warn!(err = %e, "error sending ping");
                    return;
                }
            }
        })
    };

    let welcome = ServerMessage::Welcome {
        session_id: session.id().to_string(),
        server: state.server_name.clone(),
    };
    if let Err(e) = browser.send_message(&welcome).await {
        warn!(session = %session.id(), err = %e, "error sending welcome message");
    }

    // Reader loop. The pong-wait deadline covers every read; any traffic
    // from the browser (including pong frames) resets it.
    loop {
        let msg = match timeout(state.pong_wait, ws_rx.next()).await {
            Err(_) => {
                warn!(session = %session.id(), "websocket read timed out");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(session = %session.id(), err = %e, "read error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Binary(frame) => {
                session.handle_audio(browser.as_ref(), &frame).await;
            }

            Message::Text(text) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(session = %session.id(), err = %e, "invalid JSON");
                        send_error(browser.as_ref(), &format!("Invalid JSON: {e}")).await;
                        continue;
                    }
                };

                match client_msg.msg_type.as_str() {
                    "ping" => session.handle_ping(browser.as_ref()).await,
                    "join" => {
                        session
                            .handle_join(
                                browser.as_ref(),
                                client_msg.data,
                                &state.factory,
                                &notifier,
                            )
                            .await;
                    }
                    "ptt" => session.handle_ptt(browser.as_ref(), client_msg.data).await,
                    "disconnect" => session.handle_disconnect(&notifier).await,
                    "format" => session.handle_format(browser.as_ref(), client_msg.data).await,
                    other => session.handle_unknown(browser.as_ref(), other).await,
                }
            }

            Message::Close(_) => break,

            // axum replies to client pings on its own; pongs only feed the
            // read deadline.
            Message::Ping(_) | Message::Pong(_) => {
                debug!(session = %session.id(), "keepalive frame");
            }
        }
    }

    pinger.abort();
    state.manager.remove_session(session.id()).await;
    state.metrics.record_session_ended();
    // Teardown closed the outgoing channels; the writer drains what is
    // left and exits on its own.
    drop(writer);
    info!(session = %session.id(), "session disconnected");
}
