//! Fire-and-forget sends over the active backend connection.
//!
//! [`ConnectionSender`] is the only primitive the registration flow needs:
//! hand a DDP frame to the connection and return immediately. The
//! WebSocket-backed [`SocketConnection`] queues frames for a background task
//! that owns the socket.
//!
//! # Protocol
//!
//! ```text
//!   connect ──► {"msg":"connect"}
//!           ◄── {"msg":"connected"}
//!           ──► login (resume token), if a session exists
//!           ──► queued method frames, each with a call id
//!           ◄── {"msg":"ping"}  ──► {"msg":"pong"}
//! ```
//!
//! There is no reconnection and no acknowledgement tracking. A frame queued
//! while the socket is down is dropped with a warning; the next lifecycle
//! event re-announces.

// Rust guideline compliant 2026-02

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ddp;
use crate::ws::{WsMessage, WsReader, WsWriter};

/// How long to wait for the DDP `connected` reply before giving up.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Send primitive of an established backend connection.
pub trait ConnectionSender: Send + Sync {
    /// Queue `message` for delivery. Never blocks and never reports failure.
    fn send(&self, message: Value);
}

/// WebSocket connection to one backend.
#[derive(Debug)]
pub struct SocketConnection {
    outgoing_tx: mpsc::UnboundedSender<Value>,
    task: JoinHandle<()>,
}

impl SocketConnection {
    /// Spawn the background task that connects to `socket_url`.
    ///
    /// Must be called from within a tokio runtime. `auth_token` resumes an
    /// existing login before any queued frame is written.
    pub fn connect(socket_url: &str, auth_token: Option<String>) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            socket_url.to_string(),
            auth_token,
            outgoing_rx,
        ));
        Self { outgoing_tx, task }
    }

    /// Stop accepting frames and wait until everything queued has been written.
    pub async fn close(self) {
        drop(self.outgoing_tx);
        if let Err(e) = self.task.await {
            log::warn!("[Socket] Connection task ended abnormally: {e}");
        }
    }
}

impl ConnectionSender for SocketConnection {
    fn send(&self, message: Value) {
        if self.outgoing_tx.send(message).is_err() {
            log::warn!("[Socket] Connection closed, frame dropped");
        }
    }
}

async fn run_connection(
    socket_url: String,
    auth_token: Option<String>,
    mut outgoing_rx: mpsc::UnboundedReceiver<Value>,
) {
    log::info!("[Socket] Connecting to {socket_url}");

    let (mut writer, mut reader) = match crate::ws::connect(&socket_url).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("[Socket] Connection failed: {e:#}");
            drain_dropped(&mut outgoing_rx);
            return;
        }
    };

    let established =
        tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut writer, &mut reader)).await;
    if !matches!(established, Ok(true)) {
        log::warn!("[Socket] DDP handshake failed");
        drain_dropped(&mut outgoing_rx);
        return;
    }

    let mut next_call_id: u64 = 1;
    if let Some(token) = auth_token {
        let login = ddp::with_call_id(ddp::resume_login(&token), next_call_id);
        next_call_id += 1;
        if let Err(e) = writer.send_text(&login.to_string()).await {
            log::warn!("[Socket] Failed to send login: {e}");
        }
    }

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                let Some(frame) = outgoing else {
                    // All senders gone: everything queued has been written.
                    break;
                };
                let frame = ddp::with_call_id(frame, next_call_id);
                next_call_id += 1;
                if let Err(e) = writer.send_text(&frame.to_string()).await {
                    log::warn!("[Socket] Send failed: {e}");
                    drain_dropped(&mut outgoing_rx);
                    return;
                }
            }
            incoming = reader.recv() => {
                match incoming {
                    Some(Ok(message)) => {
                        if !handle_incoming(&mut writer, message).await {
                            drain_dropped(&mut outgoing_rx);
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("[Socket] {e}");
                        drain_dropped(&mut outgoing_rx);
                        return;
                    }
                    None => {
                        log::info!("[Socket] Server closed the connection");
                        drain_dropped(&mut outgoing_rx);
                        return;
                    }
                }
            }
        }
    }

    if let Err(e) = writer.close().await {
        log::debug!("[Socket] Close failed: {e}");
    }
}

/// Send the DDP `connect` frame and wait for `connected`.
async fn handshake(writer: &mut WsWriter, reader: &mut WsReader) -> bool {
    if let Err(e) = writer.send_text(&ddp::connect().to_string()).await {
        log::warn!("[Socket] Failed to send connect: {e}");
        return false;
    }

    while let Some(message) = reader.recv().await {
        match message {
            Ok(WsMessage::Text(text)) => match ddp_kind(&text).as_deref() {
                Some("connected") => {
                    log::debug!("[Socket] DDP session established");
                    return true;
                }
                Some("failed") => {
                    log::warn!("[Socket] Server rejected DDP version");
                    return false;
                }
                _ => {}
            },
            Ok(WsMessage::Ping(data)) => {
                if let Err(e) = writer.send_pong(data).await {
                    log::debug!("[Socket] Pong failed: {e}");
                }
            }
            Ok(WsMessage::Close { code, reason }) => {
                log::warn!("[Socket] Closed during handshake: {code} {reason}");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("[Socket] Error during handshake: {e}");
                return false;
            }
        }
    }

    false
}

/// Answer keepalives. Returns `false` once the connection is closing.
async fn handle_incoming(writer: &mut WsWriter, message: WsMessage) -> bool {
    match message {
        WsMessage::Text(text) => {
            if ddp_kind(&text).as_deref() == Some("ping") {
                let pong = serde_json::json!({ "msg": "pong" });
                if let Err(e) = writer.send_text(&pong.to_string()).await {
                    log::debug!("[Socket] DDP pong failed: {e}");
                }
            }
            true
        }
        WsMessage::Ping(data) => {
            if let Err(e) = writer.send_pong(data).await {
                log::debug!("[Socket] Pong failed: {e}");
            }
            true
        }
        WsMessage::Close { code, reason } => {
            log::info!("[Socket] Closed by server: {code} {reason}");
            false
        }
        WsMessage::Binary(_) | WsMessage::Pong(_) => true,
    }
}

fn ddp_kind(text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("msg")?
        .as_str()
        .map(str::to_string)
}

fn drain_dropped(outgoing_rx: &mut mpsc::UnboundedReceiver<Value>) {
    outgoing_rx.close();
    let mut dropped = 0usize;
    while outgoing_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        log::warn!("[Socket] Dropped {dropped} unsent frame(s)");
    }
}
