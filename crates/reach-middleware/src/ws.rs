//! WebSocket transport for the control channel.
//!
//! The follower side ([`WsServer`]) listens on two ports, one per logical
//! stream:
//!
//! - **state port** – every connected client receives telemetry (state and
//!   frame envelopes) as JSON text frames;
//! - **command port** – clients send command / control envelopes and receive
//!   acknowledgements on the same socket.
//!
//! The leader side ([`WsConnector`]) opens both sockets and presents them to
//! the [`RobotClient`][crate::client::RobotClient] as a [`ClientLink`].
//! Malformed frames are logged and skipped.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reach_types::ReachError;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::follower::FollowerHandle;
use crate::link::{ClientLink, Connector};
use crate::protocol::{Message, decode, encode};

// ────────────────────────────────────────────────────────────────────────────
// Server
// ────────────────────────────────────────────────────────────────────────────

/// Follower-side WebSocket endpoint pair.
pub struct WsServer {
    state_listener: TcpListener,
    command_listener: TcpListener,
}

impl WsServer {
    /// Bind both listeners.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Io`] if either address cannot be bound.
    pub async fn bind(state_addr: SocketAddr, command_addr: SocketAddr) -> Result<Self, ReachError> {
        let state_listener = TcpListener::bind(state_addr)
            .await
            .map_err(|e| ReachError::Io(format!("bind state port {state_addr}: {e}")))?;
        let command_listener = TcpListener::bind(command_addr)
            .await
            .map_err(|e| ReachError::Io(format!("bind command port {command_addr}: {e}")))?;
        Ok(Self {
            state_listener,
            command_listener,
        })
    }

    /// `(state, command)` addresses actually bound.
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr), ReachError> {
        Ok((
            self.state_listener.local_addr()?,
            self.command_listener.local_addr()?,
        ))
    }

    /// Accept clients until `shutdown` flips to `true`.
    pub async fn serve(self, handle: FollowerHandle, mut shutdown: watch::Receiver<bool>) {
        if let Ok((state, command)) = self.local_addrs() {
            info!(%state, %command, "control channel listening");
        }
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.state_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_state(handle, stream, peer).await {
                                error!(%peer, error = %e, "state client error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "state accept error"),
                },
                accepted = self.command_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_commands(handle, stream, peer).await {
                                error!(%peer, error = %e, "command client error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "command accept error"),
                },
            }
        }
        info!("control channel listeners closed");
    }
}

async fn serve_state(
    handle: FollowerHandle,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ReachError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| ReachError::LinkDown(format!("ws handshake from {peer}: {e}")))?;
    debug!(%peer, "state subscriber connected");
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut telemetry = handle.attach_telemetry();
    loop {
        tokio::select! {
            msg = telemetry.recv() => {
                let Some(msg) = msg else { break };
                let text = encode(msg)?;
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
    debug!(%peer, "state subscriber gone");
    Ok(())
}

async fn serve_commands(
    handle: FollowerHandle,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ReachError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| ReachError::LinkDown(format!("ws handshake from {peer}: {e}")))?;
    debug!(%peer, "command client connected");
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    handle.attach_commands(command_rx, ack_tx);
    loop {
        tokio::select! {
            ack = ack_rx.recv() => {
                let Some(ack) = ack else { break };
                let text = encode(ack)?;
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match decode(text.as_str()) {
                    Ok(msg) => {
                        if command_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "malformed frame skipped"),
                },
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
    debug!(%peer, "command client gone");
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Client connector
// ────────────────────────────────────────────────────────────────────────────

/// Leader-side connector for a [`WsServer`].
#[derive(Debug, Clone)]
pub struct WsConnector {
    host: String,
    state_port: u16,
    command_port: u16,
    telemetry_buffer: usize,
}

impl WsConnector {
    pub fn new(host: impl Into<String>, state_port: u16, command_port: u16) -> Self {
        Self {
            host: host.into(),
            state_port,
            command_port,
            telemetry_buffer: 32,
        }
    }

    fn url(&self, port: u16) -> String {
        format!("ws://{}:{}", self.host, port)
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.state_port, self.command_port)
    }

    async fn connect(&self) -> Result<ClientLink, ReachError> {
        let (mut state_ws, _) = connect_async(self.url(self.state_port))
            .await
            .map_err(|e| ReachError::LinkDown(format!("state port: {e}")))?;
        let (command_ws, _) = connect_async(self.url(self.command_port))
            .await
            .map_err(|e| ReachError::LinkDown(format!("command port: {e}")))?;

        let (telemetry_tx, telemetry) = mpsc::channel(self.telemetry_buffer);
        tokio::spawn(async move {
            while let Some(frame) = state_ws.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match decode(text.as_str()) {
                        Ok(msg) => {
                            if let Err(mpsc::error::TrySendError::Closed(_)) = telemetry_tx.try_send(msg) {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "malformed telemetry frame skipped"),
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            let _ = state_ws.close(None).await;
        });

        let (commands, mut command_rx) = mpsc::unbounded_channel::<Message>();
        let (ack_tx, acks) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (mut ws_tx, mut ws_rx) = command_ws.split();
            loop {
                tokio::select! {
                    out = command_rx.recv() => {
                        let Some(msg) = out else { break };
                        match encode(msg) {
                            Ok(text) => {
                                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "command not encodable"),
                        }
                    }
                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => match decode(text.as_str()) {
                            Ok(msg) => {
                                if ack_tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "malformed ack frame skipped"),
                        },
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    },
                }
            }
            let _ = ws_tx.close().await;
        });

        Ok(ClientLink {
            telemetry,
            acks,
            commands,
        })
    }
}
