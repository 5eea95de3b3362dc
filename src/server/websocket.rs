//! WebSocket listener.
//!
//! Each accepted socket gets a [`Connection`]. Replies queued on the
//! connection's [`ResponseSink`] are written back as text messages, and a
//! frame directory that cannot be created closes the socket with code 1011.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;

use super::connection::{CloseKind, Connection, ResponseSink};
use super::state::ServerState;
use crate::error::{Error, Result};
use crate::protocol::InboundMessage;

/// Accepts WebSocket clients and feeds them to [`Connection`]s.
#[derive(Debug)]
pub struct WebSocketServer {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl WebSocketServer {
    /// Bind to the configured address.
    pub async fn bind(state: Arc<ServerState>) -> Result<Self> {
        let addr = state.config().bind_addr().await?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {addr}: {e}")))?;
        Ok(Self { state, listener })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Accept clients until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %self.local_addr()?, "WebSocket server listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("WebSocket server stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(self.state.clone(), stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }

    /// Accept clients forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}

fn websocket_config(max_message_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_message_size))
        .max_frame_size(Some(max_message_size))
}

async fn serve_connection(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    let config = websocket_config(state.config().max_message_size);
    let ws = match accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut outgoing, mut incoming) = ws.split();
    let (sink, mut replies) = ResponseSink::channel();
    let mut connection = Connection::open(state, peer, sink);

    let kind = loop {
        tokio::select! {
            message = incoming.next() => {
                let inbound = match message {
                    Some(Ok(Message::Text(text))) => InboundMessage::Text(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => InboundMessage::Binary(bytes.to_vec()),
                    Some(Ok(Message::Close(_))) | None => break CloseKind::Clean,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %connection.id(), error = %e, "WebSocket error");
                        break CloseKind::Abnormal;
                    }
                };
                if let Err(e) = connection.handle(inbound).await {
                    if e.is_fatal_for_connection() {
                        tracing::error!(connection_id = %connection.id(), error = %e, "Closing connection");
                        let frame = CloseFrame {
                            code: CloseCode::Error,
                            reason: String::from("Frame storage unavailable").into(),
                        };
                        let _ = outgoing.send(Message::Close(Some(frame))).await;
                        break CloseKind::Abnormal;
                    }
                    tracing::warn!(connection_id = %connection.id(), error = %e, "Message handling failed");
                }
            }
            Some(reply) = replies.recv() => {
                let text = match reply.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize reply");
                        continue;
                    }
                };
                if let Err(e) = outgoing.send(Message::Text(text.into())).await {
                    tracing::warn!(connection_id = %connection.id(), error = %e, "Send failed");
                    break CloseKind::Abnormal;
                }
            }
        }
    };

    drop(replies);
    connection.close(kind).await;
}
