//! Per-connection message handling.
//!
//! A [`Connection`] is transport-agnostic: the WebSocket adapter feeds it
//! [`InboundMessage`]s and forwards whatever arrives on its
//! [`ResponseSink`]. Tests drive it directly.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::dispatch::{spawn_analysis, AnalysisJob};
use super::monitor::MonitorEvent;
use super::session::{Session, SessionEvent};
use super::state::{ConnectionId, ServerState};
use crate::error::Result;
use crate::frames::CleanupReport;
use crate::protocol::{FrameMetadata, InboundMessage, ServerResponse};

/// Outgoing half of a connection.
///
/// Sending after the client went away is a no-op.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<ServerResponse>,
}

impl ResponseSink {
    /// Create a sink and the receiver the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `response`. Returns `false` if the connection is gone.
    pub fn send(&self, response: ServerResponse) -> bool {
        self.tx.send(response).is_ok()
    }

    /// Returns `true` once the receiving side was dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The client closed the connection normally.
    Clean,
    /// The connection failed or was closed by the server.
    Abnormal,
}

/// Server side of one client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: Arc<ServerState>,
    session: Session,
    sink: ResponseSink,
}

impl Connection {
    /// Register a new connection from `peer`.
    pub fn open(state: Arc<ServerState>, peer: SocketAddr, sink: ResponseSink) -> Self {
        let id = state.register(peer);
        tracing::info!(connection_id = %id, %peer, "Client connected");
        state.monitor().log(format!("Client connected: {peer}"));
        Self {
            id,
            peer,
            state,
            session: Session::new(),
            sink,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Protocol state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle one inbound message.
    ///
    /// # Errors
    ///
    /// Only a frame directory that cannot be created is returned; the
    /// transport must close the connection with code 1011. A frame that
    /// fails to save is dropped. Everything else is answered or logged.
    pub async fn handle(&mut self, message: InboundMessage) -> Result<()> {
        tracing::trace!(connection_id = %self.id, kind = message.kind(), bytes = message.len(), "Message received");
        match self.session.on_message(message) {
            SessionEvent::MetadataAccepted => {
                tracing::debug!(connection_id = %self.id, "Metadata received");
            }
            SessionEvent::MetadataRejected(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Invalid metadata");
                self.sink.send(ServerResponse::invalid_metadata());
            }
            SessionEvent::UnexpectedBinary => {
                tracing::warn!(connection_id = %self.id, "Binary message without metadata, ignoring");
            }
            SessionEvent::UnexpectedText => {
                tracing::warn!(connection_id = %self.id, "Text message while awaiting image, resetting");
            }
            SessionEvent::Frame { metadata, payload } => {
                self.handle_frame(metadata, payload).await?;
            }
        }
        Ok(())
    }

    async fn handle_frame(&mut self, metadata: FrameMetadata, payload: Vec<u8>) -> Result<()> {
        if self.state.is_rate_limited() {
            tracing::debug!(connection_id = %self.id, "Frame inside rate-limit interval, dropping");
            return Ok(());
        }

        let store = self.state.store();
        store.ensure_dir()?;
        let frame = match store.persist(&payload).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Failed to save frame, dropping");
                self.state.monitor().log(format!("Error saving image: {e}"));
                return Ok(());
            }
        };
        self.session.own_frame(frame.clone());

        let camera_pose = metadata.camera_pose;
        self.state.monitor().publish(MonitorEvent::ImageReceived {
            path: frame.clone(),
            metadata: Some(metadata),
            peer: self.peer.to_string(),
        });
        let pause = self.state.config().persist_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let Some(admission) = self.state.admit_frame(frame.clone()) else {
            tracing::warn!(connection_id = %self.id, "Frame received but no active task");
            self.state.monitor().log("Frame received, but no active task. Discarding.");
            self.sink.send(ServerResponse::no_task());
            return Ok(());
        };

        let Some(permit) = self.state.try_begin_analysis() else {
            tracing::info!(connection_id = %self.id, frame = %frame.display(), "Analysis in progress, dropping frame");
            return Ok(());
        };
        self.state.pin_analysis_frame(frame.clone());

        spawn_analysis(
            self.state.clone(),
            AnalysisJob {
                connection_id: self.id,
                frame,
                admission,
                camera_pose,
                sink: self.sink.clone(),
            },
            permit,
        );
        Ok(())
    }

    /// Tear the connection down and remove its frames that neither the
    /// shared buffer nor the running analysis references.
    pub async fn close(self, kind: CloseKind) -> CleanupReport {
        self.state.unregister(&self.id);
        match kind {
            CloseKind::Clean => {
                tracing::info!(connection_id = %self.id, peer = %self.peer, "Client disconnected");
            }
            CloseKind::Abnormal => {
                tracing::warn!(connection_id = %self.id, peer = %self.peer, "Connection closed abnormally");
            }
        }
        self.state
            .monitor()
            .log(format!("Client disconnected: {}", self.peer));

        let in_use = self.state.frames_in_use();
        let report = self
            .state
            .store()
            .cleanup(self.session.owned_frames(), &in_use)
            .await;
        tracing::info!(
            connection_id = %self.id,
            removed = report.removed,
            retained = report.retained,
            failed = report.failed,
            "Cleaned up connection frames"
        );
        report
    }
}
