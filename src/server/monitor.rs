//! Best-effort relay of server events to a monitoring consumer.
//!
//! Producers never block: when the queue is full the new event is dropped
//! and a warning is logged once per overflow streak.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::protocol::FrameMetadata;

/// Snapshot of one piece of shared state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateSnapshot {
    /// Active task and cursor position; `name` is `None` when no task is active.
    Task {
        /// Task name.
        name: Option<String>,
        /// Cursor index.
        index: i64,
        /// Action of the current step.
        current_action: Option<String>,
    },
    /// Frame buffer contents, oldest first.
    Video {
        /// Buffered frames.
        frames: Vec<PathBuf>,
    },
    /// Connection registry.
    Server {
        /// Number of open connections.
        connected: usize,
        /// Peer addresses.
        peers: Vec<String>,
    },
}

/// Event published to the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Free-form log line.
    Log {
        /// The line.
        message: String,
    },
    /// A frame was persisted.
    ImageReceived {
        /// Where it was stored.
        path: PathBuf,
        /// Metadata that preceded it.
        metadata: Option<FrameMetadata>,
        /// Sending peer.
        peer: String,
    },
    /// Shared state changed.
    StateChanged {
        /// New state.
        state: StateSnapshot,
    },
}

/// A timestamped [`MonitorEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorRecord {
    /// When the event was published.
    pub at: DateTime<Utc>,
    /// The event.
    #[serde(flatten)]
    pub event: MonitorEvent,
}

/// Bounded, non-blocking monitoring queue.
#[derive(Debug)]
pub struct MonitorQueue {
    sender: mpsc::Sender<MonitorRecord>,
    receiver: Mutex<Option<mpsc::Receiver<MonitorRecord>>>,
    dropped: AtomicU64,
}

impl MonitorQueue {
    /// Create a queue holding at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Take the consuming end. Only the first call gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<MonitorRecord>> {
        self.receiver.lock().take()
    }

    /// Publish `event` without blocking.
    pub fn publish(&self, event: MonitorEvent) {
        let record = MonitorRecord {
            at: Utc::now(),
            event,
        };
        match self.sender.try_send(record) {
            Ok(()) => {
                self.dropped.store(0, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!("monitor queue full, dropping events");
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Publish a log line.
    pub fn log(&self, message: impl Into<String>) {
        self.publish(MonitorEvent::Log {
            message: message.into(),
        });
    }

    /// Publish a state change.
    pub fn state_changed(&self, state: StateSnapshot) {
        self.publish(MonitorEvent::StateChanged { state });
    }

    /// Events dropped in the current overflow streak.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MonitorQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}
