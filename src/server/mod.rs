//! The guidance server.
//!
//! - [`ServerState`] - shared task cursor, frame buffer and analysis guard
//! - [`Connection`] - per-client protocol handling
//! - [`dispatch`] - background analysis and step transitions
//! - [`WebSocketServer`] - WebSocket listener (feature `websocket`)

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod enrich;
pub mod monitor;
pub mod session;
pub mod state;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::ServerConfig;
pub use connection::{CloseKind, Connection, ResponseSink};
pub use dispatch::{run_analysis, spawn_analysis, AnalysisJob};
pub use enrich::enrich_objects;
pub use monitor::{MonitorEvent, MonitorQueue, MonitorRecord, StateSnapshot};
pub use session::{Phase, Session, SessionEvent};
pub use state::{Admission, ConnectionId, ConnectionInfo, ServerState, StaleTask};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
