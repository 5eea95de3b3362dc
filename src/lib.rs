//! # stepguide
//!
//! Live frame ingestion and task progression for step-by-step camera
//! guidance.
//!
//! Clients stream camera frames over a WebSocket, each as a metadata text
//! message followed by a JPEG binary message. The server keeps one active
//! [`Task`](task::Task) with a progress cursor and a short window of recent
//! frames, asks a [`FrameAnalyzer`](vision::FrameAnalyzer) whether the user is
//! on track, advances the cursor when a step is completed, and replies with
//! an [`Instruction`](protocol::Instruction) whose objects are localized by an
//! [`ObjectDetector`](vision::ObjectDetector).
//!
//! At most one analysis runs at a time server-wide; frames that arrive while
//! one is in flight are buffered but not analyzed.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stepguide::server::{ServerConfig, ServerState};
//! use stepguide::task::{Step, Task};
//! use stepguide::vision::{ScriptedAnalyzer, StaticDetector};
//!
//! let state = Arc::new(ServerState::new(
//!     ServerConfig::default(),
//!     Arc::new(ScriptedAnalyzer::new()),
//!     Arc::new(StaticDetector::new()),
//! ));
//!
//! let task = Task::new("make tea", vec![
//!     Step::new("boil water", vec!["kettle".to_string()]),
//!     Step::new("pour water", vec!["kettle".to_string(), "cup".to_string()]),
//! ])?;
//! state.activate_task(task, 0);
//! assert_eq!(state.cursor().unwrap().current_step().action(), "boil water");
//! # Ok::<(), stepguide::Error>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod frames;
pub mod protocol;
pub mod server;
pub mod task;
pub mod vision;

pub use error::{Error, Result};
pub use protocol::{Instruction, ServerResponse};
pub use server::{ServerConfig, ServerState};
pub use task::{Step, Task, TaskCursor};
