//! Capability interfaces for the external vision models.
//!
//! The server core only talks to two collaborators:
//!
//! - a [`FrameAnalyzer`] that judges task progress from recent frames
//! - an [`ObjectDetector`] that localizes one named object in one frame
//!
//! Both are object-safe `async_trait`s so backends can be swapped behind an
//! `Arc<dyn ...>`. [`mock`] provides scripted implementations for tests; the
//! HTTP backends live behind the `http-client` feature.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::BoundingBox;
use crate::task::{Step, TaskCursor};

pub mod mock;
pub mod prompt;

#[cfg(feature = "http-client")]
pub mod openai;
#[cfg(feature = "http-client")]
pub mod replicate;

pub use mock::{ScriptedAnalyzer, StaticDetector};
pub use prompt::{build_prompt, parse_verdict};

#[cfg(feature = "http-client")]
pub use openai::OpenAiAnalyzer;
#[cfg(feature = "http-client")]
pub use replicate::ReplicateDetector;

/// The steps surrounding the cursor at the time a frame is analyzed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    /// Step before the current one, or the sentinel.
    pub previous: Step,
    /// Step being performed.
    pub current: Step,
    /// Step after the current one, or the sentinel.
    pub next: Step,
}

impl StepContext {
    /// Capture the context around `cursor`.
    pub fn from_cursor(cursor: &TaskCursor) -> Self {
        Self {
            previous: cursor.previous_step(),
            current: cursor.current_step(),
            next: cursor.next_step(),
        }
    }
}

/// Progress judgement returned by a [`FrameAnalyzer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The user is working on the current step.
    Executing,
    /// The current step is done.
    Completed,
    /// The user went off track.
    Derailed {
        /// Corrective action.
        action: String,
        /// Objects the correction involves.
        focus_objects: Vec<String>,
    },
    /// The model could not judge progress.
    Error {
        /// Why.
        message: String,
    },
}

impl Verdict {
    /// Wire name of the verdict.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Executing => "executing_task",
            Self::Completed => "completed_task",
            Self::Derailed { .. } => "derailed",
            Self::Error { .. } => "error",
        }
    }
}

/// Judges task progress from the most recent frames.
#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    /// Analyze `frames` (oldest first) against `context`.
    ///
    /// # Errors
    ///
    /// Network, I/O or response-format failures. The caller turns them into
    /// an `error` instruction.
    async fn analyze(&self, context: &StepContext, frames: &[PathBuf]) -> Result<Verdict>;
}

/// Localizes a named object in a single frame.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Return zero or more normalized bounding boxes for `object` in `frame`,
    /// best match first.
    async fn detect(&self, frame: &Path, object: &str) -> Result<Vec<BoundingBox>>;
}
