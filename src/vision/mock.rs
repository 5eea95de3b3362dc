//! Scripted vision collaborators for development and testing.
//!
//! These never call a model. **Never use in production.**
//!
//! # Example
//!
//! ```rust
//! use stepguide::protocol::BoundingBox;
//! use stepguide::vision::{ScriptedAnalyzer, StaticDetector, Verdict};
//!
//! let analyzer = ScriptedAnalyzer::new()
//!     .then(Verdict::Completed)
//!     .then(Verdict::Executing);
//!
//! let detector = StaticDetector::new()
//!     .with_box("cup", BoundingBox::new(0.1, 0.1, 0.3, 0.3));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{FrameAnalyzer, ObjectDetector, StepContext, Verdict};
use crate::error::{Error, Result};
use crate::protocol::BoundingBox;

/// One recorded [`FrameAnalyzer::analyze`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeCall {
    /// Context passed in.
    pub context: StepContext,
    /// Frames passed in, oldest first.
    pub frames: Vec<PathBuf>,
}

/// Analyzer that replays a script of verdicts.
///
/// Once the script runs out it keeps answering [`Verdict::Executing`].
/// With a gate attached, every call waits for one [`Notify::notify_one`]
/// before answering, which lets tests hold an analysis in flight.
#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<std::result::Result<Verdict, String>>>,
    calls: Mutex<Vec<AnalyzeCall>>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl ScriptedAnalyzer {
    /// Create an analyzer with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a verdict to the script.
    pub fn then(self, verdict: Verdict) -> Self {
        self.script.lock().push_back(Ok(verdict));
        self
    }

    /// Append a failure to the script.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script.lock().push_back(Err(message.into()));
        self
    }

    /// Hold every call until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Queue a verdict on an analyzer that is already shared.
    pub fn push(&self, verdict: Verdict) {
        self.script.lock().push_back(Ok(verdict));
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<AnalyzeCall> {
        self.calls.lock().clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Resolves once a call has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl FrameAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, context: &StepContext, frames: &[PathBuf]) -> Result<Verdict> {
        self.calls.lock().push(AnalyzeCall {
            context: context.clone(),
            frames: frames.to_vec(),
        });
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(verdict)) => Ok(verdict),
            Some(Err(message)) => Err(Error::analysis(message)),
            None => Ok(Verdict::Executing),
        }
    }
}

/// Detector answering from a fixed table of boxes per object name.
///
/// Unknown objects yield no boxes. Objects marked with
/// [`fail_on`](Self::fail_on) return a detection error.
#[derive(Debug, Default)]
pub struct StaticDetector {
    boxes: HashMap<String, Vec<BoundingBox>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl StaticDetector {
    /// Create a detector that finds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a box for `object`.
    pub fn with_box(mut self, object: impl Into<String>, bbox: BoundingBox) -> Self {
        self.boxes.entry(object.into()).or_default().push(bbox);
        self
    }

    /// Make detection of `object` fail.
    pub fn fail_on(mut self, object: impl Into<String>) -> Self {
        self.failing.insert(object.into());
        self
    }

    /// `(frame, object)` pairs requested so far.
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ObjectDetector for StaticDetector {
    async fn detect(&self, frame: &Path, object: &str) -> Result<Vec<BoundingBox>> {
        self.calls
            .lock()
            .push((frame.to_path_buf(), object.to_string()));
        if self.failing.contains(object) {
            return Err(Error::detection(object, "scripted failure"));
        }
        Ok(self.boxes.get(object).cloned().unwrap_or_default())
    }
}
