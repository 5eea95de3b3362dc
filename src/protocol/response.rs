//! Replies sent to the client, one per received image.
//!
//! Replies are explicit tagged unions: an [`ErrorResponse`] for requests the
//! server refused, or an [`Instruction`] whose variant is the task verdict.
//!
//! ```json
//! {
//!   "current_task_status": "derailed",
//!   "objects": [
//!     {
//!       "title": "coffee cup",
//!       "coordinates": {"x": 0.5234, "y": 0.6789},
//!       "bbox": {"x_min": 0.4123, "y_min": 0.5678, "x_max": 0.6345, "y_max": 0.789}
//!     }
//!   ],
//!   "action": "Pick up the coffee cup",
//!   "coordinates_relative_to_camera_pose": {
//!     "position": {"x": 0.0, "y": 0.0, "z": 0.0},
//!     "rotation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::metadata::CameraPose;
use crate::error::Result;
use crate::task::Step;

/// Normalized (0-1) axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x_min: f64,
    /// Top edge.
    pub y_min: f64,
    /// Right edge.
    pub x_max: f64,
    /// Bottom edge.
    pub y_max: f64,
}

impl BoundingBox {
    /// Create a bounding box.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Center of the box, rounded to 4 decimal places.
    ///
    /// # Examples
    ///
    /// ```
    /// use stepguide::protocol::{BoundingBox, Point};
    ///
    /// let bbox = BoundingBox::new(0.0, 0.0, 0.12345678, 1.0);
    /// assert_eq!(bbox.center(), Point { x: 0.0617, y: 0.5 });
    /// ```
    pub fn center(&self) -> Point {
        Point {
            x: round4((self.x_min + self.x_max) / 2.0),
            y: round4((self.y_min + self.y_max) / 2.0),
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Normalized 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

/// A named object the user should attend to, optionally localized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object name.
    pub title: String,
    /// Box center, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,
    /// Detected box, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl ObjectInfo {
    /// An object with no coordinates yet.
    pub fn named(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            coordinates: None,
            bbox: None,
        }
    }

    /// Attach a detection, computing its center.
    pub fn locate(&mut self, bbox: BoundingBox) {
        self.coordinates = Some(bbox.center());
        self.bbox = Some(bbox);
    }

    /// Returns `true` once coordinates are attached.
    pub fn is_located(&self) -> bool {
        self.coordinates.is_some()
    }
}

/// Task verdict carried by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The user is performing the current step.
    ExecutingTask,
    /// The current step was finished.
    CompletedTask,
    /// The user is doing something other than the current step.
    Derailed,
    /// Progress could not be evaluated.
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutingTask => write!(f, "executing_task"),
            Self::CompletedTask => write!(f, "completed_task"),
            Self::Derailed => write!(f, "derailed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Body shared by the step-carrying instruction variants.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepGuidance {
    /// Objects to attend to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectInfo>,
    /// What to do.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Extra information for the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Camera pose the coordinates refer to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates_relative_to_camera_pose: Option<CameraPose>,
}

impl StepGuidance {
    /// Guidance echoing `step`'s action and focus objects.
    pub fn from_step(step: &Step) -> Self {
        Self {
            objects: step
                .focus_objects()
                .iter()
                .map(ObjectInfo::named)
                .collect(),
            action: Some(step.action().to_string()),
            message: None,
            coordinates_relative_to_camera_pose: None,
        }
    }
}

/// Instruction sent after a frame was evaluated, tagged by verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "current_task_status", rename_all = "snake_case")]
pub enum Instruction {
    /// Keep going with the current step.
    ExecutingTask(StepGuidance),
    /// The previous step is done; this is the next one (or the completion notice).
    CompletedTask(StepGuidance),
    /// Corrective action.
    Derailed(StepGuidance),
    /// Evaluation failed.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl Instruction {
    /// Instruction for the current step, before any evaluation.
    pub fn executing(step: &Step) -> Self {
        Self::ExecutingTask(StepGuidance::from_step(step))
    }

    /// Instruction for the step that follows a completed one.
    pub fn next_step(step: &Step) -> Self {
        Self::CompletedTask(StepGuidance::from_step(step))
    }

    /// Instruction announcing that every step is done.
    pub fn finished() -> Self {
        Self::CompletedTask(StepGuidance {
            message: Some("All steps completed".to_string()),
            ..StepGuidance::default()
        })
    }

    /// Corrective instruction with its own action and focus objects.
    pub fn derailed(action: impl Into<String>, focus_objects: &[String]) -> Self {
        Self::Derailed(StepGuidance {
            objects: focus_objects.iter().map(ObjectInfo::named).collect(),
            action: Some(action.into()),
            message: None,
            coordinates_relative_to_camera_pose: None,
        })
    }

    /// Error instruction.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The verdict this instruction carries.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::ExecutingTask(_) => TaskStatus::ExecutingTask,
            Self::CompletedTask(_) => TaskStatus::CompletedTask,
            Self::Derailed(_) => TaskStatus::Derailed,
            Self::Error { .. } => TaskStatus::Error,
        }
    }

    /// Step guidance, if this variant carries any.
    pub fn guidance(&self) -> Option<&StepGuidance> {
        match self {
            Self::ExecutingTask(g) | Self::CompletedTask(g) | Self::Derailed(g) => Some(g),
            Self::Error { .. } => None,
        }
    }

    /// Mutable step guidance, if this variant carries any.
    pub fn guidance_mut(&mut self) -> Option<&mut StepGuidance> {
        match self {
            Self::ExecutingTask(g) | Self::CompletedTask(g) | Self::Derailed(g) => Some(g),
            Self::Error { .. } => None,
        }
    }

    /// Attach the camera pose the frame was captured with.
    pub fn with_camera_pose(mut self, pose: Option<CameraPose>) -> Self {
        if let Some(guidance) = self.guidance_mut() {
            guidance.coordinates_relative_to_camera_pose = pose;
        }
        self
    }
}

/// Machine-readable reason attached to an [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    /// No task is active.
    NoTask,
}

/// Request-level error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error.
    pub error: String,
    /// Machine-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ErrorStatus>,
}

/// Any reply sent over a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerResponse {
    /// The request was refused.
    Error(ErrorResponse),
    /// Task guidance.
    Instruction(Instruction),
}

impl ServerResponse {
    /// Reply for a frame received while no task is active.
    pub fn no_task() -> Self {
        Self::Error(ErrorResponse {
            error: "No active task set. Please upload and process a video first.".to_string(),
            status: Some(ErrorStatus::NoTask),
        })
    }

    /// Reply for a metadata message that could not be parsed.
    pub fn invalid_metadata() -> Self {
        Self::Error(ErrorResponse {
            error: "Invalid metadata format. Expected valid JSON.".to_string(),
            status: None,
        })
    }

    /// Serialize to the wire text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The instruction, if this is one.
    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            Self::Instruction(instruction) => Some(instruction),
            Self::Error(_) => None,
        }
    }
}

impl From<Instruction> for ServerResponse {
    fn from(instruction: Instruction) -> Self {
        Self::Instruction(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn no_task_wire_shape() {
        let value = serde_json::to_value(ServerResponse::no_task()).unwrap();
        assert_eq!(value["status"], json!("no_task"));
        assert!(value["error"].as_str().unwrap().contains("No active task"));
    }

    #[test]
    fn invalid_metadata_omits_status() {
        let value = serde_json::to_value(ServerResponse::invalid_metadata()).unwrap();
        assert!(value.get("status").is_none());
    }

    #[test]
    fn derailed_wire_shape() {
        let mut instruction = Instruction::derailed("put the cup down", &["cup".to_string()]);
        instruction.guidance_mut().unwrap().objects[0].locate(BoundingBox::new(0.2, 0.2, 0.4, 0.6));
        let instruction = instruction.with_camera_pose(Some(CameraPose::default()));

        let value = serde_json::to_value(ServerResponse::from(instruction)).unwrap();
        assert_eq!(
            value,
            json!({
                "current_task_status": "derailed",
                "objects": [{
                    "title": "cup",
                    "coordinates": {"x": 0.3, "y": 0.4},
                    "bbox": {"x_min": 0.2, "y_min": 0.2, "x_max": 0.4, "y_max": 0.6}
                }],
                "action": "put the cup down",
                "coordinates_relative_to_camera_pose": {
                    "position": {"x": 0.0, "y": 0.0, "z": 0.0},
                    "rotation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
                }
            })
        );
    }

    #[test]
    fn error_and_finished_wire_shapes() {
        let value = serde_json::to_value(Instruction::error("boom")).unwrap();
        assert_eq!(
            value,
            json!({"current_task_status": "error", "message": "boom"})
        );

        let value = serde_json::to_value(Instruction::finished()).unwrap();
        assert_eq!(
            value,
            json!({"current_task_status": "completed_task", "message": "All steps completed"})
        );
    }

    #[test]
    fn executing_echoes_step() {
        let step = Step::new("pick up cup", vec!["cup".into()]);
        let instruction = Instruction::executing(&step);
        assert_eq!(instruction.status(), TaskStatus::ExecutingTask);
        let guidance = instruction.guidance().unwrap();
        assert_eq!(guidance.action.as_deref(), Some("pick up cup"));
        assert_eq!(guidance.objects, vec![ObjectInfo::named("cup")]);
    }

    #[test]
    fn responses_parse_back_into_the_right_variant() {
        let text = ServerResponse::no_task().to_json().unwrap();
        let parsed: ServerResponse = serde_json::from_str(&text).unwrap();
        assert!(matches!(parsed, ServerResponse::Error(_)));

        let text = ServerResponse::from(Instruction::error("x")).to_json().unwrap();
        let parsed: ServerResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_instruction().unwrap().status(), TaskStatus::Error);
    }
}
