//! Per-frame metadata sent ahead of every image.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capture time as sent by the client: an ISO-8601 string or epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Textual timestamp, usually ISO-8601.
    Text(String),
    /// Seconds since the Unix epoch.
    Seconds(f64),
}

/// Three-component position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

/// Rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
    /// W component.
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Camera position and rotation at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraPose {
    /// Camera position.
    #[serde(default)]
    pub position: Vector3,
    /// Camera rotation.
    #[serde(default)]
    pub rotation: Quaternion,
}

/// Metadata message that must precede each binary frame.
///
/// Every field is optional on the wire, but present fields must have the
/// right types and the message must be a JSON object.
///
/// # Examples
///
/// ```
/// use stepguide::protocol::FrameMetadata;
///
/// let meta = FrameMetadata::parse(r#"{
///     "timestamp": "2025-05-01T12:00:00Z",
///     "width": 640,
///     "height": 480,
///     "camera_pose": {
///         "position": {"x": 0.0, "y": 1.5, "z": 0.0},
///         "rotation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
///     }
/// }"#).unwrap();
///
/// assert_eq!(meta.width, 640);
/// assert_eq!(meta.camera_pose.unwrap().position.y, 1.5);
/// assert!(FrameMetadata::parse("not json").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Image width in pixels.
    #[serde(default)]
    pub width: u32,
    /// Image height in pixels.
    #[serde(default)]
    pub height: u32,
    /// Camera pose at capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_pose: Option<CameraPose>,
}

impl FrameMetadata {
    /// Parse a metadata text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for invalid JSON, non-object JSON, or
    /// fields of the wrong type.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("invalid metadata JSON: {e}")))?;
        if !value.is_object() {
            return Err(Error::protocol("metadata must be a JSON object"));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::protocol(format!("invalid metadata fields: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_accepted() {
        let meta = FrameMetadata::parse("{}").unwrap();
        assert_eq!(meta, FrameMetadata::default());
    }

    #[test]
    fn numeric_timestamp_is_accepted() {
        let meta = FrameMetadata::parse(r#"{"timestamp": 1714564800.25}"#).unwrap();
        assert_eq!(meta.timestamp, Some(Timestamp::Seconds(1714564800.25)));
    }

    #[test]
    fn rejects_non_objects_and_bad_fields() {
        assert!(FrameMetadata::parse("[1, 2]").is_err());
        assert!(FrameMetadata::parse("42").is_err());
        assert!(FrameMetadata::parse(r#"{"width": "wide"}"#).is_err());
        assert!(FrameMetadata::parse(r#"{"width": -1}"#).is_err());
    }

    #[test]
    fn missing_rotation_defaults_to_identity() {
        let meta = FrameMetadata::parse(r#"{"camera_pose": {"position": {"x": 1, "y": 2, "z": 3}}}"#)
            .unwrap();
        let pose = meta.camera_pose.unwrap();
        assert_eq!(pose.rotation, Quaternion::default());
        assert_eq!(pose.position.z, 3.0);
    }
}
