//! Wire protocol: metadata in, frames in, instructions out.
//!
//! Each cycle on a connection is one text message holding [`FrameMetadata`]
//! followed by one binary message holding a JPEG. The server answers each
//! accepted image with exactly one [`ServerResponse`], or stays silent when
//! the frame was dropped.

pub mod message;
pub mod metadata;
pub mod response;

pub use message::InboundMessage;
pub use metadata::{CameraPose, FrameMetadata, Quaternion, Timestamp, Vector3};
pub use response::{
    BoundingBox, ErrorResponse, ErrorStatus, Instruction, ObjectInfo, Point, ServerResponse,
    StepGuidance, TaskStatus,
};
