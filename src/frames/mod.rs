//! Frame storage and the shared recency window.

pub mod buffer;
pub mod store;

pub use buffer::{FrameBuffer, DEFAULT_FRAME_CAPACITY};
pub use store::{CleanupReport, FrameStore};
