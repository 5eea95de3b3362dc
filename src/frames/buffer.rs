//! Fixed-capacity recency window of frame references.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Default number of frames kept in the window.
pub const DEFAULT_FRAME_CAPACITY: usize = 10;

/// Bounded FIFO of frame paths, oldest first.
///
/// Adding past capacity evicts the oldest frame. The buffer never holds more
/// than its capacity and insertion order is temporal order.
///
/// # Examples
///
/// ```
/// use stepguide::frames::FrameBuffer;
///
/// let mut buffer = FrameBuffer::with_capacity(2);
/// buffer.add("a.jpg");
/// buffer.add("b.jpg");
/// let evicted = buffer.add("c.jpg");
///
/// assert_eq!(evicted.as_deref(), Some(std::path::Path::new("a.jpg")));
/// assert_eq!(buffer.snapshot().len(), 2);
/// assert_eq!(buffer.latest(), Some(std::path::Path::new("c.jpg")));
/// ```
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<PathBuf>,
    capacity: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with the default capacity of 10.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FRAME_CAPACITY)
    }

    /// Create an empty buffer holding at most `capacity` frames (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, returning the evicted oldest frame if the buffer was full.
    pub fn add(&mut self, frame: impl Into<PathBuf>) -> Option<PathBuf> {
        self.frames.push_back(frame.into());
        if self.frames.len() > self.capacity {
            self.frames.pop_front()
        } else {
            None
        }
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.frames.iter().cloned().collect()
    }

    /// The most recent `n` frames, oldest first.
    pub fn tail(&self, n: usize) -> Vec<PathBuf> {
        let skip = self.frames.len().saturating_sub(n);
        self.frames.iter().skip(skip).cloned().collect()
    }

    /// The most recently added frame.
    pub fn latest(&self) -> Option<&Path> {
        self.frames.back().map(PathBuf::as_path)
    }

    /// Returns `true` if `frame` is currently in the window.
    pub fn contains(&self, frame: &Path) -> bool {
        self.frames.iter().any(|f| f == frame)
    }

    /// Number of frames held.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frames are held.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Maximum number of frames held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
