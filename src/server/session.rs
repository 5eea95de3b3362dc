//! Per-connection protocol phase machine.
//!
//! ```text
//!            text (valid metadata)
//!   ┌──────────────────┐ ─────────────────► ┌───────────────┐
//!   │ AwaitingMetadata │                    │ AwaitingImage │
//!   └──────────────────┘ ◄───────────────── └───────────────┘
//!     ▲   │ binary: ignored    binary: frame ready
//!     └───┘ bad text: error    text: discarded, reset
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::protocol::{FrameMetadata, InboundMessage};

/// Protocol phase of one connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Phase {
    /// Waiting for the metadata text message.
    #[default]
    AwaitingMetadata,
    /// Metadata received; waiting for the frame.
    AwaitingImage(FrameMetadata),
}

/// What the connection should do with one inbound message.
#[derive(Debug)]
pub enum SessionEvent {
    /// Metadata stored; the next binary message is the frame.
    MetadataAccepted,
    /// Metadata could not be parsed; reply with an error.
    MetadataRejected(Error),
    /// A frame paired with its metadata.
    Frame {
        /// Metadata that preceded the frame.
        metadata: FrameMetadata,
        /// Encoded image.
        payload: Vec<u8>,
    },
    /// Binary message without preceding metadata; ignored.
    UnexpectedBinary,
    /// Text message while a frame was expected; discarded and the phase reset.
    UnexpectedText,
}

/// Protocol state of one connection.
#[derive(Debug, Default)]
pub struct Session {
    phase: Phase,
    owned_frames: HashSet<PathBuf>,
}

impl Session {
    /// A fresh session awaiting metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Returns `true` while a frame is expected next.
    pub fn awaiting_image(&self) -> bool {
        matches!(self.phase, Phase::AwaitingImage(_))
    }

    /// Feed one message through the phase machine.
    ///
    /// A [`SessionEvent::Frame`] always leaves the session awaiting metadata
    /// again.
    pub fn on_message(&mut self, message: InboundMessage) -> SessionEvent {
        match (std::mem::take(&mut self.phase), message) {
            (Phase::AwaitingMetadata, InboundMessage::Text(text)) => {
                match FrameMetadata::parse(&text) {
                    Ok(metadata) => {
                        self.phase = Phase::AwaitingImage(metadata);
                        SessionEvent::MetadataAccepted
                    }
                    Err(e) => SessionEvent::MetadataRejected(e),
                }
            }
            (Phase::AwaitingMetadata, InboundMessage::Binary(_)) => SessionEvent::UnexpectedBinary,
            (Phase::AwaitingImage(metadata), InboundMessage::Binary(payload)) => {
                SessionEvent::Frame { metadata, payload }
            }
            (Phase::AwaitingImage(_), InboundMessage::Text(_)) => SessionEvent::UnexpectedText,
        }
    }

    /// Record a frame file created by this connection.
    pub fn own_frame(&mut self, path: PathBuf) {
        self.owned_frames.insert(path);
    }

    /// Returns `true` if this connection created `path`.
    pub fn owns(&self, path: &Path) -> bool {
        self.owned_frames.contains(path)
    }

    /// Frame files created by this connection.
    pub fn owned_frames(&self) -> impl Iterator<Item = &PathBuf> {
        self.owned_frames.iter()
    }

    /// Number of frame files created by this connection.
    pub fn owned_count(&self) -> usize {
        self.owned_frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &str = r#"{"timestamp": 1.0, "width": 640, "height": 480}"#;

    #[test]
    fn metadata_then_image_yields_frame() {
        let mut session = Session::new();
        assert!(matches!(
            session.on_message(META.into()),
            SessionEvent::MetadataAccepted
        ));
        assert!(session.awaiting_image());

        match session.on_message(vec![0xff, 0xd8].into()) {
            SessionEvent::Frame { metadata, payload } => {
                assert_eq!(metadata.width, 640);
                assert_eq!(payload, vec![0xff, 0xd8]);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(session.phase(), &Phase::AwaitingMetadata);
    }

    #[test]
    fn invalid_metadata_keeps_waiting_for_metadata() {
        let mut session = Session::new();
        assert!(matches!(
            session.on_message("{not json".into()),
            SessionEvent::MetadataRejected(Error::Protocol(_))
        ));
        assert_eq!(session.phase(), &Phase::AwaitingMetadata);
    }

    #[test]
    fn binary_without_metadata_is_ignored() {
        let mut session = Session::new();
        assert!(matches!(
            session.on_message(vec![1, 2, 3].into()),
            SessionEvent::UnexpectedBinary
        ));
        assert_eq!(session.phase(), &Phase::AwaitingMetadata);
    }

    #[test]
    fn second_metadata_is_discarded_and_resets() {
        let mut session = Session::new();
        session.on_message(META.into());
        assert!(matches!(
            session.on_message(META.into()),
            SessionEvent::UnexpectedText
        ));
        assert_eq!(session.phase(), &Phase::AwaitingMetadata);

        // The stray text was not taken as metadata, so an image is ignored.
        assert!(matches!(
            session.on_message(vec![0xff].into()),
            SessionEvent::UnexpectedBinary
        ));
    }

    #[test]
    fn tracks_owned_frames() {
        let mut session = Session::new();
        session.own_frame(PathBuf::from("a.jpg"));
        session.own_frame(PathBuf::from("a.jpg"));
        assert_eq!(session.owned_count(), 1);
        assert!(session.owns(Path::new("a.jpg")));
    }
}
