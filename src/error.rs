//! Error types for the guidance server.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors raised
//! while a frame is being analyzed never reach the connection loop: the
//! dispatcher turns them into an `error` instruction for the client.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting frames and driving task progress.
#[derive(Error, Debug)]
pub enum Error {
    /// Task or step construction input was rejected.
    #[error("validation error: {0}")]
    Validation(String),

    /// Frame storage could not be read, written or created.
    #[error("storage error at '{}': {source}", path.display())]
    Storage {
        /// The file or directory that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A client message could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The frame analysis collaborator failed or returned garbage.
    #[error("frame analysis failed: {0}")]
    Analysis(String),

    /// Object localization failed for one object.
    #[error("detection of '{object}' failed: {message}")]
    Detection {
        /// The object that was being localized.
        object: String,
        /// What went wrong.
        message: String,
    },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The client connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// An HTTP call to a vision backend failed.
    #[cfg(feature = "http-client")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an analysis error.
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis(message.into())
    }

    /// Create a detection error for `object`.
    pub fn detection(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Detection {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a storage error for `path`.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for failures that should close the client connection.
    ///
    /// Only storage failures are fatal to a connection; everything else is
    /// reported back to the client and the connection stays open. The
    /// connection handler only surfaces storage errors for the frame
    /// directory itself.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}
