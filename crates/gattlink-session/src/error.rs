use std::time::Duration;

use gattlink_frame::FrameError;
use gattlink_transport::TransportError;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The link is unavailable.
    #[error("link not connected")]
    NotConnected,

    /// Another command is already in flight.
    #[error("session busy: a command is already in flight")]
    Busy,

    /// No matching response arrived within the busy window.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// A reassembled message was not a valid envelope.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A correlation key was registered twice.
    #[error("correlation key {0} already pending")]
    DuplicateKey(String),

    /// A fragment write failed mid-message; later fragments were not sent.
    #[error("transport write failed on fragment {fragment} of {total}: {source}")]
    TransportWriteFailed {
        fragment: usize,
        total: usize,
        #[source]
        source: TransportError,
    },

    /// The session was closed or the link dropped while waiting.
    #[error("session closed")]
    Closed,

    /// The link configuration is invalid.
    #[error("invalid link config: {0}")]
    Config(String),

    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::WriteFailed {
                fragment,
                total,
                source,
            } => SessionError::TransportWriteFailed {
                fragment,
                total,
                source,
            },
            other => SessionError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
