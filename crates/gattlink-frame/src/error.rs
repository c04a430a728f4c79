use gattlink_transport::TransportError;

/// Errors that can occur while framing, chunking or reassembling messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame configuration cannot produce valid fragments.
    #[error("invalid frame config: {0}")]
    InvalidConfig(String),

    /// The payload contains the sentinel byte and would be mis-framed.
    #[error("payload contains sentinel byte at offset {offset}")]
    EmbeddedSentinel { offset: usize },

    /// A fragment write failed; the remaining fragments were not sent.
    #[error("fragment {fragment} of {total} failed: {source}")]
    WriteFailed {
        fragment: usize,
        total: usize,
        #[source]
        source: TransportError,
    },

    /// An inbound notification was not valid base64.
    #[error("invalid base64 fragment: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// A message grew past the configured limit without a sentinel.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred while decoding a byte stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
