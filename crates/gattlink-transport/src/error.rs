use std::path::PathBuf;

/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link is not connected (never connected, or dropped).
    #[error("link not connected")]
    NotConnected,

    /// Failed to bind the link emulator socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the link emulator socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Write data was not valid base64.
    #[error("invalid base64 write payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// A notification subscription already exists for this characteristic.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    /// The peripheral rejected a characteristic write.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
