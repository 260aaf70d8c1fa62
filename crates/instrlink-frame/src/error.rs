use std::time::Duration;

/// Errors that can occur while framing commands and responses.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A terminator must contain at least one byte.
    #[error("terminator must not be empty")]
    EmptyTerminator,

    /// No complete frame arrived before the read deadline.
    #[error("no complete frame within {0:?}")]
    Timeout(Duration),

    /// The command exceeds the configured maximum size.
    #[error("command too large ({size} bytes, max {max})")]
    CommandTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream before a frame completed.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
