use std::fmt;
use std::time::Duration;

use instrlink_frame::FrameError;

/// Legacy sentinel text for a read that ran out of time.
pub const TIMEOUT_SENTINEL: &str = "ERROR - TIMEOUT";
/// Legacy sentinel text for a closed serial transport.
pub const SERIAL_DISCONNECT_SENTINEL: &str = "ERROR-SERIAL_DISCONNECT";
/// Legacy sentinel text for a closed TCP transport.
pub const TCP_DISCONNECT_SENTINEL: &str = "ERROR-TCP_DISCONNECT";

/// Which physical link a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => f.write_str("serial"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to acquire the device or socket.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on an open handle.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An OS-level serial control call failed.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No complete frame arrived within the read budget.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The transport is closed or the peer went away mid-read.
    #[error("{0} transport disconnected")]
    Disconnected(TransportKind),

    /// A framing rule was violated (oversized command, empty terminator).
    #[error("framing error: {0}")]
    Frame(FrameError),

    /// The transport configuration is invalid.
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Map a framing error raised on a transport of the given kind.
    pub fn from_frame(err: FrameError, kind: TransportKind) -> Self {
        match err {
            FrameError::Timeout(budget) => TransportError::Timeout(budget),
            FrameError::ConnectionClosed => TransportError::Disconnected(kind),
            FrameError::Io(io) => TransportError::Io(io),
            other => TransportError::Frame(other),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }

    /// The legacy sentinel string for timeout and disconnect outcomes.
    pub fn sentinel(&self) -> Option<&'static str> {
        match self {
            TransportError::Timeout(_) => Some(TIMEOUT_SENTINEL),
            TransportError::Disconnected(TransportKind::Serial) => Some(SERIAL_DISCONNECT_SENTINEL),
            TransportError::Disconnected(TransportKind::Tcp) => Some(TCP_DISCONNECT_SENTINEL),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
