use std::fmt;
use std::io;

use instrlink_frame::FrameError;
use instrlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

/// Map a transport outcome to an exit code. Timeouts and disconnects carry
/// the legacy sentinel in the message so scripts grepping for it still work.
pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, target } => {
            io_error(&format!("{context} ({target})"), source)
        }
        TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout(_) | TransportError::Disconnected(_) => {
            let code = if err.is_timeout() { TIMEOUT } else { FAILURE };
            let sentinel = err.sentinel().unwrap_or_default();
            CliError::new(code, format!("{context}: {err} [{sentinel}]"))
        }
        TransportError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Frame(FrameError::CommandTooLarge { .. }) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}
