use std::fmt;

use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Default chunk size for polled stream reads.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default maximum command size: 64 KiB.
pub const DEFAULT_MAX_COMMAND: usize = 64 * 1024;

/// A non-empty byte sequence marking the end of a response frame.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Terminator(Bytes);

impl Terminator {
    /// Create a terminator from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(FrameError::EmptyTerminator);
        }
        Ok(Self(bytes))
    }

    /// Single line feed (`"\n"`).
    pub fn lf() -> Self {
        Self(Bytes::from_static(b"\n"))
    }

    /// Carriage return + line feed (`"\r\n"`).
    pub fn crlf() -> Self {
        Self(Bytes::from_static(b"\r\n"))
    }

    /// Parse a terminator written with escape sequences (`\r\n`, `\x03`, ...).
    pub fn parse_escaped(text: &str) -> Result<Self> {
        Self::new(unescape(text))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Terminator(\"{}\")", escape(&self.0))
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&escape(&self.0))
    }
}

/// Returns true when `buf` ends with `terminator`.
///
/// Only the trailing window of `terminator.len()` bytes is compared, so a
/// terminator that appeared earlier in the buffer does not match.
pub fn ends_with_terminator(buf: &[u8], terminator: &Terminator) -> bool {
    let term = terminator.as_bytes();
    buf.len() >= term.len() && &buf[buf.len() - term.len()..] == term
}

/// How a read produced its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The bytes end with the terminator.
    Complete,
    /// The bytes were cut at the configured maximum size.
    Truncated,
    /// Raw bytes with no framing applied.
    Partial,
}

/// A response read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn complete(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Complete, payload)
    }

    pub fn truncated(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Truncated, payload)
    }

    pub fn partial(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Partial, payload)
    }

    pub fn is_complete(&self) -> bool {
        self.kind == FrameKind::Complete
    }

    pub fn is_truncated(&self) -> bool {
        self.kind == FrameKind::Truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload with the given terminator removed, if present.
    pub fn strip_terminator(&self, terminator: &Terminator) -> &[u8] {
        if ends_with_terminator(&self.payload, terminator) {
            &self.payload[..self.payload.len() - terminator.len()]
        } else {
            &self.payload
        }
    }

    /// Lossy text rendering with surrounding whitespace trimmed, for logs.
    pub fn text_preview(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim().to_string()
    }
}

/// Configuration for frame readers and command writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Bytes requested per underlying read. Serial lines use 1.
    pub chunk_size: usize,
    /// Maximum command size in bytes. Default: 64 KiB.
    pub max_command_size: usize,
    /// Idle time charged to the deadline for each read that times out.
    pub read_interval: std::time::Duration,
    /// Budget for writing and flushing one command, retries included.
    pub write_timeout: std::time::Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_command_size: DEFAULT_MAX_COMMAND,
            read_interval: std::time::Duration::from_millis(200),
            write_timeout: std::time::Duration::from_secs(2),
        }
    }
}

/// Decode `\n`, `\r`, `\t`, `\\`, `\0` and `\xNN` escapes into raw bytes.
///
/// Unknown or malformed escapes are kept literally.
pub fn unescape(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'0' => out.push(0),
            b'x' | b'X' => {
                let hex = bytes
                    .get(i + 2..i + 4)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(value) => {
                        out.push(value);
                        i += 4;
                    }
                    None => {
                        out.push(b'\\');
                        i += 1;
                    }
                }
                continue;
            }
            _ => {
                out.push(b'\\');
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    out
}

/// Render bytes with control characters escaped, inverse of [`unescape`].
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}
