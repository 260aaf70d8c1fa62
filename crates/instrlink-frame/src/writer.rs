use std::io::{ErrorKind, Write};

use bytes::Bytes;
use tracing::debug;

use crate::codec::{escape, FrameConfig};
use crate::deadline::Deadline;
use crate::error::{FrameError, Result};

/// An outbound command: opaque bytes plus an optional description for logs.
///
/// The caller includes any terminator the instrument protocol requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub bytes: Bytes,
    pub description: Option<String>,
}

impl Command {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            description: None,
        }
    }

    /// Attach a human-readable description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lossy text rendering with surrounding whitespace trimmed, for logs.
    pub fn text_preview(&self) -> String {
        match std::str::from_utf8(&self.bytes) {
            Ok(text) => text.trim().to_string(),
            Err(_) => escape(&self.bytes),
        }
    }
}

impl From<&'static str> for Command {
    fn from(text: &'static str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl From<Vec<u8>> for Command {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Writes complete commands to any `Write` stream.
pub struct CommandWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> CommandWriter<T> {
    /// Create a new command writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new command writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write all command bytes and flush (blocking).
    pub fn write_command(&mut self, command: &Command) -> Result<()> {
        self.write_bytes(command.as_bytes())
    }

    /// Write raw bytes and flush (blocking).
    ///
    /// A stream whose write timeout keeps firing (`WouldBlock`/`TimedOut`) is
    /// retried until `write_timeout` is spent, then the last error is returned
    /// as [`FrameError::Io`].
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.config.max_command_size {
            return Err(FrameError::CommandTooLarge {
                size: bytes.len(),
                max: self.config.max_command_size,
            });
        }

        let deadline = Deadline::after(self.config.write_timeout);
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_stalled(&err) && !deadline.is_expired() => continue,
                Err(err) => {
                    debug!(
                        written = offset,
                        total = bytes.len(),
                        error = %err,
                        "command write failed"
                    );
                    return Err(FrameError::Io(err));
                }
            }
        }

        self.flush_until(&deadline)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        let deadline = Deadline::after(self.config.write_timeout);
        self.flush_until(&deadline)
    }

    fn flush_until(&mut self, deadline: &Deadline) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_stalled(&err) && !deadline.is_expired() => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current command writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn is_stalled(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn writes_command_bytes_verbatim() {
        let mut writer = CommandWriter::new(Vec::new());
        writer.write_command(&Command::from("PING\n")).unwrap();
        assert_eq!(writer.get_ref().as_slice(), b"PING\n");
    }

    #[test]
    fn rejects_oversized_command() {
        let config = FrameConfig {
            max_command_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = CommandWriter::with_config(Vec::new(), config);
        let err = writer
            .write_command(&Command::from("TOO LONG\n"))
            .unwrap_err();

        assert!(matches!(err, FrameError::CommandTooLarge { size: 9, max: 4 }));
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = CommandWriter::new(ShortWriter::default());
        writer.write_command(&Command::from("MEAS:VOLT?\n")).unwrap();
        assert_eq!(writer.get_ref().data, b"MEAS:VOLT?\n");
        assert!(writer.get_ref().flushed);
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = CommandWriter::new(ClosedWriter);
        let err = writer.write_command(&Command::from("X")).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_write_retries() {
        let mut writer = CommandWriter::new(InterruptOnce::default());
        writer.write_command(&Command::from("*IDN?\n")).unwrap();
        assert_eq!(writer.get_ref().data, b"*IDN?\n");
    }

    #[test]
    fn stalled_stream_fails_once_write_timeout_is_spent() {
        let config = FrameConfig {
            write_timeout: Duration::from_millis(50),
            ..FrameConfig::default()
        };
        let mut writer = CommandWriter::with_config(StalledWriter::default(), config);

        let start = Instant::now();
        let err = writer.write_command(&Command::from("*IDN?\n")).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == ErrorKind::WouldBlock));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(1), "write overran: {elapsed:?}");
        assert!(writer.get_ref().attempts > 1);
    }

    #[test]
    fn stalled_flush_is_bounded() {
        let config = FrameConfig {
            write_timeout: Duration::from_millis(20),
            ..FrameConfig::default()
        };
        let mut writer = CommandWriter::with_config(StalledWriter::default(), config);
        let err = writer.flush().unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn describe_attaches_description() {
        let cmd = Command::from("RELAY ON\r\n").describe("close relay 3");
        assert_eq!(cmd.description.as_deref(), Some("close relay 3"));
        assert_eq!(cmd.text_preview(), "RELAY ON");
    }

    #[test]
    fn binary_command_preview_is_escaped() {
        let cmd = Command::from(vec![0x02, b'R', 0x03]);
        assert_eq!(cmd.text_preview(), "\\x02R\\x03");
    }

    #[derive(Default)]
    struct ShortWriter {
        data: Vec<u8>,
        flushed: bool,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Every write and flush reports an expired socket write timeout.
    #[derive(Default)]
    struct StalledWriter {
        attempts: usize,
    }

    impl Write for StalledWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            self.attempts += 1;
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }

    #[derive(Default)]
    struct InterruptOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
