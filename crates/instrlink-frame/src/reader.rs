use std::io::{ErrorKind, Read};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::codec::{
    ends_with_terminator, Frame, FrameConfig, FrameKind, Terminator, DEFAULT_CHUNK_SIZE,
};
use crate::deadline::Deadline;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Reads terminator-delimited frames from any `Read` stream.
///
/// The stream is expected to return quickly when idle (an OS-level read
/// timeout surfacing as `WouldBlock` or `TimedOut`); the overall budget is
/// enforced here with a [`Deadline`]. Bytes read past the end of a frame are
/// kept and consumed first by the next read.
pub struct FrameReader<T> {
    inner: T,
    pending: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read until `terminator` is seen, `max_size` bytes are collected, or
    /// `timeout` elapses.
    ///
    /// Stop conditions are checked after every byte: a terminator suffix
    /// yields [`FrameKind::Complete`], reaching `max_size` yields
    /// [`FrameKind::Truncated`]. On timeout, disconnect or I/O error the bytes
    /// gathered so far are kept for the next call.
    pub fn read_until(
        &mut self,
        timeout: Duration,
        terminator: &Terminator,
        max_size: Option<usize>,
    ) -> Result<Frame> {
        if max_size == Some(0) {
            return Ok(Frame::truncated(BytesMut::new().freeze()));
        }

        let mut deadline = Deadline::after(timeout);
        let mut line = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);

        if let Some(frame) = self.drain_into(&mut line, terminator, max_size) {
            return Ok(frame);
        }

        let mut chunk = vec![0u8; self.config.chunk_size.max(1)];
        loop {
            if deadline.is_expired() {
                debug!(
                    budget = ?deadline.budget(),
                    idle = ?deadline.idle_time(),
                    buffered = line.len(),
                    "read deadline expired"
                );
                self.pending = line;
                return Err(FrameError::Timeout(deadline.budget()));
            }

            let err = match self.inner.read(&mut chunk) {
                Ok(0) => FrameError::ConnectionClosed,
                Ok(n) => {
                    trace!(bytes = n, "chunk read");
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(frame) = self.drain_into(&mut line, terminator, max_size) {
                        return Ok(frame);
                    }
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_idle(&err) => {
                    deadline.note_idle(self.config.read_interval);
                    continue;
                }
                Err(err) if is_disconnect(&err) => FrameError::ConnectionClosed,
                Err(err) => FrameError::Io(err),
            };
            // Unfinished bytes stay readable after a failed read.
            self.pending = line;
            return Err(err);
        }
    }

    /// Return whatever bytes are available without framing.
    ///
    /// Buffered bytes are returned first; otherwise a single read is made. An
    /// idle stream yields an empty [`FrameKind::Partial`] frame.
    pub fn read_available(&mut self, max_size: Option<usize>) -> Result<Frame> {
        if !self.pending.is_empty() {
            let n = max_size.map_or(self.pending.len(), |max| max.min(self.pending.len()));
            return Ok(Frame::partial(self.pending.split_to(n).freeze()));
        }

        let mut chunk = vec![0u8; max_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1)];
        loop {
            return match self.inner.read(&mut chunk) {
                Ok(0) => Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    chunk.truncate(n);
                    Ok(Frame::partial(chunk))
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_idle(&err) => Ok(Frame::partial(Vec::<u8>::new())),
                Err(err) if is_disconnect(&err) => Err(FrameError::ConnectionClosed),
                Err(err) => Err(FrameError::Io(err)),
            };
        }
    }

    /// Feed buffered bytes into `line` one at a time until a stop condition.
    fn drain_into(
        &mut self,
        line: &mut BytesMut,
        terminator: &Terminator,
        max_size: Option<usize>,
    ) -> Option<Frame> {
        let mut consumed = 0usize;
        let mut kind = None;

        for &byte in self.pending.iter() {
            line.extend_from_slice(&[byte]);
            consumed += 1;
            if ends_with_terminator(&line[..], terminator) {
                kind = Some(FrameKind::Complete);
                break;
            }
            if max_size.is_some_and(|max| line.len() >= max) {
                kind = Some(FrameKind::Truncated);
                break;
            }
        }

        self.pending.advance(consumed);
        kind.map(|kind| Frame::new(kind, line.split().freeze()))
    }

    /// Drop bytes that were read but not yet returned.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            debug!(bytes = dropped, "discarding stale buffered bytes");
        }
        self.pending.clear();
        dropped
    }

    /// Number of buffered bytes waiting for the next read.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn is_idle(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}
