use std::time::Duration;

use instrlink_frame::{Command, Frame, Terminator};

use crate::error::{Result, TransportError, TransportKind};

/// A request/response connection to one instrument or fixture.
///
/// Every implementation owns at most one OS handle. `send` and the read
/// operations are only valid while open; on a closed transport they return
/// [`TransportError::Disconnected`]. Operations are synchronous and must not
/// be called concurrently on the same instance.
pub trait Transport: Send {
    /// Acquire the underlying handle. Succeeds without reallocating when
    /// already open.
    fn open(&mut self) -> Result<()>;

    /// Flush and release the handle. A no-op when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write a command. Stale inbound bytes are discarded first.
    fn send(&mut self, command: &Command) -> Result<()>;

    /// Return whatever bytes are currently available, without framing.
    fn receive(&mut self, max_size: Option<usize>) -> Result<Frame>;

    /// Read one frame ending in `terminator`, cut at `max_size`, within
    /// `timeout`.
    fn read_until(
        &mut self,
        timeout: Duration,
        terminator: &Terminator,
        max_size: Option<usize>,
    ) -> Result<Frame>;

    /// The terminator used by [`Transport::query`].
    fn terminator(&self) -> &Terminator;

    fn kind(&self) -> TransportKind;

    /// Human-readable endpoint, e.g. `/dev/ttyUSB0@115200` or `10.0.0.5:1110`.
    fn describe(&self) -> String;

    /// Send `command` and read the response framed by the configured
    /// terminator. Nothing is sent when the transport is closed.
    fn query(
        &mut self,
        command: &Command,
        timeout: Duration,
        max_size: Option<usize>,
    ) -> Result<Frame> {
        if !self.is_open() {
            return Err(TransportError::Disconnected(self.kind()));
        }
        self.send(command)?;
        let terminator = self.terminator().clone();
        self.read_until(timeout, &terminator, max_size)
    }

    /// Read one newline-terminated frame.
    fn read_line(&mut self, timeout: Duration) -> Result<Frame> {
        self.read_until(timeout, &Terminator::lf(), None)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        (**self).send(command)
    }

    fn receive(&mut self, max_size: Option<usize>) -> Result<Frame> {
        (**self).receive(max_size)
    }

    fn read_until(
        &mut self,
        timeout: Duration,
        terminator: &Terminator,
        max_size: Option<usize>,
    ) -> Result<Frame> {
        (**self).read_until(timeout, terminator, max_size)
    }

    fn terminator(&self) -> &Terminator {
        (**self).terminator()
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn query(
        &mut self,
        command: &Command,
        timeout: Duration,
        max_size: Option<usize>,
    ) -> Result<Frame> {
        (**self).query(command, timeout, max_size)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Frame> {
        (**self).read_line(timeout)
    }
}
