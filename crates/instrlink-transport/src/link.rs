use std::io::{Read, Write};
use std::time::Duration;

use instrlink_frame::{Command, CommandWriter, Frame, FrameConfig, FrameReader, Terminator};
use tracing::debug;

use crate::error::{Result, TransportError, TransportKind};
use crate::sink::{report_received, report_sent, EventSink};

/// An open handle plus its framing state.
///
/// Reads and writes share the one stream: the reader owns it and commands are
/// written through a borrowed writer, so no second descriptor is created.
pub(crate) struct Link<S> {
    reader: FrameReader<S>,
    kind: TransportKind,
}

impl<S: Read + Write> Link<S> {
    pub(crate) fn new(stream: S, config: FrameConfig, kind: TransportKind) -> Self {
        Self {
            reader: FrameReader::with_config(stream, config),
            kind,
        }
    }

    pub(crate) fn stream(&self) -> &S {
        self.reader.get_ref()
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    pub(crate) fn into_stream(self) -> S {
        self.reader.into_inner()
    }

    pub(crate) fn send(&mut self, command: &Command, sink: &dyn EventSink) -> Result<()> {
        let kind = self.kind;
        self.reader.discard_pending();
        let config = self.reader.config().clone();
        CommandWriter::with_config(self.reader.get_mut(), config)
            .write_command(command)
            .map_err(|err| TransportError::from_frame(err, kind))?;
        debug!(transport = %self.kind, bytes = command.bytes.len(), "command sent");
        report_sent(sink, command);
        Ok(())
    }

    pub(crate) fn receive(&mut self, max_size: Option<usize>) -> Result<Frame> {
        self.reader
            .read_available(max_size)
            .map_err(|err| TransportError::from_frame(err, self.kind))
    }

    pub(crate) fn read_until(
        &mut self,
        timeout: Duration,
        terminator: &Terminator,
        max_size: Option<usize>,
        sink: &dyn EventSink,
    ) -> Result<Frame> {
        let frame = self
            .reader
            .read_until(timeout, terminator, max_size)
            .map_err(|err| TransportError::from_frame(err, self.kind))?;
        debug!(
            transport = %self.kind,
            bytes = frame.len(),
            kind = ?frame.kind,
            "frame received"
        );
        report_received(sink, &frame);
        Ok(frame)
    }
}
