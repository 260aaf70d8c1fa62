use std::io::Write;
use std::time::Duration;

use instrlink_frame::{Command, Frame, FrameConfig, Terminator, DEFAULT_MAX_COMMAND};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError, TransportKind};
use crate::link::Link;
use crate::sink::{noop, SharedSink};
use crate::traits::Transport;

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Default response budget for serial queries.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_millis(3000);
/// Default OS-level per-read timeout.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serial line settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// Response budget callers use when they have no better figure.
    pub timeout: Duration,
    pub terminator: Terminator,
    /// OS-level read timeout. Bounds how far a read can overrun its deadline.
    pub poll_interval: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_SERIAL_TIMEOUT,
            terminator: Terminator::lf(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Same settings against a different device path.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            chunk_size: 1,
            max_command_size: DEFAULT_MAX_COMMAND,
            read_interval: self.poll_interval,
            write_timeout: self.timeout,
        }
    }
}

/// Transport over a local serial device.
///
/// Reads are byte-at-a-time with a short OS-level timeout so the framing
/// deadline is honoured even when the device goes quiet.
pub struct SerialTransport {
    config: SerialConfig,
    link: Option<Link<Box<dyn SerialPort>>>,
    sink: SharedSink,
}

impl SerialTransport {
    /// Create a closed transport that reports nowhere.
    pub fn new(config: SerialConfig) -> Self {
        Self::with_sink(config, noop())
    }

    /// Create a closed transport reporting traffic to `sink`.
    pub fn with_sink(config: SerialConfig, sink: SharedSink) -> Self {
        Self {
            config,
            link: None,
            sink,
        }
    }

    /// Adopt an already-open port. Reopening after `close` uses `config.port`.
    pub fn from_port(
        config: SerialConfig,
        mut port: Box<dyn SerialPort>,
        sink: SharedSink,
    ) -> Result<Self> {
        port.set_timeout(config.poll_interval)?;
        let link = Link::new(port, config.frame_config(), TransportKind::Serial);
        Ok(Self {
            config,
            link: Some(link),
            sink,
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Configured response budget.
    pub fn default_timeout(&self) -> Duration {
        self.config.timeout
    }

    fn link_mut(&mut self) -> Result<&mut Link<Box<dyn SerialPort>>> {
        self.link
            .as_mut()
            .ok_or(TransportError::Disconnected(TransportKind::Serial))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.config.poll_interval)
            .open()
            .map_err(|err| TransportError::Connect {
                target: self.describe(),
                source: err.into(),
            })?;

        info!(port = %self.config.port, baud = self.config.baud_rate, "serial port opened");
        self.link = Some(Link::new(
            port,
            self.config.frame_config(),
            TransportKind::Serial,
        ));
        Ok(())
    }

    fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let mut port = link.into_stream();
        if let Err(err) = port.flush() {
            warn!(port = %self.config.port, error = %err, "flush before close failed");
        }
        drop(port);
        debug!(port = %self.config.port, "serial port closed");
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        let sink = self.sink.clone();
        let link = self.link_mut()?;
        link.stream_mut().clear(ClearBuffer::All)?;
        link.send(command, sink.as_ref())
    }

    fn receive(&mut self, max_size: Option<usize>) -> Result<Frame> {
        self.link_mut()?.receive(max_size)
    }

    fn read_until(
        &mut self,
        timeout: Duration,
        terminator: &Terminator,
        max_size: Option<usize>,
    ) -> Result<Frame> {
        let sink = self.sink.clone();
        self.link_mut()?
            .read_until(timeout, terminator, max_size, sink.as_ref())
    }

    fn terminator(&self) -> &Terminator {
        &self.config.terminator
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.config.port, self.config.baud_rate)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_millis(3000));
        assert_eq!(config.terminator, Terminator::lf());
        assert_eq!(config.frame_config().chunk_size, 1);

        let moved = config.with_port("/dev/ttyACM1");
        assert_eq!(moved.port, "/dev/ttyACM1");
    }

    #[test]
    fn closed_transport_reports_disconnect() {
        let mut transport = SerialTransport::new(SerialConfig::new("/dev/does-not-exist"));
        assert!(!transport.is_open());

        let err = transport.send(&Command::from("PING\n")).unwrap_err();
        assert_eq!(err.sentinel(), Some("ERROR-SERIAL_DISCONNECT"));

        let err = transport.receive(None).unwrap_err();
        assert!(err.is_disconnected());

        let err = transport
            .query(&Command::from("PING\n"), Duration::from_millis(10), None)
            .unwrap_err();
        assert!(err.is_disconnected());
    }

    #[test]
    fn close_is_idempotent() {
        let mut transport = SerialTransport::new(SerialConfig::new("/dev/does-not-exist"));
        transport.close();
        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn open_missing_device_is_connect_error() {
        let mut transport =
            SerialTransport::new(SerialConfig::new("/dev/instrlink-missing-device"));
        let err = transport.open().unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!transport.is_open());
    }

    #[cfg(unix)]
    mod pty {
        use std::io::{Read, Write};
        use std::sync::Arc;
        use std::time::Instant;

        use serialport::TTYPort;

        use super::*;
        use crate::sink::MemorySink;

        fn make_raw(port: &TTYPort) {
            use std::os::fd::AsRawFd;

            let fd = port.as_raw_fd();
            // SAFETY: `fd` is an open tty owned by `port`, and `termios` is fully
            // initialised by `tcgetattr` before it is modified.
            unsafe {
                let mut termios: libc::termios = std::mem::zeroed();
                assert_eq!(libc::tcgetattr(fd, &mut termios), 0);
                libc::cfmakeraw(&mut termios);
                assert_eq!(libc::tcsetattr(fd, libc::TCSANOW, &termios), 0);
            }
        }

        fn pty_transport(sink: SharedSink) -> (SerialTransport, TTYPort) {
            let (master, slave) = TTYPort::pair().expect("pseudo-terminal pair");
            make_raw(&slave);
            let config = SerialConfig::new(slave.name().unwrap_or_default());
            let transport = SerialTransport::from_port(config, Box::new(slave), sink)
                .expect("adopt pty slave");
            (transport, master)
        }

        #[test]
        fn ping_pong_round_trip() {
            let sink = Arc::new(MemorySink::new());
            let (mut transport, mut master) = pty_transport(sink.clone());

            let fixture = std::thread::spawn(move || {
                let mut received = Vec::new();
                let mut byte = [0u8; 1];
                master
                    .set_timeout(Duration::from_secs(2))
                    .expect("master timeout");
                while !received.ends_with(b"\n") {
                    master.read_exact(&mut byte).expect("command byte");
                    received.push(byte[0]);
                }
                master.write_all(b"PONG\n").expect("reply");
                (master, received)
            });

            let frame = transport
                .query(&Command::from("PING\n"), Duration::from_secs(2), None)
                .unwrap();
            let (_master, received) = fixture.join().unwrap();

            assert_eq!(received, b"PING\n");
            assert_eq!(frame.as_bytes(), b"PONG\n");
            assert!(frame.is_complete());
            assert_eq!(
                sink.messages(),
                vec![" >>>>>> [SEND: PING]".to_string(), "Receive:'PONG'".to_string()]
            );
        }

        #[test]
        fn send_clears_stale_input_before_query() {
            let (mut transport, mut master) = pty_transport(noop());
            master.write_all(b"STALE\n").expect("stale line");
            std::thread::sleep(Duration::from_millis(50));

            let fixture = std::thread::spawn(move || {
                let mut received = Vec::new();
                let mut byte = [0u8; 1];
                master
                    .set_timeout(Duration::from_secs(2))
                    .expect("master timeout");
                while !received.ends_with(b"\n") {
                    master.read_exact(&mut byte).expect("command byte");
                    received.push(byte[0]);
                }
                master.write_all(b"PONG\n").expect("reply");
                master
            });

            let frame = transport
                .query(&Command::from("PING\n"), Duration::from_secs(2), None)
                .unwrap();
            let _master = fixture.join().unwrap();

            assert_eq!(frame.as_bytes(), b"PONG\n");
        }

        #[test]
        fn silent_device_times_out_within_one_poll() {
            let (mut transport, _master) = pty_transport(noop());
            let budget = Duration::from_millis(100);

            let start = Instant::now();
            let err = transport
                .read_until(budget, &Terminator::lf(), None)
                .unwrap_err();
            let elapsed = start.elapsed();

            assert_eq!(err.sentinel(), Some("ERROR - TIMEOUT"));
            assert!(elapsed >= budget);
            assert!(elapsed < budget + DEFAULT_POLL_INTERVAL + Duration::from_millis(100));
        }

        #[test]
        fn size_cap_truncates_serial_frame() {
            let (mut transport, mut master) = pty_transport(noop());
            master.write_all(b"ABCDE").unwrap();

            let frame = transport
                .read_until(Duration::from_secs(2), &Terminator::lf(), Some(4))
                .unwrap();
            assert!(frame.is_truncated());
            assert_eq!(frame.as_bytes(), b"ABCD");
        }

        #[test]
        fn close_releases_handle() {
            let (mut transport, _master) = pty_transport(noop());
            assert!(transport.is_open());
            transport.close();
            assert!(!transport.is_open());
            transport.close();
        }
    }
}
