use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use instrlink_frame::{
    Command, Frame, FrameConfig, Terminator, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_COMMAND,
};
use tracing::{debug, info};

use crate::error::{Result, TransportError, TransportKind};
use crate::link::Link;
use crate::sink::{noop, SharedSink};
use crate::traits::Transport;

/// Default per-read socket timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP endpoint settings.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host name or IP address.
    pub host: String,
    pub port: u16,
    /// Per-read socket timeout; each idle read charges this much to the
    /// caller's budget.
    pub timeout: Duration,
    pub terminator: Terminator,
    pub connect_timeout: Duration,
    pub keepalive: bool,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_READ_TIMEOUT,
            terminator: Terminator::crlf(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: true,
        }
    }

    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_command_size: DEFAULT_MAX_COMMAND,
            read_interval: self.timeout,
            write_timeout: self.write_timeout(),
        }
    }

    /// Socket write timeout, also the budget for one whole command write.
    fn write_timeout(&self) -> Duration {
        self.timeout.max(self.connect_timeout)
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport over a TCP socket.
pub struct TcpTransport {
    config: TcpConfig,
    link: Option<Link<TcpStream>>,
    sink: SharedSink,
}

impl TcpTransport {
    /// Create a closed transport that reports nowhere.
    pub fn new(config: TcpConfig) -> Self {
        Self::with_sink(config, noop())
    }

    /// Create a closed transport reporting traffic to `sink`.
    pub fn with_sink(config: TcpConfig, sink: SharedSink) -> Self {
        Self {
            config,
            link: None,
            sink,
        }
    }

    /// Create and open in one step.
    pub fn connect(config: TcpConfig, sink: SharedSink) -> Result<Self> {
        let mut transport = Self::with_sink(config, sink);
        transport.open()?;
        Ok(transport)
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Address of the connected peer, if open.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link
            .as_ref()
            .and_then(|link| link.stream().peer_addr().ok())
    }

    fn link_mut(&mut self) -> Result<&mut Link<TcpStream>> {
        self.link
            .as_mut()
            .ok_or(TransportError::Disconnected(TransportKind::Tcp))
    }

    fn dial(&self) -> Result<TcpStream> {
        if self.config.timeout.is_zero() {
            return Err(TransportError::Config(
                "tcp read timeout must be greater than zero".to_string(),
            ));
        }

        let target = self.config.target();
        let addrs = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!(%addr, error = %err, "connect attempt failed");
                    last_err = err;
                }
            }
        }

        Err(TransportError::Connect {
            target,
            source: last_err,
        })
    }

    fn configure(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_read_timeout(Some(self.config.timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout()))?;
        stream.set_nodelay(true)?;
        if self.config.keepalive {
            enable_keepalive(stream)?;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let stream = self.dial()?;
        self.configure(&stream)
            .map_err(|source| TransportError::Connect {
                target: self.config.target(),
                source,
            })?;

        info!(target = %self.config.target(), "tcp connected");
        self.link = Some(Link::new(
            stream,
            self.config.frame_config(),
            TransportKind::Tcp,
        ));
        Ok(())
    }

    fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let stream = link.into_stream();
        if let Err(err) = stream.shutdown(Shutdown::Both) {
            debug!(error = %err, "tcp shutdown failed");
        }
        debug!(target = %self.config.target(), "tcp closed");
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        let sink = self.sink.clone();
        self.link_mut()?.send(command, sink.as_ref())
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
        TransportKind::Tcp
    }

    fn describe(&self) -> String {
        self.config.target()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let enable: libc::c_int = 1;
    // SAFETY: the descriptor is an open socket owned by `stream`, and `enable`
    // is a valid `c_int` for the length passed.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            (&enable as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn enable_keepalive(_stream: &TcpStream) -> std::io::Result<()> {
    debug!("SO_KEEPALIVE not configured on this platform");
    Ok(())
}
