//! Serial and TCP transports for line-oriented instruments.
//!
//! Both transports implement [`Transport`]: open/close a single OS handle,
//! write commands, and read terminator-delimited frames under an absolute
//! deadline. Outcomes are reported as [`TransportError`]; callers that still
//! expect the legacy sentinel strings can use [`TransportError::sentinel`].
//!
//! Traffic is reported to an injected [`EventSink`].

pub mod config;
pub mod discovery;
pub mod error;
mod link;
pub mod serial;
pub mod sink;
pub mod tcp;
pub mod traits;

pub use config::{SerialSettings, TcpSettings, TransportConfig};
pub use discovery::{list_ports, PortInfo, PortLocator, SystemPortLocator};
pub use error::{
    Result, TransportError, TransportKind, SERIAL_DISCONNECT_SENTINEL, TCP_DISCONNECT_SENTINEL,
    TIMEOUT_SENTINEL,
};
pub use serial::{SerialConfig, SerialTransport};
pub use sink::{EventSink, MemorySink, NoopSink, SharedSink, TracingSink, TrafficEvent};
pub use tcp::{TcpConfig, TcpTransport};
pub use traits::Transport;

pub use instrlink_frame::{Command, Frame, FrameKind, Terminator};
