//! Line-oriented links to bench instruments and test fixtures.
//!
//! instrlink talks to devices that answer text commands with
//! terminator-delimited responses, over a serial line or a TCP socket.
//!
//! # Crate Structure
//!
//! - [`frame`]: terminator matching, read deadlines, and the framing read loop
//! - [`transport`]: serial and TCP transports, port discovery, configuration,
//!   and traffic sinks

/// Re-export framing types.
pub mod frame {
    pub use instrlink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use instrlink_transport::*;
}

pub use instrlink_transport::{
    Command, Frame, SerialTransport, TcpTransport, Terminator, Transport, TransportConfig,
    TransportError,
};
