//! Terminator-delimited response framing for instrument links.
//!
//! Instruments answer commands with byte frames that end in a configured
//! terminator (`"\n"`, `"\r\n"`, a prompt character, ...). This crate turns a
//! raw byte stream into those frames:
//! - [`ends_with_terminator`] decides frame completion by suffix comparison
//! - [`Deadline`] fixes the read budget once at call entry
//! - [`FrameReader`] accumulates bytes until a terminator, a size cap, or the
//!   deadline
//! - [`CommandWriter`] writes whole commands
//!
//! Nothing here knows about serial lines or sockets; any `Read`/`Write` whose
//! reads return promptly when idle will do.

pub mod codec;
pub mod deadline;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    ends_with_terminator, escape, unescape, Frame, FrameConfig, FrameKind, Terminator,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_COMMAND,
};
pub use deadline::Deadline;
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::{Command, CommandWriter};
