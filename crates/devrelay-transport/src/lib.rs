//! Byte-stream transport abstraction for the device relay.
//!
//! Provides a unified interface over the two physical links a relay peer
//! can sit behind:
//! - TCP client/server sockets
//! - point-to-point serial (or virtual serial) ports
//!
//! This is the lowest layer of devrelay. Everything else builds on top of
//! the [`RelayStream`] type provided here.

pub mod error;
pub mod serial;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use serial::{open_serial, DEFAULT_BAUD};
pub use stream::RelayStream;
pub use tcp::TcpTransport;
