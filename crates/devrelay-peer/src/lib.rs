//! Connection management for the device relay protocol.
//!
//! This is the layer callers live on. A [`Listener`] accepts device
//! connections and maps host unit numbers to them; a [`Connection`]
//! runs one link's receive task and frame table; the requestor
//! functions do blocking request/response exchanges; a [`DeviceLink`]
//! is the other end of the wire for emulated devices.

pub mod connection;
pub mod device;
pub mod error;
pub mod listener;
pub mod requestor;

pub use connection::{Connection, DeathNotice, DEFAULT_POLL_INTERVAL};
pub use device::DeviceLink;
pub use error::{RelayError, Result};
pub use listener::{Listener, ListenerConfig, DEFAULT_LISTEN_ADDR};
pub use requestor::{
    next_sequence, send_request, send_request_timeout, DEFAULT_RESPONSE_TIMEOUT,
};
