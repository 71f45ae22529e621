//! Typed request/response command model for the device relay protocol.
//!
//! Every exchange on the wire is one request and its paired response:
//! - Request: `[seq][command][unit]` plus command-specific fields
//! - Response: `[seq][status]` plus a success payload
//!
//! The command set is closed (eleven commands, codes 0 through 10), so
//! encode and decode live in one place and an unknown command byte is a
//! decode error, never a silently-passed-through frame.

pub mod command;
pub mod error;
pub mod info;
pub mod request;
pub mod response;

pub use command::CommandCode;
pub use error::{ProtoError, Result};
pub use info::{
    DeviceInfo, DEVICE_INFO_CODE, DEVICE_INFO_SIZE, FLAG_BLOCK_DEVICE, FLAG_ONLINE,
    FLAG_READ_ALLOWED, FLAG_WRITE_ALLOWED,
};
pub use request::{Operation, Request, BLOCK_SIZE, REQUEST_HEADER};
pub use response::Response;
