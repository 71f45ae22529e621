//! SLIP-style framing for the device relay wire protocol.
//!
//! Every request and response travels as one frame: a delimiter byte on
//! each side, with delimiter and escape byte values inside the payload
//! replaced by two-byte escape sequences. The codec is purely functional
//! and keeps no state between calls, so it is safe to use from any
//! thread.

pub mod codec;

pub use codec::{decode, drain_frames, encode, split_into_packets};
pub use codec::{END, ESC, ESC_END, ESC_ESC};
