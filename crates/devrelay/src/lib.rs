//! Network relay for block and character devices.
//!
//! devrelay runs a small request/response protocol over plain TCP or
//! serial links. A host process listens for device connections,
//! discovers how many devices answer behind each one, and gives callers
//! a flat unit namespace to issue block and character commands against.
//! The other end of the wire is typically a hardware bridge or the
//! bundled emulator.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and serial byte streams with one common stream type
//! - [`slip`]: frame delimiting and escaping for the wire
//! - [`proto`]: request/response wire model and device descriptors
//! - [`peer`]: connections, discovery, the listener, the device endpoint

/// Re-export transport types.
pub mod transport {
    pub use devrelay_transport::*;
}

/// Re-export framing types.
pub mod slip {
    pub use devrelay_slip::*;
}

/// Re-export protocol types.
pub mod proto {
    pub use devrelay_proto::*;
}

/// Re-export connection management types.
pub mod peer {
    pub use devrelay_peer::*;
}
