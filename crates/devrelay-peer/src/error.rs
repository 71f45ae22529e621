use std::time::Duration;

/// Errors that can occur in relay peer operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] devrelay_transport::TransportError),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Proto(#[from] devrelay_proto::ProtoError),

    /// No frame with the awaited sequence number arrived in time.
    #[error("no response for sequence {seq} after {timeout:?}")]
    NoResponse { seq: u8, timeout: Duration },

    /// No request arrived in time (device side).
    #[error("no request after {0:?}")]
    NoRequest(Duration),

    /// The connection is not (or no longer) live.
    #[error("connection closed")]
    NotConnected,

    /// The peer never came alive during connection setup.
    #[error("connect handshake timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// `start_receive` was called twice on one connection.
    #[error("receive task already started")]
    ReceiveAlreadyStarted,

    /// `start` was called twice on one listener.
    #[error("listener already started")]
    ListenerAlreadyStarted,
}

pub type Result<T> = std::result::Result<T, RelayError>;
