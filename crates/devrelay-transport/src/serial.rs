use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::RelayStream;

/// Default baud rate for relay serial links.
pub const DEFAULT_BAUD: u32 = 1_000_000;

/// Initial read timeout applied to a freshly opened port. The receive
/// loop replaces this with its own poll interval.
const OPEN_TIMEOUT: Duration = Duration::from_millis(500);

/// Open a serial (or virtual serial) port as a relay stream.
///
/// Point-to-point links carry exactly one peer, so unlike TCP there is
/// no listener side; both ends open their port and start talking.
pub fn open_serial(path: &str, baud: u32) -> Result<RelayStream> {
    let port = serialport::new(path, baud)
        .timeout(OPEN_TIMEOUT)
        .open()
        .map_err(|e| TransportError::OpenSerial {
            path: path.to_string(),
            source: e,
        })?;
    debug!(path, baud, "opened serial port");
    Ok(RelayStream::from_serial(port))
}
