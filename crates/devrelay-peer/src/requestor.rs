//! Blocking request/response exchange over a [`Connection`].
//!
//! Sequence numbers come from one process-wide counter so that every
//! in-flight request in the process carries a distinct tag (until the
//! u8 space wraps). The response to a request is whatever frame comes
//! back bearing the same sequence number.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use devrelay_proto::{Request, Response};
use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;

/// How long a requestor waits for the matching response by default.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_SEQUENCE: AtomicU8 = AtomicU8::new(0);

/// Draw the next request sequence number. Wraps modulo 256.
pub fn next_sequence() -> u8 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Send `request` and block until its response arrives or the default
/// timeout passes.
pub fn send_request(request: &Request, conn: &Connection) -> Result<Response> {
    send_request_timeout(request, conn, DEFAULT_RESPONSE_TIMEOUT)
}

/// Send `request` and block until its response arrives or `timeout`
/// passes. A timeout leaves the connection usable for further requests.
pub fn send_request_timeout(
    request: &Request,
    conn: &Connection,
    timeout: Duration,
) -> Result<Response> {
    trace!(seq = request.seq, command = %request.command(), unit = request.unit, "sending request");
    conn.send(&request.serialize())?;
    let frame = conn.wait_for(request.seq, timeout)?;
    let response = request.parse_response(&frame)?;
    trace!(seq = response.seq, status = response.status, "response received");
    Ok(response)
}
