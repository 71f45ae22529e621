//! Device-side endpoint: connect out to a relay host and serve requests.
//!
//! Mirrors the host side. The same receive task and frame table sit
//! under a [`DeviceLink`], but frames are consumed in arrival order with
//! [`recv_request`] instead of by sequence number, because a device does
//! not know what the host will send next.
//!
//! [`recv_request`]: DeviceLink::recv_request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devrelay_proto::{Request, Response};
use devrelay_transport::{RelayStream, TcpTransport};

use crate::connection::Connection;
use crate::error::Result;

const LINK_START_TIMEOUT: Duration = Duration::from_secs(5);

/// A device's side of one relay connection.
pub struct DeviceLink {
    conn: Arc<Connection>,
}

impl DeviceLink {
    /// Connect to a listening relay host.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        Self::over(TcpTransport::connect(addr)?)
    }

    /// Connect to a relay host with a bounded wait.
    pub fn connect_timeout(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        Self::over(TcpTransport::connect_timeout(addr, timeout)?)
    }

    /// Serve over an already-connected stream, for serial links and
    /// tests. Starts the receive task before returning.
    pub fn over(stream: RelayStream) -> Result<Self> {
        let conn = Arc::new(Connection::open(stream)?);
        conn.start_receive(None)?;
        conn.wait_connected(LINK_START_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Block for the next request from the host.
    pub fn recv_request(&self, timeout: Duration) -> Result<Request> {
        let frame = self.conn.take_next(timeout)?;
        Ok(Request::decode(&frame)?)
    }

    /// Send a response back to the host.
    pub fn send_response(&self, response: &Response) -> Result<()> {
        self.conn.send(&response.serialize())
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn close(&self) {
        self.conn.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use devrelay_proto::Operation;
    use devrelay_transport::TcpTransport;

    use super::*;
    use crate::error::RelayError;

    fn host_and_link() -> (RelayStream, DeviceLink) {
        let transport = TcpTransport::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
        let addr = transport.local_addr();
        let joiner = std::thread::spawn(move || DeviceLink::connect(addr).unwrap());
        let host = transport.accept().unwrap();
        (host, joiner.join().unwrap())
    }

    #[test]
    fn test_recv_request_and_respond() {
        let (mut host, link) = host_and_link();

        let request = Request::status(0x42, 3, 0);
        host.write_all(&devrelay_slip::encode(&request.serialize()))
            .unwrap();

        let received = link.recv_request(Duration::from_secs(5)).unwrap();
        assert_eq!(received.seq, 0x42);
        assert_eq!(received.unit, 3);
        assert!(matches!(received.op, Operation::Status { code: 0 }));

        link.send_response(&received.response_with(0, &[1, 2]))
            .unwrap();

        let mut collected = Vec::new();
        let mut chunk = [0u8; 64];
        let response = loop {
            let n = host.read(&mut chunk).unwrap();
            collected.extend_from_slice(&chunk[..n]);
            let packets = devrelay_slip::split_into_packets(&collected);
            if let Some(packet) = packets.into_iter().next() {
                break request.parse_response(&packet).unwrap();
            }
        };
        assert_eq!(response.seq, 0x42);
        assert_eq!(&response.body[..], &[1, 2]);
    }

    #[test]
    fn test_short_frame_is_a_decode_error() {
        let (mut host, link) = host_and_link();

        host.write_all(&devrelay_slip::encode(&[0x07])).unwrap();

        let err = link.recv_request(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, RelayError::Proto(_)));
    }
}
