use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected relay stream, readable and writable.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a TCP stream or an open serial port; everything above
/// this layer is transport-agnostic.
pub struct RelayStream {
    inner: RelayStreamInner,
}

enum RelayStreamInner {
    Tcp(TcpStream),
    Serial(Box<dyn serialport::SerialPort>),
}

impl Read for RelayStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            RelayStreamInner::Tcp(stream) => stream.read(buf),
            RelayStreamInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for RelayStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            RelayStreamInner::Tcp(stream) => stream.write(buf),
            RelayStreamInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            RelayStreamInner::Tcp(stream) => stream.flush(),
            RelayStreamInner::Serial(port) => port.flush(),
        }
    }
}

impl RelayStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: RelayStreamInner::Tcp(stream),
        }
    }

    pub(crate) fn from_serial(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: RelayStreamInner::Serial(port),
        }
    }

    /// Set the read timeout on the underlying stream.
    ///
    /// `timeout` must be nonzero. A timed-out read surfaces as an
    /// `io::Error` of kind `WouldBlock` or `TimedOut`, depending on the
    /// transport and platform; callers should treat both alike.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            RelayStreamInner::Tcp(stream) => {
                stream.set_read_timeout(Some(timeout)).map_err(Into::into)
            }
            RelayStreamInner::Serial(port) => port
                .set_timeout(timeout)
                .map_err(|e| std::io::Error::from(e).into()),
        }
    }

    /// Try to clone this stream (creates a second handle to the same
    /// transport, so one half can read while the other writes).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            RelayStreamInner::Tcp(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_tcp(cloned))
            }
            RelayStreamInner::Serial(port) => {
                let cloned = port.try_clone().map_err(std::io::Error::from)?;
                Ok(Self::from_serial(cloned))
            }
        }
    }

    /// Shut down the stream, unblocking any in-flight reads where the
    /// transport supports it. Serial ports have no shutdown; their reads
    /// already run under a poll timeout.
    pub fn shutdown(&self) {
        if let RelayStreamInner::Tcp(stream) = &self.inner {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    /// The remote address for TCP streams, `None` for serial.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            RelayStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            RelayStreamInner::Serial(_) => None,
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            RelayStreamInner::Tcp(_) => "tcp",
            RelayStreamInner::Serial(_) => "serial",
        }
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            RelayStreamInner::Tcp(stream) => f
                .debug_struct("RelayStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
            RelayStreamInner::Serial(_) => f
                .debug_struct("RelayStream")
                .field("type", &"serial")
                .finish(),
        }
    }
}
