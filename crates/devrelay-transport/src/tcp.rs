use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::RelayStream;

/// TCP transport.
///
/// Provides bind/accept on the host side and connect on the peer side.
/// Accepted and outbound streams have Nagle's algorithm disabled; the
/// protocol exchanges small request/response frames.
pub struct TcpTransport {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a TCP address.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr,
            source: e,
        })?;
        let addr = listener.local_addr().map_err(TransportError::Io)?;
        info!(%addr, "listening on tcp");
        Ok(Self { listener, addr })
    }

    /// The address this transport is bound to. When bound to port 0 this
    /// is the resolved ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Switch the listening socket between blocking and polling accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Accept an incoming connection.
    ///
    /// With the listener in nonblocking mode this returns
    /// [`TransportError::Accept`] wrapping a `WouldBlock` error when no
    /// connection is pending; callers poll on that.
    pub fn accept(&self) -> Result<RelayStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        // Accepted sockets inherit nonblocking mode on some platforms.
        stream.set_nonblocking(false).map_err(TransportError::Accept)?;
        let _ = stream.set_nodelay(true);
        debug!(%peer, "accepted connection");
        Ok(RelayStream::from_tcp(stream))
    }

    /// Connect to a listening relay host (blocking).
    pub fn connect(addr: SocketAddr) -> Result<RelayStream> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            addr,
            source: e,
        })?;
        let _ = stream.set_nodelay(true);
        debug!(%addr, "connected");
        Ok(RelayStream::from_tcp(stream))
    }

    /// Connect with a bounded wait.
    pub fn connect_timeout(addr: SocketAddr, timeout: Duration) -> Result<RelayStream> {
        let stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| TransportError::Connect {
                addr,
                source: e,
            })?;
        let _ = stream.set_nodelay(true);
        debug!(%addr, "connected");
        Ok(RelayStream::from_tcp(stream))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
