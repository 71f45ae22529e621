//! Accept loop, unit discovery, and the host-unit map.
//!
//! Each adopted physical connection is probed with Init requests at
//! peer-local device ids 1, 2, 3, … until the peer answers non-success,
//! which is the ordinary end-of-chain signal. Every responding device id
//! gets the smallest unused host-visible unit number, so callers address
//! units by one flat namespace regardless of which connection serves
//! them. When a connection dies its units vanish from the map; the
//! numbers become free for the next discovery.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use devrelay_proto::{Request, DEVICE_INFO_CODE};
use devrelay_transport::{RelayStream, TcpTransport, TransportError};
use tracing::{debug, info, trace, warn};

use crate::connection::{self, Connection};
use crate::error::{RelayError, Result};
use crate::requestor;

/// Default TCP listen address for a relay host.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1985";

/// Tunables for the listener and the connections it adopts.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Deadline for each discovery or probe response.
    pub response_timeout: Duration,
    /// How long an adopted connection may take to come live.
    pub connect_timeout: Duration,
    /// Cap on host-visible unit numbers across all connections.
    pub max_units: u8,
    /// Accept poll interval; bounds how quickly `stop` is observed.
    pub accept_poll: Duration,
    /// Receive poll interval handed to each adopted connection.
    pub receive_poll: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            response_timeout: requestor::DEFAULT_RESPONSE_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            max_units: 254,
            accept_poll: Duration::from_secs(2),
            receive_poll: connection::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ListenerConfig {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_units(mut self, max_units: u8) -> Self {
        self.max_units = max_units;
        self
    }

    pub fn with_accept_poll(mut self, interval: Duration) -> Self {
        self.accept_poll = interval;
        self
    }

    pub fn with_receive_poll(mut self, interval: Duration) -> Self {
        self.receive_poll = interval;
        self
    }
}

/// One discovered unit: which connection serves it and the device id it
/// answers to on that connection's wire.
#[derive(Clone)]
struct UnitEntry {
    device_id: u8,
    conn: Arc<Connection>,
}

#[derive(Default)]
struct ListenerState {
    units: BTreeMap<u8, UnitEntry>,
}

struct ListenerShared {
    listening: AtomicBool,
    state: Mutex<ListenerState>,
    config: ListenerConfig,
}

/// Accepts relay connections and maintains the unit map.
///
/// Host-visible unit numbers are the public handle: callers look one up
/// with [`find_connection`] and get back the peer-local device id plus
/// the [`Connection`] to issue requests on.
///
/// [`find_connection`]: Listener::find_connection
pub struct Listener {
    shared: Arc<ListenerShared>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub fn new() -> Self {
        Self::with_config(ListenerConfig::default())
    }

    pub fn with_config(config: ListenerConfig) -> Self {
        Self {
            shared: Arc::new(ListenerShared {
                listening: AtomicBool::new(false),
                state: Mutex::new(ListenerState::default()),
                config,
            }),
            accept_handle: Mutex::new(None),
        }
    }

    /// Bind `addr` and launch the accept loop. Returns the bound address,
    /// with an ephemeral port resolved.
    pub fn start(&self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            return Err(RelayError::ListenerAlreadyStarted);
        }
        let transport = match TcpTransport::bind(addr).and_then(|t| {
            t.set_nonblocking(true)?;
            Ok(t)
        }) {
            Ok(transport) => transport,
            Err(err) => {
                self.shared.listening.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        let local_addr = transport.local_addr();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || accept_loop(transport, shared));
        *self.accept_handle.lock().unwrap() = Some(handle);
        Ok(local_addr)
    }

    /// Adopt an already-connected stream: start its receive task, run
    /// unit discovery, and record what answered. Returns how many units
    /// the connection contributed; a connection contributing zero is
    /// closed on the spot.
    ///
    /// The accept loop feeds TCP streams through here; serial links can
    /// be adopted directly.
    pub fn adopt(&self, stream: RelayStream) -> Result<usize> {
        adopt_stream(&self.shared, stream)
    }

    /// Look up a host unit number. Returns the peer-local device id to
    /// put in requests and the connection to send them on.
    pub fn find_connection(&self, host_unit: u8) -> Option<(u8, Arc<Connection>)> {
        let state = self.shared.state.lock().unwrap();
        state
            .units
            .get(&host_unit)
            .map(|entry| (entry.device_id, Arc::clone(&entry.conn)))
    }

    /// All known units as (host unit, connection) pairs, in unit order.
    pub fn get_all_connections(&self) -> Vec<(u8, Arc<Connection>)> {
        let state = self.shared.state.lock().unwrap();
        state
            .units
            .iter()
            .map(|(unit, entry)| (*unit, Arc::clone(&entry.conn)))
            .collect()
    }

    /// Probe every known unit for its device information block and hand
    /// the descriptor bytes to `predicate`. Returns the host unit numbers
    /// of the first two matches, in unit order, stopping as soon as both
    /// are found. Units that fail to answer are skipped.
    pub fn first_two_units_matching<F>(&self, predicate: F) -> (Option<u8>, Option<u8>)
    where
        F: Fn(&[u8]) -> bool,
    {
        let snapshot: Vec<(u8, UnitEntry)> = {
            let state = self.shared.state.lock().unwrap();
            state
                .units
                .iter()
                .map(|(unit, entry)| (*unit, entry.clone()))
                .collect()
        };

        let mut first = None;
        for (host_unit, entry) in snapshot {
            let probe = Request::status(requestor::next_sequence(), entry.device_id, DEVICE_INFO_CODE);
            let response = match requestor::send_request_timeout(
                &probe,
                &entry.conn,
                self.shared.config.response_timeout,
            ) {
                Ok(response) => response,
                Err(err) => {
                    debug!(host_unit, error = %err, "device information probe failed");
                    continue;
                }
            };
            if !response.is_success() || !predicate(&response.body) {
                continue;
            }
            match first {
                None => first = Some(host_unit),
                Some(_) => return (first, Some(host_unit)),
            }
        }
        (first, None)
    }

    pub fn unit_count(&self) -> usize {
        self.shared.state.lock().unwrap().units.len()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Stop accepting, close every connection, and clear the unit map.
    /// Joining the accept loop can take up to one accept poll interval.
    /// Idempotent.
    pub fn stop(&self) {
        self.shared.listening.store(false, Ordering::SeqCst);
        let handle = self.accept_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let entries: Vec<UnitEntry> = {
            let mut state = self.shared.state.lock().unwrap();
            std::mem::take(&mut state.units).into_values().collect()
        };
        // A connection may serve several units; close each once.
        let mut closed: Vec<Arc<Connection>> = Vec::new();
        for entry in entries {
            if closed.iter().any(|conn| Arc::ptr_eq(conn, &entry.conn)) {
                continue;
            }
            entry.conn.close();
            closed.push(entry.conn);
        }
        debug!("listener stopped");
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(transport: TcpTransport, shared: Arc<ListenerShared>) {
    info!(addr = %transport.local_addr(), "accepting relay connections");
    while shared.listening.load(Ordering::SeqCst) {
        match transport.accept() {
            Ok(stream) => {
                if let Err(err) = adopt_stream(&shared, stream) {
                    debug!(error = %err, "failed to adopt connection");
                }
            }
            Err(TransportError::Accept(ref io)) if io.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(shared.config.accept_poll);
            }
            Err(err) => {
                debug!(error = %err, "accept failed");
                std::thread::sleep(shared.config.accept_poll);
            }
        }
    }
    debug!("accept loop exited");
}

fn adopt_stream(shared: &Arc<ListenerShared>, stream: RelayStream) -> Result<usize> {
    let conn = Arc::new(Connection::open_with_poll(
        stream,
        shared.config.receive_poll,
    )?);

    let shared_weak = Arc::downgrade(shared);
    let conn_weak = Arc::downgrade(&conn);
    conn.start_receive(Some(Box::new(move || {
        if let (Some(shared), Some(conn)) = (shared_weak.upgrade(), conn_weak.upgrade()) {
            purge_connection(&shared, &conn);
        }
    })))?;

    if let Err(err) = conn.wait_connected(shared.config.connect_timeout) {
        conn.close();
        return Err(err);
    }

    let discovered = discover_units(shared, &conn);
    if discovered == 0 {
        debug!(peer = %conn.label(), "no units discovered; dropping connection");
        conn.close();
    }
    Ok(discovered)
}

/// Probe device ids upward from 1 and record every unit that answers
/// Init with success. Probe failures and non-success statuses both end
/// the chain; only the former is worth a log line.
fn discover_units(shared: &ListenerShared, conn: &Arc<Connection>) -> usize {
    let mut discovered = 0;
    let mut device_id: u8 = 1;
    loop {
        {
            let state = shared.state.lock().unwrap();
            if state.units.len() >= shared.config.max_units as usize {
                warn!(cap = shared.config.max_units, "unit cap reached; discovery stopped");
                break;
            }
        }

        let probe = Request::init(requestor::next_sequence(), device_id);
        let response =
            match requestor::send_request_timeout(&probe, conn, shared.config.response_timeout) {
                Ok(response) => response,
                Err(err) => {
                    debug!(peer = %conn.label(), device_id, error = %err, "discovery probe failed");
                    break;
                }
            };
        if !response.is_success() {
            trace!(peer = %conn.label(), device_id, status = response.status, "end of device chain");
            break;
        }

        let mut state = shared.state.lock().unwrap();
        let host_unit = match (1..=shared.config.max_units).find(|unit| !state.units.contains_key(unit)) {
            Some(unit) => unit,
            None => break,
        };
        state.units.insert(
            host_unit,
            UnitEntry {
                device_id,
                conn: Arc::clone(conn),
            },
        );
        drop(state);

        info!(host_unit, device_id, peer = %conn.label(), "discovered unit");
        discovered += 1;
        device_id = match device_id.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }
    discovered
}

fn purge_connection(shared: &ListenerShared, dead: &Arc<Connection>) {
    let mut state = shared.state.lock().unwrap();
    let before = state.units.len();
    state.units.retain(|_, entry| !Arc::ptr_eq(&entry.conn, dead));
    let removed = before - state.units.len();
    drop(state);
    if removed > 0 {
        info!(removed, peer = %dead.label(), "connection died; removed its units");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> ListenerConfig {
        ListenerConfig::default()
            .with_response_timeout(Duration::from_millis(100))
            .with_accept_poll(Duration::from_millis(25))
            .with_receive_poll(Duration::from_millis(25))
    }

    #[test]
    fn start_binds_ephemeral_port_and_stop_joins() {
        let listener = Listener::with_config(quick_config());
        let addr = listener
            .start("127.0.0.1:0".parse().expect("loopback address"))
            .expect("listener should bind");

        assert!(listener.is_listening());
        assert_ne!(addr.port(), 0);

        listener.stop();
        assert!(!listener.is_listening());
        listener.stop();
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let listener = Listener::new();
        listener.stop();
        assert_eq!(listener.unit_count(), 0);
        assert!(!listener.is_listening());
    }

    #[test]
    fn adopt_of_silent_peer_yields_no_units() {
        let transport = TcpTransport::bind("127.0.0.1:0".parse().expect("loopback address"))
            .expect("transport should bind");
        let addr = transport.local_addr();
        let client = std::thread::spawn(move || TcpTransport::connect(addr));
        let accepted = transport.accept().expect("accept should succeed");
        let _silent = client.join().expect("client thread").expect("connect");

        let listener = Listener::with_config(quick_config());
        // The first discovery probe times out; the connection is dropped.
        let discovered = listener.adopt(accepted).expect("adopt should not error");
        assert_eq!(discovered, 0);
        assert_eq!(listener.unit_count(), 0);
    }
}
