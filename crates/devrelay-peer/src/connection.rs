use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use devrelay_transport::RelayStream;
use tracing::{debug, trace};

use crate::error::{RelayError, Result};

const READ_CHUNK_SIZE: usize = 4 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const CONNECT_POLL: Duration = Duration::from_millis(10);

/// How often the receive task wakes from a blocked read to re-check the
/// liveness flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Invoked by the receive task, as its last act, when the transport dies
/// underneath it. Not invoked on an explicit [`Connection::close`].
pub type DeathNotice = Box<dyn FnOnce() + Send + 'static>;

struct FrameTable {
    /// Received frames keyed by sequence number. A reused sequence
    /// number overwrites the older unclaimed frame.
    by_seq: HashMap<u8, Vec<u8>>,
    /// Arrival order of sequence numbers, for FIFO consumption on the
    /// device side. [`Connection::wait_for`] removes the marker of any
    /// frame it claims; a marker left without a frame is skipped as
    /// stale.
    arrivals: VecDeque<u8>,
}

struct Shared {
    connected: AtomicBool,
    frames: Mutex<FrameTable>,
    available: Condvar,
}

/// One live byte-stream link and its receive/demultiplex task.
///
/// The receive task is the sole reader of the transport: it accumulates
/// bytes, splits them into frames, and files each complete frame under
/// its sequence number. Callers block in [`wait_for`] (request side) or
/// [`take_next`] (device side) until the frame they need shows up.
/// Writes happen synchronously on the caller's thread via [`send`].
///
/// [`wait_for`]: Connection::wait_for
/// [`take_next`]: Connection::take_next
/// [`send`]: Connection::send
pub struct Connection {
    shared: Arc<Shared>,
    writer: Mutex<RelayStream>,
    reader: Mutex<Option<RelayStream>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    label: String,
}

impl Connection {
    /// Wrap a connected stream. The receive task is not started yet;
    /// call [`start_receive`](Connection::start_receive) next.
    pub fn open(stream: RelayStream) -> Result<Self> {
        Self::open_with_poll(stream, DEFAULT_POLL_INTERVAL)
    }

    /// Wrap a connected stream with an explicit receive poll interval.
    pub fn open_with_poll(stream: RelayStream, poll_interval: Duration) -> Result<Self> {
        let label = match stream.peer_addr() {
            Some(addr) => addr.to_string(),
            None => stream.transport_name().to_string(),
        };
        let writer = stream.try_clone()?;
        Ok(Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                frames: Mutex::new(FrameTable {
                    by_seq: HashMap::new(),
                    arrivals: VecDeque::new(),
                }),
                available: Condvar::new(),
            }),
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(stream)),
            receiver: Mutex::new(None),
            poll_interval,
            label,
        })
    }

    /// Launch the background receive task.
    ///
    /// The task flips the liveness flag true as its first act, then loops
    /// reading under a short poll timeout so the flag is rechecked. On a
    /// zero-length read or a non-timeout transport error it flips
    /// liveness false and exits, firing `death` only if the connection
    /// was still marked live when the transport failed. The EOF a local
    /// [`close`](Connection::close) provokes stays silent.
    pub fn start_receive(&self, death: Option<DeathNotice>) -> Result<()> {
        let mut reader = match self.reader.lock().unwrap().take() {
            Some(reader) => reader,
            None => return Err(RelayError::ReceiveAlreadyStarted),
        };
        reader.set_read_timeout(self.poll_interval)?;

        let shared = Arc::clone(&self.shared);
        let label = self.label.clone();
        let handle = std::thread::spawn(move || receive_loop(reader, shared, label, death));
        *self.receiver.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Block until the receive task reports the connection live.
    pub fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.is_connected() {
            if Instant::now() >= deadline {
                return Err(RelayError::ConnectTimeout(timeout));
            }
            std::thread::sleep(CONNECT_POLL);
        }
        Ok(())
    }

    /// Frame `payload` and write it out on the caller's thread.
    ///
    /// There is no send queue; the internal lock only keeps two frames
    /// from interleaving byte-wise. Callers wanting ordered
    /// request/response traffic serialize themselves, as the requestor
    /// does.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        let frame = devrelay_slip::encode(payload);
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(&frame).map_err(devrelay_transport::TransportError::Io)?;
        writer.flush().map_err(devrelay_transport::TransportError::Io)?;
        trace!(label = %self.label, len = payload.len(), "sent frame");
        Ok(())
    }

    /// Block until a frame tagged `seq` arrives, then claim it.
    ///
    /// Timing out is a recoverable failure; the connection stays usable.
    /// A waiter is not aborted early when the connection dies; it rides
    /// out its own deadline.
    pub fn wait_for(&self, seq: u8, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut table = self.shared.frames.lock().unwrap();
        loop {
            if let Some(frame) = table.by_seq.remove(&seq) {
                table.arrivals.retain(|s| *s != seq);
                return Ok(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RelayError::NoResponse { seq, timeout });
            }
            let (guard, _) = self.shared.available.wait_timeout(table, remaining).unwrap();
            table = guard;
        }
    }

    /// Block for the oldest unclaimed frame, in arrival order.
    ///
    /// This is the device-side entry point: a peer serving requests does
    /// not know sequence numbers in advance. Returns
    /// [`RelayError::NotConnected`] once the connection is dead and all
    /// pending frames are consumed.
    pub fn take_next(&self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut table = self.shared.frames.lock().unwrap();
        loop {
            while let Some(seq) = table.arrivals.pop_front() {
                if let Some(frame) = table.by_seq.remove(&seq) {
                    return Ok(frame);
                }
            }
            if !self.is_connected() {
                return Err(RelayError::NotConnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RelayError::NoRequest(timeout));
            }
            let (guard, _) = self.shared.available.wait_timeout(table, remaining).unwrap();
            table = guard;
        }
    }

    /// Mark the connection not live, release the transport, and join the
    /// receive task. Idempotent.
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.writer.lock().unwrap().shutdown();
        self.shared.available.notify_all();
        let handle = self.receiver.lock().unwrap().take();
        if let Some(handle) = handle {
            // The death notice path runs on the receive task; joining
            // from there would deadlock on ourselves.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Human-readable peer label for diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.label)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn receive_loop(
    mut reader: RelayStream,
    shared: Arc<Shared>,
    label: String,
    mut death: Option<DeathNotice>,
) {
    shared.connected.store(true, Ordering::SeqCst);
    debug!(peer = %label, "receive task started");

    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut died = false;

    while shared.connected.load(Ordering::SeqCst) {
        let read = match reader.read(&mut chunk) {
            Ok(0) => {
                debug!(peer = %label, "peer closed the transport");
                // An EOF provoked by a local close() is not a death.
                died = shared.connected.load(Ordering::SeqCst);
                break;
            }
            Ok(n) => n,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.kind() == ErrorKind::TimedOut
                    || err.kind() == ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(err) => {
                debug!(peer = %label, error = %err, "transport read failed");
                died = shared.connected.load(Ordering::SeqCst);
                break;
            }
        };

        buf.extend_from_slice(&chunk[..read]);
        let mut stored = false;
        for packet in devrelay_slip::drain_frames(&mut buf) {
            if packet.is_empty() {
                continue;
            }
            let seq = packet[0];
            trace!(peer = %label, seq, len = packet.len(), "received frame");
            let mut table = shared.frames.lock().unwrap();
            if table.by_seq.insert(seq, packet).is_none() {
                table.arrivals.push_back(seq);
            }
            stored = true;
        }
        if stored {
            shared.available.notify_all();
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.available.notify_all();
    if died {
        debug!(peer = %label, "receive task exiting after transport death");
        if let Some(notice) = death.take() {
            notice();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::mpsc;

    use devrelay_transport::TcpTransport;

    use super::*;

    /// A connected (local, remote-raw) pair over loopback TCP.
    fn stream_pair() -> (Connection, RelayStream) {
        let transport = TcpTransport::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
        let addr = transport.local_addr();
        let client = std::thread::spawn(move || TcpTransport::connect(addr).unwrap());
        let accepted = transport.accept().unwrap();
        let remote = client.join().unwrap();

        let conn = Connection::open_with_poll(accepted, Duration::from_millis(25)).unwrap();
        (conn, remote)
    }

    fn started_pair() -> (Connection, RelayStream) {
        let (conn, remote) = stream_pair();
        conn.start_receive(None).unwrap();
        conn.wait_connected(Duration::from_secs(5)).unwrap();
        (conn, remote)
    }

    #[test]
    fn test_wait_for_receives_tagged_frame() {
        let (conn, mut remote) = started_pair();

        remote
            .write_all(&devrelay_slip::encode(&[0x2A, 0x00, 0xDE, 0xAD]))
            .unwrap();

        let frame = conn.wait_for(0x2A, Duration::from_secs(5)).unwrap();
        assert_eq!(frame, vec![0x2A, 0x00, 0xDE, 0xAD]);
    }

    #[test]
    fn test_wait_for_times_out_after_about_one_second() {
        let (conn, _remote) = started_pair();

        let start = Instant::now();
        let err = conn.wait_for(7, Duration::from_secs(1)).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, RelayError::NoResponse { seq: 7, .. }));
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "returned too late: {elapsed:?}");
    }

    #[test]
    fn test_frame_split_across_writes_survives() {
        let (conn, mut remote) = started_pair();

        let frame = devrelay_slip::encode(&[9, 0, 1, 2, 3]);
        let (head, tail) = frame.split_at(2);
        remote.write_all(head).unwrap();
        remote.flush().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        remote.write_all(tail).unwrap();

        let got = conn.wait_for(9, Duration::from_secs(5)).unwrap();
        assert_eq!(got, vec![9, 0, 1, 2, 3]);
    }

    #[test]
    fn test_reused_sequence_overwrites_unclaimed_frame() {
        let (conn, mut remote) = started_pair();

        remote.write_all(&devrelay_slip::encode(&[5, 0, 1])).unwrap();
        remote.write_all(&devrelay_slip::encode(&[5, 0, 2])).unwrap();

        // Both frames carry seq 5; the later one wins.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let frame = conn.wait_for(5, Duration::from_secs(5)).unwrap();
            if frame == vec![5, 0, 2] {
                break;
            }
            assert_eq!(frame, vec![5, 0, 1]);
            assert!(Instant::now() < deadline, "second frame never arrived");
        }
    }

    #[test]
    fn test_take_next_returns_arrival_order() {
        let (conn, mut remote) = started_pair();

        let mut wire = devrelay_slip::encode(&[3, 1, 1]);
        wire.extend(devrelay_slip::encode(&[1, 1, 2]));
        wire.extend(devrelay_slip::encode(&[2, 1, 3]));
        remote.write_all(&wire).unwrap();

        let first = conn.take_next(Duration::from_secs(5)).unwrap();
        let second = conn.take_next(Duration::from_secs(5)).unwrap();
        let third = conn.take_next(Duration::from_secs(5)).unwrap();
        assert_eq!(first[0], 3);
        assert_eq!(second[0], 1);
        assert_eq!(third[0], 2);
    }

    #[test]
    fn test_take_next_times_out() {
        let (conn, _remote) = started_pair();
        let err = conn.take_next(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, RelayError::NoRequest(_)));
    }

    #[test]
    fn test_claimed_frames_leave_no_arrival_markers() {
        let (conn, mut remote) = started_pair();

        // A host-side connection consumes frames through wait_for only;
        // the arrival queue must not grow for the life of the link.
        for seq in 0..32u8 {
            remote.write_all(&devrelay_slip::encode(&[seq, 0])).unwrap();
            let frame = conn.wait_for(seq, Duration::from_secs(5)).unwrap();
            assert_eq!(frame[0], seq);
        }

        let table = conn.shared.frames.lock().unwrap();
        assert!(table.by_seq.is_empty());
        assert!(
            table.arrivals.is_empty(),
            "stale markers left behind: {:?}",
            table.arrivals
        );
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let (conn, mut remote) = started_pair();

        // Dangling escape span, then a good frame.
        let mut wire = vec![devrelay_slip::END, devrelay_slip::ESC, devrelay_slip::END];
        wire.extend(devrelay_slip::encode(&[8, 0]));
        remote.write_all(&wire).unwrap();

        let frame = conn.take_next(Duration::from_secs(5)).unwrap();
        assert_eq!(frame, vec![8, 0]);
    }

    #[test]
    fn test_send_frames_payload() {
        let (conn, mut remote) = started_pair();

        conn.send(&[0x11, 0xC0, 0x22]).unwrap();

        let mut collected = Vec::new();
        let mut chunk = [0u8; 64];
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let n = remote.read(&mut chunk).unwrap();
            collected.extend_from_slice(&chunk[..n]);
            let packets = devrelay_slip::split_into_packets(&collected);
            if !packets.is_empty() {
                assert_eq!(packets[0], vec![0x11, 0xC0, 0x22]);
                break;
            }
            assert!(Instant::now() < deadline, "frame never arrived");
        }
    }

    #[test]
    fn test_peer_close_marks_dead_and_fires_notice() {
        let (conn, remote) = stream_pair();
        let (tx, rx) = mpsc::channel();
        conn.start_receive(Some(Box::new(move || {
            let _ = tx.send(());
        })))
        .unwrap();
        conn.wait_connected(Duration::from_secs(5)).unwrap();

        drop(remote);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_close_is_clean_and_does_not_fire_notice() {
        let (conn, _remote) = stream_pair();
        let (tx, rx) = mpsc::channel();
        conn.start_receive(Some(Box::new(move || {
            let _ = tx.send(());
        })))
        .unwrap();
        conn.wait_connected(Duration::from_secs(5)).unwrap();
        // Let the receive task park in read() so the close wakes it
        // with an EOF rather than a loop-condition exit.
        std::thread::sleep(Duration::from_millis(50));

        conn.close();
        assert!(!conn.is_connected());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        let err = conn.send(&[1, 2]).unwrap_err();
        assert!(matches!(err, RelayError::NotConnected));
    }

    #[test]
    fn test_start_receive_twice_fails() {
        let (conn, _remote) = started_pair();
        assert!(matches!(
            conn.start_receive(None),
            Err(RelayError::ReceiveAlreadyStarted)
        ));
    }

    #[test]
    fn test_take_next_reports_dead_connection() {
        let (conn, remote) = started_pair();
        drop(remote);

        // Wait for the receive task to notice, then take_next must fail
        // fast instead of sleeping out its timeout.
        let deadline = Instant::now() + Duration::from_secs(5);
        while conn.is_connected() {
            assert!(Instant::now() < deadline, "death never noticed");
            std::thread::sleep(Duration::from_millis(10));
        }
        let err = conn.take_next(Duration::from_secs(30)).unwrap_err();
        assert!(matches!(err, RelayError::NotConnected));
    }
}
