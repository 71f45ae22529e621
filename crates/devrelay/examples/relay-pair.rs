//! In-process relay pair: a listener on one side, a one-device chain on
//! the other, doing a block write/read roundtrip over loopback TCP.
//!
//! Run with:
//!   cargo run --example relay-pair

use std::time::{Duration, Instant};

use devrelay::peer::{
    next_sequence, send_request, DeviceLink, Listener, ListenerConfig, RelayError,
};
use devrelay::proto::{Operation, Request, Response, BLOCK_SIZE};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::with_config(
        ListenerConfig::default()
            .with_accept_poll(Duration::from_millis(25))
            .with_receive_poll(Duration::from_millis(25)),
    );
    let addr = listener.start("127.0.0.1:0".parse()?)?;
    eprintln!("relay host on {addr}");

    // One device holding a single block in memory.
    let device = std::thread::spawn(move || {
        let link = DeviceLink::connect(addr).expect("device connects");
        let mut block = [0u8; BLOCK_SIZE];
        loop {
            let request = match link.recv_request(Duration::from_millis(100)) {
                Ok(request) => request,
                Err(RelayError::NoRequest(_)) => continue,
                Err(_) => break,
            };
            let response = match &request.op {
                Operation::Init if request.unit == 1 => request.response_with(0, &[]),
                Operation::Init => Response::failure(request.seq, 5),
                Operation::ReadBlock { .. } => request.response_with(0, &block),
                Operation::WriteBlock { data, .. } => {
                    block.copy_from_slice(&data[..]);
                    request.response_with(0, &[])
                }
                _ => request.response_with(0, &[]),
            };
            if link.send_response(&response).is_err() {
                break;
            }
        }
    });

    // Wait for discovery to record the unit.
    let deadline = Instant::now() + Duration::from_secs(5);
    while listener.unit_count() == 0 {
        if Instant::now() >= deadline {
            return Err("discovery never completed".into());
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let (device_id, conn) = listener.find_connection(1).ok_or("unit 1 missing")?;
    eprintln!("unit 1 maps to device {device_id} on {}", conn.label());

    let mut payload = [0u8; BLOCK_SIZE];
    payload[..5].copy_from_slice(b"hello");
    let write = Request::write_block(next_sequence(), device_id, 0, payload);
    let response = send_request(&write, &conn)?;
    eprintln!("write status {}", response.status);

    let read = Request::read_block(next_sequence(), device_id, 0);
    let response = send_request(&read, &conn)?;
    eprintln!(
        "read back {:?} ({} bytes)",
        &response.body[..5],
        response.body.len()
    );

    listener.stop();
    device.join().expect("device thread exits");
    Ok(())
}
