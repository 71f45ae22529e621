use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use devrelay_peer::{DeviceLink, RelayError};
use devrelay_proto::{
    DeviceInfo, Operation, Request, Response, BLOCK_SIZE, DEVICE_INFO_CODE, FLAG_BLOCK_DEVICE,
    FLAG_ONLINE, FLAG_READ_ALLOWED, FLAG_WRITE_ALLOWED,
};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, EmulateArgs};
use crate::exit::{relay_error, CliError, CliResult, SUCCESS, USAGE};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const RECV_POLL: Duration = Duration::from_millis(250);

/// Status reported for requests addressed past the end of the chain.
/// During discovery this is what ends enumeration.
const STATUS_NO_UNIT: u8 = 5;
/// Status for requests a unit cannot honor, like out-of-range blocks.
const STATUS_BAD_REQUEST: u8 = 1;

/// One emulated block device: a sparse in-memory block store plus the
/// descriptor it reports. Unwritten blocks read back zeroed.
struct EmulatedUnit {
    info: DeviceInfo,
    store: HashMap<u32, Box<[u8; BLOCK_SIZE]>>,
}

impl EmulatedUnit {
    fn new(device_id: u8, blocks: u32) -> Self {
        Self {
            info: DeviceInfo {
                flags: FLAG_BLOCK_DEVICE | FLAG_READ_ALLOWED | FLAG_WRITE_ALLOWED | FLAG_ONLINE,
                block_count: blocks,
                name: format!("EMU{device_id:02}"),
                device_type: 1,
                device_subtype: 0,
                firmware_version: 0x0100,
            },
            store: HashMap::new(),
        }
    }

    fn handle(&mut self, request: &Request) -> Response {
        match &request.op {
            Operation::Status { code } if *code == DEVICE_INFO_CODE => {
                request.response_with(0, &self.info.encode())
            }
            Operation::Status { .. } => request.response_with(0, &[0, 0]),
            Operation::ReadBlock { block } => {
                if *block >= self.info.block_count {
                    return Response::failure(request.seq, STATUS_BAD_REQUEST);
                }
                match self.store.get(block) {
                    Some(data) => request.response_with(0, &data[..]),
                    None => request.response_with(0, &[0u8; BLOCK_SIZE]),
                }
            }
            Operation::WriteBlock { block, data } => {
                if *block >= self.info.block_count {
                    return Response::failure(request.seq, STATUS_BAD_REQUEST);
                }
                self.store.insert(*block, data.clone());
                request.response_with(0, &[])
            }
            Operation::Format => {
                self.store.clear();
                request.response_with(0, &[])
            }
            Operation::Read { length, .. } => request.response_with(0, &vec![0u8; *length as usize]),
            Operation::Control { .. }
            | Operation::Init
            | Operation::Open
            | Operation::Close
            | Operation::Write { .. }
            | Operation::Reset => request.response_with(0, &[]),
        }
    }
}

pub fn run(args: EmulateArgs) -> CliResult<i32> {
    let addr: SocketAddr = args
        .addr
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid host address: {}", args.addr)))?;
    if args.units == 0 {
        return Err(CliError::new(USAGE, "at least one unit is required"));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut units: Vec<EmulatedUnit> = (1..=args.units)
        .map(|device_id| EmulatedUnit::new(device_id, args.blocks))
        .collect();

    while running.load(Ordering::SeqCst) {
        let link = match DeviceLink::connect(addr) {
            Ok(link) => link,
            Err(err) => {
                if !args.reconnect {
                    return Err(relay_error("connect failed", err));
                }
                warn!(error = %err, "host unreachable; retrying");
                sleep_while_running(&running, RECONNECT_DELAY);
                continue;
            }
        };
        info!(%addr, units = args.units, blocks = args.blocks, "serving emulated devices");

        serve(&link, &mut units, &running);
        link.close();

        if !args.reconnect {
            break;
        }
        if running.load(Ordering::SeqCst) {
            info!("connection lost; reconnecting");
            sleep_while_running(&running, RECONNECT_DELAY);
        }
    }
    Ok(SUCCESS)
}

/// Answer requests until the link drops or shutdown is requested.
/// Device ids map to chain positions; anything past the end reports
/// no-unit, which is how the host learns the chain length.
fn serve(link: &DeviceLink, units: &mut [EmulatedUnit], running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let request = match link.recv_request(RECV_POLL) {
            Ok(request) => request,
            Err(RelayError::NoRequest(_)) => continue,
            Err(RelayError::Proto(err)) => {
                debug!(error = %err, "ignoring malformed request");
                continue;
            }
            Err(_) => return,
        };

        let index = request.unit as usize;
        let response = if index >= 1 && index <= units.len() {
            units[index - 1].handle(&request)
        } else {
            Response::failure(request.seq, STATUS_NO_UNIT)
        };
        if link.send_response(&response).is_err() {
            return;
        }
    }
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
}
