use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devrelay_peer::{Listener, ListenerConfig};
use devrelay_transport::open_serial;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_timeout, ListenArgs};
use crate::exit::{relay_error, transport_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: ListenArgs) -> CliResult<i32> {
    let addr: SocketAddr = args
        .addr
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid listen address: {}", args.addr)))?;
    let response_timeout = parse_timeout(&args.response_timeout)?;

    let config = ListenerConfig::default()
        .with_response_timeout(response_timeout)
        .with_max_units(args.max_units);
    let listener = Listener::with_config(config);
    let bound = listener
        .start(addr)
        .map_err(|err| relay_error("listen failed", err))?;
    info!(addr = %bound, "relay host ready");

    if let Some(port) = &args.serial {
        let stream = open_serial(port, args.baud)
            .map_err(|err| transport_error("serial open failed", err))?;
        let units = listener
            .adopt(stream)
            .map_err(|err| relay_error("serial adoption failed", err))?;
        info!(port = %port, units, "serial connection adopted");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut known = 0usize;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));
        let count = listener.unit_count();
        if count != known {
            info!(units = count, "unit map changed");
            known = count;
        }
    }

    info!("shutting down");
    listener.stop();
    Ok(SUCCESS)
}
