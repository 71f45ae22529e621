use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};

pub mod emulate;
pub mod listen;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay host: accept device connections, discover units,
    /// and keep the unit map live.
    Listen(ListenArgs),
    /// Emulate a chain of devices against a relay host.
    Emulate(EmulateArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args),
        Command::Emulate(args) => emulate::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// TCP address to listen on.
    #[arg(long, default_value = devrelay_peer::DEFAULT_LISTEN_ADDR)]
    pub addr: String,
    /// Also adopt a serial port (e.g. /dev/ttyUSB0).
    #[arg(long, value_name = "PORT")]
    pub serial: Option<String>,
    /// Baud rate for the serial port.
    #[arg(long, default_value_t = devrelay_transport::DEFAULT_BAUD)]
    pub baud: u32,
    /// Per-response timeout during discovery and probing (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub response_timeout: String,
    /// Cap on host-visible unit numbers.
    #[arg(long, default_value_t = 254)]
    pub max_units: u8,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Relay host address to connect to.
    #[arg(default_value = "127.0.0.1:1985")]
    pub addr: String,
    /// Number of emulated devices behind this connection.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub units: u8,
    /// Capacity of each emulated block device, in 512-byte blocks.
    #[arg(long, default_value_t = 1440)]
    pub blocks: u32,
    /// Keep reconnecting when the host is unreachable or drops us.
    #[arg(long)]
    pub reconnect: bool,
}

pub(crate) fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("").is_err());
        assert!(parse_timeout("fast").is_err());
    }
}
