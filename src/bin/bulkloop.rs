use std::{num::ParseIntError, process::ExitCode, time::Duration};

use bulkloop::{
    report::{LogReport, Outcome},
    sim::SimTransport,
    Error, LoopbackConfig, LoopbackSession, Pattern, Transport,
};
use clap::Parser;
use log::{error, info};

/// Stream data through a USB bulk OUT endpoint and check that it comes back
/// unmodified on a bulk IN endpoint.
#[derive(Debug, Parser)]
#[command(name = "bulkloop", version)]
struct Cli {
    /// Vendor id of the device, in hex
    #[arg(long, default_value = "0471", value_parser = parse_hex_u16)]
    vid: u16,

    /// Product id of the device, in hex
    #[arg(long, default_value = "3630", value_parser = parse_hex_u16)]
    pid: u16,

    /// Bus number; with --address, opens that device instead of searching by id
    #[arg(long, requires = "address")]
    bus: Option<u8>,

    /// Device address on the bus
    #[arg(long, requires = "bus")]
    address: Option<u8>,

    /// Interface to claim
    #[arg(long, default_value_t = 0)]
    interface: u8,

    /// Detach a kernel driver bound to the interface
    #[arg(long)]
    detach: bool,

    /// Bulk OUT endpoint address, in hex
    #[arg(long, default_value = "01", value_parser = parse_hex_u8)]
    out_ep: u8,

    /// Bulk IN endpoint address, in hex
    #[arg(long, default_value = "82", value_parser = parse_hex_u8)]
    in_ep: u8,

    /// Bytes per transfer; the endpoint max packet size
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,

    /// Total bytes to loop back
    #[arg(long, default_value_t = 1024 * 768 * 3)]
    total: usize,

    /// Per-transfer timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Data pattern: incrementing, zeros, ones, random or random:SEED
    #[arg(long, default_value = "incrementing")]
    pattern: Pattern,

    /// Clear halt on both endpoints before starting
    #[arg(long)]
    clear_halt: bool,

    /// Loop back through an in-process simulated device
    #[arg(long)]
    simulate: bool,

    /// With --simulate, corrupt the first byte of this IN chunk
    #[arg(long, requires = "simulate")]
    flip_chunk: Option<usize>,

    /// With --simulate, never echo this chunk so the IN transfer for it times out
    #[arg(long, requires = "simulate")]
    timeout_chunk: Option<usize>,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_hex_u16(s: &str) -> Result<u16, ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn parse_hex_u8(s: &str) -> Result<u8, ParseIntError> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
}

const EXIT_MISMATCH: u8 = 1;
const EXIT_TRANSFER: u8 = 2;
const EXIT_SETUP: u8 = 3;

impl Cli {
    fn config(&self) -> LoopbackConfig {
        LoopbackConfig {
            out_endpoint: self.out_ep,
            in_endpoint: self.in_ep,
            chunk_size: self.chunk_size,
            total_bytes: self.total,
            timeout: Duration::from_millis(self.timeout_ms),
            ..Default::default()
        }
    }

    fn simulator(&self) -> SimTransport {
        let mut sim = SimTransport::loopback();
        if let Some(chunk) = self.flip_chunk {
            sim = sim.flip_bit(chunk, 0, 0);
        }
        if let Some(chunk) = self.timeout_chunk {
            sim = sim.drop_echo(chunk);
        }
        sim
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_device(cli: &Cli) -> Result<bulkloop::UsbfsTransport, Error> {
    use bulkloop::UsbfsTransport;

    let mut transport = match (cli.bus, cli.address) {
        (Some(bus), Some(address)) => UsbfsTransport::open(bus, address)?,
        _ => UsbfsTransport::open_by_id(cli.vid, cli.pid)?,
    };
    transport.claim_interface(cli.interface, cli.detach)?;
    if cli.clear_halt {
        transport.clear_halt(cli.out_ep)?;
        transport.clear_halt(cli.in_ep)?;
    }
    Ok(transport)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_device(_cli: &Cli) -> Result<SimTransport, Error> {
    Err(Error::new(
        bulkloop::ErrorKind::Unsupported,
        "hardware access is only implemented for Linux usbfs; use --simulate",
    ))
}

fn run(config: LoopbackConfig, pattern: Pattern, transport: &mut impl Transport) -> ExitCode {
    let mut session = match LoopbackSession::with_pattern(config, pattern, LogReport) {
        Ok(s) => s,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(EXIT_SETUP);
        }
    };

    let summary = session.run(transport);
    println!("{summary}");

    match summary.outcome() {
        Outcome::Match => ExitCode::SUCCESS,
        Outcome::Mismatch => ExitCode::from(EXIT_MISMATCH),
        Outcome::TransferFailed | Outcome::Fatal => ExitCode::from(EXIT_TRANSFER),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let config = cli.config();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::from(EXIT_SETUP);
    }
    info!(
        "Looping back {} bytes as {} chunks of {}, pattern {}",
        config.total_bytes,
        config.total_bytes / config.chunk_size,
        config.chunk_size,
        cli.pattern
    );

    if cli.simulate {
        return run(config, cli.pattern, &mut cli.simulator());
    }

    match open_device(&cli) {
        Ok(mut transport) => run(config, cli.pattern, &mut transport),
        Err(e) => {
            error!("failed to open device: {e}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}
