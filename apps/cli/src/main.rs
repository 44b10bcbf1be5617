use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hsmlink_core::{
    ConnectorConfig, DeviceSession, NusbDriver, StatusCode, TransportError, TransportProxy,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "HSM USB transport tool", long_about = None)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only use the device with this serial number
    #[arg(long)]
    serial: Option<String>,

    /// USB vendor ID (hex)
    #[arg(long, value_parser = parse_hex_u16)]
    vid: Option<u16>,

    /// USB product ID (hex)
    #[arg(long, value_parser = parse_hex_u16)]
    pid: Option<u16>,

    /// Reopens allowed per request
    #[arg(long)]
    max_reopens: Option<u32>,

    /// Per-transfer timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a raw request and print the response (hex in, hex out)
    Send { request: String },
    /// Open the device and report whether it was found
    Probe,
    /// Reset and reopen the device
    Reopen,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex ID '{}': {}", s, e))
}

fn parse_request(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).context("request must be hex")
}

fn load_config(args: &Args) -> Result<ConnectorConfig> {
    let mut config = match &args.config {
        Some(path) => ConnectorConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConnectorConfig::default(),
    };
    if let Some(serial) = &args.serial {
        config.serial = Some(serial.clone());
    }
    if let Some(vid) = args.vid {
        config.vendor_id = vid;
    }
    if let Some(pid) = args.pid {
        config.product_id = pid;
    }
    if let Some(max) = args.max_reopens {
        config.max_reopens = Some(max);
        config.unbounded_retries = false;
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = ms;
    }
    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let identity = config.identity();
    info!(device = %identity, policy = ?config.retry_policy(), "Starting hsmlink");

    let session = DeviceSession::new(NusbDriver::with_timeout(config.timeout()), identity);
    let proxy = TransportProxy::new(session, config.retry_policy());
    let cid = format!("cli-{}", std::process::id());

    match &args.command {
        Command::Send { request } => {
            let request = parse_request(request)?;
            let response = proxy.handle(&request, &cid)?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", hex::encode(response))?;
        }
        Command::Probe => {
            proxy.open(&cid)?;
            info!(device = %config.identity(), "Device ready");
        }
        Command::Reopen => {
            let why = TransportError::status(StatusCode::InvalidState, "operator requested reopen");
            proxy.reopen(&cid, &why)?;
            info!("Device reopened");
        }
    }

    proxy.close(&cid);
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u16() {
        assert_eq!(parse_hex_u16("0x1050"), Ok(0x1050));
        assert_eq!(parse_hex_u16("0030"), Ok(0x0030));
        assert!(parse_hex_u16("xyz").is_err());
        assert!(parse_hex_u16("10000").is_err());
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(parse_request("06 00 00").unwrap(), vec![0x06, 0x00, 0x00]);
        assert!(parse_request("0").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "hsmlink",
            "--serial",
            "0007550001",
            "--pid",
            "0x0031",
            "--max-reopens",
            "1",
            "probe",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.serial.as_deref(), Some("0007550001"));
        assert_eq!(config.product_id, 0x0031);
        assert_eq!(config.vendor_id, 0x1050);
        assert_eq!(config.max_reopens, Some(1));
    }
}
