//! MeshCore Proxy - share one companion radio with many TCP clients
//!
//! This binary connects to a MeshCore companion radio over serial or
//! Bluetooth LE and serves it on a TCP port:
//! - Every frame from the radio is broadcast to all connected clients
//! - Frames from any client are forwarded to the radio
//! - The radio link is re-established automatically after drops
//! - Optional decoded packet log on stdout (text or JSON)

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use meshcore_gateway::{
    transport, EventFormat, EventLogLevel, Gateway, GatewayConfig, GatewayConfigBuilder,
    DEFAULT_BAUD_RATE, DEFAULT_BLE_PIN, DEFAULT_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "meshcore-proxy", version)]
#[command(about = "TCP proxy for a MeshCore companion radio")]
#[command(group(ArgGroup::new("radio").required(true).args(["serial", "ble"])))]
#[command(group(ArgGroup::new("events").args(["quiet", "log_events", "log_events_verbose"])))]
struct Args {
    /// Serial port of the radio (e.g. /dev/ttyUSB0)
    #[arg(long, value_name = "PORT")]
    serial: Option<PathBuf>,

    /// BLE MAC address of the radio
    #[arg(long, value_name = "MAC")]
    ble: Option<String>,

    /// TCP bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// TCP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// BLE pairing PIN
    #[arg(long, default_value = DEFAULT_BLE_PIN)]
    ble_pin: String,

    /// Only log errors
    #[arg(long)]
    quiet: bool,

    /// Log a summary line for every packet
    #[arg(long)]
    log_events: bool,

    /// Log every packet with length and hex dump
    #[arg(long)]
    log_events_verbose: bool,

    /// Render packet events as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Diagnostic log level; `--quiet` wins over `--debug`
    fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else if self.debug {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    fn event_level(&self) -> EventLogLevel {
        if self.log_events_verbose {
            EventLogLevel::Verbose
        } else if self.log_events {
            EventLogLevel::Summary
        } else {
            EventLogLevel::Off
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        let mut builder = GatewayConfigBuilder::new()
            .host(self.host)
            .port(self.port)
            .event_log_level(self.event_level())
            .event_format(if self.json {
                EventFormat::Json
            } else {
                EventFormat::Text
            });

        builder = match (&self.serial, &self.ble) {
            (Some(port), _) => builder.serial_port_with_baud(port.clone(), self.baud),
            (None, Some(address)) => builder.ble_device(address.clone(), self.ble_pin.clone()),
            // clap enforces one of the two
            (None, None) => builder,
        };

        builder.build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Diagnostics go to stderr; stdout carries the packet event log
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.gateway_config();
    match serde_json::to_string(&config) {
        Ok(json) => debug!(config = %json, "Effective configuration"),
        Err(e) => debug!(error = %e, "Could not render configuration"),
    }

    let radio = transport::from_config(&config.interface)
        .context("Failed to create radio transport")?;
    let gateway = Gateway::bind(config, radio)
        .await
        .context("Failed to start TCP server")?;

    gateway
        .run(shutdown_signal())
        .await
        .context("Gateway stopped with an error")?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use meshcore_gateway::InterfaceConfig;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("meshcore-proxy").chain(args.iter().copied()))
    }

    #[test]
    fn test_serial_defaults() {
        let args = parse(&["--serial", "/dev/ttyUSB0"]).unwrap();
        let config = args.gateway_config();

        assert_eq!(
            config.interface,
            InterfaceConfig::Serial {
                port: PathBuf::from("/dev/ttyUSB0"),
                baud_rate: 115200,
            }
        );
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.events.level, EventLogLevel::Off);
        assert_eq!(config.events.format, EventFormat::Text);
        assert_eq!(args.log_level(), Level::INFO);
    }

    #[test]
    fn test_ble_with_options() {
        let args = parse(&[
            "--ble",
            "AA:BB:CC:DD:EE:FF",
            "--ble-pin",
            "000000",
            "--host",
            "127.0.0.1",
            "--port",
            "5050",
            "--log-events-verbose",
            "--json",
        ])
        .unwrap();
        let config = args.gateway_config();

        assert_eq!(
            config.interface,
            InterfaceConfig::Ble {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
                pin: "000000".to_string(),
            }
        );
        assert_eq!(config.server.port, 5050);
        assert!(config.server.host.is_loopback());
        assert_eq!(config.events.level, EventLogLevel::Verbose);
        assert_eq!(config.events.format, EventFormat::Json);
    }

    #[test]
    fn test_serial_baud() {
        let args = parse(&["--serial", "COM3", "--baud", "9600", "--log-events"]).unwrap();
        let config = args.gateway_config();

        assert_eq!(
            config.interface,
            InterfaceConfig::Serial {
                port: PathBuf::from("COM3"),
                baud_rate: 9600,
            }
        );
        assert_eq!(config.events.level, EventLogLevel::Summary);
    }

    #[test]
    fn test_radio_is_required() {
        let err = parse(&["--port", "5000"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_radio_flags_conflict() {
        let err = parse(&["--serial", "/dev/ttyUSB0", "--ble", "AA:BB:CC:DD:EE:FF"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_event_flags_conflict() {
        let err = parse(&["--serial", "/dev/ttyUSB0", "--quiet", "--log-events"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_log_levels() {
        let quiet = parse(&["--serial", "/dev/ttyUSB0", "--quiet"]).unwrap();
        assert_eq!(quiet.log_level(), Level::ERROR);
        assert_eq!(quiet.event_level(), EventLogLevel::Off);

        let debug = parse(&["--serial", "/dev/ttyUSB0", "--debug"]).unwrap();
        assert_eq!(debug.log_level(), Level::DEBUG);

        let both = parse(&["--serial", "/dev/ttyUSB0", "--debug", "--quiet"]).unwrap();
        assert_eq!(both.log_level(), Level::ERROR);
    }

    #[test]
    fn test_invalid_host_rejected() {
        let err = parse(&["--serial", "/dev/ttyUSB0", "--host", "not-an-ip"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_config_renders_as_json() {
        let args = parse(&["--serial", "/dev/ttyUSB0"]).unwrap();
        let json = serde_json::to_value(args.gateway_config()).unwrap();
        assert_eq!(json["interface"]["type"], "serial");
        assert_eq!(json["server"]["port"], 5000);
    }
}
