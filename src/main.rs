//! Portgate - Serial-to-TCP Gateway
//!
//! Serves one serial device to many TCP clients with strict
//! request/response pairing: one read burst in, one serial response out,
//! delivered only to the client that asked.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use portgate_core::{DrainTiming, Gateway, GatewayConfig, SerialParity, SerialTransport};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Portgate CLI
#[derive(Parser, Debug)]
#[command(
    name = "portgate",
    author = "Portgate Team",
    version,
    about = "Serial-to-TCP gateway with per-request response correlation",
    long_about = None
)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway
    Run {
        /// Config file (TOML); command-line flags override its values
        #[arg(short, long, env = "PORTGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Parity (none, odd, even)
        #[arg(long)]
        parity: Option<String>,

        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// TCP port to listen on
        #[arg(long)]
        tcp_port: Option<u16>,

        /// Allowed client address; repeatable, enables the access list
        #[arg(long)]
        allow: Vec<String>,
    },

    /// List available serial ports
    ListPorts {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            port,
            baud,
            parity,
            host,
            tcp_port,
            allow,
        } => {
            run_gateway(config, port, baud, parity, host, tcp_port, allow).await?;
        }
        Commands::ListPorts { format, detailed } => {
            list_ports(format, detailed, cli.quiet)?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_gateway(
    config_path: Option<PathBuf>,
    port: Option<String>,
    baud: Option<u32>,
    parity: Option<String>,
    host: Option<String>,
    tcp_port: Option<u16>,
    allow: Vec<String>,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => GatewayConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    // Command-line overrides
    if let Some(port) = port {
        config.serial.port = port;
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = baud;
    }
    if let Some(parity) = parity {
        config.serial.parity = parity.parse().unwrap_or(SerialParity::None);
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(tcp_port) = tcp_port {
        config.server.port = tcp_port;
    }
    if !allow.is_empty() {
        config.acl.enabled = true;
        config.acl.allow.extend(allow);
    }

    tracing::info!("Starting Portgate v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Serial device: {}", config.serial.summary());

    let device = config
        .serial
        .open()
        .with_context(|| format!("opening serial port {}", config.serial.port))?;
    let transport = Arc::new(SerialTransport::start(device, DrainTiming::from(&config.serial)));

    let acl = config.acl.access_list()?;
    if acl.is_enabled() {
        tracing::info!("Access list enabled ({} entries)", config.acl.allow.len());
    }

    let gateway = Gateway::new(config.server.clone(), transport.clone(), acl);

    tokio::select! {
        result = gateway.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    let stats = gateway.stats();
    tracing::info!(
        "Served {} requests over {} connections ({} rejected)",
        stats.requests_forwarded,
        stats.connections_accepted,
        stats.connections_rejected
    );

    transport.shutdown();
    Ok(())
}

fn list_ports(format: OutputFormat, detailed: bool, quiet: bool) -> anyhow::Result<()> {
    let ports = portgate_core::list_ports()?;

    if ports.is_empty() {
        if !quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(())
}
