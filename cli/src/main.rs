// taurine-ble: desktop harness for the Bluetooth LE bridge
//
// Runs a BleHost over the local adapter and drives it through the same
// BluetoothLeClient a webview would use.

mod config;
mod desktop;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use std::sync::Arc;
use taurine_ble_core::{
    BleHost, BluetoothLeClient, BluetoothLeDevice, ConnectRequest, InitRequest, LocalEventBus,
    ScanFilter, ScanRequest,
};

#[derive(Parser)]
#[command(name = "taurine-ble")]
#[command(about = "Bluetooth LE bridge harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Scan duration in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Only report devices advertising this service (repeatable)
        #[arg(short, long = "service")]
        services: Vec<String>,
    },
    /// Scan for a device and connect to it
    Connect {
        address: String,
        /// Connect timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Connect to a device and list its GATT services
    Services { address: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Scan { timeout, services } => cmd_scan(timeout, services).await,
        Commands::Connect { address, timeout } => cmd_connect(address, timeout).await,
        Commands::Services { address } => cmd_services(address).await,
        Commands::Config { action } => cmd_config(action),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Host over the local adapter plus a client wired to it, already initialized.
async fn start_bridge() -> Result<BluetoothLeClient> {
    let config = config::Config::load()?;
    let bus = Arc::new(LocalEventBus::new());
    let radio = Arc::new(desktop::DesktopRadio::new(config.adapter_index));
    let host = Arc::new(BleHost::new(config.bridge.clone(), radio, bus.clone())?);
    let client = BluetoothLeClient::in_process(config.bridge, host, bus)?;

    client
        .init(InitRequest::default())
        .await
        .context("Failed to initialize Bluetooth LE")?;
    Ok(client)
}

fn print_device(device: &BluetoothLeDevice) {
    let name = device.name.as_deref().unwrap_or("(unnamed)");
    println!("  {} {}", device.address.bright_cyan(), name.bold());
    for uuid in &device.uuids {
        println!("      {}", uuid.dimmed());
    }
}

async fn cmd_scan(timeout: Option<u64>, services: Vec<String>) -> Result<()> {
    let client = start_bridge().await?;

    let mut request = ScanRequest::default();
    if let Some(timeout) = timeout {
        request = request.with_timeout(timeout);
    }
    if !services.is_empty() {
        request = request.with_filter(ScanFilter::new(services));
    }

    let duration = timeout.unwrap_or(client.config().default_scan_timeout_ms);
    println!("{} ({}ms)", "Scanning...".bold(), duration);

    let mut stream = client.scan(request).subscribe();
    let mut found = 0usize;
    while let Some(item) = stream.next().await {
        let device = item.context("Scan failed")?;
        print_device(&device);
        found += 1;
    }

    println!();
    println!("  {} {} device(s) found", "✓".green(), found);
    Ok(())
}

/// Scans until `address` shows up. Peripherals must be discovered before
/// the adapter can connect to them.
async fn discover(client: &BluetoothLeClient, address: &str) -> Result<BluetoothLeDevice> {
    let mut stream = client.scan(ScanRequest::default()).subscribe();

    while let Some(item) = stream.next().await {
        let device = item.context("Scan failed")?;
        if device.address.eq_ignore_ascii_case(address) {
            return Ok(device);
        }
    }
    anyhow::bail!("Device {} not found", address)
}

async fn cmd_connect(address: String, timeout: Option<u64>) -> Result<()> {
    let client = start_bridge().await?;

    println!("{} {}", "Looking for".bold(), address.bright_cyan());
    let device = discover(&client, &address).await?;
    print_device(&device);

    client
        .connect(ConnectRequest {
            address: device.address.clone(),
            timeout,
        })
        .await
        .with_context(|| format!("Failed to connect to {}", device.address))?;

    println!("  {} Connected", "✓".green());
    Ok(())
}

async fn cmd_services(address: String) -> Result<()> {
    let client = start_bridge().await?;

    let device = discover(&client, &address).await?;
    client
        .connect(ConnectRequest {
            address: device.address.clone(),
            timeout: None,
        })
        .await
        .with_context(|| format!("Failed to connect to {}", device.address))?;

    let services = client
        .get_services(&device.address)
        .await
        .context("Failed to read services")?;

    println!("{} {}", "Services of".bold(), device.address.bright_cyan());
    for service in services {
        let kind = if service.primary { "primary" } else { "secondary" };
        println!("  {} ({})", service.uuid.bright_yellow(), kind);
        for characteristic in service.characteristics {
            println!(
                "    {} props=0x{:02x}",
                characteristic.uuid, characteristic.properties
            );
            for descriptor in characteristic.descriptors {
                println!("      {}", descriptor.uuid.dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("  {} {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}
