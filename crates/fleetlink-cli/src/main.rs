//! Command-line interface for FleetLink.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetlink_core::config::env_vars;
use fleetlink_core::{ClientConfig, ExtensionEvent, ExtensionId, FleetConfig};
use fleetlink_devices::{Extension, FleetManager};

/// FleetLink - Keep track of LAN-attached extensions.
#[derive(Parser, Debug)]
#[command(name = "fleetlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Query the status of one extension and exit.
    Status {
        /// Host name of the extension.
        host: String,
        /// Port of the extension.
        port: u16,
        /// Numeric address to use if the host name does not resolve.
        #[arg(short, long)]
        address: Option<String>,
        /// Ask the extension to reload its peripherals.
        #[arg(long)]
        reload: bool,
    },
    /// Watch a fleet of extensions and print its events.
    Watch {
        /// Extensions as host:port.
        #[arg(required = true, value_parser = parse_extension_id)]
        extensions: Vec<ExtensionId>,
    },
    /// Discover extensions on the local network.
    #[cfg(feature = "discovery")]
    Discover {
        /// Add found extensions to a fleet and watch it.
        #[arg(long)]
        add: bool,
    },
}

fn parse_extension_id(s: &str) -> std::result::Result<ExtensionId, String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got '{}'", s))?;
    if host.is_empty() {
        return Err(format!("missing host in '{}'", s));
    }
    let port = port
        .parse()
        .map_err(|_| format!("invalid port in '{}'", s))?;
    Ok(ExtensionId::new(host, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Check if JSON logging is requested (for production/container environments)
    let json_logging = env_vars::parse(env_vars::LOG_JSON).unwrap_or(false);

    let default_directive = if args.verbose {
        "fleetlink=debug"
    } else {
        "fleetlink=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }

    match args.command {
        Command::Status {
            host,
            port,
            address,
            reload,
        } => run_status(host, port, address, reload).await,
        Command::Watch { extensions } => run_watch(extensions).await,
        #[cfg(feature = "discovery")]
        Command::Discover { add } => run_discover(add).await,
    }
}

async fn run_status(host: String, port: u16, address: Option<String>, reload: bool) -> Result<()> {
    let mut builder = Extension::builder(host, port).config(ClientConfig::from_env());
    if let Some(address) = address {
        builder = builder.address(address);
    }
    let extension = builder.build().context("Invalid extension")?;

    let refreshed = extension.update_status(reload).await;

    println!("Extension:      {}", extension.id());
    println!("Connection:     {}", extension.connection_status());
    if let Some(address) = extension.address() {
        println!("Address:        {}", address);
    }
    if !refreshed {
        println!("Status:         unavailable");
        return Ok(());
    }

    if let Some(version) = extension.version() {
        println!("Version:        {}", version);
    }
    println!("Printer:        {}", yes_no(extension.has_printer()));
    println!("Barcode reader: {}", yes_no(extension.has_barcode_scanner()));
    if let Some(status) = extension.status() {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    Ok(())
}

async fn run_watch(ids: Vec<ExtensionId>) -> Result<()> {
    let config = FleetConfig::from_env();
    let fleet = FleetManager::new(config.clone()).context("Invalid fleet configuration")?;
    let mut events = fleet.subscribe();

    for id in ids {
        tracing::debug!(extension = %id, "Adding extension to fleet");
        let extension = Extension::builder(id.hostname, id.port)
            .config(config.client.clone())
            .build()
            .context("Invalid extension")?;
        fleet.add_extension(Arc::new(extension));
    }

    println!("Watching {} extension(s), press Ctrl-C to stop", fleet.len());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some((event, _)) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

#[cfg(feature = "discovery")]
async fn run_discover(add: bool) -> Result<()> {
    use fleetlink_core::BrowserConfig;
    use fleetlink_devices::{ExtensionBrowser, MdnsDiscovery};

    let discovery = MdnsDiscovery::new().context("Failed to start mDNS")?;
    let browser = ExtensionBrowser::new(Arc::new(discovery), BrowserConfig::from_env())
        .context("Invalid browser configuration")?;
    let mut found = browser.event_bus().filter().discovery_events();

    let fleet_config = FleetConfig::from_env();
    let fleet = if add {
        Some(FleetManager::new(fleet_config.clone()).context("Invalid fleet configuration")?)
    } else {
        None
    };
    let mut fleet_events = fleet.as_ref().map(|fleet| fleet.subscribe());

    browser.start().context("Failed to start discovery")?;
    println!("Searching for extensions, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = found.recv() => {
                let Some((event, _)) = event else {
                    break;
                };
                print_event(&event);
                if let (Some(fleet), ExtensionEvent::ExtensionFound { host, port }) =
                    (&fleet, event)
                {
                    let extension = Extension::builder(host, port)
                        .config(fleet_config.client.clone())
                        .build()
                        .context("Invalid extension")?;
                    fleet.add_extension(Arc::new(extension));
                }
            }
            event = next_fleet_event(&mut fleet_events) => {
                if let Some((event, _)) = event {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    browser.stop();
    Ok(())
}

#[cfg(feature = "discovery")]
async fn next_fleet_event(
    events: &mut Option<fleetlink_core::EventBusReceiver>,
) -> Option<(ExtensionEvent, fleetlink_core::EventMetadata)> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn print_event(event: &ExtensionEvent) {
    match event {
        ExtensionEvent::FleetConnectionStatusChanged {
            old_status,
            new_status,
        } => println!("fleet: {} -> {}", old_status, new_status),
        ExtensionEvent::FleetCapabilityChanged {
            capability,
            available,
        } => println!(
            "fleet: {} {}",
            capability,
            if *available { "available" } else { "unavailable" }
        ),
        ExtensionEvent::FleetBarcodeScanned { extension, code } => {
            println!("{}: scanned {}", extension, code)
        }
        ExtensionEvent::ExtensionFound { host, port } => println!("found: {}:{}", host, port),
        other => println!("{:?}", other),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
