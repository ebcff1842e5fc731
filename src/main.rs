#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # exctl
//!
//! Control service for Extron scalers/switchers.
//!
//! exctl exposes an HTTP API on port 14000 for routing inputs on
//! serial-attached Extron units, and a CLI that can drive either a remote
//! server or locally attached hardware directly.
//!
//! ## Subcommands
//!
//! - `exctl serve` (default) — run the HTTP server
//! - `exctl list` — list devices (local scan, or `--remote <url>`)
//! - `exctl select <INPUT>` — route an input (`--device` to pick the unit)
//! - `exctl rescan --remote <url>` — force a rescan on a server
//! - `exctl stop --remote <url>` — halt a server
//!
//! ## API surface
//!
//! | Method | Path           | Description                          |
//! |--------|----------------|--------------------------------------|
//! | GET    | `/api/health`  | Liveness probe                       |
//! | GET    | `/api/devices` | List known devices                   |
//! | POST   | `/api/select`  | Route an input on a named device     |
//! | POST   | `/api/rescan`  | Re-enumerate attached devices        |
//! | POST   | `/api/stop`    | Orderly shutdown                     |
//!
//! ## Architecture
//!
//! ```text
//! main.rs      — entry point, clap subcommands, router setup, graceful shutdown
//! config.rs    — TOML + env-var configuration
//! state.rs     — AppState, ShutdownHandle
//! registry.rs  — device registry (atomic full-replace on rescan)
//! driver.rs    — SIS serial protocol, sysfs USB discovery
//! client.rs    — HTTP client for the CLI's remote mode
//! routes/
//!   health.rs  — GET /api/health
//!   devices.rs — GET /api/devices, POST /api/select, POST /api/rescan
//!   stop.rs    — POST /api/stop
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use exctl::client::ControlClient;
use exctl::config::Config;
use exctl::driver::{SerialDriver, SwitchDriver};
use exctl::registry::{self, Device, DeviceRegistry};
use exctl::state::{AppState, ShutdownHandle};
use exctl::routes;

/// Control Extron scalers/switchers.
#[derive(Parser)]
#[command(name = "exctl", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// List available devices.
    List {
        /// Remote server to query instead of scanning locally.
        #[arg(short, long, value_name = "URL")]
        remote: Option<String>,
    },
    /// Select an input on a device.
    Select {
        /// Input port to route, e.g. `2` or `HDMI2`.
        input: String,
        /// Device to control. May be omitted locally when exactly one unit
        /// is attached; required with `--remote`.
        #[arg(short, long, value_name = "NAME")]
        device: Option<String>,
        /// Remote server to send the command to.
        #[arg(short, long, value_name = "URL", requires = "device")]
        remote: Option<String>,
    },
    /// Force a rescan on a server.
    Rescan {
        /// Remote server to connect to.
        #[arg(short, long, value_name = "URL")]
        remote: String,
    },
    /// Halt a server.
    Stop {
        /// Remote server to connect to.
        #[arg(short, long, value_name = "URL")]
        remote: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => {
            run_server(None).await;
            Ok(())
        }
        Some(Commands::Serve { config }) => {
            run_server(config.as_deref()).await;
            Ok(())
        }
        Some(Commands::List { remote }) => run_list(remote.as_deref()).await,
        Some(Commands::Select {
            input,
            device,
            remote,
        }) => run_select(&input, device.as_deref(), remote.as_deref()).await,
        Some(Commands::Rescan { remote }) => run_rescan(&remote).await,
        Some(Commands::Stop { remote }) => run_stop(&remote).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("exctl v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let driver: Arc<dyn SwitchDriver> = Arc::new(SerialDriver::new(config.driver.clone()));
    let registry = DeviceRegistry::new();
    registry::initial_scan(&registry, driver.clone()).await;

    let shutdown = ShutdownHandle::new();
    let grace = Duration::from_millis(config.server.shutdown_grace_ms);
    let listen = config.server.listen.clone();

    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
        registry,
        driver,
        shutdown: shutdown.clone(),
    };

    let app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/devices", get(routes::devices::list))
        .route("/api/select", post(routes::devices::select))
        .route("/api/rescan", post(routes::devices::rescan))
        .route("/api/stop", post(routes::stop::stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&listen).await.expect("Failed to bind");

    info!("Server ready");

    // SIGINT/SIGTERM funnel into the same shutdown handle as POST /api/stop.
    let signal_handle = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
        signal_handle.trigger();
    });

    let mut drain_rx = shutdown.subscribe();
    let mut grace_rx = shutdown.subscribe();

    let serve = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = drain_rx.changed().await;
                info!("Shutdown requested, draining in-flight calls");
            })
            .await
    };

    tokio::select! {
        result = serve => result.expect("Server error"),
        () = async {
            let _ = grace_rx.changed().await;
            tokio::time::sleep(grace).await;
        } => warn!("Grace period expired, abandoning in-flight calls"),
    }

    info!("Server halted");
}

/// Print a device table in `name path` columns.
fn print_devices(devices: &[Device]) {
    println!("{:<32}Device", "Name");
    for device in devices {
        println!("{:<32}{}", device.name, device.path);
    }
}

async fn run_list(remote: Option<&str>) -> Result<(), String> {
    let devices = match remote {
        Some(url) => ControlClient::new(url)
            .list_devices()
            .await
            .map_err(|e| e.to_string())?,
        None => local_driver().discover().map_err(|e| e.to_string())?,
    };
    print_devices(&devices);
    Ok(())
}

async fn run_select(
    input: &str,
    device: Option<&str>,
    remote: Option<&str>,
) -> Result<(), String> {
    if let Some(url) = remote {
        // clap enforces --device together with --remote
        let name = device.expect("--device is required with --remote");
        return ControlClient::new(url)
            .select_input(name, input)
            .await
            .map_err(|e| e.to_string());
    }

    let driver = local_driver();
    let devices = driver.discover().map_err(|e| e.to_string())?;
    let target = match device {
        Some(name) => devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| format!("Device {name} not found"))?,
        None => match devices.as_slice() {
            [single] => single,
            [] => return Err("No devices found".to_string()),
            _ => return Err("Multiple devices attached, use --device".to_string()),
        },
    };
    driver
        .switch_input(&target.path, input)
        .map_err(|e| e.to_string())
}

async fn run_rescan(remote: &str) -> Result<(), String> {
    let client = ControlClient::new(remote);
    client.rescan().await.map_err(|e| e.to_string())?;
    print_devices(&client.list_devices().await.map_err(|e| e.to_string())?);
    Ok(())
}

async fn run_stop(remote: &str) -> Result<(), String> {
    ControlClient::new(remote)
        .stop()
        .await
        .map_err(|e| e.to_string())
}

fn local_driver() -> SerialDriver {
    SerialDriver::new(Config::load(None).driver)
}
