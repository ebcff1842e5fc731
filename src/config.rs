//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `EXCTL_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `exctl.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:14000"
//! shutdown_grace_ms = 5000
//!
//! [driver]
//! vendor_id = "1ce2"
//! manufacturer = "Extron"
//! response_timeout_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:14000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// How long a stop request waits for in-flight calls before the process
    /// exits anyway, in milliseconds (default 5000).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Serial driver settings.
///
/// The SIS line parameters (115200 8N1) are fixed by the hardware and not
/// configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// USB vendor id to match during discovery, lowercase hex without
    /// prefix (default `1ce2`, Extron Electronics).
    #[serde(default = "default_vendor_id")]
    pub vendor_id: String,
    /// USB manufacturer string to match during discovery (default `Extron`).
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    /// How long to wait for a device reply, in milliseconds (default 1000).
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:14000".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    5000
}
fn default_vendor_id() -> String {
    "1ce2".to_string()
}
fn default_manufacturer() -> String {
    "Extron".to_string()
}
fn default_response_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            manufacturer: default_manufacturer(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `exctl.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("exctl.toml").exists() {
            let content =
                std::fs::read_to_string("exctl.toml").expect("Failed to read exctl.toml");
            toml::from_str(&content).expect("Failed to parse exctl.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                driver: DriverConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        if let Ok(listen) = std::env::var("EXCTL_LISTEN") {
            config.server.listen = listen;
        }

        config
    }
}
