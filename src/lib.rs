#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! exctl library — control service for Extron AV switchers.
//!
//! The building blocks:
//! - `config` — configuration loading
//! - `registry` — the in-memory device registry
//! - `driver` — serial communication with the hardware
//! - `routes` — REST API route handlers
//! - `state` — shared application state and the shutdown handle
//! - `client` — HTTP client for driving a remote server

pub mod client;
pub mod config;
pub mod driver;
pub mod registry;
pub mod routes;
pub mod state;

// Re-export key types at crate root for convenience.
pub use client::ControlClient;
pub use config::Config;
pub use driver::{DriverError, SerialDriver, SwitchDriver};
pub use registry::{Device, DeviceRegistry};
pub use state::{AppState, ShutdownHandle};
