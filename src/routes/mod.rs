//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. The four control
//! operations live in [`devices`] and [`stop`]; [`health`] is the liveness
//! probe.

pub mod devices;
pub mod health;
pub mod stop;
