//! Fleetgate gateway: bootstrap token store, admission coordinator and the
//! gRPC surfaces in front of them.
//!
//! The binary in `main.rs` wires these together; integration tests and the
//! agent's end-to-end tests drive them in-process.

pub mod admission;
pub mod audit;
pub mod config;
pub mod convert;
pub mod db;
pub mod reaper;
pub mod server;
pub mod services;
pub mod shutdown;
pub mod store;
pub mod tls;
