//! Runtime glue: configuration, tracing and health telemetry, the status
//! server, and the runner that owns the sync loop.

pub mod config;
pub mod env;
pub mod runner;
pub mod status;
pub mod telemetry;
