//! ips-relay - an alert enrichment relay
//!
//! Receives pipe-delimited intrusion-detection alerts over HTTP, enriches
//! both endpoints with ownership and geolocation data, appends the result to
//! a JSON-lines file and forwards it to syslog collectors.

pub mod app;
pub mod backfill;
pub mod cli;
pub mod config;
pub mod core;
pub mod enrichment;
pub mod extract;
pub mod formatting;
pub mod geo;
pub mod internal_metrics;
pub mod lookup_server;
pub mod normalizer;
pub mod outputs;
pub mod server;
pub mod task_manager;

// Re-export core types for convenience
pub use core::*;
