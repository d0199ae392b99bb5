//! HTTP service wiring.
//!
//! ## Structure
//!
//! - [`config`] - CLI/environment configuration (`CliArgs`, `ServerConfig`).
//! - [`error`] - mapping of pool errors onto HTTP responses.
//! - [`service`] - axum router and handlers.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod error;
pub mod service;
pub mod telemetry;
