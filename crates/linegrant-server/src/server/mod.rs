//! Server-side components of the `linegrant` HTTP service.
//!
//! - [`config`] - CLI/env configuration.
//! - [`routes`] - axum router and handlers.
//! - [`state`] - shared handler state and graceful shutdown.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod config;
pub mod routes;
pub mod state;
pub mod telemetry;
