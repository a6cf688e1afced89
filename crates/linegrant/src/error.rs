//! Error types for the claim service.
//!
//! ## Error Cases
//! - `Io`: The durable log could not be read or written.
//! - `ChannelError`: Internal communication with the coordinator worker failed.
//! - `ServiceShutdown`: A request arrived after the coordinator shut down.
//! - `CyclePanicked`: A store call panicked mid-cycle; the worker survived.
//!
//! Claim calls surface failures as [`ClaimError`], which also carries every
//! candidate of the failed call so the caller sees them all as rejected.

use crate::Identifier;
use std::sync::Arc;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the line store and claim coordinator.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The persistence medium failed. The whole cycle is failed closed.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Internal channel send/receive failure (closed worker or dropped reply).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The coordinator is shutting down or has shut down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// A cycle panicked. Nothing from it was acknowledged as granted.
    #[error("Claim cycle panicked: {message}")]
    CyclePanicked { message: String },
}

impl Error {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            context,
            source: Arc::new(source),
        }
    }

    /// Whether the error came from the persistence medium.
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// A failed claim call.
///
/// Nothing from a failed call was granted. `rejected` holds every filtered
/// candidate of the call in input order.
#[derive(Clone, thiserror::Error, Debug)]
#[error("claim failed, {} candidates rejected: {source}", .rejected.len())]
pub struct ClaimError {
    pub rejected: Vec<Identifier>,
    #[source]
    pub source: Error,
}

impl ClaimError {
    pub(crate) const fn new(rejected: Vec<Identifier>, source: Error) -> Self {
        Self { rejected, source }
    }
}
