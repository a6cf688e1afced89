//! Serialized claim processing.
//!
//! Every claim and ingest call becomes a [`request::CoordinatorRequest`] on an
//! unbounded FIFO channel. A single worker task owns the [`LineStore`] and runs
//! each request's read-decide-write cycle to completion before receiving the
//! next one, so no two cycles ever observe overlapping granted-set state.
//!
//! ## Structure
//!
//! - [`handle`] - [`ClaimCoordinator`], the cloneable caller-facing handle.
//! - [`worker`] - the worker loop draining the queue.
//! - [`processor`] - a single claim or ingest cycle.
//! - [`outcome`] - [`ClaimOutcome`], the granted/denied partition.
//!
//! [`LineStore`]: crate::LineStore

mod handle;
mod outcome;
mod processor;
mod request;
#[cfg(test)]
mod tests;
mod worker;

pub use handle::*;
pub use outcome::*;
