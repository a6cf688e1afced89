//! Durable storage for the granted set.
//!
//! - [`LineStore`] - the contract the coordinator drives.
//! - [`FileLineStore`] - append-only text log, one identifier per record.
//! - [`CachedLineStore`] - keeps the decoded set in memory between cycles.

mod cached;
mod file;
mod interface;

pub use cached::*;
pub use file::*;
pub use interface::*;
