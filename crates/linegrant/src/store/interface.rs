use crate::{Identifier, Result};
use core::future::Future;
use std::collections::HashSet;
use std::sync::Arc;

/// Shared snapshot of every identifier granted so far.
///
/// Cloning is cheap; a store may hand the same snapshot to several loads.
pub type GrantedSet = Arc<HashSet<Identifier>>;

/// Persistence backend for the granted set.
///
/// The store is a single-writer resource: only the coordinator worker calls
/// [`append_unique`](LineStore::append_unique). Implementations may therefore
/// assume no other writer interleaves with an append, but every method must
/// still be safe to call from any task.
pub trait LineStore: Send + Sync + 'static {
    /// Reads every record, trims it, drops blanks, and returns the distinct
    /// identifiers. Must observe all appends that completed before the call.
    ///
    /// Callers should drop the snapshot before appending so a caching store
    /// can extend it in place.
    fn load(&self) -> impl Future<Output = Result<GrantedSet>> + Send;

    /// Appends each distinct identifier (first occurrence wins) as its own
    /// record and returns how many records were written.
    ///
    /// An empty input is a no-op returning `0`. A failed append must not
    /// leave a partially written record behind.
    fn append_unique(&self, ids: &[Identifier]) -> impl Future<Output = Result<usize>> + Send;

    /// Creates the backing location and an empty log if they do not exist.
    /// Idempotent and safe to race.
    fn ensure_initialized(&self) -> impl Future<Output = Result<()>> + Send;

    /// Raw log content, for read-only listings. May be momentarily stale
    /// relative to an in-flight append.
    fn read_log(&self) -> impl Future<Output = Result<String>> + Send;
}

/// Distinct identifiers in first-occurrence order.
pub(crate) fn dedup_stable(ids: &[Identifier]) -> Vec<&Identifier> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(id.as_str())).collect()
}
