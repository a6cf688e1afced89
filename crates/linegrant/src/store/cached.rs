use crate::{GrantedSet, Identifier, LineStore, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Memoizes the granted set of an inner [`LineStore`].
///
/// The first successful [`load`](LineStore::load) populates the cache and
/// every later load hands out the same shared snapshot. Each successful
/// append folds the written identifiers in; any failed call drops the cache
/// so the next load rebuilds it from the log.
///
/// The cache is taken out for the duration of an append and only put back
/// once the append succeeds, so an append that fails or unwinds leaves the
/// cache cold rather than stale.
///
/// Only appends made through this wrapper are observed. External writers to
/// the same log are not supported.
#[derive(Debug)]
pub struct CachedLineStore<S> {
    inner: S,
    granted: Mutex<Option<GrantedSet>>,
}

impl<S: LineStore> CachedLineStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            granted: Mutex::new(None),
        }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Forces the next [`load`](LineStore::load) to re-read the log.
    pub fn invalidate(&self) {
        *self.granted.lock() = None;
    }

    pub fn is_warm(&self) -> bool {
        self.granted.lock().is_some()
    }
}

impl<S: LineStore> LineStore for CachedLineStore<S> {
    async fn load(&self) -> Result<GrantedSet> {
        let cached = self.granted.lock().clone();
        if let Some(granted) = cached {
            return Ok(granted);
        }
        match self.inner.load().await {
            Ok(granted) => {
                *self.granted.lock() = Some(Arc::clone(&granted));
                Ok(granted)
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    async fn append_unique(&self, ids: &[Identifier]) -> Result<usize> {
        let taken = self.granted.lock().take();
        let written = self.inner.append_unique(ids).await?;
        if let Some(mut granted) = taken {
            // Clones only if a caller still holds an older snapshot.
            Arc::make_mut(&mut granted).extend(ids.iter().cloned());
            *self.granted.lock() = Some(granted);
        }
        Ok(written)
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.inner.ensure_initialized().await
    }

    async fn read_log(&self) -> Result<String> {
        self.inner.read_log().await
    }
}
