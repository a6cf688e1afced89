//! Shared state behind every HTTP handler.
//!
//! [`AppState`] owns the [`ClaimCoordinator`] handle, a read-only view of the
//! durable log for listings, and the bookkeeping used for graceful shutdown:
//! an in-flight claim counter and a "refuse new work" flag.

use crate::server::{config::ServerConfig, telemetry::adjust_claims_inflight};
use core::time::Duration;
use linegrant::{CachedLineStore, ClaimCoordinator, FileLineStore, LineStore};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{path::PathBuf, sync::Arc};
use tokio::time::{sleep, timeout};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Shared>,
}

struct Shared {
    coordinator: ClaimCoordinator,
    log: FileLineStore,
    aux_file: Option<PathBuf>,
    max_batch_lines: usize,
    inflight: AtomicUsize,
    shutting_down: AtomicBool,
}

impl AppState {
    pub fn new(
        coordinator: ClaimCoordinator,
        log: FileLineStore,
        aux_file: Option<PathBuf>,
        max_batch_lines: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                coordinator,
                log,
                aux_file,
                max_batch_lines,
                inflight: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Initializes the log named in `config` and spawns its coordinator.
    pub async fn from_config(config: &ServerConfig) -> linegrant::Result<Self> {
        let log = FileLineStore::new(&config.lines_file);
        log.ensure_initialized().await?;

        let coordinator = if config.cache_granted {
            ClaimCoordinator::spawn(CachedLineStore::new(log.clone()))
        } else {
            ClaimCoordinator::spawn(log.clone())
        };

        Ok(Self::new(
            coordinator,
            log,
            config.aux_file.clone(),
            config.max_batch_lines,
        ))
    }

    pub fn coordinator(&self) -> &ClaimCoordinator {
        &self.inner.coordinator
    }

    /// Read-only view of the log. Never written through.
    pub fn log(&self) -> &FileLineStore {
        &self.inner.log
    }

    pub fn aux_file(&self) -> Option<&PathBuf> {
        self.inner.aux_file.as_ref()
    }

    pub fn max_batch_lines(&self) -> usize {
        self.inner.max_batch_lines
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    /// Counts a request as in flight until the guard is dropped, including
    /// when the client disconnects and the handler future is dropped early.
    pub fn track(&self) -> InflightGuard {
        self.inner.inflight.fetch_add(1, Ordering::AcqRel);
        adjust_claims_inflight(1);
        InflightGuard {
            state: self.clone(),
        }
    }

    /// Stops the service in three phases: refuse new requests, wait up to
    /// `drain_timeout` for in-flight requests, then stop the coordinator once
    /// its queue is empty.
    pub async fn shutdown(&self, drain_timeout: Duration) -> linegrant::Result<()> {
        tracing::info!("Refusing new requests");
        self.inner.shutting_down.store(true, Ordering::Release);

        tracing::info!("Draining in-flight requests ({} active)", self.inflight());
        let drained = timeout(drain_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight requests drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} requests still active)",
                self.inflight()
            ),
        }

        // Anything still queued runs to completion before the worker stops.
        self.inner.coordinator.shutdown().await
    }
}

pub struct InflightGuard {
    state: AppState,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.state.inner.inflight.fetch_sub(1, Ordering::AcqRel);
        adjust_claims_inflight(-1);
    }
}
