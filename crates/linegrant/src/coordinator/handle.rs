use crate::{
    ClaimError, ClaimOutcome, Error, Identifier, LineStore, Result,
    coordinator::{request::CoordinatorRequest, worker::coordinator_loop},
    filter_candidates,
};
use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};

/// How long [`ClaimCoordinator::shutdown`] waits for the worker to drain the
/// queue and acknowledge.
pub const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Cloneable handle to the single serializing worker of a [`LineStore`].
///
/// Every clone feeds the same unbounded FIFO queue, so calls are executed in
/// the order they were admitted no matter which clone issued them.
///
/// The serialization is per process. Two coordinators (in one process or
/// several) over the same log give no uniqueness guarantee.
#[derive(Clone, Debug)]
pub struct ClaimCoordinator {
    tx: mpsc::UnboundedSender<CoordinatorRequest>,
    closed: Arc<AtomicBool>,
}

impl ClaimCoordinator {
    /// Moves `store` into a freshly spawned worker task and returns its handle.
    ///
    /// Must be called from within a Tokio runtime. The store should already
    /// be initialized (see [`LineStore::ensure_initialized`]).
    pub fn spawn<S: LineStore>(store: S) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinator_loop(rx, store));
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claims as many of `candidates` as possible, up to `limit` grants.
    ///
    /// Candidates are trimmed and blanks dropped before queuing. `limit`
    /// defaults to the filtered batch length.
    ///
    /// # Errors
    ///
    /// On any failure nothing from this call is granted and the returned
    /// [`ClaimError`] carries every filtered candidate as rejected. The same
    /// batch can be retried safely.
    pub async fn claim<I, S>(
        &self,
        candidates: I,
        limit: Option<usize>,
    ) -> Result<ClaimOutcome, ClaimError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.claim_identifiers(filter_candidates(candidates), limit)
            .await
    }

    /// Same as [`claim`](Self::claim) for candidates that are already
    /// filtered.
    pub async fn claim_identifiers(
        &self,
        candidates: Vec<Identifier>,
        limit: Option<usize>,
    ) -> Result<ClaimOutcome, ClaimError> {
        if self.is_closed() {
            return Err(ClaimError::new(candidates, Error::ServiceShutdown));
        }

        let (response, rx) = oneshot::channel();
        let request = CoordinatorRequest::Claim {
            // The worker consumes its own copy; ours answers failures that
            // happen before a reply comes back.
            candidates: candidates.clone(),
            limit,
            response,
        };

        if self.tx.send(request).is_err() {
            return Err(ClaimError::new(candidates, Error::ServiceShutdown));
        }

        match rx.await {
            Ok(result) => result,
            // The worker stopped with our request still queued.
            Err(_) => Err(ClaimError::new(candidates, Error::ServiceShutdown)),
        }
    }

    /// Bulk-loads identifiers known to be granted elsewhere.
    ///
    /// Blanks are dropped and identifiers already in the log are skipped.
    /// Returns how many records were written. Ingestion does not hand out
    /// grants: use [`claim`](Self::claim) when the caller needs to know it
    /// won an identifier.
    pub async fn ingest<I, S>(&self, lines: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ingest_identifiers(filter_candidates(lines)).await
    }

    /// Same as [`ingest`](Self::ingest) for already filtered identifiers.
    pub async fn ingest_identifiers(&self, lines: Vec<Identifier>) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ServiceShutdown);
        }
        if lines.is_empty() {
            return Ok(0);
        }

        let (response, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorRequest::Ingest { lines, response })
            .map_err(|_| Error::ServiceShutdown)?;

        rx.await.map_err(|_| Error::ServiceShutdown)?
    }

    /// Whether [`shutdown`](Self::shutdown) has been called on any clone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Stops the worker after every request queued so far has completed.
    ///
    /// Later calls on any clone fail with [`Error::ServiceShutdown`]. Waits up
    /// to [`SHUTDOWN_ACK_TIMEOUT`] for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the worker is already gone or does
    /// not acknowledge in time.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Coordinator shutdown already requested");
            return Ok(());
        }

        let (response, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorRequest::Shutdown { response })
            .map_err(|_| Error::ChannelError {
                context: "coordinator worker already stopped".to_string(),
            })?;

        match timeout(SHUTDOWN_ACK_TIMEOUT, rx).await {
            Ok(Ok(())) => {
                tracing::info!("Coordinator shutdown complete");
                Ok(())
            }
            Ok(Err(_)) => Err(Error::ChannelError {
                context: "coordinator worker dropped its shutdown acknowledgement".to_string(),
            }),
            Err(_) => {
                tracing::warn!("Coordinator shutdown timed out");
                Err(Error::ChannelError {
                    context: format!(
                        "coordinator worker did not acknowledge shutdown within {}s",
                        SHUTDOWN_ACK_TIMEOUT.as_secs()
                    ),
                })
            }
        }
    }
}
