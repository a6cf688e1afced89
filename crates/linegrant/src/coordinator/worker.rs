use crate::{
    ClaimError, Error, LineStore,
    coordinator::{
        processor::{run_claim_cycle, run_ingest_cycle},
        request::CoordinatorRequest,
    },
};
use core::any::Any;
use core::panic::AssertUnwindSafe;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Worker task that owns the store and drains the coordinator queue.
///
/// Each request runs to completion before the next is received, which is the
/// only thing standing between concurrent callers and a double grant. A
/// failing cycle is logged and answered; the loop always moves on. That
/// includes a cycle that panics inside the store: the panic is caught, the
/// caller gets a failed-closed reply, and the next request is served.
///
/// The loop ends on [`CoordinatorRequest::Shutdown`] or once every handle has
/// been dropped.
pub(crate) async fn coordinator_loop<S: LineStore>(
    mut rx: mpsc::UnboundedReceiver<CoordinatorRequest>,
    store: S,
) {
    tracing::trace!("Coordinator worker started");
    let mut cycle: u64 = 0;

    while let Some(request) = rx.recv().await {
        cycle += 1;
        match request {
            CoordinatorRequest::Claim {
                candidates,
                limit,
                response,
            } => {
                let span = tracing::debug_span!(
                    "claim_cycle",
                    cycle,
                    candidates = candidates.len(),
                    limit
                );
                let caught = AssertUnwindSafe(run_claim_cycle(&store, &candidates, limit))
                    .catch_unwind()
                    .instrument(span)
                    .await;
                let result = match caught {
                    Ok(result) => result,
                    Err(panic) => Err(ClaimError::new(candidates, cycle_panicked(cycle, &*panic))),
                };

                match &result {
                    Ok(outcome) => tracing::debug!(
                        cycle,
                        claimed = outcome.claimed.len(),
                        rejected = outcome.rejected.len(),
                        "Claim cycle complete"
                    ),
                    Err(err) => tracing::warn!(
                        cycle,
                        rejected = err.rejected.len(),
                        "Claim cycle failed closed: {}",
                        err.source
                    ),
                }

                if response.send(result).is_err() {
                    tracing::debug!(cycle, "Claim caller went away; outcome stands");
                }
            }
            CoordinatorRequest::Ingest { lines, response } => {
                let span = tracing::debug_span!("ingest_cycle", cycle, lines = lines.len());
                let result = AssertUnwindSafe(run_ingest_cycle(&store, lines))
                    .catch_unwind()
                    .instrument(span)
                    .await
                    .unwrap_or_else(|panic| Err(cycle_panicked(cycle, &*panic)));

                match &result {
                    Ok(added) => tracing::debug!(cycle, added, "Ingest cycle complete"),
                    Err(err) => tracing::warn!(cycle, "Ingest cycle failed: {err}"),
                }

                if response.send(result).is_err() {
                    tracing::debug!(cycle, "Ingest caller went away; outcome stands");
                }
            }
            CoordinatorRequest::Shutdown { response } => {
                tracing::debug!("Coordinator worker received shutdown signal");
                if response.send(()).is_err() {
                    tracing::error!("Coordinator worker failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!(cycles = cycle, "Coordinator worker stopped");
}

fn cycle_panicked(cycle: u64, panic: &(dyn Any + Send)) -> Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    tracing::error!(cycle, "Coordinator cycle panicked: {message}");
    Error::CyclePanicked { message }
}
