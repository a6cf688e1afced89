use crate::{ClaimError, ClaimOutcome, Identifier, Result};
use tokio::sync::oneshot;

/// A message sent from a [`ClaimCoordinator`](crate::ClaimCoordinator) handle
/// to its worker task.
///
/// Messages are processed strictly in the order they were enqueued. The
/// worker answers on the enclosed one-shot channel; if the caller has gone
/// away the answer is dropped but the cycle's effects stand.
#[derive(Debug)]
pub(crate) enum CoordinatorRequest {
    /// Run one claim cycle over already filtered candidates.
    Claim {
        candidates: Vec<Identifier>,
        limit: Option<usize>,
        response: oneshot::Sender<Result<ClaimOutcome, ClaimError>>,
    },

    /// Append identifiers not yet in the log, bypassing grant decisions.
    Ingest {
        lines: Vec<Identifier>,
        response: oneshot::Sender<Result<usize>>,
    },

    /// Stop the worker once every earlier message has been handled.
    Shutdown { response: oneshot::Sender<()> },
}
