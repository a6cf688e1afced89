use crate::{ClaimError, ClaimOutcome, Identifier, LineStore, Result};
use std::collections::HashSet;

/// Splits `candidates` into granted and denied against the `granted`
/// snapshot.
///
/// Candidates are considered in order. Once `limit` grants have been handed
/// out the rest are denied without being recorded, so they stay claimable.
/// Grants made in this pass are tracked beside the snapshot, which is what
/// denies a repeat later in the same batch.
pub(crate) fn partition(
    granted: &HashSet<Identifier>,
    candidates: &[Identifier],
    limit: Option<usize>,
) -> ClaimOutcome {
    let limit = limit.unwrap_or(candidates.len());
    let mut outcome = ClaimOutcome {
        claimed: Vec::with_capacity(limit.min(candidates.len())),
        rejected: Vec::new(),
    };
    let mut this_pass: HashSet<&Identifier> = HashSet::new();

    for candidate in candidates {
        if outcome.claimed.len() < limit
            && !granted.contains(candidate)
            && this_pass.insert(candidate)
        {
            outcome.claimed.push(candidate.clone());
        } else {
            outcome.rejected.push(candidate.clone());
        }
    }

    outcome
}

/// Runs one claim cycle: snapshot, decide, persist.
///
/// Any store failure fails the whole cycle closed. The returned
/// [`ClaimError`] rejects every candidate and nothing is granted.
pub(crate) async fn run_claim_cycle<S: LineStore>(
    store: &S,
    candidates: &[Identifier],
    limit: Option<usize>,
) -> Result<ClaimOutcome, ClaimError> {
    let granted = store
        .load()
        .await
        .map_err(|e| ClaimError::new(candidates.to_vec(), e))?;

    let outcome = partition(&granted, candidates, limit);
    drop(granted);

    if !outcome.claimed.is_empty() {
        store
            .append_unique(&outcome.claimed)
            .await
            .map_err(|e| ClaimError::new(candidates.to_vec(), e))?;
    }

    Ok(outcome)
}

/// Runs one ingest cycle and returns how many identifiers were new.
pub(crate) async fn run_ingest_cycle<S: LineStore>(
    store: &S,
    lines: Vec<Identifier>,
) -> Result<usize> {
    let fresh: Vec<Identifier> = {
        let granted = store.load().await?;
        lines
            .into_iter()
            .filter(|line| !granted.contains(line))
            .collect()
    };
    store.append_unique(&fresh).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<Identifier> {
        raw.iter().map(|s| Identifier::parse(s).unwrap()).collect()
    }

    fn strs(ids: &[Identifier]) -> Vec<&str> {
        ids.iter().map(Identifier::as_str).collect()
    }

    #[test]
    fn repeat_within_batch_is_denied() {
        let outcome = partition(&HashSet::new(), &ids(&["a", "b", "a"]), None);
        assert_eq!(strs(&outcome.claimed), ["a", "b"]);
        assert_eq!(strs(&outcome.rejected), ["a"]);
    }

    #[test]
    fn already_granted_is_denied() {
        let granted: HashSet<_> = ids(&["a"]).into_iter().collect();
        let outcome = partition(&granted, &ids(&["a", "c"]), None);
        assert_eq!(strs(&outcome.claimed), ["c"]);
        assert_eq!(strs(&outcome.rejected), ["a"]);
    }

    #[test]
    fn limit_grants_earliest_novel_candidates() {
        let granted: HashSet<_> = ids(&["b"]).into_iter().collect();
        let outcome = partition(&granted, &ids(&["b", "x", "y", "z"]), Some(2));
        assert_eq!(strs(&outcome.claimed), ["x", "y"]);
        assert_eq!(strs(&outcome.rejected), ["b", "z"]);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let outcome = partition(&HashSet::new(), &ids(&["x", "y"]), Some(0));
        assert!(outcome.claimed.is_empty());
        assert_eq!(strs(&outcome.rejected), ["x", "y"]);
    }

    #[test]
    fn limit_above_batch_is_harmless() {
        let outcome = partition(&HashSet::new(), &ids(&["x"]), Some(10));
        assert_eq!(strs(&outcome.claimed), ["x"]);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn every_candidate_lands_in_one_partition() {
        let candidates = ids(&["a", "b", "a", "c", "b", "d", "e"]);
        let granted: HashSet<_> = ids(&["c"]).into_iter().collect();
        let outcome = partition(&granted, &candidates, Some(2));
        assert_eq!(outcome.len(), candidates.len());
        assert!(outcome.claimed.len() <= 2);
    }
}
