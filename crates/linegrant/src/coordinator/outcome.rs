use crate::Identifier;
use serde::Serialize;

/// Result of a successful claim cycle.
///
/// Every filtered candidate of the call lands in exactly one of the two
/// partitions, each in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    /// Newly granted. Persisted before the outcome was returned.
    pub claimed: Vec<Identifier>,
    /// Already granted, repeated within the batch, or cut by the limit.
    pub rejected: Vec<Identifier>,
}

impl ClaimOutcome {
    pub fn claimed_strs(&self) -> Vec<&str> {
        self.claimed.iter().map(Identifier::as_str).collect()
    }

    pub fn rejected_strs(&self) -> Vec<&str> {
        self.rejected.iter().map(Identifier::as_str).collect()
    }

    /// Number of candidates this outcome accounts for.
    pub fn len(&self) -> usize {
        self.claimed.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
