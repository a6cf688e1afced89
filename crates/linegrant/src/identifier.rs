use core::{borrow::Borrow, fmt};
use serde::{Deserialize, Deserializer, Serialize};

/// A claimable token: trimmed, never empty.
///
/// Two identifiers are equal when their trimmed text is byte-for-byte equal.
/// The only way to build one is [`Identifier::parse`], so every value in
/// circulation already satisfies the invariant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Trims `raw` and returns `None` if nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom("identifier must not be blank"))
    }
}

/// Trims every candidate and drops blanks, keeping order and duplicates.
///
/// Duplicates survive on purpose: the coordinator has to see them to deny
/// the second occurrence.
pub fn filter_candidates<I, S>(raw: I) -> Vec<Identifier>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| Identifier::parse(s.as_ref()))
        .collect()
}
