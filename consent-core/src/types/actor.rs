//! Actor attribution for revisions

use serde::{Deserialize, Serialize};
use std::fmt;

/// The party that performed a mutation
///
/// Exactly one of the two attribution fields on a revision is populated,
/// depending on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Actor {
    /// An end-user acting on their own consent
    Individual(String),
    /// An administrative or organisational actor
    Other(String),
}

impl Actor {
    /// Individual actor
    pub fn individual(id: impl Into<String>) -> Self {
        Self::Individual(id.into())
    }

    /// Administrative actor
    pub fn other(id: impl Into<String>) -> Self {
        Self::Other(id.into())
    }

    /// Actor identifier regardless of kind
    pub fn id(&self) -> &str {
        match self {
            Self::Individual(id) | Self::Other(id) => id,
        }
    }

    /// Value for `authorizedByIndividualId`
    pub fn individual_id(&self) -> &str {
        match self {
            Self::Individual(id) => id,
            Self::Other(_) => "",
        }
    }

    /// Value for `authorizedByOtherId`
    pub fn other_id(&self) -> &str {
        match self {
            Self::Other(id) => id,
            Self::Individual(_) => "",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual(id) => write!(f, "individual:{}", id),
            Self::Other(id) => write!(f, "other:{}", id),
        }
    }
}
