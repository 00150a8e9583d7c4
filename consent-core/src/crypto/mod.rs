//! Content Hasher
//!
//! A deployment hashes every revision with one fixed algorithm. Mixing
//! algorithms inside a chain breaks verifiability, so the algorithm is a
//! deployment-level setting and the persistent store pins it on first use.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{RevisionError, RevisionResult};

/// Supported revision digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Reference-compatible default
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Parse from configuration text
    pub fn parse(s: &str) -> RevisionResult<Self> {
        match s.to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(RevisionError::Config(format!(
                "Unsupported hash algorithm: '{}'. Expected sha1 or sha256",
                other
            ))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes deterministic hex digests over canonical snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest of `bytes`
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self.algorithm {
            HashAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }
}
