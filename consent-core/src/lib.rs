//! Consent Core - Revision Chain Engine
//!
//! Records every create and update of a versioned consent object (policy,
//! data agreement, data attribute, data agreement record) as an immutable,
//! hash-linked revision:
//! - Canonical snapshots of each object's audited fields
//! - Content hashes over the canonical form of each revision
//! - Append-only lineage through `predecessorHash` / `successorId`
//! - Reconstruction of any object as of any revision
//!
//! This crate performs no I/O. Persistence lives in `consent-db`.

pub mod canon;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod reconstruct;
pub mod types;

pub use canon::{canonical_json, CanonicalCodec, Snapshot, CANONICALIZATION_VERSION};
pub use chain::{
    order_by_chain, verify_chain, ChainVerification, ChainViolation, PredecessorSigner,
    RevisionChainBuilder, ViolationKind,
};
pub use crypto::{ContentHasher, HashAlgorithm};
pub use error::*;
pub use reconstruct::{recreate, recreate_object};
pub use types::*;
