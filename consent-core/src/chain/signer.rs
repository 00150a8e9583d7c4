//! Predecessor signing hook
//!
//! The engine does not choose a signature scheme. A caller may configure a
//! signer; the chain builder then asks it to sign each predecessor hash and
//! stores the result in `predecessorSignature`. Without a signer the field
//! stays empty. Signatures are never verified here.

use async_trait::async_trait;

use crate::error::RevisionResult;

/// Signs predecessor hashes for successor revisions
#[async_trait]
pub trait PredecessorSigner: Send + Sync {
    /// Identifier of the signing key or scheme, for logging
    fn key_id(&self) -> &str;

    /// Produce an encoded signature over `predecessor_hash`
    async fn sign_predecessor(&self, predecessor_hash: &str) -> RevisionResult<String>;
}
