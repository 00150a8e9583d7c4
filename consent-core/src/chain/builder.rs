//! Revision Chain Builder
//!
//! Creates the root revision for a new object and successor revisions for
//! updates. Every update is a full-snapshot append; no diffs are stored.
//! The builder is pure apart from the optional signer call: persisting the
//! returned revisions is the caller's job.

use std::sync::Arc;
use tracing::{debug, warn};

use super::signer::PredecessorSigner;
use crate::canon::CanonicalCodec;
use crate::crypto::ContentHasher;
use crate::error::{RevisionError, RevisionResult};
use crate::logging::operations;
use crate::types::{Actor, Auditable, Revision};

/// Builds hash-linked revisions
#[derive(Clone, Default)]
pub struct RevisionChainBuilder {
    codec: CanonicalCodec,
    hasher: ContentHasher,
    signer: Option<Arc<dyn PredecessorSigner>>,
}

impl RevisionChainBuilder {
    pub fn new(hasher: ContentHasher) -> Self {
        Self {
            codec: CanonicalCodec::new(),
            hasher,
            signer: None,
        }
    }

    /// Sign predecessor hashes with `signer`
    pub fn with_signer(mut self, signer: Arc<dyn PredecessorSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    /// Build the root revision for a newly created object
    pub fn create_revision_for<O>(&self, object: &O, actor: &Actor) -> RevisionResult<Revision>
    where
        O: Auditable + ?Sized,
    {
        object.check()?;
        let schema = object.schema_name();
        let snapshot = self.codec.project(schema, object)?;

        let mut revision = Revision::init_root(object.audited_object_id(), actor, schema);
        revision.finalize(&snapshot, &self.hasher)?;

        debug!(
            operation = operations::REVISION_CREATE,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            schema_name = %schema,
            "Root revision built"
        );
        Ok(revision)
    }

    /// Build a successor of `previous` for an updated object
    ///
    /// Returns the new revision and a copy of `previous` whose `successor_id`
    /// points at it. Both must be persisted by the caller, the new revision
    /// first.
    pub async fn update_revision_for<O>(
        &self,
        object: &O,
        previous: &Revision,
        actor: &Actor,
    ) -> RevisionResult<(Revision, Revision)>
    where
        O: Auditable + Sync + ?Sized,
    {
        object.check()?;
        let schema = object.schema_name();
        if previous.schema_name != schema {
            return Err(RevisionError::SchemaMismatch {
                expected: schema,
                actual: previous.schema_name,
            });
        }
        if previous.object_id != object.audited_object_id() {
            return Err(RevisionError::Validation(format!(
                "revision {} belongs to object {}, not {}",
                previous.id,
                previous.object_id,
                object.audited_object_id()
            )));
        }
        if !previous.is_finalized() {
            return Err(RevisionError::Validation(format!(
                "predecessor revision {} has not been finalized",
                previous.id
            )));
        }
        if !previous.is_head() {
            warn!(
                operation = operations::REVISION_UPDATE,
                object_id = %previous.object_id,
                revision_id = %previous.id,
                successor_id = %previous.successor_id,
                "Predecessor already superseded"
            );
            return Err(RevisionError::Conflict {
                object_id: previous.object_id.clone(),
                expected_head: previous.id.clone(),
                actual_head: previous.successor_id.clone(),
            });
        }

        let snapshot = self.codec.project(schema, object)?;

        let mut revision = Revision::init_successor(previous, actor);
        if let Some(signer) = &self.signer {
            revision.predecessor_signature = signer.sign_predecessor(&previous.serialized_hash).await?;
            debug!(
                object_id = %revision.object_id,
                key_id = signer.key_id(),
                "Predecessor hash signed"
            );
        }
        revision.finalize(&snapshot, &self.hasher)?;

        let linked_previous = previous.with_successor(revision.id.clone());

        debug!(
            operation = operations::REVISION_UPDATE,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            predecessor_id = %previous.id,
            schema_name = %schema,
            "Successor revision built"
        );
        Ok((revision, linked_previous))
    }
}

impl std::fmt::Debug for RevisionChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionChainBuilder")
            .field("hasher", &self.hasher)
            .field("signer", &self.signer.as_ref().map(|s| s.key_id().to_string()))
            .finish()
    }
}
