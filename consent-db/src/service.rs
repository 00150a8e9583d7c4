//! Revision Service
//!
//! Runs the create/update unit of work against the stores:
//! 1. build the revision (root or successor)
//! 2. append it to the chain; a successor is appended with a head
//!    compare-and-set, so a lost race surfaces as `Conflict` and writes nothing
//! 3. write the live business object, conditional on the state read before
//!    step 1
//!
//! Writes to one object are serialized inside a service, so live objects
//! follow chain order. Across services sharing a store the conditional write
//! catches interleavings: a write that finds the object moved reconciles it
//! from the chain head, and one that finds it soft-deleted fails `NotFound`.
//!
//! The revision is always written first. If step 3 fails the chain is ahead
//! of the live object; `repair_object` rewrites one object from its chain
//! head and `reconcile_all` sweeps every chain.
//!
//! Each store call is bounded by the configured store timeout. Callers may
//! bound a whole operation with their own `tokio::time::timeout` as well;
//! dropping it part way leaves at worst a chain ahead of its live object.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::store::{
    MemoryStorage, ObjectStore, ObjectVersion, RevisionStore, SledStorage, StoreStats, StoredObject,
};
use consent_core::logging::operations;
use consent_core::{
    recreate, recreate_object, verify_chain, Actor, Auditable, ChainVerification, ContentHasher,
    PredecessorSigner, Revision, RevisionChainBuilder, RevisionError, RevisionResult, SchemaName,
    Versioned, VersionedObject,
};

/// Result of reconciling a live object with its chain head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Live object already matched the head revision
    InSync,
    /// Live object was rewritten from the head revision
    Repaired,
}

/// Summary of a `reconcile_all` sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Chains visited
    pub checked: u64,
    /// Object ids rewritten from their chain head
    pub repaired: Vec<String>,
    pub failed: Vec<ReconcileFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub object_id: String,
    pub error: String,
}

/// Revision unit-of-work service
pub struct RevisionService {
    revisions: Arc<dyn RevisionStore>,
    objects: Arc<dyn ObjectStore>,
    builder: RevisionChainBuilder,
    max_conflict_retries: u32,
    store_timeout: Duration,
    // object id -> write lock
    object_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RevisionService {
    pub fn new(
        revisions: Arc<dyn RevisionStore>,
        objects: Arc<dyn ObjectStore>,
        builder: RevisionChainBuilder,
    ) -> Self {
        let defaults = EngineConfig::default();
        Self {
            revisions,
            objects,
            builder,
            max_conflict_retries: defaults.max_conflict_retries,
            store_timeout: defaults.store_timeout(),
            object_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open the stores described by `config`
    pub fn open(config: &EngineConfig) -> RevisionResult<Self> {
        if config.storage.is_in_memory() {
            return Ok(Self::in_memory(config));
        }

        let storage = Arc::new(SledStorage::new(&config.storage, config.hash_algorithm)?);
        info!(
            data_dir = %config.storage.data_dir,
            hash_algorithm = %config.hash_algorithm,
            "Revision store opened"
        );
        let builder = RevisionChainBuilder::new(ContentHasher::new(config.hash_algorithm));
        Ok(Self::new(storage.clone(), storage, builder).configured(config))
    }

    /// Service over fresh in-memory stores
    pub fn in_memory(config: &EngineConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let builder = RevisionChainBuilder::new(ContentHasher::new(config.hash_algorithm));
        Self::new(storage.clone(), storage, builder).configured(config)
    }

    fn configured(self, config: &EngineConfig) -> Self {
        self.with_max_conflict_retries(config.max_conflict_retries)
            .with_store_timeout(config.store_timeout())
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn PredecessorSigner>) -> Self {
        self.builder = self.builder.with_signer(signer);
        self
    }

    pub fn builder(&self) -> &RevisionChainBuilder {
        &self.builder
    }

    // ==================== writes ====================

    /// Create a business object and the root of its revision chain
    ///
    /// Calling it again after the chain root landed but the live object
    /// write failed finishes the create, provided the object is unchanged.
    pub async fn create<O>(&self, object: &O, organisation_id: &str, actor: &Actor) -> RevisionResult<Revision>
    where
        O: Auditable + Sync + ?Sized,
    {
        let _guard = self.lock_object(object.audited_object_id()).await;

        let revision = self.builder.create_revision_for(object, actor)?;
        match self
            .timed(operations::STORE_ADD, self.revisions.add(&revision))
            .await
        {
            Ok(()) => {}
            Err(RevisionError::AlreadyExists(reason)) => {
                return self
                    .resume_create(object, organisation_id, actor, reason)
                    .await
            }
            Err(e) => return Err(e),
        }

        let stored = StoredObject::new(object, organisation_id, &revision.id)?;
        self.write_object(&stored, &ObjectVersion::Absent, &revision)
            .await?;

        info!(
            operation = operations::REVISION_CREATE,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            schema_name = %revision.schema_name,
            actor = %actor,
            "Object created"
        );
        Ok(revision)
    }

    /// Update a business object, appending to its chain
    ///
    /// The predecessor is the current chain head. A lost race is retried with
    /// a fresh head up to the configured number of times, then `Conflict` is
    /// returned.
    pub async fn update<O>(&self, object: &O, actor: &Actor) -> RevisionResult<Revision>
    where
        O: Auditable + Sync + ?Sized,
    {
        let _guard = self.lock_object(object.audited_object_id()).await;
        let current = self
            .live_object(object.schema_name(), object.audited_object_id())
            .await?;

        let mut attempt: u32 = 0;
        let revision = loop {
            let previous = self.latest(object.audited_object_id()).await?;
            match self.append(object, &previous, actor).await {
                Ok(revision) => break revision,
                Err(e) if e.is_retryable() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        operation = operations::REVISION_UPDATE,
                        object_id = %previous.object_id,
                        attempt,
                        error = %e,
                        "Revision conflict, retrying with fresh chain head"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        self.commit_update(&current, object, revision, actor).await
    }

    /// Update a business object on top of a caller-supplied predecessor
    ///
    /// No retry: if `previous` is no longer the chain head the call fails
    /// with `Conflict` and nothing is written.
    pub async fn update_from<O>(&self, object: &O, previous: &Revision, actor: &Actor) -> RevisionResult<Revision>
    where
        O: Auditable + Sync + ?Sized,
    {
        let _guard = self.lock_object(object.audited_object_id()).await;
        let current = self
            .live_object(object.schema_name(), object.audited_object_id())
            .await?;
        let revision = self.append(object, previous, actor).await?;
        self.commit_update(&current, object, revision, actor).await
    }

    /// Mark a business object deleted; its chain is untouched
    pub async fn soft_delete(&self, schema: SchemaName, object_id: &str, actor: &Actor) -> RevisionResult<()> {
        let _guard = self.lock_object(object_id).await;
        let current = self.live_object(schema, object_id).await?;
        let deleted = StoredObject {
            is_deleted: true,
            updated_at: Utc::now(),
            ..current.clone()
        };
        self.timed(
            operations::OBJECT_DELETE,
            self.objects.put_object(&deleted, &ObjectVersion::of(&current)),
        )
        .await?;

        info!(
            operation = operations::OBJECT_DELETE,
            object_id = %object_id,
            schema_name = %schema,
            actor = %actor,
            "Object soft-deleted"
        );
        Ok(())
    }

    /// Rewrite the live object from its chain head if they disagree
    ///
    /// `organisation_id` is only used when the live object is missing
    /// entirely. Soft-delete state is preserved.
    pub async fn repair_object(
        &self,
        schema: SchemaName,
        object_id: &str,
        organisation_id: &str,
    ) -> RevisionResult<RepairOutcome> {
        let _guard = self.lock_object(object_id).await;
        self.reconcile(schema, object_id, organisation_id).await
    }

    /// Reconcile the live object of every chain with its head
    ///
    /// `organisation_id` is used for objects whose live record is missing.
    /// A failure on one object is recorded and the sweep moves on.
    pub async fn reconcile_all(&self, organisation_id: &str) -> RevisionResult<ReconcileReport> {
        let heads = self
            .timed(operations::STORE_READ, self.revisions.list_heads())
            .await?;

        let mut report = ReconcileReport::default();
        for head in heads {
            report.checked += 1;
            let _guard = self.lock_object(&head.object_id).await;
            let outcome = self
                .reconcile(head.schema_name, &head.object_id, organisation_id)
                .await;
            match outcome {
                Ok(RepairOutcome::InSync) => {}
                Ok(RepairOutcome::Repaired) => report.repaired.push(head.object_id),
                Err(e) => {
                    warn!(
                        operation = operations::RECONCILE,
                        object_id = %head.object_id,
                        error = %e,
                        "Object could not be reconciled"
                    );
                    report.failed.push(ReconcileFailure {
                        object_id: head.object_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            operation = operations::RECONCILE,
            count = report.checked,
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            "Reconcile sweep finished"
        );
        Ok(report)
    }

    // ==================== reads ====================

    /// Live object, `NotFound` if missing or soft-deleted
    pub async fn live_object(&self, schema: SchemaName, object_id: &str) -> RevisionResult<StoredObject> {
        let object = self
            .timed(operations::STORE_READ, self.objects.get_object(schema, object_id))
            .await?;
        if object.is_deleted {
            return Err(RevisionError::NotFound(format!("{} {} (deleted)", schema, object_id)));
        }
        Ok(object)
    }

    /// Live object decoded into its type
    pub async fn get<T: Versioned>(&self, object_id: &str) -> RevisionResult<T> {
        self.live_object(T::SCHEMA, object_id).await?.typed()
    }

    /// Current head of the object's chain
    pub async fn latest(&self, object_id: &str) -> RevisionResult<Revision> {
        self.timed(
            operations::STORE_READ,
            self.revisions.get_latest_by_object_id(object_id),
        )
        .await
    }

    pub async fn revision(&self, revision_id: &str) -> RevisionResult<Revision> {
        self.timed(operations::STORE_READ, self.revisions.get_by_id(revision_id))
            .await
    }

    /// Every revision of the object, root first
    pub async fn history(&self, object_id: &str) -> RevisionResult<Vec<Revision>> {
        self.timed(
            operations::STORE_READ,
            self.revisions.list_all_by_object_id(object_id),
        )
        .await
    }

    /// The object as it was at `revision_id`
    pub async fn recreate<T: Versioned>(&self, revision_id: &str) -> RevisionResult<T> {
        let revision = self.revision(revision_id).await?;
        recreate(&revision).map_err(|e| undecodable(&revision, e))
    }

    pub async fn recreate_object(&self, schema: SchemaName, revision_id: &str) -> RevisionResult<VersionedObject> {
        let revision = self.revision(revision_id).await?;
        recreate_object(schema, &revision).map_err(|e| undecodable(&revision, e))
    }

    /// Verify the object's whole chain
    pub async fn verify(&self, object_id: &str) -> RevisionResult<ChainVerification> {
        let revisions = self.history(object_id).await?;
        if revisions.is_empty() {
            return Err(RevisionError::NotFound(format!("revisions for object {}", object_id)));
        }

        let report = verify_chain(object_id, &revisions, self.builder.hasher());
        if report.is_valid {
            debug!(
                operation = operations::VERIFY,
                object_id = %object_id,
                count = report.revision_count,
                "Revision chain verified"
            );
        } else {
            error!(
                operation = operations::VERIFY,
                object_id = %object_id,
                count = report.revision_count,
                violations = report.violations.len(),
                "Revision chain verification failed"
            );
        }
        Ok(report)
    }

    pub async fn stats(&self) -> RevisionResult<StoreStats> {
        self.timed(operations::STORE_READ, self.revisions.stats()).await
    }

    // ==================== internals ====================

    async fn lock_object(&self, object_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.object_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(object_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn append<O>(&self, object: &O, previous: &Revision, actor: &Actor) -> RevisionResult<Revision>
    where
        O: Auditable + Sync + ?Sized,
    {
        let (revision, _) = self
            .builder
            .update_revision_for(object, previous, actor)
            .await?;
        self.timed(
            operations::STORE_APPEND,
            self.revisions.append_successor(&revision, &previous.id),
        )
        .await?;
        Ok(revision)
    }

    /// Finish a create whose chain root is stored but whose live object is not
    async fn resume_create<O>(
        &self,
        object: &O,
        organisation_id: &str,
        actor: &Actor,
        reason: String,
    ) -> RevisionResult<Revision>
    where
        O: Auditable + Sync + ?Sized,
    {
        let schema = object.schema_name();
        let object_id = object.audited_object_id();
        match self
            .timed(operations::STORE_READ, self.objects.get_object(schema, object_id))
            .await
        {
            Err(RevisionError::NotFound(_)) => {}
            Ok(_) => return Err(RevisionError::AlreadyExists(reason)),
            Err(e) => return Err(e),
        }

        let head = self.latest(object_id).await?;
        let same_root = head.is_root()
            && head.schema_name == schema
            && recreate_object(schema, &head)?.to_json()? == object.to_json()?;
        if !same_root {
            return Err(RevisionError::AlreadyExists(reason));
        }

        let stored = StoredObject::new(object, organisation_id, &head.id)?;
        self.write_object(&stored, &ObjectVersion::Absent, &head).await?;

        info!(
            operation = operations::REVISION_CREATE,
            object_id = %head.object_id,
            revision_id = %head.id,
            schema_name = %schema,
            actor = %actor,
            "Object create resumed from its stored chain root"
        );
        Ok(head)
    }

    async fn commit_update<O>(
        &self,
        current: &StoredObject,
        object: &O,
        revision: Revision,
        actor: &Actor,
    ) -> RevisionResult<Revision>
    where
        O: Auditable + Sync + ?Sized,
    {
        let stored = StoredObject {
            revision_id: revision.id.clone(),
            updated_at: Utc::now(),
            data: object.to_json()?,
            ..current.clone()
        };
        match self
            .write_object(&stored, &ObjectVersion::of(current), &revision)
            .await
        {
            Ok(()) => {}
            Err(RevisionError::Conflict { actual_head, .. }) => {
                warn!(
                    operation = operations::REVISION_UPDATE,
                    object_id = %revision.object_id,
                    revision_id = %revision.id,
                    live_revision_id = %actual_head,
                    "Live object moved during update, reconciling from chain head"
                );
                self.reconcile(revision.schema_name, &revision.object_id, &current.organisation_id)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        info!(
            operation = operations::REVISION_UPDATE,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            schema_name = %revision.schema_name,
            actor = %actor,
            "Object updated"
        );
        Ok(revision)
    }

    /// Rewrite the live object from the chain head; callers hold the object lock
    async fn reconcile(
        &self,
        schema: SchemaName,
        object_id: &str,
        organisation_id: &str,
    ) -> RevisionResult<RepairOutcome> {
        let head = self.latest(object_id).await?;
        let object = recreate_object(schema, &head).map_err(|e| undecodable(&head, e))?;
        let data = object.to_json()?;

        let (repaired, expected) = match self
            .timed(operations::STORE_READ, self.objects.get_object(schema, object_id))
            .await
        {
            Ok(current) if current.revision_id == head.id && current.data == data => {
                debug!(
                    operation = operations::REPAIR,
                    object_id = %object_id,
                    revision_id = %head.id,
                    "Live object matches chain head"
                );
                return Ok(RepairOutcome::InSync);
            }
            Ok(current) => {
                let expected = ObjectVersion::of(&current);
                let repaired = StoredObject {
                    revision_id: head.id.clone(),
                    updated_at: Utc::now(),
                    data,
                    ..current
                };
                (repaired, expected)
            }
            Err(RevisionError::NotFound(_)) => (
                StoredObject::new(&object, organisation_id, &head.id)?,
                ObjectVersion::Absent,
            ),
            Err(e) => return Err(e),
        };

        self.timed(
            operations::OBJECT_WRITE,
            self.objects.put_object(&repaired, &expected),
        )
        .await?;
        info!(
            operation = operations::REPAIR,
            object_id = %object_id,
            revision_id = %head.id,
            schema_name = %schema,
            "Live object rewritten from chain head"
        );
        Ok(RepairOutcome::Repaired)
    }

    async fn write_object(
        &self,
        stored: &StoredObject,
        expected: &ObjectVersion,
        revision: &Revision,
    ) -> RevisionResult<()> {
        self.timed(
            operations::OBJECT_WRITE,
            self.objects.put_object(stored, expected),
        )
        .await
        .map_err(|e| {
            match &e {
                RevisionError::Conflict { .. } => {}
                RevisionError::NotFound(_) | RevisionError::AlreadyExists(_) => warn!(
                    operation = operations::OBJECT_WRITE,
                    object_id = %revision.object_id,
                    revision_id = %revision.id,
                    error = %e,
                    "Live object changed before the write; revision kept in chain"
                ),
                _ => error!(
                    operation = operations::OBJECT_WRITE,
                    object_id = %revision.object_id,
                    revision_id = %revision.id,
                    error = %e,
                    "Revision stored but live object write failed; repair the object from its chain head"
                ),
            }
            e
        })
    }

    async fn timed<T, F>(&self, operation: &'static str, call: F) -> RevisionResult<T>
    where
        F: Future<Output = RevisionResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let after_ms = self.store_timeout.as_millis() as u64;
                warn!(operation, after_ms, "Store call timed out");
                Err(RevisionError::Timeout { operation, after_ms })
            }
        }
    }
}

/// Log revisions that no longer decode under the current schema types
fn undecodable(revision: &Revision, e: RevisionError) -> RevisionError {
    if e.is_schema_incompatibility() {
        warn!(
            operation = operations::RECREATE,
            revision_id = %revision.id,
            object_id = %revision.object_id,
            schema_name = %revision.schema_name,
            error = %e,
            "Revision does not decode as the requested schema"
        );
    }
    e
}

impl std::fmt::Debug for RevisionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionService")
            .field("builder", &self.builder)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
