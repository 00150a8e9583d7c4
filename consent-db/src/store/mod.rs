//! Revision and business-object storage
//!
//! Revisions are append-mostly: after insertion the only field that ever
//! changes is `successor_id`, and only from empty to a value. Each object's
//! chain has exactly one head, tracked by the store, and `append_successor`
//! moves it with a compare-and-set so concurrent writers cannot fork a chain.
//!
//! Object ids are unique across schemas: a chain belongs to one object id, so
//! a second schema cannot start a chain under an id that is already taken.
//! Live objects are written with a compare-and-set too, against the
//! revision and delete state the writer last read.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use consent_core::{
    Auditable, Revision, RevisionError, RevisionResult, SchemaName, Versioned, VersionedObject,
};

/// Revision store interface
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Insert a revision
    ///
    /// A root revision starts the object's chain and becomes its head; it is
    /// rejected with `AlreadyExists` if the object already has a chain. A
    /// non-root revision is stored without moving the head; link it with
    /// `update_successor_link`, or use `append_successor` instead.
    async fn add(&self, revision: &Revision) -> RevisionResult<()>;

    /// Set `successor_id` on a stored revision
    ///
    /// The successor must already be stored. Fails with `Conflict` if the
    /// revision already has a different successor.
    async fn update_successor_link(
        &self,
        revision_id: &str,
        successor_id: &str,
    ) -> RevisionResult<Revision>;

    /// Insert `revision` as the successor of `expected_head_id` in one step
    ///
    /// Fails with `Conflict` and writes nothing if `expected_head_id` is no
    /// longer the head of the object's chain. Returns the linked predecessor.
    async fn append_successor(
        &self,
        revision: &Revision,
        expected_head_id: &str,
    ) -> RevisionResult<Revision>;

    /// Head of the object's chain, `NotFound` if the object has none
    async fn get_latest_by_object_id(&self, object_id: &str) -> RevisionResult<Revision>;

    async fn get_by_id(&self, revision_id: &str) -> RevisionResult<Revision>;

    /// Every revision of the object, root first; empty if there are none
    async fn list_all_by_object_id(&self, object_id: &str) -> RevisionResult<Vec<Revision>>;

    /// Head revision of every chain, ordered by object id
    async fn list_heads(&self) -> RevisionResult<Vec<Revision>>;

    async fn stats(&self) -> RevisionResult<StoreStats>;
}

/// Live business-object store interface
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the live object if the stored one is still at `expected`
    ///
    /// Fails with `AlreadyExists` when `expected` is `Absent` and an object is
    /// stored, `NotFound` when the object is missing or was soft-deleted
    /// meanwhile, and `Conflict` when it moved to another revision.
    async fn put_object(&self, object: &StoredObject, expected: &ObjectVersion) -> RevisionResult<()>;

    /// Live object by schema and id, soft-deleted objects included
    async fn get_object(&self, schema: SchemaName, object_id: &str) -> RevisionResult<StoredObject>;

    /// All objects of a schema, soft-deleted objects included
    async fn list_objects(&self, schema: SchemaName) -> RevisionResult<Vec<StoredObject>>;
}

/// Live business object with its storage-only fields
///
/// `data` holds the audited projection only; tenant scope and the
/// soft-delete flag never reach a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub schema_name: SchemaName,
    pub id: String,
    pub organisation_id: String,
    pub is_deleted: bool,
    /// Revision the live data was written from
    pub revision_id: String,
    pub updated_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl StoredObject {
    pub fn new<O>(object: &O, organisation_id: impl Into<String>, revision_id: impl Into<String>) -> RevisionResult<Self>
    where
        O: Auditable + ?Sized,
    {
        Ok(Self {
            schema_name: object.schema_name(),
            id: object.audited_object_id().to_string(),
            organisation_id: organisation_id.into(),
            is_deleted: false,
            revision_id: revision_id.into(),
            updated_at: Utc::now(),
            data: object.to_json()?,
        })
    }

    /// Decode into the tagged object
    pub fn object(&self) -> RevisionResult<VersionedObject> {
        VersionedObject::from_value(self.schema_name, self.data.clone())
    }

    /// Decode into a concrete type
    pub fn typed<T: Versioned>(&self) -> RevisionResult<T> {
        if self.schema_name != T::SCHEMA {
            return Err(RevisionError::SchemaMismatch {
                expected: T::SCHEMA,
                actual: self.schema_name,
            });
        }
        serde_json::from_value(self.data.clone()).map_err(|e| RevisionError::Decode(e.to_string()))
    }

    pub(crate) fn key(schema: SchemaName, object_id: &str) -> String {
        format!("{}\0{}", schema.as_str(), object_id)
    }
}

/// State a live-object write is conditional on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectVersion {
    /// No object stored yet
    Absent,
    /// Object stored from `revision_id` with this delete flag
    At { revision_id: String, is_deleted: bool },
}

impl ObjectVersion {
    pub fn of(object: &StoredObject) -> Self {
        Self::At {
            revision_id: object.revision_id.clone(),
            is_deleted: object.is_deleted,
        }
    }

    pub(crate) fn check(&self, object: &StoredObject, current: Option<&StoredObject>) -> RevisionResult<()> {
        match (self, current) {
            (Self::Absent, None) => Ok(()),
            (Self::Absent, Some(_)) => Err(RevisionError::AlreadyExists(format!(
                "{} {}",
                object.schema_name, object.id
            ))),
            (Self::At { .. }, None) => Err(RevisionError::NotFound(format!("{} {}", object.schema_name, object.id))),
            (Self::At { is_deleted: false, .. }, Some(current)) if current.is_deleted => Err(RevisionError::NotFound(
                format!("{} {} (deleted)", object.schema_name, object.id),
            )),
            (Self::At { revision_id, is_deleted }, Some(current)) => {
                if current.revision_id == *revision_id && current.is_deleted == *is_deleted {
                    Ok(())
                } else {
                    Err(RevisionError::Conflict {
                        object_id: object.id.clone(),
                        expected_head: revision_id.clone(),
                        actual_head: current.revision_id.clone(),
                    })
                }
            }
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_revisions: u64,
    /// Objects with a revision chain
    pub chains: u64,
    pub live_objects: u64,
    pub deleted_objects: u64,
}

/// Reject revisions that were never finalized
pub(crate) fn check_insertable(revision: &Revision) -> RevisionResult<()> {
    if !revision.is_finalized() {
        return Err(RevisionError::Validation(format!(
            "revision {} has not been finalized",
            revision.id
        )));
    }
    Ok(())
}

/// Error for a root revision whose object id already has a chain
pub(crate) fn chain_taken(revision: &Revision, head: &Revision) -> RevisionError {
    if head.schema_name != revision.schema_name {
        RevisionError::AlreadyExists(format!(
            "object id {} is already used by a {} chain",
            revision.object_id, head.schema_name
        ))
    } else {
        RevisionError::AlreadyExists(format!(
            "object {} already has a revision chain (head {})",
            revision.object_id, head.id
        ))
    }
}

/// Check that `successor` may be linked after `predecessor`
pub(crate) fn check_link(predecessor: &Revision, successor: &Revision) -> RevisionResult<()> {
    if successor.object_id != predecessor.object_id || successor.schema_name != predecessor.schema_name {
        return Err(RevisionError::Validation(format!(
            "revision {} does not belong to the chain of {}",
            successor.id, predecessor.object_id
        )));
    }
    if successor.predecessor_hash != predecessor.serialized_hash {
        return Err(RevisionError::Validation(format!(
            "revision {} does not reference the hash of {}",
            successor.id, predecessor.id
        )));
    }
    if !predecessor.successor_id.is_empty() && predecessor.successor_id != successor.id {
        return Err(RevisionError::Conflict {
            object_id: predecessor.object_id.clone(),
            expected_head: predecessor.id.clone(),
            actual_head: predecessor.successor_id.clone(),
        });
    }
    Ok(())
}

pub use memory::MemoryStorage;
pub use self::sled::SledStorage;

#[cfg(test)]
pub(crate) mod testing {
    use consent_core::{Actor, DataAttribute, Policy, Revision, RevisionChainBuilder};

    pub fn policy(id: &str, name: &str) -> Policy {
        Policy::new(id, name, "https://x/policy")
    }

    pub fn attribute(id: &str) -> DataAttribute {
        DataAttribute {
            id: id.to_string(),
            name: "email".to_string(),
            ..Default::default()
        }
    }

    pub fn root(builder: &RevisionChainBuilder, id: &str) -> Revision {
        builder
            .create_revision_for(&policy(id, "GDPR Policy"), &Actor::other("admin-1"))
            .unwrap()
    }

    pub async fn successor(builder: &RevisionChainBuilder, previous: &Revision, name: &str) -> Revision {
        let (next, _) = builder
            .update_revision_for(&policy(&previous.object_id, name), previous, &Actor::other("admin-1"))
            .await
            .unwrap();
        next
    }
}
