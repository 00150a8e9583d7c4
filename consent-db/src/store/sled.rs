//! Sled persistent storage
//!
//! Trees:
//! - `revisions`: revision id -> revision JSON
//! - `revisions_by_object`: `object_id \0 timestamp \0 revision_id` -> revision id
//! - `chain_heads`: object id -> head revision id
//! - `objects`: `schema \0 object_id` -> stored object JSON
//! - `meta`: engine metadata (pinned hash algorithm and canonicalization)
//!
//! Every conditional write runs in a sled transaction. Sled calls block, so
//! the async store methods run them on tokio's blocking pool; a caller's
//! deadline can then fire while a call is in flight. A call abandoned that
//! way still completes, and its outcome is whatever the store shows next.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, TransactionResult,
};
use sled::Transactional;
use std::path::Path;
use tracing::{debug, info};

use super::{
    chain_taken, check_insertable, check_link, ObjectStore, ObjectVersion, RevisionStore, StoreStats, StoredObject,
};
use crate::config::StorageConfig;
use consent_core::logging::operations;
use consent_core::{
    order_by_chain, HashAlgorithm, Revision, RevisionError, RevisionResult, SchemaName, CANONICALIZATION_VERSION,
};

const REVISIONS_TREE: &str = "revisions";
const OBJECT_INDEX_TREE: &str = "revisions_by_object";
const CHAIN_HEADS_TREE: &str = "chain_heads";
const OBJECTS_TREE: &str = "objects";
const META_TREE: &str = "meta";

const HASH_ALGORITHM_KEY: &[u8] = b"hash_algorithm";
const CANONICALIZATION_KEY: &[u8] = b"canonicalization";

/// Sled persistent storage
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
    revisions: sled::Tree,
    object_index: sled::Tree,
    chain_heads: sled::Tree,
    objects: sled::Tree,
    meta: sled::Tree,
    flush_on_write: bool,
}

impl SledStorage {
    /// Open the store described by `config`, pinning `algorithm`
    pub fn new(config: &StorageConfig, algorithm: HashAlgorithm) -> RevisionResult<Self> {
        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_capacity)
            .open()
            .map_err(|e| RevisionError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db, config.flush_on_write, algorithm)
    }

    /// Open or create a store at `path`, pinning `algorithm`
    pub fn open<P: AsRef<Path>>(path: P, algorithm: HashAlgorithm) -> RevisionResult<Self> {
        let db = sled::open(path).map_err(|e| RevisionError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db, true, algorithm)
    }

    fn from_db(db: sled::Db, flush_on_write: bool, algorithm: HashAlgorithm) -> RevisionResult<Self> {
        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| RevisionError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };

        let storage = Self {
            revisions: open_tree(REVISIONS_TREE)?,
            object_index: open_tree(OBJECT_INDEX_TREE)?,
            chain_heads: open_tree(CHAIN_HEADS_TREE)?,
            objects: open_tree(OBJECTS_TREE)?,
            meta: open_tree(META_TREE)?,
            db,
            flush_on_write,
        };
        storage.pin(HASH_ALGORITHM_KEY, "hash algorithm", algorithm.as_str())?;
        storage.pin(CANONICALIZATION_KEY, "canonicalization", CANONICALIZATION_VERSION)?;
        Ok(storage)
    }

    /// Record a hashing setting on first open and refuse any other afterwards
    fn pin(&self, key: &[u8], setting: &str, value: &str) -> RevisionResult<()> {
        let swapped = self
            .meta
            .compare_and_swap(key, None::<&[u8]>, Some(value.as_bytes()))
            .map_err(|e| RevisionError::Storage(format!("Failed to read store metadata: {}", e)))?;

        match swapped {
            Ok(()) => {
                info!(setting, value, "Store metadata pinned");
                Ok(())
            }
            Err(existing) => {
                let pinned = existing
                    .current
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default();
                if pinned == value {
                    Ok(())
                } else {
                    Err(RevisionError::Config(format!(
                        "store was created with {} {}, configured {}",
                        setting, pinned, value
                    )))
                }
            }
        }
    }

    /// Flush to disk
    pub fn flush(&self) -> RevisionResult<()> {
        self.db
            .flush()
            .map_err(|e| RevisionError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    fn flush_if_configured(&self) -> RevisionResult<()> {
        if self.flush_on_write {
            self.flush()?;
        }
        Ok(())
    }

    // ==================== helpers ====================

    fn serialize<T: Serialize>(value: &T) -> RevisionResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| RevisionError::Encoding(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> RevisionResult<T> {
        serde_json::from_slice(bytes).map_err(|e| RevisionError::Storage(format!("Corrupt record: {}", e)))
    }

    fn index_prefix(object_id: &str) -> Vec<u8> {
        let mut key = object_id.as_bytes().to_vec();
        key.push(0);
        key
    }

    fn index_key(revision: &Revision) -> Vec<u8> {
        let mut key = Self::index_prefix(&revision.object_id);
        key.extend_from_slice(revision.timestamp_string().as_bytes());
        key.push(0);
        key.extend_from_slice(revision.id.as_bytes());
        key
    }

    fn finish<A>(result: TransactionResult<A, RevisionError>, context: &str) -> RevisionResult<A> {
        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => RevisionError::Storage(format!("Failed to {}: {}", context, e)),
        })
    }

    /// Run `call` on the blocking pool against a handle to this store
    async fn blocking<T, F>(&self, call: F) -> RevisionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SledStorage) -> RevisionResult<T> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || call(storage))
            .await
            .map_err(|e| RevisionError::Storage(format!("Storage task failed: {}", e)))?
    }

    fn load_revision(&self, revision_id: &[u8]) -> RevisionResult<Option<Revision>> {
        match self
            .revisions
            .get(revision_id)
            .map_err(|e| RevisionError::Storage(format!("Failed to get revision: {}", e)))?
        {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==================== blocking operations ====================

    fn insert_revision(&self, revision: &Revision) -> RevisionResult<()> {
        check_insertable(revision)?;
        let value = Self::serialize(revision)?;
        let index_key = Self::index_key(revision);

        let result: TransactionResult<(), RevisionError> = (&self.revisions, &self.object_index, &self.chain_heads)
            .transaction(|(revisions, index, heads)| {
                if revisions.get(revision.id.as_bytes())?.is_some() {
                    return abort(RevisionError::AlreadyExists(format!("revision {}", revision.id)));
                }
                if revision.is_root() {
                    if let Some(head_id) = heads.get(revision.object_id.as_bytes())? {
                        return match revisions.get(&head_id)? {
                            Some(bytes) => {
                                let head: Revision =
                                    Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?;
                                abort(chain_taken(revision, &head))
                            }
                            None => abort(RevisionError::Storage(format!(
                                "chain head {} is missing",
                                String::from_utf8_lossy(&head_id)
                            ))),
                        };
                    }
                    heads.insert(revision.object_id.as_bytes(), revision.id.as_bytes())?;
                }
                revisions.insert(revision.id.as_bytes(), value.as_slice())?;
                index.insert(index_key.as_slice(), revision.id.as_bytes())?;
                Ok(())
            });
        Self::finish(result, "add revision")?;
        self.flush_if_configured()?;

        debug!(
            operation = operations::STORE_ADD,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            "Revision stored"
        );
        Ok(())
    }

    fn link_successor(&self, revision_id: &str, successor_id: &str) -> RevisionResult<Revision> {
        let result: TransactionResult<Revision, RevisionError> = (&self.revisions, &self.chain_heads)
            .transaction(|(revisions, heads)| {
                let successor: Revision = match revisions.get(successor_id.as_bytes())? {
                    Some(bytes) => Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => return abort(RevisionError::NotFound(format!("revision {}", successor_id))),
                };
                let predecessor: Revision = match revisions.get(revision_id.as_bytes())? {
                    Some(bytes) => Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => return abort(RevisionError::NotFound(format!("revision {}", revision_id))),
                };
                check_link(&predecessor, &successor).map_err(ConflictableTransactionError::Abort)?;

                let linked = predecessor.with_successor(successor_id);
                let value = Self::serialize(&linked).map_err(ConflictableTransactionError::Abort)?;
                revisions.insert(linked.id.as_bytes(), value)?;

                let is_head = heads
                    .get(linked.object_id.as_bytes())?
                    .map(|head| &head[..] == revision_id.as_bytes())
                    .unwrap_or(false);
                if is_head {
                    heads.insert(linked.object_id.as_bytes(), successor_id.as_bytes())?;
                }
                Ok(linked)
            });
        let linked = Self::finish(result, "link successor")?;
        self.flush_if_configured()?;

        debug!(
            operation = operations::STORE_LINK,
            object_id = %linked.object_id,
            revision_id = %linked.id,
            successor_id = %successor_id,
            "Successor linked"
        );
        Ok(linked)
    }

    fn append_revision(&self, revision: &Revision, expected_head_id: &str) -> RevisionResult<Revision> {
        check_insertable(revision)?;
        let value = Self::serialize(revision)?;
        let index_key = Self::index_key(revision);

        let result: TransactionResult<Revision, RevisionError> = (&self.revisions, &self.object_index, &self.chain_heads)
            .transaction(|(revisions, index, heads)| {
                if revisions.get(revision.id.as_bytes())?.is_some() {
                    return abort(RevisionError::AlreadyExists(format!("revision {}", revision.id)));
                }
                let head_id = match heads.get(revision.object_id.as_bytes())? {
                    Some(head) => String::from_utf8_lossy(&head).into_owned(),
                    None => {
                        return abort(RevisionError::NotFound(format!(
                            "revision chain for object {}",
                            revision.object_id
                        )))
                    }
                };
                if head_id != expected_head_id {
                    return abort(RevisionError::Conflict {
                        object_id: revision.object_id.clone(),
                        expected_head: expected_head_id.to_string(),
                        actual_head: head_id,
                    });
                }

                let predecessor: Revision = match revisions.get(head_id.as_bytes())? {
                    Some(bytes) => Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => return abort(RevisionError::Storage(format!("chain head {} is missing", head_id))),
                };
                check_link(&predecessor, revision).map_err(ConflictableTransactionError::Abort)?;
                let linked = predecessor.with_successor(revision.id.clone());
                let linked_value = Self::serialize(&linked).map_err(ConflictableTransactionError::Abort)?;

                revisions.insert(revision.id.as_bytes(), value.as_slice())?;
                revisions.insert(linked.id.as_bytes(), linked_value)?;
                index.insert(index_key.as_slice(), revision.id.as_bytes())?;
                heads.insert(revision.object_id.as_bytes(), revision.id.as_bytes())?;
                Ok(linked)
            });
        let linked = Self::finish(result, "append successor")?;
        self.flush_if_configured()?;

        debug!(
            operation = operations::STORE_APPEND,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            predecessor_id = %linked.id,
            "Successor appended"
        );
        Ok(linked)
    }

    fn head_of(&self, object_id: &str) -> RevisionResult<Revision> {
        let head = self
            .chain_heads
            .get(object_id.as_bytes())
            .map_err(|e| RevisionError::Storage(format!("Failed to get chain head: {}", e)))?
            .ok_or_else(|| RevisionError::NotFound(format!("revisions for object {}", object_id)))?;

        self.load_revision(&head)?.ok_or_else(|| {
            RevisionError::Storage(format!(
                "chain head {} of object {} is missing",
                String::from_utf8_lossy(&head),
                object_id
            ))
        })
    }

    fn revision_by_id(&self, revision_id: &str) -> RevisionResult<Revision> {
        self.load_revision(revision_id.as_bytes())?
            .ok_or_else(|| RevisionError::NotFound(format!("revision {}", revision_id)))
    }

    fn chain_of(&self, object_id: &str) -> RevisionResult<Vec<Revision>> {
        let mut revisions = Vec::new();

        for item in self.object_index.scan_prefix(Self::index_prefix(object_id)) {
            let (_, revision_id) =
                item.map_err(|e| RevisionError::Storage(format!("Failed to iterate revisions: {}", e)))?;
            if let Some(revision) = self.load_revision(&revision_id)? {
                revisions.push(revision);
            }
        }

        Ok(order_by_chain(revisions))
    }

    fn heads(&self) -> RevisionResult<Vec<Revision>> {
        let mut heads = Vec::new();

        for item in self.chain_heads.iter() {
            let (object_id, head) =
                item.map_err(|e| RevisionError::Storage(format!("Failed to iterate chain heads: {}", e)))?;
            let revision = self.load_revision(&head)?.ok_or_else(|| {
                RevisionError::Storage(format!(
                    "chain head {} of object {} is missing",
                    String::from_utf8_lossy(&head),
                    String::from_utf8_lossy(&object_id)
                ))
            })?;
            heads.push(revision);
        }

        Ok(heads)
    }

    fn collect_stats(&self) -> RevisionResult<StoreStats> {
        let mut stats = StoreStats {
            total_revisions: self.revisions.len() as u64,
            chains: self.chain_heads.len() as u64,
            ..Default::default()
        };

        for item in self.objects.iter() {
            let (_, value) = item.map_err(|e| RevisionError::Storage(format!("Failed to iterate objects: {}", e)))?;
            let object: StoredObject = Self::deserialize(&value)?;
            if object.is_deleted {
                stats.deleted_objects += 1;
            } else {
                stats.live_objects += 1;
            }
        }

        Ok(stats)
    }

    fn write_object(&self, object: &StoredObject, expected: &ObjectVersion) -> RevisionResult<()> {
        let key = StoredObject::key(object.schema_name, &object.id);
        let value = Self::serialize(object)?;

        let result: TransactionResult<(), RevisionError> = self.objects.transaction(|objects| {
            let current: Option<StoredObject> = match objects.get(key.as_bytes())? {
                Some(bytes) => Some(Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?),
                None => None,
            };
            expected
                .check(object, current.as_ref())
                .map_err(ConflictableTransactionError::Abort)?;
            objects.insert(key.as_bytes(), value.as_slice())?;
            Ok(())
        });
        Self::finish(result, "save object")?;
        self.flush_if_configured()
    }

    fn read_object(&self, schema: SchemaName, object_id: &str) -> RevisionResult<StoredObject> {
        let key = StoredObject::key(schema, object_id);

        match self
            .objects
            .get(key.as_bytes())
            .map_err(|e| RevisionError::Storage(format!("Failed to get object: {}", e)))?
        {
            Some(bytes) => Self::deserialize(&bytes),
            None => Err(RevisionError::NotFound(format!("{} {}", schema, object_id))),
        }
    }

    fn objects_of(&self, schema: SchemaName) -> RevisionResult<Vec<StoredObject>> {
        let mut prefix = schema.as_str().as_bytes().to_vec();
        prefix.push(0);

        let mut objects = Vec::new();
        for item in self.objects.scan_prefix(prefix) {
            let (_, value) = item.map_err(|e| RevisionError::Storage(format!("Failed to iterate objects: {}", e)))?;
            objects.push(Self::deserialize(&value)?);
        }
        Ok(objects)
    }
}

fn abort<T>(err: RevisionError) -> ConflictableTransactionResult<T, RevisionError> {
    Err(ConflictableTransactionError::Abort(err))
}

#[async_trait]
impl RevisionStore for SledStorage {
    async fn add(&self, revision: &Revision) -> RevisionResult<()> {
        let revision = revision.clone();
        self.blocking(move |storage| storage.insert_revision(&revision)).await
    }

    async fn update_successor_link(&self, revision_id: &str, successor_id: &str) -> RevisionResult<Revision> {
        let (revision_id, successor_id) = (revision_id.to_string(), successor_id.to_string());
        self.blocking(move |storage| storage.link_successor(&revision_id, &successor_id))
            .await
    }

    async fn append_successor(&self, revision: &Revision, expected_head_id: &str) -> RevisionResult<Revision> {
        let revision = revision.clone();
        let expected_head_id = expected_head_id.to_string();
        self.blocking(move |storage| storage.append_revision(&revision, &expected_head_id))
            .await
    }

    async fn get_latest_by_object_id(&self, object_id: &str) -> RevisionResult<Revision> {
        let object_id = object_id.to_string();
        self.blocking(move |storage| storage.head_of(&object_id)).await
    }

    async fn get_by_id(&self, revision_id: &str) -> RevisionResult<Revision> {
        let revision_id = revision_id.to_string();
        self.blocking(move |storage| storage.revision_by_id(&revision_id))
            .await
    }

    async fn list_all_by_object_id(&self, object_id: &str) -> RevisionResult<Vec<Revision>> {
        let object_id = object_id.to_string();
        self.blocking(move |storage| storage.chain_of(&object_id)).await
    }

    async fn list_heads(&self) -> RevisionResult<Vec<Revision>> {
        self.blocking(|storage| storage.heads()).await
    }

    async fn stats(&self) -> RevisionResult<StoreStats> {
        self.blocking(|storage| storage.collect_stats()).await
    }
}

#[async_trait]
impl ObjectStore for SledStorage {
    async fn put_object(&self, object: &StoredObject, expected: &ObjectVersion) -> RevisionResult<()> {
        let (object, expected) = (object.clone(), expected.clone());
        self.blocking(move |storage| storage.write_object(&object, &expected))
            .await
    }

    async fn get_object(&self, schema: SchemaName, object_id: &str) -> RevisionResult<StoredObject> {
        let object_id = object_id.to_string();
        self.blocking(move |storage| storage.read_object(schema, &object_id))
            .await
    }

    async fn list_objects(&self, schema: SchemaName) -> RevisionResult<Vec<StoredObject>> {
        self.blocking(move |storage| storage.objects_of(schema)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{attribute, policy, root, successor};
    use consent_core::{Actor, ContentHasher, RevisionChainBuilder};
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sled_add_and_get() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");

        storage.add(&r1).await.unwrap();

        assert_eq!(storage.get_by_id(&r1.id).await.unwrap(), r1);
        assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap(), r1);
        assert!(matches!(
            storage.add(&root(&builder, "p1")).await,
            Err(RevisionError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_sled_append_conflict_writes_nothing() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        storage.add(&r1).await.unwrap();

        let r2 = successor(&builder, &r1, "v2").await;
        let losing = successor(&builder, &r1, "v2-other").await;

        storage.append_successor(&r2, &r1.id).await.unwrap();
        let result = storage.append_successor(&losing, &r1.id).await;
        assert!(matches!(result, Err(RevisionError::Conflict { .. })));
        assert!(matches!(storage.get_by_id(&losing.id).await, Err(RevisionError::NotFound(_))));

        let stored_r1 = storage.get_by_id(&r1.id).await.unwrap();
        assert_eq!(stored_r1.successor_id, r2.id);
        assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap().id, r2.id);
    }

    #[tokio::test]
    async fn test_sled_link_successor() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        let r2 = successor(&builder, &r1, "v2").await;

        storage.add(&r1).await.unwrap();
        assert!(matches!(
            storage.update_successor_link(&r1.id, &r2.id).await,
            Err(RevisionError::NotFound(_))
        ));

        storage.add(&r2).await.unwrap();
        storage.update_successor_link(&r1.id, &r2.id).await.unwrap();
        assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap().id, r2.id);
    }

    #[tokio::test]
    async fn test_sled_list_in_chain_order() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();

        let r1 = root(&builder, "p1");
        storage.add(&r1).await.unwrap();
        let r2 = successor(&builder, &r1, "v2").await;
        storage.append_successor(&r2, &r1.id).await.unwrap();
        let r2 = storage.get_by_id(&r2.id).await.unwrap();
        let r3 = successor(&builder, &r2, "v3").await;
        storage.append_successor(&r3, &r2.id).await.unwrap();
        storage.add(&root(&builder, "other")).await.unwrap();

        let chain = storage.list_all_by_object_id("p1").await.unwrap();
        let ids: Vec<_> = chain.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![r1.id, r2.id, r3.id]);

        let report = consent_core::verify_chain("p1", &chain, &ContentHasher::default());
        assert!(report.is_valid, "{:?}", report.violations);
    }

    #[tokio::test]
    async fn test_sled_persistence() {
        let dir = tempdir().unwrap();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");

        {
            let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
            storage.add(&r1).await.unwrap();
            let object = StoredObject::new(&policy("p1", "GDPR Policy"), "org-1", &r1.id).unwrap();
            storage.put_object(&object, &ObjectVersion::Absent).await.unwrap();
            storage.flush().unwrap();
        }

        {
            let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
            assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap(), r1);
            let object = storage.get_object(SchemaName::Policy, "p1").await.unwrap();
            assert_eq!(object.revision_id, r1.id);

            let stats = storage.stats().await.unwrap();
            assert_eq!(stats.total_revisions, 1);
            assert_eq!(stats.live_objects, 1);
        }
    }

    #[tokio::test]
    async fn test_sled_hash_algorithm_is_pinned() {
        let dir = tempdir().unwrap();
        {
            SledStorage::open(dir.path(), HashAlgorithm::Sha256).unwrap();
        }
        assert!(SledStorage::open(dir.path(), HashAlgorithm::Sha256).is_ok());
        let result = SledStorage::open(dir.path(), HashAlgorithm::Sha1);
        assert!(matches!(result, Err(RevisionError::Config(_))));
    }

    #[tokio::test]
    async fn test_sled_list_objects_by_schema() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();

        for id in ["p1", "p2"] {
            let object = StoredObject::new(&policy(id, "GDPR Policy"), "org-1", "r").unwrap();
            storage.put_object(&object, &ObjectVersion::Absent).await.unwrap();
        }
        storage
            .put_object(
                &StoredObject::new(&attribute("a1"), "org-1", "r").unwrap(),
                &ObjectVersion::Absent,
            )
            .await
            .unwrap();

        assert_eq!(storage.list_objects(SchemaName::Policy).await.unwrap().len(), 2);
        assert_eq!(storage.list_objects(SchemaName::DataAttribute).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sled_canonicalization_is_pinned() {
        let dir = tempdir().unwrap();
        {
            let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
            let pinned = storage.meta.get(CANONICALIZATION_KEY).unwrap().unwrap();
            assert_eq!(&pinned[..], CANONICALIZATION_VERSION.as_bytes());
            storage.meta.insert(CANONICALIZATION_KEY, "v0").unwrap();
            storage.flush().unwrap();
        }
        match SledStorage::open(dir.path(), HashAlgorithm::Sha1) {
            Err(RevisionError::Config(reason)) => assert!(reason.contains("canonicalization"), "{}", reason),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_sled_object_write_is_conditional() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();

        let v1 = StoredObject::new(&policy("p1", "GDPR Policy"), "org-1", "r1").unwrap();
        storage.put_object(&v1, &ObjectVersion::Absent).await.unwrap();
        let v2 = StoredObject {
            revision_id: "r2".to_string(),
            ..v1.clone()
        };
        storage.put_object(&v2, &ObjectVersion::of(&v1)).await.unwrap();

        let stale = StoredObject {
            revision_id: "r3".to_string(),
            ..v1.clone()
        };
        assert!(matches!(
            storage.put_object(&stale, &ObjectVersion::of(&v1)).await,
            Err(RevisionError::Conflict { .. })
        ));

        let deleted = StoredObject {
            is_deleted: true,
            ..v2.clone()
        };
        storage.put_object(&deleted, &ObjectVersion::of(&v2)).await.unwrap();
        assert!(matches!(
            storage.put_object(&v2, &ObjectVersion::of(&v2)).await,
            Err(RevisionError::NotFound(_))
        ));
        assert!(storage.get_object(SchemaName::Policy, "p1").await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_sled_object_id_taken_by_other_schema() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();
        storage.add(&root(&builder, "x")).await.unwrap();

        let other = builder
            .create_revision_for(&attribute("x"), &Actor::other("admin-1"))
            .unwrap();
        match storage.add(&other).await {
            Err(RevisionError::AlreadyExists(reason)) => assert!(reason.contains("policy"), "{}", reason),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
        assert_eq!(storage.list_all_by_object_id("x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sled_list_heads() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();

        let p1 = root(&builder, "p1");
        let p2 = root(&builder, "p2");
        storage.add(&p1).await.unwrap();
        storage.add(&p2).await.unwrap();
        let next = successor(&builder, &p1, "v2").await;
        storage.append_successor(&next, &p1.id).await.unwrap();

        let heads = storage.list_heads().await.unwrap();
        let ids: Vec<_> = heads.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![next.id, p2.id]);
    }

    #[tokio::test]
    async fn test_sled_call_yields_to_deadline() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path(), HashAlgorithm::Sha1).unwrap();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");

        // the flushed write is still running on the blocking pool when the deadline passes
        let result = tokio::time::timeout(Duration::ZERO, storage.add(&r1)).await;
        assert!(result.is_err());

        // and it completes anyway
        let mut stored = None;
        for _ in 0..200 {
            if let Ok(revision) = storage.get_by_id(&r1.id).await {
                stored = Some(revision);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, Some(r1));
    }
}
