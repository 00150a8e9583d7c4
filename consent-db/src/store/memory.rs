//! In-memory storage
//!
//! Used by tests and development runs. Chain state sits behind one lock so a
//! head check and the writes it guards happen without interleaving.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    chain_taken, check_insertable, check_link, ObjectStore, ObjectVersion, RevisionStore, StoreStats, StoredObject,
};
use consent_core::logging::operations;
use consent_core::{order_by_chain, Revision, RevisionError, RevisionResult, SchemaName};

#[derive(Debug, Default)]
struct Chains {
    revisions: HashMap<String, Revision>,
    // object id -> revision ids in insertion order
    by_object: HashMap<String, Vec<String>>,
    // object id -> head revision id
    heads: HashMap<String, String>,
}

impl Chains {
    fn insert(&mut self, revision: Revision) {
        self.by_object
            .entry(revision.object_id.clone())
            .or_default()
            .push(revision.id.clone());
        self.revisions.insert(revision.id.clone(), revision);
    }

    fn get(&self, revision_id: &str) -> RevisionResult<&Revision> {
        self.revisions
            .get(revision_id)
            .ok_or_else(|| RevisionError::NotFound(format!("revision {}", revision_id)))
    }
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    chains: Arc<RwLock<Chains>>,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevisionStore for MemoryStorage {
    async fn add(&self, revision: &Revision) -> RevisionResult<()> {
        check_insertable(revision)?;
        let mut chains = self.chains.write().await;

        if chains.revisions.contains_key(&revision.id) {
            return Err(RevisionError::AlreadyExists(format!("revision {}", revision.id)));
        }
        if revision.is_root() {
            if let Some(head_id) = chains.heads.get(&revision.object_id) {
                return Err(chain_taken(revision, chains.get(head_id)?));
            }
            chains
                .heads
                .insert(revision.object_id.clone(), revision.id.clone());
        }
        chains.insert(revision.clone());

        debug!(
            operation = operations::STORE_ADD,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            "Revision stored"
        );
        Ok(())
    }

    async fn update_successor_link(&self, revision_id: &str, successor_id: &str) -> RevisionResult<Revision> {
        let mut chains = self.chains.write().await;

        let successor = chains.get(successor_id)?.clone();
        let predecessor = chains.get(revision_id)?;
        check_link(predecessor, &successor)?;

        let linked = predecessor.with_successor(successor_id);
        if chains.heads.get(&linked.object_id).map(String::as_str) == Some(revision_id) {
            chains
                .heads
                .insert(linked.object_id.clone(), successor_id.to_string());
        }
        chains.revisions.insert(linked.id.clone(), linked.clone());

        debug!(
            operation = operations::STORE_LINK,
            object_id = %linked.object_id,
            revision_id = %linked.id,
            successor_id = %successor_id,
            "Successor linked"
        );
        Ok(linked)
    }

    async fn append_successor(&self, revision: &Revision, expected_head_id: &str) -> RevisionResult<Revision> {
        check_insertable(revision)?;
        let mut chains = self.chains.write().await;

        if chains.revisions.contains_key(&revision.id) {
            return Err(RevisionError::AlreadyExists(format!("revision {}", revision.id)));
        }
        let head_id = chains
            .heads
            .get(&revision.object_id)
            .cloned()
            .ok_or_else(|| RevisionError::NotFound(format!("revision chain for object {}", revision.object_id)))?;
        if head_id != expected_head_id {
            return Err(RevisionError::Conflict {
                object_id: revision.object_id.clone(),
                expected_head: expected_head_id.to_string(),
                actual_head: head_id,
            });
        }

        let predecessor = chains
            .revisions
            .get(&head_id)
            .ok_or_else(|| RevisionError::Storage(format!("chain head {} is missing", head_id)))?;
        check_link(predecessor, revision)?;
        let linked = predecessor.with_successor(revision.id.clone());

        chains.insert(revision.clone());
        chains.revisions.insert(linked.id.clone(), linked.clone());
        chains
            .heads
            .insert(revision.object_id.clone(), revision.id.clone());

        debug!(
            operation = operations::STORE_APPEND,
            object_id = %revision.object_id,
            revision_id = %revision.id,
            predecessor_id = %linked.id,
            "Successor appended"
        );
        Ok(linked)
    }

    async fn get_latest_by_object_id(&self, object_id: &str) -> RevisionResult<Revision> {
        let chains = self.chains.read().await;
        let head_id = chains
            .heads
            .get(object_id)
            .ok_or_else(|| RevisionError::NotFound(format!("revisions for object {}", object_id)))?;
        chains.get(head_id).cloned()
    }

    async fn get_by_id(&self, revision_id: &str) -> RevisionResult<Revision> {
        self.chains.read().await.get(revision_id).cloned()
    }

    async fn list_all_by_object_id(&self, object_id: &str) -> RevisionResult<Vec<Revision>> {
        let chains = self.chains.read().await;
        let revisions = chains
            .by_object
            .get(object_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| chains.revisions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(order_by_chain(revisions))
    }

    async fn list_heads(&self) -> RevisionResult<Vec<Revision>> {
        let chains = self.chains.read().await;
        let mut heads = chains
            .heads
            .values()
            .map(|id| chains.get(id).cloned())
            .collect::<RevisionResult<Vec<_>>>()?;
        heads.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        Ok(heads)
    }

    async fn stats(&self) -> RevisionResult<StoreStats> {
        let chains = self.chains.read().await;
        let objects = self.objects.read().await;
        let deleted_objects = objects.values().filter(|o| o.is_deleted).count() as u64;

        Ok(StoreStats {
            total_revisions: chains.revisions.len() as u64,
            chains: chains.heads.len() as u64,
            live_objects: objects.len() as u64 - deleted_objects,
            deleted_objects,
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn put_object(&self, object: &StoredObject, expected: &ObjectVersion) -> RevisionResult<()> {
        let key = StoredObject::key(object.schema_name, &object.id);
        let mut objects = self.objects.write().await;
        expected.check(object, objects.get(&key))?;
        objects.insert(key, object.clone());
        Ok(())
    }

    async fn get_object(&self, schema: SchemaName, object_id: &str) -> RevisionResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(&StoredObject::key(schema, object_id))
            .cloned()
            .ok_or_else(|| RevisionError::NotFound(format!("{} {}", schema, object_id)))
    }

    async fn list_objects(&self, schema: SchemaName) -> RevisionResult<Vec<StoredObject>> {
        let mut objects: Vec<StoredObject> = self
            .objects
            .read()
            .await
            .values()
            .filter(|o| o.schema_name == schema)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{attribute, policy, root, successor};
    use consent_core::{Actor, RevisionChainBuilder};

    #[tokio::test]
    async fn test_add_and_get_root() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");

        storage.add(&r1).await.unwrap();

        assert_eq!(storage.get_by_id(&r1.id).await.unwrap(), r1);
        assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap(), r1);
    }

    #[tokio::test]
    async fn test_second_root_rejected() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();

        storage.add(&root(&builder, "p1")).await.unwrap();
        let result = storage.add(&root(&builder, "p1")).await;
        assert!(matches!(result, Err(RevisionError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_missing_revision_is_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get_latest_by_object_id("nope").await,
            Err(RevisionError::NotFound(_))
        ));
        assert!(matches!(storage.get_by_id("nope").await, Err(RevisionError::NotFound(_))));
        assert!(storage.list_all_by_object_id("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_then_link_moves_head() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        let r2 = successor(&builder, &r1, "v2").await;

        storage.add(&r1).await.unwrap();
        storage.add(&r2).await.unwrap();
        assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap().id, r1.id);

        let linked = storage.update_successor_link(&r1.id, &r2.id).await.unwrap();
        assert_eq!(linked.successor_id, r2.id);
        assert_eq!(linked.serialized_hash, r1.serialized_hash);
        assert_eq!(storage.get_latest_by_object_id("p1").await.unwrap().id, r2.id);
    }

    #[tokio::test]
    async fn test_link_requires_stored_successor() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        let r2 = successor(&builder, &r1, "v2").await;

        storage.add(&r1).await.unwrap();
        let result = storage.update_successor_link(&r1.id, &r2.id).await;
        assert!(matches!(result, Err(RevisionError::NotFound(_))));
        assert!(storage.get_by_id(&r1.id).await.unwrap().successor_id.is_empty());
    }

    #[tokio::test]
    async fn test_link_never_overwrites_successor() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        let r2 = successor(&builder, &r1, "v2").await;
        let sibling = successor(&builder, &r1, "sibling").await;

        storage.add(&r1).await.unwrap();
        storage.add(&r2).await.unwrap();
        storage.add(&sibling).await.unwrap();
        storage.update_successor_link(&r1.id, &r2.id).await.unwrap();

        let result = storage.update_successor_link(&r1.id, &sibling.id).await;
        assert!(matches!(result, Err(RevisionError::Conflict { .. })));
        assert_eq!(storage.get_by_id(&r1.id).await.unwrap().successor_id, r2.id);
    }

    #[tokio::test]
    async fn test_append_successor_checks_head() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        storage.add(&r1).await.unwrap();

        let r2 = successor(&builder, &r1, "v2").await;
        let losing = successor(&builder, &r1, "v2-other").await;

        let linked = storage.append_successor(&r2, &r1.id).await.unwrap();
        assert_eq!(linked.successor_id, r2.id);

        match storage.append_successor(&losing, &r1.id).await {
            Err(RevisionError::Conflict { expected_head, actual_head, .. }) => {
                assert_eq!(expected_head, r1.id);
                assert_eq!(actual_head, r2.id);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(matches!(storage.get_by_id(&losing.id).await, Err(RevisionError::NotFound(_))));

        let chain = storage.list_all_by_object_id("p1").await.unwrap();
        let ids: Vec<_> = chain.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![r1.id.as_str(), r2.id.as_str()]);
    }

    #[tokio::test]
    async fn test_append_rejects_unlinked_revision() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        storage.add(&r1).await.unwrap();

        let mut forged = successor(&builder, &r1, "v2").await;
        forged.predecessor_hash = "0".repeat(40);
        let result = storage.append_successor(&forged, &r1.id).await;
        assert!(matches!(result, Err(RevisionError::Validation(_))));
    }

    #[tokio::test]
    async fn test_objects_and_stats() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let r1 = root(&builder, "p1");
        storage.add(&r1).await.unwrap();

        let mut live = StoredObject::new(&policy("p1", "GDPR Policy"), "org-1", &r1.id).unwrap();
        storage.put_object(&live, &ObjectVersion::Absent).await.unwrap();
        live.id = "p2".to_string();
        live.is_deleted = true;
        storage.put_object(&live, &ObjectVersion::Absent).await.unwrap();

        let fetched = storage.get_object(SchemaName::Policy, "p1").await.unwrap();
        assert_eq!(fetched.organisation_id, "org-1");
        assert!(matches!(
            storage.get_object(SchemaName::DataAttribute, "p1").await,
            Err(RevisionError::NotFound(_))
        ));
        assert_eq!(storage.list_objects(SchemaName::Policy).await.unwrap().len(), 2);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_revisions, 1);
        assert_eq!(stats.chains, 1);
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.deleted_objects, 1);
    }

    #[tokio::test]
    async fn test_object_write_is_conditional() {
        let storage = MemoryStorage::new();
        let v1 = StoredObject::new(&policy("p1", "GDPR Policy"), "org-1", "r1").unwrap();
        storage.put_object(&v1, &ObjectVersion::Absent).await.unwrap();
        assert!(matches!(
            storage.put_object(&v1, &ObjectVersion::Absent).await,
            Err(RevisionError::AlreadyExists(_))
        ));

        let v2 = StoredObject {
            revision_id: "r2".to_string(),
            ..v1.clone()
        };
        storage.put_object(&v2, &ObjectVersion::of(&v1)).await.unwrap();

        // a writer that still holds r1 loses
        let stale = StoredObject {
            revision_id: "r3".to_string(),
            ..v1.clone()
        };
        match storage.put_object(&stale, &ObjectVersion::of(&v1)).await {
            Err(RevisionError::Conflict { expected_head, actual_head, .. }) => {
                assert_eq!(expected_head, "r1");
                assert_eq!(actual_head, "r2");
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let deleted = StoredObject {
            is_deleted: true,
            ..v2.clone()
        };
        storage.put_object(&deleted, &ObjectVersion::of(&v2)).await.unwrap();
        let revived = StoredObject {
            revision_id: "r4".to_string(),
            ..v2.clone()
        };
        assert!(matches!(
            storage.put_object(&revived, &ObjectVersion::of(&v2)).await,
            Err(RevisionError::NotFound(_))
        ));

        let fetched = storage.get_object(SchemaName::Policy, "p1").await.unwrap();
        assert!(fetched.is_deleted);
        assert_eq!(fetched.revision_id, "r2");
    }

    #[tokio::test]
    async fn test_object_id_taken_by_other_schema() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        storage.add(&root(&builder, "x")).await.unwrap();

        let other = builder
            .create_revision_for(&attribute("x"), &Actor::other("admin-1"))
            .unwrap();
        match storage.add(&other).await {
            Err(RevisionError::AlreadyExists(reason)) => assert!(reason.contains("policy"), "{}", reason),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }

        let chain = storage.list_all_by_object_id("x").await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].schema_name, SchemaName::Policy);
    }

    #[tokio::test]
    async fn test_list_heads() {
        let storage = MemoryStorage::new();
        let builder = RevisionChainBuilder::default();
        let p2 = root(&builder, "p2");
        let p1 = root(&builder, "p1");
        storage.add(&p2).await.unwrap();
        storage.add(&p1).await.unwrap();
        let next = successor(&builder, &p1, "v2").await;
        storage.append_successor(&next, &p1.id).await.unwrap();

        let heads = storage.list_heads().await.unwrap();
        let ids: Vec<_> = heads.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![next.id, p2.id]);
    }
}
