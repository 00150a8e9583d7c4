//! Chain verification
//!
//! Recomputes every revision hash and checks the predecessor/successor
//! lineage of one object's chain. The hash chain is authoritative for
//! structure; timestamps are only checked for monotonicity along it.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::crypto::ContentHasher;
use crate::types::Revision;

/// Kind of integrity violation found in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Stored snapshot no longer matches the record's fields
    SnapshotMismatch,
    /// Stored hash does not match the stored snapshot
    HashMismatch,
    /// Revision belongs to another object or schema
    ForeignRevision,
    MissingRoot,
    MultipleRoots,
    /// `predecessorHash` names no revision in the chain
    BrokenPredecessorLink,
    /// `successorId` disagrees with the successor's `predecessorHash`
    BrokenSuccessorLink,
    /// Two revisions share one predecessor
    Fork,
    MissingHead,
    MultipleHeads,
    /// Not reachable from the root by following successor links
    Unreachable,
    TimestampRegression,
}

/// One violation, attributed to a revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainViolation {
    pub revision_id: String,
    pub kind: ViolationKind,
    pub detail: String,
}

/// Result of verifying one object's revision chain
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub object_id: String,
    /// Is the chain valid?
    pub is_valid: bool,
    pub revision_count: u64,
    pub root_id: Option<String>,
    pub head_id: Option<String>,
    /// Every violation found, in discovery order
    pub violations: Vec<ChainViolation>,
}

impl ChainVerification {
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

/// Verify all revisions of `object_id`
pub fn verify_chain(object_id: &str, revisions: &[Revision], hasher: &ContentHasher) -> ChainVerification {
    let mut violations = Vec::new();
    let mut push = |revision_id: &str, kind: ViolationKind, detail: String| {
        violations.push(ChainViolation {
            revision_id: revision_id.to_string(),
            kind,
            detail,
        });
    };

    let schema = revisions.first().map(|r| r.schema_name);

    for revision in revisions {
        if revision.object_id != object_id || Some(revision.schema_name) != schema {
            push(
                &revision.id,
                ViolationKind::ForeignRevision,
                format!("revision is {}/{}", revision.schema_name, revision.object_id),
            );
        }
        match revision.snapshot_input() {
            Ok(expected) if expected == revision.serialized_snapshot => {}
            Ok(_) => push(
                &revision.id,
                ViolationKind::SnapshotMismatch,
                "record fields differ from serialized snapshot".to_string(),
            ),
            Err(e) => push(&revision.id, ViolationKind::SnapshotMismatch, e.to_string()),
        }
        let recomputed = hasher.digest(revision.serialized_snapshot.as_bytes());
        if recomputed != revision.serialized_hash {
            push(
                &revision.id,
                ViolationKind::HashMismatch,
                format!("stored {} recomputed {}", revision.serialized_hash, recomputed),
            );
        }
    }

    let by_id: HashMap<&str, &Revision> = revisions.iter().map(|r| (r.id.as_str(), r)).collect();
    let by_hash: HashMap<&str, &Revision> = revisions
        .iter()
        .map(|r| (r.serialized_hash.as_str(), r))
        .collect();

    let roots: Vec<&Revision> = revisions.iter().filter(|r| r.is_root()).collect();
    if !revisions.is_empty() {
        match roots.len() {
            0 => push(object_id, ViolationKind::MissingRoot, "no revision without predecessor".to_string()),
            1 => {}
            n => {
                for root in &roots {
                    push(&root.id, ViolationKind::MultipleRoots, format!("{} roots", n));
                }
            }
        }
    }

    let mut children: HashMap<&str, Vec<&Revision>> = HashMap::new();
    for revision in revisions.iter().filter(|r| !r.is_root()) {
        children
            .entry(revision.predecessor_hash.as_str())
            .or_default()
            .push(revision);

        match by_hash.get(revision.predecessor_hash.as_str()) {
            None => push(
                &revision.id,
                ViolationKind::BrokenPredecessorLink,
                format!("predecessor hash {} not found", revision.predecessor_hash),
            ),
            Some(predecessor) if predecessor.successor_id != revision.id => push(
                &revision.id,
                ViolationKind::BrokenSuccessorLink,
                format!(
                    "predecessor {} points at '{}'",
                    predecessor.id, predecessor.successor_id
                ),
            ),
            Some(_) => {}
        }
    }
    for (predecessor_hash, siblings) in &children {
        if siblings.len() > 1 {
            for sibling in siblings {
                push(
                    &sibling.id,
                    ViolationKind::Fork,
                    format!("{} revisions share predecessor {}", siblings.len(), predecessor_hash),
                );
            }
        }
    }

    for revision in revisions.iter().filter(|r| !r.is_head()) {
        let linked = by_id
            .get(revision.successor_id.as_str())
            .map(|s| s.predecessor_hash == revision.serialized_hash)
            .unwrap_or(false);
        if !linked {
            push(
                &revision.id,
                ViolationKind::BrokenSuccessorLink,
                format!("successor {} does not link back", revision.successor_id),
            );
        }
    }

    let heads: Vec<&Revision> = revisions.iter().filter(|r| r.is_head()).collect();
    if !revisions.is_empty() {
        match heads.len() {
            0 => push(object_id, ViolationKind::MissingHead, "every revision is superseded".to_string()),
            1 => {}
            n => {
                for head in &heads {
                    push(&head.id, ViolationKind::MultipleHeads, format!("{} heads", n));
                }
            }
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    if let [root] = roots.as_slice() {
        let mut current = Some(*root);
        while let Some(revision) = current {
            if !visited.insert(revision.id.as_str()) {
                break;
            }
            current = match by_id.get(revision.successor_id.as_str()) {
                Some(next) if !revision.is_head() => {
                    if next.timestamp < revision.timestamp {
                        push(
                            &next.id,
                            ViolationKind::TimestampRegression,
                            format!(
                                "{} is earlier than predecessor {}",
                                next.timestamp_string(),
                                revision.timestamp_string()
                            ),
                        );
                    }
                    Some(*next)
                }
                _ => None,
            };
        }
    }
    for revision in revisions {
        if !roots.is_empty() && !visited.contains(revision.id.as_str()) {
            push(
                &revision.id,
                ViolationKind::Unreachable,
                "not reachable from the root".to_string(),
            );
        }
    }

    ChainVerification {
        object_id: object_id.to_string(),
        is_valid: violations.is_empty(),
        revision_count: revisions.len() as u64,
        root_id: roots.first().map(|r| r.id.clone()),
        head_id: heads.first().map(|r| r.id.clone()),
        violations,
    }
}

/// Order revisions root-to-head by following successor links
///
/// Revisions not reachable from a unique root are appended in timestamp
/// order, so the result always contains every input revision.
pub fn order_by_chain(mut revisions: Vec<Revision>) -> Vec<Revision> {
    revisions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let roots: Vec<usize> = revisions
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_root())
        .map(|(i, _)| i)
        .collect();
    let root = match roots.as_slice() {
        [only] => *only,
        _ => return revisions,
    };

    let index: HashMap<String, usize> = revisions
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut taken = vec![false; revisions.len()];
    let mut order = Vec::with_capacity(revisions.len());
    let mut current = Some(root);
    while let Some(i) = current {
        if taken[i] {
            break;
        }
        taken[i] = true;
        order.push(i);
        current = index.get(&revisions[i].successor_id).copied();
    }
    order.extend((0..revisions.len()).filter(|i| !taken[*i]));

    let mut slots: Vec<Option<Revision>> = revisions.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RevisionChainBuilder;
    use crate::types::{Actor, Policy};

    async fn three_revision_chain(builder: &RevisionChainBuilder) -> Vec<Revision> {
        let actor = Actor::other("admin-1");
        let mut policy = Policy::new("p1", "GDPR Policy", "https://x/policy");
        let r1 = builder.create_revision_for(&policy, &actor).unwrap();
        policy.name = "GDPR Policy v2".to_string();
        let (r2, r1) = builder.update_revision_for(&policy, &r1, &actor).await.unwrap();
        policy.name = "GDPR Policy v3".to_string();
        let (r3, r2) = builder.update_revision_for(&policy, &r2, &actor).await.unwrap();
        vec![r1, r2, r3]
    }

    #[tokio::test]
    async fn test_valid_chain() {
        let builder = RevisionChainBuilder::default();
        let chain = three_revision_chain(&builder).await;

        for pair in chain.windows(2) {
            assert_eq!(pair[1].predecessor_hash, pair[0].serialized_hash);
            assert_eq!(pair[0].successor_id, pair[1].id);
        }

        let report = verify_chain("p1", &chain, builder.hasher());
        assert!(report.is_valid, "{:?}", report.violations);
        assert_eq!(report.revision_count, 3);
        assert_eq!(report.root_id.as_deref(), Some(chain[0].id.as_str()));
        assert_eq!(report.head_id.as_deref(), Some(chain[2].id.as_str()));
    }

    #[tokio::test]
    async fn test_detects_tampered_object_data() {
        let builder = RevisionChainBuilder::default();
        let mut chain = three_revision_chain(&builder).await;
        chain[1].object_data = chain[1].object_data.replace("v2", "v9");

        let report = verify_chain("p1", &chain, builder.hasher());
        assert!(!report.is_valid);
        assert!(report.has(ViolationKind::SnapshotMismatch));
    }

    #[tokio::test]
    async fn test_detects_rewritten_hash() {
        let builder = RevisionChainBuilder::default();
        let mut chain = three_revision_chain(&builder).await;
        chain[0].serialized_hash = builder.hasher().digest(b"forged");

        let report = verify_chain("p1", &chain, builder.hasher());
        assert!(report.has(ViolationKind::HashMismatch));
        assert!(report.has(ViolationKind::BrokenPredecessorLink));
    }

    #[tokio::test]
    async fn test_detects_fork() {
        let builder = RevisionChainBuilder::default();
        let actor = Actor::other("admin-1");
        let policy = Policy::new("p1", "GDPR Policy", "https://x/policy");
        let r1 = builder.create_revision_for(&policy, &actor).unwrap();
        let (a, r1_a) = builder.update_revision_for(&policy, &r1, &actor).await.unwrap();
        let (b, _) = builder.update_revision_for(&policy, &r1, &actor).await.unwrap();

        let report = verify_chain("p1", &[r1_a, a, b], builder.hasher());
        assert!(!report.is_valid);
        assert!(report.has(ViolationKind::Fork));
        assert!(report.has(ViolationKind::MultipleHeads));
    }

    #[tokio::test]
    async fn test_detects_foreign_revision() {
        let builder = RevisionChainBuilder::default();
        let chain = three_revision_chain(&builder).await;
        let report = verify_chain("p2", &chain, builder.hasher());
        assert!(report.has(ViolationKind::ForeignRevision));
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_chain("p1", &[], &ContentHasher::default());
        assert!(report.is_valid);
        assert_eq!(report.revision_count, 0);
        assert!(report.head_id.is_none());
    }

    #[tokio::test]
    async fn test_order_by_chain() {
        let builder = RevisionChainBuilder::default();
        let chain = three_revision_chain(&builder).await;
        let shuffled = vec![chain[2].clone(), chain[0].clone(), chain[1].clone()];

        let ordered = order_by_chain(shuffled);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id.as_str()).collect();
        let expected: Vec<&str> = chain.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, expected);
    }
}
