//! Revision record
//!
//! One immutable, hash-identified snapshot of a versioned business object.
//! After insertion the only field that ever changes is `successor_id`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::actor::Actor;
use super::schema::SchemaName;
use crate::canon::{CanonicalCodec, Snapshot};
use crate::crypto::ContentHasher;
use crate::error::{RevisionError, RevisionResult};

/// Revision of a versioned business object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: String,
    pub schema_name: SchemaName,
    pub object_id: String,
    pub signed_without_object_id: bool,
    #[serde(with = "iso_seconds")]
    pub timestamp: DateTime<Utc>,
    pub authorized_by_individual_id: String,
    pub authorized_by_other_id: String,
    pub predecessor_hash: String,
    pub predecessor_signature: String,
    pub object_data: String,
    pub successor_id: String,
    pub serialized_hash: String,
    pub serialized_snapshot: String,
}

/// The hashed view of a revision: every field except the hash itself, the
/// snapshot text, and the successor link that is set after hashing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevisionForHash<'a> {
    id: &'a str,
    schema_name: SchemaName,
    object_id: &'a str,
    signed_without_object_id: bool,
    timestamp: String,
    authorized_by_individual_id: &'a str,
    authorized_by_other_id: &'a str,
    predecessor_hash: &'a str,
    predecessor_signature: &'a str,
    object_data: &'a str,
}

impl Revision {
    /// Start the root revision of a new object's chain
    pub fn init_root(object_id: impl Into<String>, actor: &Actor, schema_name: SchemaName) -> Self {
        Self::init_at(object_id, actor, schema_name, Utc::now())
    }

    /// Start a revision with an explicit creation time (truncated to seconds)
    pub fn init_at(
        object_id: impl Into<String>,
        actor: &Actor,
        schema_name: SchemaName,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schema_name,
            object_id: object_id.into(),
            signed_without_object_id: false,
            timestamp: timestamp.trunc_subsecs(0),
            authorized_by_individual_id: actor.individual_id().to_string(),
            authorized_by_other_id: actor.other_id().to_string(),
            predecessor_hash: String::new(),
            predecessor_signature: String::new(),
            object_data: String::new(),
            successor_id: String::new(),
            serialized_hash: String::new(),
            serialized_snapshot: String::new(),
        }
    }

    /// Start a successor of `previous`
    ///
    /// The timestamp never goes below the predecessor's, so sorting by
    /// timestamp cannot contradict chain order under clock skew.
    pub fn init_successor(previous: &Revision, actor: &Actor) -> Self {
        let now = Utc::now().trunc_subsecs(0);
        let timestamp = now.max(previous.timestamp);
        let mut revision = Self::init_at(previous.object_id.clone(), actor, previous.schema_name, timestamp);
        revision.predecessor_hash = previous.serialized_hash.clone();
        revision
    }

    /// Fill `object_data`, `serialized_snapshot` and `serialized_hash`
    ///
    /// Call after every lineage field is set and before persistence.
    /// Finalizing twice with the same snapshot yields the same hash.
    pub fn finalize(&mut self, object_data: &Snapshot, hasher: &ContentHasher) -> RevisionResult<()> {
        if object_data.schema() != self.schema_name {
            return Err(RevisionError::SchemaMismatch {
                expected: self.schema_name,
                actual: object_data.schema(),
            });
        }
        self.object_data = object_data.as_str().to_string();
        self.serialized_snapshot = self.snapshot_input()?;
        self.serialized_hash = hasher.digest(self.serialized_snapshot.as_bytes());
        Ok(())
    }

    /// Canonical serialization of the hashed view of this record
    pub fn snapshot_input(&self) -> RevisionResult<String> {
        let view = RevisionForHash {
            id: &self.id,
            schema_name: self.schema_name,
            object_id: &self.object_id,
            signed_without_object_id: self.signed_without_object_id,
            timestamp: iso_seconds::format(&self.timestamp),
            authorized_by_individual_id: &self.authorized_by_individual_id,
            authorized_by_other_id: &self.authorized_by_other_id,
            predecessor_hash: &self.predecessor_hash,
            predecessor_signature: &self.predecessor_signature,
            object_data: &self.object_data,
        };
        CanonicalCodec::new().encode(&view)
    }

    /// Whether the record has been finalized
    pub fn is_finalized(&self) -> bool {
        !self.serialized_hash.is_empty()
    }

    /// First revision of its object
    pub fn is_root(&self) -> bool {
        self.predecessor_hash.is_empty()
    }

    /// Current chain head (not yet superseded)
    pub fn is_head(&self) -> bool {
        self.successor_id.is_empty()
    }

    /// Copy of this revision linked forward to `successor_id`
    pub fn with_successor(&self, successor_id: impl Into<String>) -> Self {
        let mut linked = self.clone();
        linked.successor_id = successor_id.into();
        linked
    }

    /// The actor recorded on this revision
    pub fn actor(&self) -> Option<Actor> {
        if !self.authorized_by_individual_id.is_empty() {
            Some(Actor::individual(self.authorized_by_individual_id.clone()))
        } else if !self.authorized_by_other_id.is_empty() {
            Some(Actor::other(self.authorized_by_other_id.clone()))
        } else {
            None
        }
    }

    /// Timestamp in its wire form
    pub fn timestamp_string(&self) -> String {
        iso_seconds::format(&self.timestamp)
    }
}

/// ISO-8601 UTC timestamps with second precision, e.g. `2024-05-01T12:00:00Z`
pub mod iso_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}
