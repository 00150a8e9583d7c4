//! Canonical Snapshot Codec
//!
//! Produces the deterministic byte form that revision hashes are computed
//! over. Canonical JSON here means: object keys sorted by their UTF-8 bytes
//! at every depth, no insignificant whitespace, and scalars in serde_json's
//! compact form. Sorting is done explicitly rather than relying on the map
//! type behind `serde_json::Value`, so enabling `preserve_order` anywhere in
//! the dependency graph cannot change a hash.

use serde::Serialize;
use serde_json::Value;

use crate::error::{RevisionError, RevisionResult};
use crate::types::{Auditable, SchemaName};

/// Canonicalization algorithm version, pinned for the lifetime of a chain
pub const CANONICALIZATION_VERSION: &str = "v1";

/// Canonical serialized projection of one business object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    schema: SchemaName,
    canonical: String,
}

impl Snapshot {
    pub fn schema(&self) -> SchemaName {
        self.schema
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.canonical.as_bytes()
    }
}

/// Converts versioned objects and records into canonical JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalCodec;

impl CanonicalCodec {
    pub fn new() -> Self {
        Self
    }

    /// Project an object of the given schema into its canonical snapshot
    pub fn project<O: Auditable + ?Sized>(
        &self,
        schema: SchemaName,
        object: &O,
    ) -> RevisionResult<Snapshot> {
        if object.schema_name() != schema {
            return Err(RevisionError::SchemaMismatch {
                expected: schema,
                actual: object.schema_name(),
            });
        }
        let value = object.to_json()?;
        if !value.is_object() {
            return Err(RevisionError::Encoding(format!(
                "{} snapshot must be a JSON object",
                schema
            )));
        }
        Ok(Snapshot {
            schema,
            canonical: canonical_json(&value),
        })
    }

    /// Canonical JSON for any serializable value
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> RevisionResult<String> {
        let value = serde_json::to_value(value).map_err(RevisionError::encoding)?;
        Ok(canonical_json(&value))
    }
}

/// Render a JSON value canonically
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
