//! Versioned business objects
//!
//! Each business object type serializes to exactly its audited field
//! projection. Storage-only fields (tenant scope, soft-delete flag) are kept
//! outside these types, in the store's envelope, so they can never leak into
//! a revision's `objectData`.

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use super::data_agreement::DataAgreement;
use super::data_agreement_record::DataAgreementRecord;
use super::data_attribute::DataAttribute;
use super::policy::Policy;
use super::schema::SchemaName;
use crate::error::{RevisionError, RevisionResult};

/// A business object type whose mutations are recorded in a revision chain
pub trait Versioned: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Schema tag written to every revision of this type
    const SCHEMA: SchemaName;

    /// Identifier of the business object (the chain's `objectId`)
    fn object_id(&self) -> &str;

    /// Reject values that must not be versioned
    fn validate(&self) -> RevisionResult<()> {
        if self.object_id().is_empty() {
            return Err(RevisionError::Validation(format!(
                "{} id must not be empty",
                Self::SCHEMA
            )));
        }
        Ok(())
    }

    /// Wrap into the tagged variant
    fn into_versioned(self) -> VersionedObject;

    /// Unwrap from the tagged variant, `None` on a different schema
    fn from_versioned(object: VersionedObject) -> Option<Self>;
}

/// Object-safe view used by the codec and the chain builder
pub trait Auditable {
    fn schema_name(&self) -> SchemaName;
    fn audited_object_id(&self) -> &str;
    fn check(&self) -> RevisionResult<()>;
    fn to_json(&self) -> RevisionResult<serde_json::Value>;
}

impl<T: Versioned> Auditable for T {
    fn schema_name(&self) -> SchemaName {
        T::SCHEMA
    }

    fn audited_object_id(&self) -> &str {
        self.object_id()
    }

    fn check(&self) -> RevisionResult<()> {
        self.validate()
    }

    fn to_json(&self) -> RevisionResult<serde_json::Value> {
        serde_json::to_value(self).map_err(RevisionError::encoding)
    }
}

/// Any supported business object, tagged by schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedObject {
    Policy(Policy),
    DataAgreement(DataAgreement),
    DataAttribute(DataAttribute),
    DataAgreementRecord(DataAgreementRecord),
}

impl VersionedObject {
    /// Deserialize a value according to the given schema
    pub fn from_value(schema: SchemaName, value: serde_json::Value) -> RevisionResult<Self> {
        let object = match schema {
            SchemaName::Policy => Self::Policy(decode(value)?),
            SchemaName::DataAgreement => Self::DataAgreement(decode(value)?),
            SchemaName::DataAttribute => Self::DataAttribute(decode(value)?),
            SchemaName::DataAgreementRecord => Self::DataAgreementRecord(decode(value)?),
        };
        Ok(object)
    }

    /// Deserialize JSON text according to the given schema
    pub fn from_json_str(schema: SchemaName, json: &str) -> RevisionResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(RevisionError::decode)?;
        Self::from_value(schema, value)
    }

    pub fn schema(&self) -> SchemaName {
        match self {
            Self::Policy(_) => SchemaName::Policy,
            Self::DataAgreement(_) => SchemaName::DataAgreement,
            Self::DataAttribute(_) => SchemaName::DataAttribute,
            Self::DataAgreementRecord(_) => SchemaName::DataAgreementRecord,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Policy(o) => o.object_id(),
            Self::DataAgreement(o) => o.object_id(),
            Self::DataAttribute(o) => o.object_id(),
            Self::DataAgreementRecord(o) => o.object_id(),
        }
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> RevisionResult<T> {
    serde_json::from_value(value).map_err(RevisionError::decode)
}

impl Serialize for VersionedObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Policy(o) => o.serialize(serializer),
            Self::DataAgreement(o) => o.serialize(serializer),
            Self::DataAttribute(o) => o.serialize(serializer),
            Self::DataAgreementRecord(o) => o.serialize(serializer),
        }
    }
}

impl Auditable for VersionedObject {
    fn schema_name(&self) -> SchemaName {
        self.schema()
    }

    fn audited_object_id(&self) -> &str {
        self.id()
    }

    fn check(&self) -> RevisionResult<()> {
        match self {
            Self::Policy(o) => o.validate(),
            Self::DataAgreement(o) => o.validate(),
            Self::DataAttribute(o) => o.validate(),
            Self::DataAgreementRecord(o) => o.validate(),
        }
    }

    fn to_json(&self) -> RevisionResult<serde_json::Value> {
        serde_json::to_value(self).map_err(RevisionError::encoding)
    }
}
