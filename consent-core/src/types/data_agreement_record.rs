//! Data agreement record (consent record) business object

use serde::{Deserialize, Serialize};

use super::object::{Versioned, VersionedObject};
use super::schema::SchemaName;
use crate::error::{RevisionError, RevisionResult};

/// Signing state of a consent record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    #[default]
    Unsigned,
    Signed,
}

/// Per-attribute consent choice
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeConsent {
    pub data_attribute_id: String,
    pub opt_in: bool,
}

/// An individual's consent against one data agreement revision
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataAgreementRecord {
    pub id: String,
    pub data_agreement_id: String,
    pub data_agreement_revision_id: String,
    pub data_agreement_revision_hash: String,
    pub data_attributes: Vec<AttributeConsent>,
    pub individual_id: String,
    pub opt_in: bool,
    pub state: RecordState,
    pub signature_id: String,
}

impl Versioned for DataAgreementRecord {
    const SCHEMA: SchemaName = SchemaName::DataAgreementRecord;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> RevisionResult<()> {
        if self.id.is_empty() {
            return Err(RevisionError::Validation(
                "data-agreement-record id must not be empty".to_string(),
            ));
        }
        if self.data_agreement_id.is_empty() {
            return Err(RevisionError::Validation(format!(
                "data-agreement-record {} has no data agreement reference",
                self.id
            )));
        }
        Ok(())
    }

    fn into_versioned(self) -> VersionedObject {
        VersionedObject::DataAgreementRecord(self)
    }

    fn from_versioned(object: VersionedObject) -> Option<Self> {
        match object {
            VersionedObject::DataAgreementRecord(record) => Some(record),
            _ => None,
        }
    }
}
