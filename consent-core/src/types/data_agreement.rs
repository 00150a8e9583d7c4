//! Data agreement business object

use serde::{Deserialize, Serialize};

use super::data_attribute::DataAttribute;
use super::object::{Versioned, VersionedObject};
use super::policy::Policy;
use super::schema::SchemaName;
use crate::error::{RevisionError, RevisionResult};

/// GDPR lawful basis for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawfulBasis {
    #[default]
    Consent,
    Contract,
    LegalObligation,
    VitalInterest,
    PublicTask,
    LegitimateInterest,
}

/// How collected data is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodOfUse {
    #[default]
    NullAttribute,
    DataSource,
    DataUsingService,
}

/// Agreement lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Draft,
    Complete,
}

/// Data agreement between a controller and individuals
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataAgreement {
    pub id: String,
    pub version: String,
    pub controller_id: String,
    pub controller_url: String,
    pub controller_name: String,
    pub policy: Policy,
    pub purpose: String,
    pub purpose_description: String,
    pub lawful_basis: LawfulBasis,
    pub method_of_use: MethodOfUse,
    pub dpia_date: String,
    pub dpia_summary_url: String,
    pub active: bool,
    pub forgettable: bool,
    pub compatible_with_version_id: String,
    pub lifecycle: Lifecycle,
    pub data_attributes: Vec<DataAttribute>,
}

impl Versioned for DataAgreement {
    const SCHEMA: SchemaName = SchemaName::DataAgreement;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> RevisionResult<()> {
        if self.id.is_empty() {
            return Err(RevisionError::Validation(
                "data-agreement id must not be empty".to_string(),
            ));
        }
        if self.lifecycle == Lifecycle::Complete && self.purpose.is_empty() {
            return Err(RevisionError::Validation(format!(
                "data-agreement {} cannot be complete without a purpose",
                self.id
            )));
        }
        Ok(())
    }

    fn into_versioned(self) -> VersionedObject {
        VersionedObject::DataAgreement(self)
    }

    fn from_versioned(object: VersionedObject) -> Option<Self> {
        match object {
            VersionedObject::DataAgreement(agreement) => Some(agreement),
            _ => None,
        }
    }
}
