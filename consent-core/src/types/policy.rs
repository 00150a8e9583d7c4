//! Policy business object

use serde::{Deserialize, Serialize};

use super::object::{Versioned, VersionedObject};
use super::schema::SchemaName;

/// Governance policy a data agreement is issued under
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub version: String,
    pub url: String,
    pub jurisdiction: String,
    pub industry_sector: String,
    pub data_retention_period_days: u32,
    pub geographic_restriction: String,
    pub storage_location: String,
    pub third_party_data_sharing: bool,
}

impl Policy {
    /// Create a policy with the required fields set
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }
}

impl Versioned for Policy {
    const SCHEMA: SchemaName = SchemaName::Policy;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn into_versioned(self) -> VersionedObject {
        VersionedObject::Policy(self)
    }

    fn from_versioned(object: VersionedObject) -> Option<Self> {
        match object {
            VersionedObject::Policy(policy) => Some(policy),
            _ => None,
        }
    }
}
