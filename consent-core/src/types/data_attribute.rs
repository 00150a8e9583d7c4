//! Data attribute business object

use serde::{Deserialize, Serialize};

use super::object::{Versioned, VersionedObject};
use super::schema::SchemaName;

/// A personal data attribute collected under an agreement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataAttribute {
    pub id: String,
    pub name: String,
    pub description: String,
    pub sensitivity: bool,
    pub category: String,
}

impl Versioned for DataAttribute {
    const SCHEMA: SchemaName = SchemaName::DataAttribute;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn into_versioned(self) -> VersionedObject {
        VersionedObject::DataAttribute(self)
    }

    fn from_versioned(object: VersionedObject) -> Option<Self> {
        match object {
            VersionedObject::DataAttribute(attribute) => Some(attribute),
            _ => None,
        }
    }
}
