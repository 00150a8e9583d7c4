//! Schema tags for versioned object types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RevisionError, RevisionResult};

/// Tag identifying which object type a revision belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaName {
    #[serde(rename = "policy")]
    Policy,
    #[serde(rename = "data-agreement")]
    DataAgreement,
    #[serde(rename = "data-attribute")]
    DataAttribute,
    #[serde(rename = "data-agreement-record")]
    DataAgreementRecord,
}

impl SchemaName {
    /// All supported schemas
    pub const ALL: [SchemaName; 4] = [
        Self::Policy,
        Self::DataAgreement,
        Self::DataAttribute,
        Self::DataAgreementRecord,
    ];

    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::DataAgreement => "data-agreement",
            Self::DataAttribute => "data-attribute",
            Self::DataAgreementRecord => "data-agreement-record",
        }
    }

    /// Parse a wire tag with validation
    pub fn parse(s: &str) -> RevisionResult<Self> {
        match s {
            "policy" => Ok(Self::Policy),
            "data-agreement" => Ok(Self::DataAgreement),
            "data-attribute" => Ok(Self::DataAttribute),
            "data-agreement-record" => Ok(Self::DataAgreementRecord),
            other => Err(RevisionError::Validation(format!(
                "Invalid schema name: '{}'. Expected one of: policy, data-agreement, data-attribute, data-agreement-record",
                other
            ))),
        }
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchemaName {
    type Err = RevisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matches_wire_tag() {
        for schema in SchemaName::ALL {
            assert_eq!(SchemaName::parse(schema.as_str()).unwrap(), schema);
            let json = serde_json::to_string(&schema).unwrap();
            assert_eq!(json, format!("\"{}\"", schema.as_str()));
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(
            SchemaName::parse("consent"),
            Err(RevisionError::Validation(_))
        ));
    }
}
