//! Object Reconstructor
//!
//! Rehydrates business objects from a revision's `objectData` without
//! touching the live object collection.

use tracing::error;

use crate::error::{RevisionError, RevisionResult};
use crate::logging::operations;
use crate::types::{Revision, SchemaName, Versioned, VersionedObject};

/// Recreate the object of type `T` as of `revision`
pub fn recreate<T: Versioned>(revision: &Revision) -> RevisionResult<T> {
    let object = recreate_object(T::SCHEMA, revision)?;
    T::from_versioned(object).ok_or_else(|| {
        RevisionError::Decode(format!("revision {} did not decode to {}", revision.id, T::SCHEMA))
    })
}

/// Recreate the object of the given schema as of `revision`
pub fn recreate_object(schema: SchemaName, revision: &Revision) -> RevisionResult<VersionedObject> {
    if revision.schema_name != schema {
        return Err(RevisionError::SchemaMismatch {
            expected: schema,
            actual: revision.schema_name,
        });
    }

    let object = VersionedObject::from_json_str(schema, &revision.object_data).map_err(|e| {
        error!(
            operation = operations::RECREATE,
            revision_id = %revision.id,
            object_id = %revision.object_id,
            schema_name = %schema,
            error = %e,
            "Revision objectData does not match schema"
        );
        e
    })?;

    if !revision.signed_without_object_id && object.id() != revision.object_id {
        error!(
            operation = operations::RECREATE,
            revision_id = %revision.id,
            object_id = %revision.object_id,
            decoded_id = %object.id(),
            "Revision objectData belongs to another object"
        );
        return Err(RevisionError::Decode(format!(
            "revision {} carries object {} but is recorded for {}",
            revision.id,
            object.id(),
            revision.object_id
        )));
    }

    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RevisionChainBuilder;
    use crate::types::{
        Actor, AttributeConsent, DataAgreement, DataAgreementRecord, DataAttribute, LawfulBasis,
        Lifecycle, Policy, RecordState,
    };

    fn round_trip<T: Versioned + PartialEq + std::fmt::Debug>(object: T) {
        let builder = RevisionChainBuilder::default();
        let revision = builder
            .create_revision_for(&object, &Actor::other("admin-1"))
            .unwrap();
        let recreated: T = recreate(&revision).unwrap();
        assert_eq!(recreated, object);
    }

    #[test]
    fn test_round_trip_every_schema() {
        let policy = Policy {
            jurisdiction: "EU".to_string(),
            data_retention_period_days: 365,
            third_party_data_sharing: true,
            ..Policy::new("p1", "GDPR Policy", "https://x/policy")
        };
        let attribute = DataAttribute {
            id: "attr-1".to_string(),
            name: "email".to_string(),
            description: "Contact e-mail".to_string(),
            sensitivity: true,
            category: "contact".to_string(),
        };
        let agreement = DataAgreement {
            id: "da-1".to_string(),
            version: "1.0.0".to_string(),
            controller_name: "Acme".to_string(),
            policy: policy.clone(),
            purpose: "Marketing".to_string(),
            lawful_basis: LawfulBasis::LegitimateInterest,
            lifecycle: Lifecycle::Complete,
            active: true,
            data_attributes: vec![attribute.clone()],
            ..Default::default()
        };
        let record = DataAgreementRecord {
            id: "rec-1".to_string(),
            data_agreement_id: "da-1".to_string(),
            data_attributes: vec![AttributeConsent {
                data_attribute_id: "attr-1".to_string(),
                opt_in: true,
            }],
            individual_id: "user-1".to_string(),
            opt_in: true,
            state: RecordState::Signed,
            ..Default::default()
        };

        round_trip(policy);
        round_trip(attribute);
        round_trip(agreement);
        round_trip(record);
    }

    #[test]
    fn test_schema_mismatch() {
        let builder = RevisionChainBuilder::default();
        let revision = builder
            .create_revision_for(&Policy::new("p1", "GDPR Policy", "https://x/policy"), &Actor::other("a"))
            .unwrap();
        let result = recreate::<DataAttribute>(&revision);
        assert!(matches!(
            result,
            Err(RevisionError::SchemaMismatch {
                expected: SchemaName::DataAttribute,
                actual: SchemaName::Policy
            })
        ));
    }

    #[test]
    fn test_decode_error_on_incompatible_data() {
        let builder = RevisionChainBuilder::default();
        let mut revision = builder
            .create_revision_for(&Policy::new("p1", "GDPR Policy", "https://x/policy"), &Actor::other("a"))
            .unwrap();
        revision.object_data = r#"{"id":"p1","dataRetentionPeriodDays":"forever"}"#.to_string();
        assert!(matches!(recreate::<Policy>(&revision), Err(RevisionError::Decode(_))));

        revision.object_data = "not json".to_string();
        assert!(matches!(
            recreate_object(SchemaName::Policy, &revision),
            Err(RevisionError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_error_on_foreign_object_id() {
        let builder = RevisionChainBuilder::default();
        let mut revision = builder
            .create_revision_for(&Policy::new("p1", "GDPR Policy", "https://x/policy"), &Actor::other("a"))
            .unwrap();
        revision.object_id = "p2".to_string();
        assert!(matches!(recreate::<Policy>(&revision), Err(RevisionError::Decode(_))));

        revision.signed_without_object_id = true;
        assert!(recreate::<Policy>(&revision).is_ok());
    }
}
