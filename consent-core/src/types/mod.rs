//! Core type definitions
//!
//! Field names follow the platform's JSON conventions (camelCase on the
//! wire). Business object types carry only audited fields.

mod actor;
mod data_agreement;
mod data_agreement_record;
mod data_attribute;
mod object;
mod policy;
mod revision;
mod schema;

pub use actor::*;
pub use data_agreement::*;
pub use data_agreement_record::*;
pub use data_attribute::*;
pub use object::*;
pub use policy::*;
pub use revision::*;
pub use schema::*;
