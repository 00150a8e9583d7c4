//! Consent DB - revision and business-object persistence
//!
//! - `store`: the `RevisionStore` and `ObjectStore` traits with in-memory and
//!   sled backends
//! - `service`: `RevisionService`, the create/update unit of work with
//!   optimistic concurrency, bounded conflict retries and deadlines, plus the
//!   sweep that reconciles live objects with their chain heads
//! - `config`: environment-driven engine configuration

pub mod config;
pub mod service;
pub mod store;

pub use config::{EngineConfig, StorageConfig};
pub use service::{ReconcileFailure, ReconcileReport, RepairOutcome, RevisionService};
pub use store::{
    MemoryStorage, ObjectStore, ObjectVersion, RevisionStore, SledStorage, StoreStats, StoredObject,
};
