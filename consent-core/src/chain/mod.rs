//! Revision chain construction and verification

mod builder;
mod signer;
mod verify;

pub use builder::*;
pub use signer::*;
pub use verify::*;
