//! Modelcast Core
//!
//! Core types, traits, and utilities shared across modelcast components.
//!
//! This crate provides:
//! - The artifact record, version ids and the store key layout
//! - The JSON/base64 record codec
//! - Error types and result handling
//! - The `ArtifactStore` trait every backend implements
//! - An in-memory store with fault injection for tests and embedded use

pub mod codec;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;
pub mod version;

pub use codec::{decode_record, encode_record};
pub use error::{Error, Result};
pub use memory::{InMemoryStore, StoreOp};
pub use store::{ArtifactStore, MessageStream};
pub use types::{ArtifactRecord, KeyLayout};
pub use version::{VersionGenerator, VersionId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::store::{ArtifactStore, MessageStream};
    pub use crate::types::{ArtifactRecord, KeyLayout};
    pub use crate::version::VersionId;
}
