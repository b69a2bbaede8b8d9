//! Modelcast Protocol
//!
//! Atomic, ordered distribution of model artifacts through a shared
//! key-value store with a pub/sub channel.
//!
//! # Architecture
//!
//! ```text
//! Producer ──> Publisher ──write──> <prefix>:<id>
//!                        ──write──> <prefix>:current
//!                        ──notify─> channel ──> Loader ──> ArtifactHandler
//!                                                  └──read── <prefix>:current
//! ```
//!
//! The publisher always writes the immutable record before moving the
//! pointer and always moves the pointer before announcing. Loaders treat
//! the announcement as a hint and re-read the pointer, so a loader that
//! missed any number of notifications converges on the next one it sees.

pub mod loader;
pub mod producer;
pub mod publisher;
pub mod retry;

pub use loader::{
    ActiveSlot, ArtifactHandler, FnHandler, Loader, LoaderConfig, LoaderHandle, LoaderState,
    RefreshOutcome,
};
pub use producer::{ArtifactProducer, FileProducer, ProducedArtifact};
pub use publisher::{NotifyOutcome, PublishReceipt, Publisher};
pub use retry::{retry_transient, RetryConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::loader::{ArtifactHandler, Loader, LoaderConfig, LoaderHandle, LoaderState};
    pub use crate::publisher::{Publisher, PublishReceipt};
    pub use modelcast_core::prelude::*;
}
