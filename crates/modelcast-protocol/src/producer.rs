//! Producer side of the protocol
//!
//! Training jobs are opaque to modelcast: they hand over a serialized
//! model and, when they know it, how many examples it was trained on. A
//! producer with nothing to train on must decline instead of publishing a
//! degenerate model.

use async_trait::async_trait;
use modelcast_core::{Error, Result, VersionId};
use std::path::PathBuf;
use tracing::debug;

/// Artifact handed over by a producer
#[derive(Debug, Clone)]
pub struct ProducedArtifact {
    /// Serialized model
    pub payload: Vec<u8>,

    /// Number of labeled examples the model was trained on, if known
    pub example_count: Option<usize>,

    /// Fixed version id; a time-derived one is generated when absent
    pub version_id: Option<VersionId>,
}

impl ProducedArtifact {
    /// Create an artifact from a serialized model
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            example_count: None,
            version_id: None,
        }
    }

    /// Record how many examples the model was trained on
    pub fn with_example_count(mut self, count: usize) -> Self {
        self.example_count = Some(count);
        self
    }

    /// Publish under a fixed version id
    pub fn with_version_id(mut self, version_id: VersionId) -> Self {
        self.version_id = Some(version_id);
        self
    }

    /// Refuse artifacts that carry no trained model
    pub fn ensure_trained(&self) -> Result<()> {
        if self.example_count == Some(0) {
            return Err(Error::no_examples("producer trained on zero examples"));
        }
        if self.payload.is_empty() {
            return Err(Error::no_examples("producer returned an empty artifact"));
        }
        Ok(())
    }
}

/// Source of newly trained artifacts
#[async_trait]
pub trait ArtifactProducer: Send + Sync {
    /// Produce the next artifact to publish
    async fn produce(&self) -> Result<ProducedArtifact>;

    /// Producer name used in logs
    fn name(&self) -> &str;
}

/// Producer that reads a pre-existing artifact file, used to seed a store
/// before any training job has run
#[derive(Debug, Clone)]
pub struct FileProducer {
    path: PathBuf,
    version_id: Option<VersionId>,
}

impl FileProducer {
    /// Create a producer for the artifact at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version_id: None,
        }
    }

    /// Publish the file under a fixed version id
    pub fn with_version_id(mut self, version_id: VersionId) -> Self {
        self.version_id = Some(version_id);
        self
    }
}

#[async_trait]
impl ArtifactProducer for FileProducer {
    async fn produce(&self) -> Result<ProducedArtifact> {
        let payload = tokio::fs::read(&self.path).await?;
        debug!(path = %self.path.display(), bytes = payload.len(), "Read artifact file");

        if payload.is_empty() {
            return Err(Error::no_examples(format!(
                "artifact file {} is empty",
                self.path.display()
            )));
        }

        let mut artifact = ProducedArtifact::new(payload);
        artifact.version_id = self.version_id.clone();
        Ok(artifact)
    }

    fn name(&self) -> &str {
        "file"
    }
}
