//! Core types for modelcast

use crate::{Error, Result, VersionId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One trained model version.
///
/// Once written under its version key a record is never modified; the
/// current pointer holds a full copy of the latest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Unique id of this version
    pub version_id: VersionId,

    /// Serialized model, opaque to the protocol
    pub payload: Vec<u8>,

    /// Creation time in milliseconds since the Unix epoch
    pub created_at: i64,
}

impl ArtifactRecord {
    /// Create a new artifact record
    pub fn new(version_id: VersionId, payload: impl Into<Vec<u8>>, created_at: i64) -> Self {
        Self {
            version_id,
            payload: payload.into(),
            created_at,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Hex-encoded SHA-256 of the payload, for comparing loaded models in logs
    pub fn payload_digest(&self) -> String {
        let digest = Sha256::digest(&self.payload);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Store key and channel names used by the protocol.
///
/// The defaults reproduce the layout every existing producer and consumer
/// expects: `model:<version_id>`, `model:current` and `model-updates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLayout {
    /// Prefix shared by artifact keys and the pointer key
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Suffix of the current pointer key
    #[serde(default = "default_current")]
    pub current: String,

    /// Notification channel name
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl KeyLayout {
    /// Key holding the immutable record of one version
    pub fn artifact_key(&self, version_id: &VersionId) -> String {
        format!("{}:{}", self.prefix, version_id)
    }

    /// Key holding the current pointer
    pub fn current_key(&self) -> String {
        format!("{}:{}", self.prefix, self.current)
    }

    /// Check that a version id does not alias the pointer key
    pub fn validate_version(&self, version_id: &VersionId) -> Result<()> {
        if version_id.as_str() == self.current {
            return Err(Error::config(format!(
                "version id '{}' collides with the current pointer key",
                version_id
            )));
        }
        Ok(())
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            current: default_current(),
            channel: default_channel(),
        }
    }
}

fn default_prefix() -> String {
    "model".to_string()
}

fn default_current() -> String {
    "current".to_string()
}

fn default_channel() -> String {
    "model-updates".to_string()
}
