//! Publisher
//!
//! A publish is three store calls in a fixed order, each finishing before
//! the next starts:
//!
//! 1. write the immutable record under `<prefix>:<version_id>`
//! 2. overwrite the current pointer with the same record
//! 3. broadcast the version id on the notification channel
//!
//! The store offers no transaction across these steps. If step 2 fails the
//! record from step 1 stays retrievable by id and the pointer is unchanged;
//! the next publish moves the pointer. If step 3 fails the artifact and
//! pointer are already durable and only the real-time announcement is lost,
//! so the publish still succeeds and the failure is reported in the
//! receipt. A subscriber woken by the notification therefore always finds
//! the new version behind the pointer.

use crate::producer::ArtifactProducer;
use modelcast_core::{
    encode_record, ArtifactRecord, ArtifactStore, Error, KeyLayout, Result, VersionGenerator,
    VersionId,
};
use modelcast_telemetry::ProtocolMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to the change notification of a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The store accepted the broadcast
    Delivered {
        /// Listeners the message was handed to, when the store reports it
        receivers: Option<usize>,
    },
    /// The broadcast failed; subscribers catch up on their next bootstrap,
    /// poll or successful notification
    Failed(String),
}

impl NotifyOutcome {
    /// Whether the broadcast was accepted
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Published version
    pub version_id: VersionId,

    /// Key the immutable record was written under
    pub artifact_key: String,

    /// Creation timestamp stored with the record
    pub created_at: i64,

    /// Outcome of the broadcast step
    pub notification: NotifyOutcome,
}

/// Publishes artifacts into a store
pub struct Publisher {
    store: Arc<dyn ArtifactStore>,
    keys: KeyLayout,
    generator: VersionGenerator,
    write_timeout: Duration,
    metrics: ProtocolMetrics,
}

impl Publisher {
    /// Create a publisher over `store` using the given key layout
    pub fn new(store: Arc<dyn ArtifactStore>, keys: KeyLayout) -> Self {
        Self {
            store,
            keys,
            generator: VersionGenerator::new(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            metrics: ProtocolMetrics::new(),
        }
    }

    /// Bound every store call by `timeout`
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Report into a shared metrics collector
    pub fn with_metrics(mut self, metrics: ProtocolMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Key layout this publisher writes
    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    /// Publish `payload` as `version_id`.
    ///
    /// Republishing an id with the same payload is harmless. Fails with
    /// [`Error::StoreWrite`] if either write fails; a failed broadcast is
    /// reported in the receipt instead.
    pub async fn publish(
        &self,
        version_id: VersionId,
        payload: impl Into<Vec<u8>>,
        created_at: i64,
    ) -> Result<PublishReceipt> {
        self.keys.validate_version(&version_id)?;

        let started = Instant::now();
        let record = ArtifactRecord::new(version_id, payload, created_at);
        let encoded = encode_record(&record)?;
        let artifact_key = self.keys.artifact_key(&record.version_id);
        let current_key = self.keys.current_key();

        if let Err(e) = self.write(&artifact_key, &encoded).await {
            self.metrics.record_publish_failure();
            warn!(
                version_id = %record.version_id,
                key = %artifact_key,
                error = %e,
                "Artifact write failed, nothing published"
            );
            return Err(e);
        }
        debug!(version_id = %record.version_id, key = %artifact_key, "Artifact written");

        if let Err(e) = self.write(&current_key, &encoded).await {
            self.metrics.record_publish_failure();
            warn!(
                version_id = %record.version_id,
                key = %current_key,
                error = %e,
                "Pointer update failed; artifact stays retrievable by id, pointer unchanged"
            );
            return Err(e);
        }

        let notification = match self.notify(record.version_id.as_str()).await {
            Ok(receivers) => NotifyOutcome::Delivered { receivers },
            Err(e) => {
                self.metrics.record_notify_failure();
                warn!(
                    version_id = %record.version_id,
                    channel = %self.keys.channel,
                    error = %e,
                    "Notification failed; artifact and pointer are durable, live subscribers will miss this update"
                );
                NotifyOutcome::Failed(e.to_string())
            }
        };

        self.metrics
            .record_publish(started.elapsed().as_micros() as u64);
        info!(
            version_id = %record.version_id,
            bytes = record.size(),
            digest = %record.payload_digest(),
            notified = notification.is_delivered(),
            backend = self.store.backend(),
            "Published model"
        );

        Ok(PublishReceipt {
            version_id: record.version_id,
            artifact_key,
            created_at,
            notification,
        })
    }

    /// Publish `payload` under a freshly generated, time-derived version id
    pub async fn publish_new(&self, payload: impl Into<Vec<u8>>) -> Result<PublishReceipt> {
        let (version_id, created_at) = self.generator.next_now();
        self.publish(version_id, payload, created_at).await
    }

    /// Ask `producer` for an artifact and publish it.
    ///
    /// A producer that trained on nothing is refused with
    /// [`Error::NoExamples`] before the store is touched.
    pub async fn publish_from(&self, producer: &dyn ArtifactProducer) -> Result<PublishReceipt> {
        let artifact = producer.produce().await?;
        if let Err(e) = artifact.ensure_trained() {
            warn!(producer = producer.name(), error = %e, "Producer declined to publish");
            return Err(e);
        }

        match artifact.version_id {
            Some(version_id) => {
                let created_at = chrono::Utc::now().timestamp_millis();
                self.publish(version_id, artifact.payload, created_at).await
            }
            None => self.publish_new(artifact.payload).await,
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        match tokio::time::timeout(self.write_timeout, self.store.put(key, value)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::StoreWrite(msg))) => Err(Error::StoreWrite(msg)),
            Ok(Err(other)) => Err(Error::store_write(other.to_string())),
            Err(_) => Err(Error::store_write(format!(
                "write to '{}' timed out after {:?}",
                key, self.write_timeout
            ))),
        }
    }

    async fn notify(&self, version_id: &str) -> Result<Option<usize>> {
        match tokio::time::timeout(
            self.write_timeout,
            self.store.publish_message(&self.keys.channel, version_id),
        )
        .await
        {
            Ok(Ok(receivers)) => Ok(receivers),
            Ok(Err(Error::Notify(msg))) => Err(Error::Notify(msg)),
            Ok(Err(other)) => Err(Error::notify(other.to_string())),
            Err(_) => Err(Error::notify(format!(
                "broadcast timed out after {:?}",
                self.write_timeout
            ))),
        }
    }
}
