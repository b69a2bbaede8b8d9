//! Subscriber/Loader
//!
//! A loader keeps one artifact active for a consumer. It combines two
//! sources of truth:
//!
//! - **Bootstrap**: the current pointer is read once at startup, so a
//!   loader started after any number of publishes activates the latest
//!   one without ever seeing a notification.
//! - **Live updates**: every notification triggers a re-read of the
//!   pointer, and the result is activated if it differs from the active
//!   version. Optional polling re-reads the pointer on a timer as well.
//!
//! The channel subscription is opened before the bootstrap read, so a
//! publish landing between the two is seen by one or the other.
//!
//! Activation is all-or-nothing: the consumer's handler only ever receives
//! a fully decoded record, and the active slot is swapped only after the
//! handler accepted it. Malformed records and rejected artifacts leave the
//! previous version active.

use crate::retry::{retry_transient, RetryConfig};
use async_trait::async_trait;
use futures::StreamExt;
use modelcast_core::{
    decode_record, ArtifactRecord, ArtifactStore, Error, KeyLayout, MessageStream, Result,
    VersionId,
};
use modelcast_telemetry::ProtocolMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumer-side activation callback
#[async_trait]
pub trait ArtifactHandler: Send + Sync {
    /// Make `artifact` the model in use.
    ///
    /// Returning an error keeps the previously active version.
    async fn activate(&self, artifact: Arc<ArtifactRecord>) -> Result<()>;
}

/// Adapter turning a closure into an [`ArtifactHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&ArtifactRecord) -> Result<()> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ArtifactHandler for FnHandler<F>
where
    F: Fn(&ArtifactRecord) -> Result<()> + Send + Sync,
{
    async fn activate(&self, artifact: Arc<ArtifactRecord>) -> Result<()> {
        (self.f)(&artifact)
    }
}

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Bound on each pointer or artifact read (milliseconds); 0 disables it
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Re-read the pointer on this interval in addition to notifications
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Backoff for bootstrap and refresh reads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backoff for re-opening a lost channel subscription
    #[serde(default = "default_resubscribe")]
    pub resubscribe: RetryConfig,
}

impl LoaderConfig {
    fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: None,
            retry: RetryConfig::default(),
            resubscribe: default_resubscribe(),
        }
    }
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_resubscribe() -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(30)
        .with_delays(Duration::from_millis(250), Duration::from_secs(30))
}

/// Lifecycle of a loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderState {
    /// `run` has not been called yet
    Uninitialized,
    /// Running, no version activated yet
    Bootstrapping,
    /// Running with this version active
    Active(VersionId),
}

/// What the loader currently serves
#[derive(Debug, Clone)]
pub struct ActiveSlot {
    /// Loader lifecycle state
    pub state: LoaderState,
    /// Active artifact, present exactly when the state is `Active`
    pub artifact: Option<Arc<ArtifactRecord>>,
}

/// Cheap, cloneable view of a loader's active slot
#[derive(Debug, Clone)]
pub struct LoaderHandle {
    rx: watch::Receiver<ActiveSlot>,
}

impl LoaderHandle {
    /// Current lifecycle state
    pub fn state(&self) -> LoaderState {
        self.rx.borrow().state.clone()
    }

    /// Currently active artifact
    pub fn active(&self) -> Option<Arc<ArtifactRecord>> {
        self.rx.borrow().artifact.clone()
    }

    /// Id of the currently active artifact
    pub fn active_version(&self) -> Option<VersionId> {
        match &self.rx.borrow().state {
            LoaderState::Active(version_id) => Some(version_id.clone()),
            _ => None,
        }
    }

    /// Wait until `version_id` is active
    pub async fn wait_for_version(&self, version_id: &VersionId) -> Result<()> {
        let mut rx = self.rx.clone();
        rx.wait_for(|slot| slot.state == LoaderState::Active(version_id.clone()))
            .await
            .map(|_| ())
            .map_err(|_| Error::Cancelled)
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<ActiveSlot> {
        self.rx.clone()
    }
}

/// Result of one pointer refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new version was activated
    Activated(VersionId),
    /// The pointer holds the version that is already active
    Unchanged,
    /// Nothing has been published yet
    Empty,
    /// The record was malformed or the handler refused it
    Rejected,
}

/// Pointer read result, before the handler is involved
enum Fetched {
    /// A new version to hand to the handler
    Candidate(Arc<ArtifactRecord>),
    /// Nothing to activate
    Settled(RefreshOutcome),
}

/// Long-lived consumer that keeps the latest published artifact active
pub struct Loader {
    store: Arc<dyn ArtifactStore>,
    keys: KeyLayout,
    config: LoaderConfig,
    metrics: ProtocolMetrics,
    slot: watch::Sender<ActiveSlot>,
}

impl Loader {
    /// Create a loader over `store`
    pub fn new(store: Arc<dyn ArtifactStore>, keys: KeyLayout, config: LoaderConfig) -> Self {
        let (slot, _) = watch::channel(ActiveSlot {
            state: LoaderState::Uninitialized,
            artifact: None,
        });
        Self {
            store,
            keys,
            config,
            metrics: ProtocolMetrics::new(),
            slot,
        }
    }

    /// Report into a shared metrics collector
    pub fn with_metrics(mut self, metrics: ProtocolMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// View of the active slot that stays valid while the loader runs
    pub fn handle(&self) -> LoaderHandle {
        LoaderHandle {
            rx: self.slot.subscribe(),
        }
    }

    /// Run until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation, dropping the channel subscription.
    /// Returns an error only when a bounded retry budget is exhausted
    /// during bootstrap or while re-subscribing.
    pub async fn run(&self, handler: &dyn ArtifactHandler, cancel: CancellationToken) -> Result<()> {
        match self.run_inner(handler, &cancel).await {
            Err(Error::Cancelled) => {
                info!(channel = %self.keys.channel, "Loader cancelled, subscription released");
                Ok(())
            }
            other => other,
        }
    }

    async fn run_inner(&self, handler: &dyn ArtifactHandler, cancel: &CancellationToken) -> Result<()> {
        self.slot.send_modify(|slot| {
            if slot.artifact.is_none() {
                slot.state = LoaderState::Bootstrapping;
            }
        });

        let mut stream = self.subscribe(cancel).await?;

        match self.refresh(handler, None, cancel).await? {
            RefreshOutcome::Empty => {
                info!(key = %self.keys.current_key(), "No model published yet, waiting for the first publish");
            }
            outcome => debug!(?outcome, "Bootstrap complete"),
        }

        let mut poll = self.config.poll_interval_ms.map(|ms| {
            let period = Duration::from_millis(ms.max(1));
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                message = stream.next() => match message {
                    Some(payload) => self.on_notification(handler, &payload, cancel).await?,
                    None => {
                        warn!(channel = %self.keys.channel, "Notification channel closed, resubscribing");
                        stream = self.subscribe(cancel).await?;
                        self.metrics.record_resubscription();
                        // Anything published while disconnected was never delivered
                        self.refresh_logged(handler, None, cancel).await?;
                    }
                },
                _ = next_tick(&mut poll) => {
                    self.refresh_logged(handler, None, cancel).await?;
                }
            }
        }
    }

    async fn on_notification(
        &self,
        handler: &dyn ArtifactHandler,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let announced = VersionId::new(payload.trim()).ok();
        match &announced {
            Some(version_id) if self.is_active(version_id) => {
                self.metrics.record_duplicate();
                debug!(version_id = %version_id, "Notification for active version ignored");
                Ok(())
            }
            Some(version_id) => {
                debug!(version_id = %version_id, "Update announced");
                self.refresh_logged(handler, announced.as_ref(), cancel).await
            }
            None => {
                warn!(payload = %payload, "Unrecognized notification payload, re-reading pointer");
                self.refresh_logged(handler, None, cancel).await
            }
        }
    }

    /// Refresh, logging read failures that outlived their retry budget
    /// instead of stopping the loader. Only cancellation propagates.
    async fn refresh_logged(
        &self,
        handler: &dyn ArtifactHandler,
        announced: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.refresh(handler, announced, cancel).await {
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                error!(error = %e, "Pointer refresh failed, keeping active version");
                Ok(())
            }
        }
    }

    /// Read the current pointer and activate it if it is new.
    ///
    /// Only the fetch is cancellable. Once the handler has been entered it
    /// runs to completion and the slot is updated before cancellation is
    /// observed again.
    async fn refresh(
        &self,
        handler: &dyn ArtifactHandler,
        announced: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            fetched = self.fetch(announced, cancel) => fetched?,
        };

        match fetched {
            Fetched::Candidate(record) => Ok(self.activate(handler, record).await),
            Fetched::Settled(outcome) => Ok(outcome),
        }
    }

    async fn fetch(
        &self,
        announced: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let mut raw = self.read(&self.keys.current_key(), cancel).await?;
        if raw.is_none() {
            if let Some(version_id) = announced {
                warn!(version_id = %version_id, "Pointer missing, fetching announced version by id");
                raw = self.read(&self.keys.artifact_key(version_id), cancel).await?;
            }
        }

        let Some(raw) = raw else {
            return Ok(Fetched::Settled(RefreshOutcome::Empty));
        };

        let record = match decode_record(&raw) {
            Ok(record) => Arc::new(record),
            Err(e) => {
                self.metrics.record_decode_failure();
                warn!(error = %e, "Malformed record, keeping active version");
                return Ok(Fetched::Settled(RefreshOutcome::Rejected));
            }
        };

        let active = self.active_version();
        if active.as_ref() == Some(&record.version_id) {
            debug!(version_id = %record.version_id, "Pointer unchanged");
            return Ok(Fetched::Settled(RefreshOutcome::Unchanged));
        }
        if let Some(active) = &active {
            if record.version_id.precedes(active) {
                warn!(
                    active = %active,
                    pointer = %record.version_id,
                    "Pointer moved to an older version (concurrent publishers?), following it"
                );
            }
        }

        Ok(Fetched::Candidate(record))
    }

    async fn activate(
        &self,
        handler: &dyn ArtifactHandler,
        record: Arc<ArtifactRecord>,
    ) -> RefreshOutcome {
        if let Err(e) = handler.activate(Arc::clone(&record)).await {
            self.metrics.record_handler_rejection();
            warn!(
                version_id = %record.version_id,
                error = %e,
                "Consumer rejected artifact, keeping active version"
            );
            return RefreshOutcome::Rejected;
        }

        let version_id = record.version_id.clone();
        self.slot.send_replace(ActiveSlot {
            state: LoaderState::Active(version_id.clone()),
            artifact: Some(Arc::clone(&record)),
        });
        self.metrics.record_activation(version_id.as_str());
        info!(
            version_id = %version_id,
            created_at = record.created_at,
            bytes = record.size(),
            digest = %record.payload_digest(),
            "Activated model"
        );

        RefreshOutcome::Activated(version_id)
    }

    async fn read(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        let timeout = self.config.read_timeout();
        retry_transient(
            &self.config.retry,
            cancel,
            key,
            |_| self.metrics.record_read_retry(),
            |_| async move {
                match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, self.store.get(key))
                        .await
                        .map_err(|_| Error::Timeout)?,
                    None => self.store.get(key).await,
                }
            },
        )
        .await
    }

    async fn subscribe(&self, cancel: &CancellationToken) -> Result<MessageStream> {
        let channel = self.keys.channel.as_str();
        let stream = retry_transient(
            &self.config.resubscribe,
            cancel,
            channel,
            |_| {},
            |_| self.store.subscribe(channel),
        )
        .await?;
        debug!(channel = %channel, backend = self.store.backend(), "Listening for updates");
        Ok(stream)
    }

    fn is_active(&self, version_id: &VersionId) -> bool {
        matches!(&self.slot.borrow().state, LoaderState::Active(active) if active == version_id)
    }

    fn active_version(&self) -> Option<VersionId> {
        match &self.slot.borrow().state {
            LoaderState::Active(version_id) => Some(version_id.clone()),
            _ => None,
        }
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
