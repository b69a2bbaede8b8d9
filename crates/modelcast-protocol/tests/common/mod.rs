//! Shared fixtures for protocol tests
//!
//! Provides a recording artifact handler and helpers for driving a loader
//! against the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use modelcast_core::{ArtifactRecord, Error, InMemoryStore, KeyLayout, Result, VersionId};
use modelcast_protocol::{
    ArtifactHandler, Loader, LoaderConfig, LoaderHandle, Publisher, RetryConfig,
};
use modelcast_telemetry::ProtocolMetrics;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const CHANNEL: &str = "model-updates";

/// Handler that records every artifact it is asked to activate
#[derive(Default)]
pub struct RecordingHandler {
    activated: Mutex<Vec<Arc<ArtifactRecord>>>,
    rejected_payloads: Mutex<HashSet<Vec<u8>>>,
    call_count: AtomicU32,
    latency: Option<Duration>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse any artifact carrying `payload`
    pub fn rejecting(self, payload: &[u8]) -> Self {
        self.rejected_payloads.lock().insert(payload.to_vec());
        self
    }

    /// Take `latency` to accept each artifact
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Version ids accepted so far, in activation order
    pub fn activated_ids(&self) -> Vec<String> {
        self.activated
            .lock()
            .iter()
            .map(|record| record.version_id.to_string())
            .collect()
    }

    /// Get the number of times activate was called
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactHandler for RecordingHandler {
    async fn activate(&self, artifact: Arc<ArtifactRecord>) -> Result<()> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.rejected_payloads.lock().contains(&artifact.payload) {
            return Err(Error::decode("payload is not a usable model"));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.activated.lock().push(artifact);
        Ok(())
    }
}

/// Loader settings with millisecond backoff
pub fn fast_config() -> LoaderConfig {
    let fast = RetryConfig {
        max_retries: 5,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: 0.0,
    };
    LoaderConfig {
        read_timeout_ms: 1_000,
        poll_interval_ms: None,
        retry: fast.clone(),
        resubscribe: fast,
    }
}

pub fn publisher(store: &Arc<InMemoryStore>) -> Publisher {
    Publisher::new(store.clone(), KeyLayout::default())
}

pub fn version(id: &str) -> VersionId {
    VersionId::new(id).unwrap()
}

/// A loader running in the background
pub struct RunningLoader {
    pub handle: LoaderHandle,
    pub handler: Arc<RecordingHandler>,
    pub metrics: ProtocolMetrics,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<()>>,
}

impl RunningLoader {
    /// Cancel the loader and return what `run` returned
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        within(self.task).await.unwrap()
    }

    pub async fn wait_for(&self, id: &str) {
        within(self.handle.wait_for_version(&version(id)))
            .await
            .unwrap();
    }
}

/// Route loader logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("modelcast=debug")
        .with_test_writer()
        .try_init();
}

pub fn spawn_loader(
    store: &Arc<InMemoryStore>,
    config: LoaderConfig,
    handler: RecordingHandler,
) -> RunningLoader {
    init_tracing();
    let metrics = ProtocolMetrics::new();
    let loader = Loader::new(store.clone(), KeyLayout::default(), config)
        .with_metrics(metrics.clone());
    let handle = loader.handle();
    let handler = Arc::new(handler);
    let cancel = CancellationToken::new();

    let task = {
        let handler = Arc::clone(&handler);
        let cancel = cancel.clone();
        tokio::spawn(async move { loader.run(handler.as_ref(), cancel).await })
    };

    RunningLoader {
        handle,
        handler,
        metrics,
        cancel,
        task,
    }
}

/// Start a loader and wait until it listens on the channel
pub async fn spawn_listening_loader(
    store: &Arc<InMemoryStore>,
    config: LoaderConfig,
    handler: RecordingHandler,
) -> RunningLoader {
    let running = spawn_loader(store, config, handler);
    eventually(|| store.subscriber_count(CHANNEL) == 1).await;
    running
}

/// Fail the test if `fut` takes longer than five seconds
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// Poll `condition` until it holds
pub async fn eventually(condition: impl Fn() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
}
