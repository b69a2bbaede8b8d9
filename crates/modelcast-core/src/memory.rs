//! In-memory artifact store
//!
//! Behaves like a single Redis node: last-writer-wins string values and
//! fire-and-forget channels built on `tokio::sync::broadcast`. It also
//! records every operation and can inject faults, which makes it the store
//! double for exercising the protocol's ordering and failure paths.

use crate::store::{ArtifactStore, MessageStream};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A store operation, as recorded in the operation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Successful write of a key
    Put(String),
    /// Read of a key
    Get(String),
    /// Accepted broadcast
    Publish {
        /// Channel name
        channel: String,
        /// Message payload
        payload: String,
    },
    /// Opened subscription
    Subscribe(String),
}

#[derive(Debug, Default)]
struct Faults {
    failing_put_keys: HashSet<String>,
    stalled_put_keys: HashSet<String>,
    fail_publishes: bool,
    failing_reads: usize,
    stalling_reads: usize,
    fail_pings: bool,
    failing_subscribes: usize,
}

/// In-memory store with injectable faults
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    faults: Mutex<Faults>,
    log: Mutex<Vec<StoreOp>>,
    channel_capacity: usize,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty store whose channels buffer `capacity` messages per
    /// subscriber before the slowest one starts losing messages
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            log: Mutex::new(Vec::new()),
            channel_capacity: capacity.max(1),
        }
    }

    /// Write a raw value directly, bypassing fault injection and the log
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Read a raw value directly, bypassing fault injection and the log
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Make every write to `key` fail until cleared
    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.faults.lock().failing_put_keys.insert(key.into());
    }

    /// Let writes to every key succeed again
    pub fn clear_write_failures(&self) {
        self.faults.lock().failing_put_keys.clear();
    }

    /// Make every write to `key` hang until cleared, as an unresponsive
    /// server would
    pub fn stall_writes_to(&self, key: impl Into<String>) {
        self.faults.lock().stalled_put_keys.insert(key.into());
    }

    /// Let stalled writes through again; writes already hanging stay hung
    pub fn clear_write_stalls(&self) {
        self.faults.lock().stalled_put_keys.clear();
    }

    /// Make the next `count` reads hang forever
    pub fn stall_next_reads(&self, count: usize) {
        self.faults.lock().stalling_reads = count;
    }

    /// Make health pings fail (or succeed again)
    pub fn fail_pings(&self, fail: bool) {
        self.faults.lock().fail_pings = fail;
    }

    /// Make broadcasts fail (or succeed again)
    pub fn fail_publishes(&self, fail: bool) {
        self.faults.lock().fail_publishes = fail;
    }

    /// Make the next `count` reads fail
    pub fn fail_next_reads(&self, count: usize) {
        self.faults.lock().failing_reads = count;
    }

    /// Make the next `count` subscribe attempts fail
    pub fn fail_next_subscribes(&self, count: usize) {
        self.faults.lock().failing_subscribes = count;
    }

    /// Drop every open subscription, as a lost connection would
    pub fn disconnect_subscribers(&self) {
        self.channels.lock().clear();
    }

    /// Number of listeners currently subscribed to `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Operations performed so far, in order
    pub fn operations(&self) -> Vec<StoreOp> {
        self.log.lock().clone()
    }

    fn record(&self, op: StoreOp) {
        self.log.lock().push(op);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let stalled = {
            let faults = self.faults.lock();
            if faults.failing_put_keys.contains(key) {
                return Err(Error::store_write(format!("write to '{}' rejected", key)));
            }
            faults.stalled_put_keys.contains(key)
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        self.values.write().insert(key.to_string(), value.to_string());
        self.record(StoreOp::Put(key.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let stalled = {
            let mut faults = self.faults.lock();
            if faults.failing_reads > 0 {
                faults.failing_reads -= 1;
                return Err(Error::store_read(format!("read of '{}' failed", key)));
            }
            if faults.stalling_reads > 0 {
                faults.stalling_reads -= 1;
                true
            } else {
                false
            }
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        self.record(StoreOp::Get(key.to_string()));
        Ok(self.values.read().get(key).cloned())
    }

    async fn publish_message(&self, channel: &str, payload: &str) -> Result<Option<usize>> {
        if self.faults.lock().fail_publishes {
            return Err(Error::notify(format!("publish to '{}' rejected", channel)));
        }

        let receivers = match self.channels.lock().get(channel) {
            // A send error only means nobody is listening right now
            Some(sender) => sender.send(payload.to_string()).unwrap_or(0),
            None => 0,
        };

        self.record(StoreOp::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(Some(receivers))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        {
            let mut faults = self.faults.lock();
            if faults.failing_subscribes > 0 {
                faults.failing_subscribes -= 1;
                return Err(Error::subscribe(format!("subscribe to '{}' failed", channel)));
            }
        }

        let receiver = self
            .channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();
        self.record(StoreOp::Subscribe(channel.to_string()));

        let channel = channel.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((message, receiver)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<()> {
        if self.faults.lock().fail_pings {
            return Err(Error::store_read("store unreachable"));
        }
        Ok(())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
