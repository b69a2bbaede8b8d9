//! Artifact store contract
//!
//! The protocol needs four things from the backing store: whole-value
//! writes, point reads, a best-effort broadcast and a subscription to that
//! broadcast. There is no transaction spanning a write and a broadcast;
//! the publisher gets its guarantees from ordering the calls.

use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy, unbounded sequence of broadcast payloads.
///
/// The stream ends when the underlying subscription is lost. Dropping it
/// releases the subscription.
pub type MessageStream = BoxStream<'static, String>;

/// Key-value store with a broadcast channel
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Durable, last-writer-wins write. A reader sees the whole value or
    /// nothing.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Point read
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Broadcast to currently subscribed listeners.
    ///
    /// Returns once the store accepted the message, with the number of
    /// listeners it was handed to when the store reports it.
    async fn publish_message(&self, channel: &str, payload: &str) -> Result<Option<usize>>;

    /// Subscribe to a channel.
    ///
    /// Delivery order matches publish order. Messages published before the
    /// subscription exists are never delivered.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Backend name used in logs
    fn backend(&self) -> &str;
}
