//! Modelcast Redis
//!
//! Redis backend for the modelcast artifact store. Records and the current
//! pointer are plain string keys written with `SET`; notifications travel
//! over Redis pub/sub, which has the same fire-and-forget semantics the
//! protocol assumes: no persistence, no replay, no acknowledgment.
//!
//! Commands share one auto-reconnecting [`ConnectionManager`]. Every
//! subscription opens its own dedicated pub/sub connection, since a
//! connection in subscriber mode cannot issue regular commands.

use async_trait::async_trait;
use futures::StreamExt;
use modelcast_core::store::{ArtifactStore, MessageStream};
use modelcast_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

/// Artifact store backed by a Redis server
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    addr: String,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://localhost:6379`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::config(format!("invalid redis url: {}", e)))?;
        let addr = client.get_connection_info().addr.to_string();

        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::store_read(format!("failed to connect to redis at {}: {}", addr, e)))?;

        info!(addr = %addr, "Connected to redis");
        Ok(Self { client, conn, addr })
    }

    /// Address of the server, without credentials
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ArtifactStore for RedisStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| Error::store_write(format!("SET {} failed: {}", key, e)))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| Error::store_read(format!("GET {} failed: {}", key, e)))
    }

    async fn publish_message(&self, channel: &str, payload: &str) -> Result<Option<usize>> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn
            .publish(channel, payload)
            .await
            .map_err(|e| Error::notify(format!("PUBLISH {} failed: {}", channel, e)))?;
        Ok(Some(receivers))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::subscribe(format!("pub/sub connection failed: {}", e)))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| Error::subscribe(format!("SUBSCRIBE {} failed: {}", channel, e)))?;

        debug!(channel = %channel, addr = %self.addr, "Subscribed");

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = msg.get_payload::<String>();
            let channel = channel.clone();
            async move {
                match payload {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Dropping non-text message");
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    /// Round-trip a PING to check the server is reachable
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store_read(format!("ping failed: {}", e)))?;
        debug!(reply = %reply, "Redis ping");
        Ok(())
    }

    fn backend(&self) -> &str {
        "redis"
    }
}
