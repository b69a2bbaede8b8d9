//! Error types for modelcast

/// Result type alias using modelcast's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for modelcast operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Store unreachable or write rejected. Fatal to the current publish,
    /// safe to retry from the top.
    #[error("store write error: {0}")]
    StoreWrite(String),

    /// Store unreachable during a read. Transient.
    #[error("store read error: {0}")]
    StoreRead(String),

    /// Broadcast failed after the artifact and pointer were written
    #[error("notify error: {0}")]
    Notify(String),

    /// Notification channel could not be opened
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// A fetched record cannot be parsed into the expected shape
    #[error("decode error: {0}")]
    Decode(String),

    /// A producer had nothing to train on and declined to publish
    #[error("no examples: {0}")]
    NoExamples(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout errors
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a new store write error
    pub fn store_write(msg: impl Into<String>) -> Self {
        Self::StoreWrite(msg.into())
    }

    /// Create a new store read error
    pub fn store_read(msg: impl Into<String>) -> Self {
        Self::StoreRead(msg.into())
    }

    /// Create a new notify error
    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }

    /// Create a new subscribe error
    pub fn subscribe(msg: impl Into<String>) -> Self {
        Self::Subscribe(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new no-examples error
    pub fn no_examples(msg: impl Into<String>) -> Self {
        Self::NoExamples(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Decode and handler failures are deterministic for a given record,
    /// so retrying them only repeats the failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreRead(_) | Self::Subscribe(_) | Self::Timeout | Self::Io(_)
        )
    }
}
