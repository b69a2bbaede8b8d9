//! Version identifiers and their generation

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Identifier of one published artifact version.
///
/// Ids produced by [`VersionGenerator`] look like `v1712000000123` (the
/// creation time in milliseconds), which keeps them sortable by creation
/// order. Other encodings are accepted as long as they fit the key scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Create a version id, rejecting values that would break the key scheme
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::config("version id must not be empty"));
        }
        if id.contains(':') || id.chars().any(char::is_whitespace) {
            return Err(Error::config(format!(
                "version id '{}' must not contain ':' or whitespace",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric sequence for ids of the form `v<digits>`
    pub fn sequence(&self) -> Option<u64> {
        self.0
            .strip_prefix('v')
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
    }

    /// Whether this id was created before `other`.
    ///
    /// Two `v<digits>` ids compare numerically; anything else falls back to
    /// string order.
    pub fn precedes(&self, other: &VersionId) -> bool {
        match (self.sequence(), other.sequence()) {
            (Some(a), Some(b)) => a < b,
            _ => self.0 < other.0,
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for VersionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for VersionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Time-derived version id generator.
///
/// Ids are strictly increasing within one generator even if the clock
/// repeats a millisecond or steps backwards.
#[derive(Debug)]
pub struct VersionGenerator {
    last_ms: AtomicI64,
}

impl VersionGenerator {
    /// Create a new generator
    pub fn new() -> Self {
        Self {
            last_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Produce the next id for a publish happening at `now_ms`.
    ///
    /// Returns the id together with the `created_at` timestamp it encodes.
    pub fn next(&self, now_ms: i64) -> (VersionId, i64) {
        let mut stamp = now_ms;
        let _ = self
            .last_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                stamp = if now_ms > last { now_ms } else { last + 1 };
                Some(stamp)
            });
        (VersionId(format!("v{}", stamp)), stamp)
    }

    /// Produce the next id using the wall clock
    pub fn next_now(&self) -> (VersionId, i64) {
        self.next(chrono::Utc::now().timestamp_millis())
    }
}

impl Default for VersionGenerator {
    fn default() -> Self {
        Self::new()
    }
}
