//! Text encoding of artifact records
//!
//! Records are stored as JSON objects with the payload base64-encoded:
//!
//! ```json
//! { "model_id": "v1712000000123", "buffer": "AAA=", "created_at": 1712000000123 }
//! ```

use crate::{ArtifactRecord, Error, Result, VersionId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct WireRecordRef<'a> {
    model_id: &'a str,
    buffer: String,
    created_at: i64,
}

#[derive(Deserialize)]
struct WireRecord {
    model_id: String,
    buffer: String,
    created_at: i64,
}

/// Encode a record into its stored JSON form
pub fn encode_record(record: &ArtifactRecord) -> Result<String> {
    let wire = WireRecordRef {
        model_id: record.version_id.as_str(),
        buffer: STANDARD.encode(&record.payload),
        created_at: record.created_at,
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decode a stored record.
///
/// Every failure maps to [`Error::Decode`] so callers can keep the previous
/// version without inspecting the cause.
pub fn decode_record(raw: &str) -> Result<ArtifactRecord> {
    let wire: WireRecord = serde_json::from_str(raw)
        .map_err(|e| Error::decode(format!("malformed record: {}", e)))?;

    let version_id = VersionId::new(wire.model_id)
        .map_err(|e| Error::decode(format!("invalid model_id: {}", e)))?;

    let payload = STANDARD
        .decode(wire.buffer.as_bytes())
        .map_err(|e| Error::decode(format!("invalid base64 buffer for {}: {}", version_id, e)))?;

    Ok(ArtifactRecord {
        version_id,
        payload,
        created_at: wire.created_at,
    })
}
