//! Byte encoding of session records and marker timestamps.
//!
//! Values are `bincode` with a one-byte format version in front. Timestamps
//! are stored as signed nanoseconds since the Unix epoch, so a decoded
//! session compares equal to the one that was encoded.
//!
//! `bincode` 1.x struct encoding is positional. Any change to
//! [`SessionRecord`] must bump [`RECORD_VERSION`].

use crate::error::{Result, SessionError};
use crate::state::{Session, SessionId, UserSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version of session records.
pub const RECORD_VERSION: u8 = 1;

/// Format version of marker values.
pub const MARKER_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    id: SessionId,
    user: UserSnapshot,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    last_activity_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    refreshed_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    absolute_expiration: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct MarkerRecord {
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    at: DateTime<Utc>,
}

/// Encode a session for storage.
///
/// # Errors
///
/// Returns [`SessionError::Codec`] if a timestamp is outside the
/// representable range.
pub fn encode_session(session: &Session) -> Result<Vec<u8>> {
    let record = SessionRecord {
        id: session.id.clone(),
        user: session.user.clone(),
        created_at: session.created_at,
        last_activity_at: session.last_activity_at,
        refreshed_at: session.refreshed_at,
        absolute_expiration: session.absolute_expiration,
    };
    encode(RECORD_VERSION, &record)
}

/// Decode a stored session.
///
/// # Errors
///
/// Returns [`SessionError::Codec`] on an unknown version or corrupt bytes.
pub fn decode_session(bytes: &[u8]) -> Result<Session> {
    let record: SessionRecord = decode(RECORD_VERSION, bytes)?;
    Ok(Session {
        id: record.id,
        user: record.user,
        created_at: record.created_at,
        last_activity_at: record.last_activity_at,
        refreshed_at: record.refreshed_at,
        absolute_expiration: record.absolute_expiration,
    })
}

/// Encode a marker timestamp.
///
/// # Errors
///
/// Returns [`SessionError::Codec`] if the timestamp is outside the
/// representable range.
pub fn encode_marker(at: DateTime<Utc>) -> Result<Vec<u8>> {
    encode(MARKER_VERSION, &MarkerRecord { at })
}

/// Decode a marker timestamp.
///
/// # Errors
///
/// Returns [`SessionError::Codec`] on an unknown version or corrupt bytes.
pub fn decode_marker(bytes: &[u8]) -> Result<DateTime<Utc>> {
    decode::<MarkerRecord>(MARKER_VERSION, bytes).map(|record| record.at)
}

fn encode<T: Serialize>(version: u8, value: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(value).map_err(|e| SessionError::Codec(e.to_string()))?;
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(version);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

fn decode<T: for<'de> Deserialize<'de>>(version: u8, bytes: &[u8]) -> Result<T> {
    match bytes.split_first() {
        Some((found, body)) if *found == version => {
            bincode::deserialize(body).map_err(|e| SessionError::Codec(e.to_string()))
        }
        Some((found, _)) => Err(SessionError::Codec(format!(
            "unsupported format version {found}, expected {version}"
        ))),
        None => Err(SessionError::Codec("empty value".to_string())),
    }
}
