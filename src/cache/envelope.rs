//! Stored cache representations.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Payload written for a key confirmed missing in the store.
///
/// A serialized entity is never empty, so an empty value cannot be confused
/// with a real one.
pub const ABSENT_MARKER: &[u8] = b"";

/// Value wrapper for logically expiring keys.
///
/// The stored key has no storage-level TTL; only `expire_at` decides
/// staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEnvelope<T> {
    pub data: T,
    pub expire_at: DateTime<Utc>,
}

impl<T> LogicalEnvelope<T> {
    /// Wrap `data` so that it turns stale `ttl` from now.
    pub fn new(data: T, ttl: Duration) -> Result<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Config(format!("logical TTL out of range: {}", e)))?;
        Ok(Self {
            data,
            expire_at: Utc::now() + ttl,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Result of reading one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<T> {
    /// Entity present
    Hit(T),
    /// Absent marker: the store confirmed the entity does not exist
    Absent,
    /// Nothing cached
    Miss,
}

impl<T: DeserializeOwned> Cached<T> {
    pub fn decode(raw: Option<Bytes>) -> Result<Self> {
        match raw {
            None => Ok(Cached::Miss),
            Some(bytes) if bytes.as_ref() == ABSENT_MARKER => Ok(Cached::Absent),
            Some(bytes) => Ok(Cached::Hit(serde_json::from_slice(&bytes)?)),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// TTL for an absent marker, kept strictly below the value TTL.
pub fn marker_ttl(null_ttl: Duration, ttl: Duration) -> Duration {
    if null_ttl < ttl {
        null_ttl
    } else {
        (ttl / 2).max(Duration::from_millis(1))
    }
}
