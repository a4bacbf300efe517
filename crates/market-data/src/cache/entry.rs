use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use crate::models::Payload;

/// Schema tag written into every persisted entry.
pub const CACHE_SCHEMA: &str = "stockpile.market-data.cache";

/// Current envelope version. Entries with any other version are misses.
pub const CACHE_VERSION: u32 = 1;

/// One cached provider response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub fetched_at: DateTime<Utc>,
    /// Provider that produced the payload.
    pub source: String,
    pub payload: Payload,
}

impl CacheEntry {
    pub fn new(key: CacheKey, source: impl Into<String>, payload: Payload) -> Self {
        Self {
            key,
            fetched_at: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Age of the entry at `now`; zero for entries stamped in the future.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }
}

/// On-disk representation.
#[derive(Serialize, Deserialize)]
struct Envelope {
    schema: String,
    version: u32,
    #[serde(flatten)]
    entry: CacheEntry,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    schema: String,
    version: u32,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema: &'static str,
    version: u32,
    #[serde(flatten)]
    entry: &'a CacheEntry,
}

/// Serialize an entry into its versioned envelope.
pub fn encode(entry: &CacheEntry) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(&EnvelopeRef {
        schema: CACHE_SCHEMA,
        version: CACHE_VERSION,
        entry,
    })
}

/// Decode an envelope. Foreign schemas, other versions and unreadable
/// bytes all yield `None`.
pub fn decode(bytes: &[u8]) -> Option<CacheEntry> {
    let header: EnvelopeHeader = serde_json::from_slice(bytes).ok()?;
    if header.schema != CACHE_SCHEMA || header.version != CACHE_VERSION {
        return None;
    }
    serde_json::from_slice::<Envelope>(bytes)
        .ok()
        .map(|envelope| envelope.entry)
}
