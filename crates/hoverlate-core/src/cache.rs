//! Response cache — successful results keyed by request kind and input text.
//!
//! Translation and explanation entries for the same text are independent
//! records under different key prefixes. Entries older than [`CACHE_TTL`]
//! are ignored on read and overwritten on the next write; nothing sweeps
//! them.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::KvStore;

pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Translation,
    Explanation,
}

impl RequestKind {
    fn key_prefix(self) -> &'static str {
        match self {
            Self::Translation => "cache_",
            Self::Explanation => "cache_explain_",
        }
    }

    /// Name of the payload field in the stored record.
    fn payload_field(self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Explanation => "explanation",
        }
    }
}

/// A cached successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: String,
    pub model_used: String,
    /// Epoch millis of the write.
    pub timestamp: i64,
}

/// Whitespace around a title or comment never changes its meaning.
pub fn normalize(text: &str) -> &str {
    text.trim()
}

/// Store key for `text`: base64 of its UTF-8 bytes, so any Unicode input
/// yields a stable ASCII key.
pub fn cache_key(kind: RequestKind, text: &str) -> String {
    format!(
        "{}{}",
        kind.key_prefix(),
        STANDARD.encode(normalize(text).as_bytes())
    )
}

pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn decode(kind: RequestKind, value: &Value) -> Option<CacheEntry> {
        Some(CacheEntry {
            payload: value.get(kind.payload_field())?.as_str()?.to_string(),
            model_used: value
                .get("modelUsed")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            timestamp: value.get("timestamp")?.as_i64()?,
        })
    }

    /// A fresh entry for `text`, or `None` if absent, unreadable, or expired.
    pub async fn lookup(&self, kind: RequestKind, text: &str) -> Option<CacheEntry> {
        let key = cache_key(kind, text);
        let value = match self.store.get_one(&key).await {
            Ok(value) => value?,
            Err(e) => {
                warn!(?kind, "Cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        let entry = Self::decode(kind, &value)?;
        let age = self.clock.now_millis() - entry.timestamp;
        if age < CACHE_TTL.as_millis() as i64 {
            debug!(?kind, age_ms = age, "Cache hit");
            Some(entry)
        } else {
            debug!(?kind, age_ms = age, "Cache entry expired");
            None
        }
    }

    /// Upsert a successful result stamped with the current time.
    pub async fn store(&self, kind: RequestKind, text: &str, payload: &str, model_used: &str) {
        let key = cache_key(kind, text);
        let value = json!({
            kind.payload_field(): payload,
            "modelUsed": model_used,
            "timestamp": self.clock.now_millis(),
        });
        if let Err(e) = self.store.set_one(&key, value).await {
            warn!(?kind, "Failed to persist cache entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    const T0: i64 = 1_700_000_000_000;

    fn cache() -> (ResponseCache, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        (ResponseCache::new(store.clone(), clock.clone()), store, clock)
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (cache, _store, clock) = cache();
        cache
            .store(RequestKind::Translation, "こんにちは", "Hello", "m")
            .await;

        clock.set(T0 + CACHE_TTL.as_millis() as i64 - 1);
        let hit = cache.lookup(RequestKind::Translation, "こんにちは").await;
        assert_eq!(hit.map(|e| e.payload).as_deref(), Some("Hello"));

        clock.set(T0 + CACHE_TTL.as_millis() as i64 + 1);
        assert!(cache.lookup(RequestKind::Translation, "こんにちは").await.is_none());
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let (cache, _store, _clock) = cache();
        cache
            .store(RequestKind::Translation, "猫", "cat", "a")
            .await;
        cache
            .store(RequestKind::Explanation, "猫", "猫 (ねこ) is a noun.", "b")
            .await;

        let translation = cache.lookup(RequestKind::Translation, "猫").await.unwrap();
        assert_eq!(translation.payload, "cat");
        assert_eq!(translation.model_used, "a");

        let explanation = cache.lookup(RequestKind::Explanation, "猫").await.unwrap();
        assert_eq!(explanation.model_used, "b");
    }

    #[tokio::test]
    async fn test_expired_entry_is_overwritten() {
        let (cache, store, clock) = cache();
        cache.store(RequestKind::Translation, "x", "old", "a").await;
        clock.advance(CACHE_TTL * 2);
        cache.store(RequestKind::Translation, "x", "new", "b").await;

        let entry = cache.lookup(RequestKind::Translation, "x").await.unwrap();
        assert_eq!(entry.payload, "new");
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[test]
    fn test_keys_are_ascii_and_normalized() {
        let key = cache_key(RequestKind::Translation, "  今日は良い天気ですね 🌤  ");
        assert!(key.is_ascii());
        assert_eq!(key, cache_key(RequestKind::Translation, "今日は良い天気ですね 🌤"));
        assert!(cache_key(RequestKind::Explanation, "a").starts_with("cache_explain_"));
        assert_ne!(
            cache_key(RequestKind::Translation, "a"),
            cache_key(RequestKind::Explanation, "a")
        );
    }
}
