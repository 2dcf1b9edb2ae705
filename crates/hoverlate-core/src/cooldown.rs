//! Cooldown ledger — per-model failure counters and 24h cooldowns.
//!
//! Two kinds of cooldown block a model:
//! - `dailyQuota`: written on the first quota-exceeded failure
//! - `repeatedFailure`: written once [`FAILURE_THRESHOLD`] consecutive
//!   non-quota failures have been counted
//!
//! Entries are plain `{expiry}` records; expiry is checked when read and
//! nothing ever sweeps them. Writes are best-effort: a store failure is
//! logged and the ledger carries on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, UpstreamError};
use crate::locks::KeyedLocks;
use crate::store::{Entries, KvStore};

/// Consecutive non-quota failures that put a model on cooldown.
pub const FAILURE_THRESHOLD: u32 = 4;

/// How long either kind of cooldown lasts.
pub const COOLDOWN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

const FAILURE_COUNT_PREFIX: &str = "failureCount_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CooldownKind {
    DailyQuota,
    RepeatedFailure,
}

impl CooldownKind {
    pub const ALL: [CooldownKind; 2] = [CooldownKind::DailyQuota, CooldownKind::RepeatedFailure];

    fn prefix(self) -> &'static str {
        match self {
            Self::DailyQuota => "dailyLimit_",
            Self::RepeatedFailure => "failureCooldown_",
        }
    }

    /// Store key holding this kind of cooldown for `model`.
    pub fn key(self, model: &str) -> String {
        format!("{}{}", self.prefix(), model)
    }

    fn parse_key(key: &str) -> Option<(Self, &str)> {
        Self::ALL
            .into_iter()
            .find_map(|kind| key.strip_prefix(kind.prefix()).map(|model| (kind, model)))
    }
}

/// Persisted cooldown record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    /// Epoch millis after which the cooldown no longer applies.
    pub expiry: i64,
}

/// What kind of failure is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    QuotaExceeded,
    Other,
}

impl From<&UpstreamError> for FailureKind {
    fn from(err: &UpstreamError) -> Self {
        if err.is_quota() {
            Self::QuotaExceeded
        } else {
            Self::Other
        }
    }
}

fn failure_count_key(model: &str) -> String {
    format!("{}{}", FAILURE_COUNT_PREFIX, model)
}

/// One cooldown record as seen by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    pub model: String,
    pub kind: CooldownKind,
    pub expiry: i64,
    pub active: bool,
    pub remaining_secs: i64,
}

/// Snapshot of every ledger record in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatus {
    pub cooldowns: Vec<CooldownStatus>,
    pub failure_counts: BTreeMap<String, u32>,
}

/// Store-backed cooldown bookkeeping, shared by every request.
pub struct CooldownLedger {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl CooldownLedger {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// The first unexpired cooldown on `model`, if any.
    pub async fn active_cooldown(&self, model: &str) -> Option<CooldownKind> {
        let keys: Vec<String> = CooldownKind::ALL.iter().map(|k| k.key(model)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        let entries = match self.store.get(&key_refs).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(model = %model, "Cooldown lookup failed, treating as unblocked: {}", e);
                return None;
            }
        };

        let now = self.clock.now_millis();
        CooldownKind::ALL.into_iter().find(|kind| {
            entries
                .get(&kind.key(model))
                .and_then(|v| serde_json::from_value::<CooldownEntry>(v.clone()).ok())
                .is_some_and(|entry| now < entry.expiry)
        })
    }

    /// True while either kind of cooldown on `model` is unexpired.
    pub async fn is_blocked(&self, model: &str) -> bool {
        self.active_cooldown(model).await.is_some()
    }

    /// Current consecutive-failure count for `model`.
    pub async fn failure_count(&self, model: &str) -> u32 {
        match self.store.get_one(&failure_count_key(model)).await {
            Ok(value) => value.and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            Err(e) => {
                warn!(model = %model, "Failure count lookup failed: {}", e);
                0
            }
        }
    }

    /// Clear the failure counter after a successful call.
    pub async fn record_success(&self, model: &str) {
        let _guard = self.locks.lock(model).await;

        if self.failure_count(model).await == 0 {
            return;
        }
        let key = failure_count_key(model);
        match self.store.remove(&[key.as_str()]).await {
            Ok(()) => info!(model = %model, "Reset failure count"),
            Err(e) => warn!(model = %model, "Failed to reset failure count: {}", e),
        }
    }

    /// Record a failed call against `model`.
    pub async fn record_failure(&self, model: &str, kind: FailureKind) {
        let _guard = self.locks.lock(model).await;
        let expiry = self.clock.now_millis() + COOLDOWN_DURATION.as_millis() as i64;

        if kind == FailureKind::QuotaExceeded {
            let entry = json!(CooldownEntry { expiry });
            match self
                .store
                .set_one(&CooldownKind::DailyQuota.key(model), entry)
                .await
            {
                Ok(()) => info!(model = %model, "Daily quota exceeded, placing on 24h cooldown"),
                Err(e) => warn!(model = %model, "Failed to persist quota cooldown: {}", e),
            }
            return;
        }

        let count = self.failure_count(model).await + 1;
        debug!(model = %model, count, "Failure count incremented");

        let mut entries = Entries::new();
        if count >= FAILURE_THRESHOLD {
            entries.insert(
                CooldownKind::RepeatedFailure.key(model),
                json!(CooldownEntry { expiry }),
            );
            entries.insert(failure_count_key(model), json!(0));
            info!(
                model = %model,
                count,
                "Model failed repeatedly, placing on 24h cooldown"
            );
        } else {
            entries.insert(failure_count_key(model), json!(count));
        }

        if let Err(e) = self.store.set(entries).await {
            warn!(model = %model, "Failed to persist failure state: {}", e);
        }
    }

    /// Delete every cooldown and failure counter. Returns how many cooldown
    /// records were removed; counters are not counted.
    pub async fn clear_all(&self) -> Result<usize> {
        let all = self.store.get_all().await?;

        let mut cooldowns = 0;
        let keys: Vec<&str> = all
            .keys()
            .map(String::as_str)
            .filter(|key| {
                if CooldownKind::parse_key(key).is_some() {
                    cooldowns += 1;
                    true
                } else {
                    key.starts_with(FAILURE_COUNT_PREFIX)
                }
            })
            .collect();

        if keys.is_empty() {
            info!("No active cooldowns to clear");
            return Ok(0);
        }

        self.store.remove(&keys).await?;
        info!(cooldowns, records = keys.len(), "Cleared cooldowns and failure counts");
        Ok(cooldowns)
    }

    /// Every cooldown record and non-zero failure counter in the store.
    pub async fn status(&self) -> Result<LedgerStatus> {
        let all = self.store.get_all().await?;
        let now = self.clock.now_millis();
        let mut status = LedgerStatus::default();

        for (key, value) in &all {
            if let Some((kind, model)) = CooldownKind::parse_key(key) {
                let Ok(entry) = serde_json::from_value::<CooldownEntry>(value.clone()) else {
                    continue;
                };
                status.cooldowns.push(CooldownStatus {
                    model: model.to_string(),
                    kind,
                    expiry: entry.expiry,
                    active: now < entry.expiry,
                    remaining_secs: ((entry.expiry - now).max(0) + 999) / 1000,
                });
            } else if let Some(model) = key.strip_prefix(FAILURE_COUNT_PREFIX) {
                let count = value.as_u64().unwrap_or(0) as u32;
                if count > 0 {
                    status.failure_counts.insert(model.to_string(), count);
                }
            }
        }

        status
            .cooldowns
            .sort_by(|a, b| a.model.cmp(&b.model).then(a.expiry.cmp(&b.expiry)));
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    const T0: i64 = 1_700_000_000_000;

    fn ledger() -> (CooldownLedger, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        (
            CooldownLedger::new(store.clone(), clock.clone()),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn test_threshold_creates_cooldown_and_resets_counter() {
        let (ledger, _store, clock) = ledger();

        for expected in 1..FAILURE_THRESHOLD {
            ledger.record_failure("m", FailureKind::Other).await;
            assert_eq!(ledger.failure_count("m").await, expected);
            assert!(!ledger.is_blocked("m").await);
        }

        ledger.record_failure("m", FailureKind::Other).await;
        assert_eq!(ledger.failure_count("m").await, 0);
        assert_eq!(
            ledger.active_cooldown("m").await,
            Some(CooldownKind::RepeatedFailure)
        );

        clock.advance(COOLDOWN_DURATION - Duration::from_millis(1));
        assert!(ledger.is_blocked("m").await);
        clock.advance(Duration::from_millis(1));
        assert!(!ledger.is_blocked("m").await);
    }

    #[tokio::test]
    async fn test_success_at_three_resets_without_cooldown() {
        let (ledger, store, _clock) = ledger();
        for _ in 0..3 {
            ledger.record_failure("m", FailureKind::Other).await;
        }
        ledger.record_success("m").await;

        assert_eq!(ledger.failure_count("m").await, 0);
        assert!(!ledger.is_blocked("m").await);
        assert!(store.get_all().await.unwrap().is_empty());

        // Count starts over.
        ledger.record_failure("m", FailureKind::Other).await;
        assert_eq!(ledger.failure_count("m").await, 1);
    }

    #[tokio::test]
    async fn test_quota_failures_never_touch_counter() {
        let (ledger, _store, _clock) = ledger();
        ledger.record_failure("m", FailureKind::Other).await;
        for _ in 0..10 {
            ledger.record_failure("m", FailureKind::QuotaExceeded).await;
        }
        assert_eq!(ledger.failure_count("m").await, 1);
        assert_eq!(ledger.active_cooldown("m").await, Some(CooldownKind::DailyQuota));
    }

    #[tokio::test]
    async fn test_clear_all_counts_only_cooldowns() {
        let (ledger, store, _clock) = ledger();
        ledger.record_failure("a", FailureKind::QuotaExceeded).await;
        for _ in 0..FAILURE_THRESHOLD {
            ledger.record_failure("b", FailureKind::Other).await;
        }
        ledger.record_failure("c", FailureKind::Other).await;
        store.set_one("cache_abc", json!({"x": 1})).await.unwrap();

        assert!(ledger.is_blocked("a").await);
        assert!(ledger.is_blocked("b").await);

        let cleared = ledger.clear_all().await.unwrap();
        assert_eq!(cleared, 2);
        assert!(!ledger.is_blocked("a").await);
        assert!(!ledger.is_blocked("b").await);
        assert_eq!(ledger.failure_count("c").await, 0);

        let remaining = store.get_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("cache_abc"));

        assert_eq!(ledger.clear_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_reports_expired_as_inactive() {
        let (ledger, store, clock) = ledger();
        ledger.record_failure("a", FailureKind::QuotaExceeded).await;
        ledger.record_failure("b", FailureKind::Other).await;
        clock.advance(Duration::from_secs(60 * 60));

        let status = ledger.status().await.unwrap();
        assert_eq!(status.cooldowns.len(), 1);
        assert!(status.cooldowns[0].active);
        assert_eq!(status.cooldowns[0].remaining_secs, 23 * 60 * 60);
        assert_eq!(status.failure_counts.get("b"), Some(&1));

        clock.advance(COOLDOWN_DURATION);
        let status = ledger.status().await.unwrap();
        assert!(!status.cooldowns[0].active);
        assert_eq!(status.cooldowns[0].remaining_secs, 0);
        // Expired entries stay in the store.
        assert!(store.get_one("dailyLimit_a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let (ledger, _store, _clock) = ledger();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.record_failure("m", FailureKind::Other).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(ledger.failure_count("m").await, 3);
    }
}
