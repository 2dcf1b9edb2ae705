//! Sliding-window rate limiter.
//!
//! Each window is a list of request timestamps (epoch millis) kept in the
//! durable store. A caller asking for more requests than the window has
//! room for is suspended until enough old timestamps age out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::locks::KeyedLocks;
use crate::models::{DEFAULT_MODEL, rate_for};
use crate::settings::KEY_MODEL;
use crate::store::KvStore;

const GLOBAL_WINDOW_KEY: &str = "requestTimestamps";

/// Which requests share a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One window per attempted model, limited by that model's rate.
    #[default]
    PerModel,
    /// One shared window, limited by the configured single model's rate.
    Global,
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub scope: RateLimitScope,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Per-model requests-per-window overrides (e.g. for paid tiers).
    #[serde(default)]
    pub rates: BTreeMap<String, u32>,
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            scope: RateLimitScope::PerModel,
            window_secs: default_window_secs(),
            rates: BTreeMap::new(),
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    locks: KeyedLocks,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
            locks: KeyedLocks::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    fn window_key(&self, model: &str) -> String {
        match self.config.scope {
            RateLimitScope::PerModel => format!("{}_{}", GLOBAL_WINDOW_KEY, model),
            RateLimitScope::Global => GLOBAL_WINDOW_KEY.to_string(),
        }
    }

    fn rate(&self, model: &str) -> u32 {
        self.config
            .rates
            .get(model)
            .copied()
            .unwrap_or_else(|| rate_for(model))
    }

    /// Effective limit for a request against `model`, resolved on every call.
    pub async fn limit_for(&self, model: &str) -> u32 {
        match self.config.scope {
            RateLimitScope::PerModel => self.rate(model),
            RateLimitScope::Global => {
                let configured = match self.store.get_one(KEY_MODEL).await {
                    Ok(value) => value
                        .and_then(|v| v.as_str().map(str::to_string))
                        .filter(|m| !m.is_empty()),
                    Err(e) => {
                        warn!("Could not read configured model for rate limit: {}", e);
                        None
                    }
                };
                self.rate(configured.as_deref().unwrap_or(DEFAULT_MODEL))
            }
        }
    }

    async fn load_window(&self, key: &str) -> Vec<i64> {
        match self.store.get_one(key).await {
            Ok(value) => value
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            Err(e) => {
                warn!(key, "Could not read rate window, starting empty: {}", e);
                Vec::new()
            }
        }
    }

    fn purge(&self, timestamps: &mut Vec<i64>) {
        let now = self.clock.now_millis();
        let window_ms = self.window().as_millis() as i64;
        timestamps.retain(|ts| now - ts < window_ms);
        timestamps.sort_unstable();
    }

    /// Wait until `weight` requests against `model` fit in the window, then
    /// record them.
    pub async fn admit(&self, model: &str, weight: u32) {
        let key = self.window_key(model);
        let _guard = self.locks.lock(&key).await;

        let limit = self.limit_for(model).await as usize;
        let weight = weight as usize;
        let window_ms = self.window().as_millis() as i64;

        let mut timestamps = self.load_window(&key).await;
        self.purge(&mut timestamps);

        let available = limit.saturating_sub(timestamps.len());
        if weight > available {
            let to_expire = weight - available;
            let wait = if to_expire <= timestamps.len() {
                let release_at = timestamps[to_expire - 1] + window_ms;
                Duration::from_millis((release_at - self.clock.now_millis()).max(0) as u64)
            } else {
                // More than the window could ever hold; wait a whole window.
                self.window()
            };

            if !wait.is_zero() {
                debug!(
                    model = %model,
                    limit,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limit reached, waiting"
                );
                self.clock.sleep(wait).await;
            }
            self.purge(&mut timestamps);
        }

        let now = self.clock.now_millis();
        timestamps.extend(std::iter::repeat_n(now, weight));

        if let Err(e) = self.store.set_one(&key, json!(timestamps)).await {
            warn!(key, "Failed to persist rate window: {}", e);
        }
    }
}
