//! Runtime metrics — action counts, cache effectiveness, upstream behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hoverlate_core::events::OrchestratorEvent;

/// Global metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    pub actions_total: AtomicU64,
    pub actions_success: AtomicU64,
    pub actions_error: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub upstream_attempts: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub quota_failures: AtomicU64,
    pub fallbacks: AtomicU64,
    pub cooldown_skips: AtomicU64,
    start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_action(&self, success: bool) {
        self.actions_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.actions_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actions_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fold one orchestrator event into the counters.
    pub fn observe(&self, event: &OrchestratorEvent) {
        let counter = match event {
            OrchestratorEvent::CacheHit { .. } => &self.cache_hits,
            OrchestratorEvent::CacheMiss { .. } => &self.cache_misses,
            OrchestratorEvent::Skipped { .. } => &self.cooldown_skips,
            OrchestratorEvent::Attempt { .. } => &self.upstream_attempts,
            OrchestratorEvent::Failed { quota, .. } => {
                if *quota {
                    self.quota_failures.fetch_add(1, Ordering::Relaxed);
                }
                &self.upstream_failures
            }
            OrchestratorEvent::Succeeded { index, .. } if *index > 0 => &self.fallbacks,
            OrchestratorEvent::Succeeded { .. } | OrchestratorEvent::Exhausted { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Export as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let uptime = self.uptime_secs();
        let hours = uptime / 3600;
        let minutes = (uptime % 3600) / 60;
        let seconds = uptime % 60;

        serde_json::json!({
            "uptime": format!("{}h {}m {}s", hours, minutes, seconds),
            "uptime_secs": uptime,
            "actions": {
                "total": self.actions_total.load(Ordering::Relaxed),
                "success": self.actions_success.load(Ordering::Relaxed),
                "errors": self.actions_error.load(Ordering::Relaxed),
            },
            "cache": {
                "hits": self.cache_hits.load(Ordering::Relaxed),
                "misses": self.cache_misses.load(Ordering::Relaxed),
            },
            "upstream": {
                "attempts": self.upstream_attempts.load(Ordering::Relaxed),
                "failures": self.upstream_failures.load(Ordering::Relaxed),
                "quota_failures": self.quota_failures.load(Ordering::Relaxed),
                "fallbacks": self.fallbacks.load(Ordering::Relaxed),
                "cooldown_skips": self.cooldown_skips.load(Ordering::Relaxed),
            },
        })
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

pub fn new_metrics() -> SharedMetrics {
    Arc::new(Metrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoverlate_core::cache::RequestKind;

    #[test]
    fn test_events_update_counters() {
        let metrics = Metrics::new();
        metrics.observe(&OrchestratorEvent::CacheMiss {
            kind: RequestKind::Translation,
        });
        metrics.observe(&OrchestratorEvent::Failed {
            model: "a".into(),
            error: "quota".into(),
            quota: true,
        });
        metrics.observe(&OrchestratorEvent::Succeeded {
            model: "b".into(),
            index: 1,
        });
        metrics.observe(&OrchestratorEvent::Succeeded {
            model: "a".into(),
            index: 0,
        });
        metrics.record_action(true);

        let json = metrics.to_json();
        assert_eq!(json["cache"]["misses"], 1);
        assert_eq!(json["upstream"]["failures"], 1);
        assert_eq!(json["upstream"]["quota_failures"], 1);
        assert_eq!(json["upstream"]["fallbacks"], 1);
        assert_eq!(json["actions"]["success"], 1);
    }
}
