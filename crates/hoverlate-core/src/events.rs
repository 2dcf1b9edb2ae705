//! Event bus — orchestration progress for metrics and status displays.

use tokio::sync::broadcast;

use crate::cache::RequestKind;
use crate::cooldown::CooldownKind;

/// Something that happened while serving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    CacheHit {
        kind: RequestKind,
    },
    CacheMiss {
        kind: RequestKind,
    },
    /// Candidate skipped because it is cooling down.
    Skipped {
        model: String,
        cooldown: CooldownKind,
    },
    /// About to call the upstream with `model` (`index` in the candidate list).
    Attempt {
        model: String,
        index: usize,
    },
    Failed {
        model: String,
        error: String,
        quota: bool,
    },
    Succeeded {
        model: String,
        index: usize,
    },
    /// Every candidate was skipped or failed.
    Exhausted {
        single_model: bool,
    },
}

impl OrchestratorEvent {
    /// Human-readable status line for the CLI, if the event deserves one.
    pub fn format_status(&self) -> Option<String> {
        match self {
            Self::CacheHit { .. } => Some("💾 Served from cache".to_string()),
            Self::Skipped { model, cooldown } => Some(match cooldown {
                CooldownKind::DailyQuota => format!("⏸️  {} is out of daily quota, skipping", model),
                CooldownKind::RepeatedFailure => {
                    format!("⏸️  {} is cooling down after repeated failures, skipping", model)
                }
            }),
            Self::Attempt { model, index } if *index == 0 => {
                Some(format!("🧠 Asking {}...", model))
            }
            Self::Attempt { model, .. } => Some(format!("🔁 Falling back to {}...", model)),
            Self::Failed { model, quota, .. } if *quota => {
                Some(format!("⚠️  {} hit its daily quota", model))
            }
            Self::Failed { model, .. } => Some(format!("⚠️  {} failed", model)),
            Self::Exhausted { .. } => Some("❌ No model could answer".to_string()),
            Self::CacheMiss { .. } | Self::Succeeded { .. } => None,
        }
    }
}

/// Broadcast channel for [`OrchestratorEvent`]s. Publishing with no
/// subscribers is a no-op.
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        bus.publish(OrchestratorEvent::CacheMiss {
            kind: RequestKind::Translation,
        });

        let mut rx = bus.subscribe();
        bus.publish(OrchestratorEvent::Attempt {
            model: "m".into(),
            index: 1,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.format_status().as_deref(),
            Some("🔁 Falling back to m...")
        );
    }
}
