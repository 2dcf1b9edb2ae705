//! Action service — the request/response contract in front of the
//! orchestrator.
//!
//! Every action arrives as `{"action": "...", ...}` and produces either its
//! success shape or `{"error": "<short user message>"}`. Transports (HTTP,
//! CLI) only move these values around.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hoverlate_core::cooldown::LedgerStatus;
use hoverlate_core::error::{HoverlateError, Result};
use hoverlate_core::models::{ModelId, ModelInfo, default_fallback_chain, known_models};
use hoverlate_core::orchestrator::{BatchSlot, Explanation, Orchestrator};

use crate::metrics::SharedMetrics;

/// An incoming action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    TranslateSingle {
        text: String,
    },
    TranslateBatch {
        texts: Vec<String>,
    },
    Explain {
        text: String,
        #[serde(default)]
        force: bool,
    },
    ValidateModels {
        #[serde(default)]
        api_key: String,
    },
    GetKnownModels,
    ClearCooldowns,
    CooldownStatus,
    GetSettings,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TranslateSingle { .. } => "translateSingle",
            Self::TranslateBatch { .. } => "translateBatch",
            Self::Explain { .. } => "explain",
            Self::ValidateModels { .. } => "validateModels",
            Self::GetKnownModels => "getKnownModels",
            Self::ClearCooldowns => "clearCooldowns",
            Self::CooldownStatus => "cooldownStatus",
            Self::GetSettings => "getSettings",
        }
    }
}

/// The answer to one [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ActionResponse {
    Translation {
        translation: String,
        model_used: ModelId,
        show_model_used: bool,
    },
    Batch {
        translations: Vec<BatchSlot>,
        show_model_used: bool,
    },
    Explanation(Explanation),
    Validation {
        permanently_invalid_models: Vec<ModelId>,
        valid_models: Vec<ModelId>,
        transient_failures: BTreeMap<ModelId, String>,
    },
    KnownModels {
        models: BTreeMap<ModelId, ModelInfo>,
        default_chain: Vec<ModelId>,
    },
    Cleared {
        success: bool,
        cleared_count: usize,
    },
    Cooldowns(LedgerStatus),
    Settings(Value),
    Error {
        error: String,
    },
}

impl ActionResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Dispatches actions to the orchestrator and keeps the metrics current.
#[derive(Clone)]
pub struct ActionService {
    orchestrator: Arc<Orchestrator>,
    metrics: SharedMetrics,
}

impl ActionService {
    pub fn new(orchestrator: Arc<Orchestrator>, metrics: SharedMetrics) -> Self {
        Self {
            orchestrator,
            metrics,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Feed orchestrator events into the metrics until the orchestrator
    /// is dropped.
    pub fn spawn_metrics_listener(&self) -> JoinHandle<()> {
        let mut rx = self.orchestrator.events().subscribe();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => metrics.observe(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Metrics listener lagged behind events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Run one action. Failures become `{error}` with a user message.
    ///
    /// The action runs on its own task, so dropping the returned future
    /// (a disconnected HTTP caller) still lets the attempt finish and write
    /// its cache and ledger state.
    pub async fn dispatch(&self, action: Action) -> ActionResponse {
        let name = action.name();
        let service = self.clone();
        let result = tokio::spawn(async move { service.handle(action).await })
            .await
            .unwrap_or_else(|e| Err(HoverlateError::Internal(e.to_string())));
        self.metrics.record_action(result.is_ok());

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(action = name, "Action failed: {}", e);
                ActionResponse::Error {
                    error: e.user_message(),
                }
            }
        }
    }

    /// Answer a request body that is not a known action.
    pub fn reject(&self, reason: &str) -> ActionResponse {
        warn!("Rejected action request: {}", reason);
        self.metrics.record_action(false);
        ActionResponse::Error {
            error: HoverlateError::InvalidRequest("unknown or malformed action".to_string())
                .user_message(),
        }
    }

    async fn handle(&self, action: Action) -> Result<ActionResponse> {
        match action {
            Action::TranslateSingle { text } => {
                let translation = self.orchestrator.translate_single(&text).await?;
                let settings = self.orchestrator.settings().await?;
                Ok(ActionResponse::Translation {
                    translation: translation.translation,
                    model_used: translation.model_used,
                    show_model_used: settings.show_model_used,
                })
            }
            Action::TranslateBatch { texts } => {
                let translations = self.orchestrator.translate_batch(&texts).await?;
                let settings = self.orchestrator.settings().await?;
                Ok(ActionResponse::Batch {
                    translations,
                    show_model_used: settings.show_model_used,
                })
            }
            Action::Explain { text, force } => Ok(ActionResponse::Explanation(
                self.orchestrator.explain(&text, force).await?,
            )),
            Action::ValidateModels { api_key } => {
                let report = self.orchestrator.validate_models(&api_key).await?;
                Ok(ActionResponse::Validation {
                    permanently_invalid_models: report.permanently_invalid.into_iter().collect(),
                    valid_models: report.valid,
                    transient_failures: report.transient,
                })
            }
            Action::GetKnownModels => Ok(ActionResponse::KnownModels {
                models: known_models(),
                default_chain: default_fallback_chain(),
            }),
            Action::ClearCooldowns => {
                let cleared_count = self.orchestrator.ledger().clear_all().await?;
                info!(cleared_count, "Cooldowns cleared on request");
                Ok(ActionResponse::Cleared {
                    success: true,
                    cleared_count,
                })
            }
            Action::CooldownStatus => Ok(ActionResponse::Cooldowns(
                self.orchestrator.ledger().status().await?,
            )),
            Action::GetSettings => Ok(ActionResponse::Settings(
                self.orchestrator.settings().await?.to_public_json(),
            )),
        }
    }
}
