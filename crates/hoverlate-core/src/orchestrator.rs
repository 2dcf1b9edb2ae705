//! Request orchestrator — the engine between the action surface and the
//! upstream model API.
//!
//! For every request it:
//! 1. Resolves the ordered candidate models from the settings
//! 2. Skips candidates that are cooling down
//! 3. Waits for the rate limiter, then calls the upstream
//! 4. Records the outcome in the cooldown ledger
//! 5. Returns the first success (and caches it), or an aggregate error
//!    once every candidate is exhausted

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{RequestKind, ResponseCache, normalize};
use crate::clock::Clock;
use crate::cooldown::{CooldownLedger, FailureKind};
use crate::error::{FailureCause, HoverlateError, Result, UpstreamError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::models::{ModelId, known_model_ids};
use crate::prompt;
use crate::selector::{SelectionConfig, select_candidates};
use crate::settings::Settings;
use crate::store::KvStore;
use crate::upstream::UpstreamClient;

/// How a batch of uncached texts is sent upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// One orchestrated request per text; failures stay in their slot.
    #[default]
    Sequential,
    /// One orchestrated request for all texts, split by line.
    SingleCall,
}

/// Knobs for building an [`Orchestrator`].
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub rate_limit: RateLimitConfig,
    pub batch_mode: BatchMode,
}

/// Result of one successful orchestrated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub payload: String,
    pub model_used: ModelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translation: String,
    pub model_used: ModelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub explanation: String,
    pub model_used: ModelId,
    pub from_cache: bool,
}

/// One slot of a batch answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BatchSlot {
    Translated(Translation),
    Failed { error: String },
}

/// Outcome of probing every known model with a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: Vec<ModelId>,
    /// Never usable with this key; replaces the stored invalid set.
    pub permanently_invalid: BTreeSet<ModelId>,
    /// Failed for a reason that may clear up (quota, network, ...).
    pub transient: BTreeMap<ModelId, String>,
}

pub struct Orchestrator {
    store: Arc<dyn KvStore>,
    upstream: Arc<dyn UpstreamClient>,
    ledger: CooldownLedger,
    limiter: RateLimiter,
    cache: ResponseCache,
    events: EventBus,
    batch_mode: BatchMode,
}

fn require_api_key(settings: &Settings) -> Result<&str> {
    settings
        .api_key
        .as_deref()
        .ok_or(HoverlateError::MissingApiKey)
}

fn empty_text() -> HoverlateError {
    HoverlateError::InvalidRequest("text is empty".to_string())
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn KvStore>,
        upstream: Arc<dyn UpstreamClient>,
        clock: Arc<dyn Clock>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            ledger: CooldownLedger::new(store.clone(), clock.clone()),
            limiter: RateLimiter::new(store.clone(), clock.clone(), options.rate_limit),
            cache: ResponseCache::new(store.clone(), clock),
            events: EventBus::default(),
            batch_mode: options.batch_mode,
            store,
            upstream,
        }
    }

    pub fn ledger(&self) -> &CooldownLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn upstream_name(&self) -> &str {
        self.upstream.name()
    }

    pub async fn settings(&self) -> Result<Settings> {
        Settings::load(self.store.as_ref()).await
    }

    fn prompt_for(kind: RequestKind, text: &str, settings: &Settings) -> String {
        match kind {
            RequestKind::Translation => prompt::build(
                settings.translation_prompt.as_deref(),
                prompt::DEFAULT_TRANSLATION_PROMPT,
                text,
            ),
            RequestKind::Explanation => prompt::build(
                settings.explanation_prompt.as_deref(),
                prompt::DEFAULT_EXPLANATION_PROMPT,
                text,
            ),
        }
    }

    /// Try each candidate in order until one produces an accepted answer.
    ///
    /// `accept` turns the raw upstream text into the result; rejecting it
    /// counts as a failure of that candidate.
    async fn run_candidates<T, F>(
        &self,
        settings: &Settings,
        prompt: &str,
        accept: F,
    ) -> Result<(T, ModelId)>
    where
        F: Fn(String) -> std::result::Result<T, UpstreamError>,
    {
        let api_key = require_api_key(settings)?;
        let candidates = select_candidates(&SelectionConfig::from(settings))?;
        let single_model = !settings.cycling_enabled;

        let mut last_cause: Option<FailureCause> = None;

        for (index, model) in candidates.iter().enumerate() {
            if let Some(cooldown) = self.ledger.active_cooldown(model).await {
                debug!(model = %model, ?cooldown, "Skipping model on cooldown");
                self.events.publish(OrchestratorEvent::Skipped {
                    model: model.clone(),
                    cooldown,
                });
                if !matches!(last_cause, Some(FailureCause::Upstream(_))) {
                    last_cause = Some(FailureCause::CoolingDown {
                        model: model.clone(),
                        kind: cooldown,
                    });
                }
                continue;
            }

            self.limiter.admit(model, 1).await;
            self.events.publish(OrchestratorEvent::Attempt {
                model: model.clone(),
                index,
            });

            let result = self
                .upstream
                .generate(api_key, model, prompt)
                .await
                .and_then(&accept);

            match result {
                Ok(value) => {
                    self.ledger.record_success(model).await;
                    if index > 0 {
                        info!(model = %model, index, "Fallback model succeeded");
                    }
                    self.events.publish(OrchestratorEvent::Succeeded {
                        model: model.clone(),
                        index,
                    });
                    return Ok((value, model.clone()));
                }
                Err(e) => {
                    warn!(model = %model, "Model failed: {}", e);
                    self.ledger.record_failure(model, FailureKind::from(&e)).await;
                    self.events.publish(OrchestratorEvent::Failed {
                        model: model.clone(),
                        error: e.to_string(),
                        quota: e.is_quota(),
                    });
                    last_cause = Some(FailureCause::Upstream(e));
                }
            }
        }

        self.events
            .publish(OrchestratorEvent::Exhausted { single_model });

        let cause = last_cause.unwrap_or_else(|| {
            FailureCause::Upstream(UpstreamError::Malformed("no candidate was attempted".into()))
        });

        if single_model {
            Err(HoverlateError::SingleModelFailed {
                model: settings.model.clone(),
                cause,
            })
        } else {
            Err(HoverlateError::AllModelsFailed { cause })
        }
    }

    /// Orchestrate one request without touching the cache.
    async fn generate(
        &self,
        kind: RequestKind,
        text: &str,
        settings: &Settings,
    ) -> Result<Outcome> {
        let prompt = Self::prompt_for(kind, text, settings);
        let (payload, model_used) = self
            .run_candidates(settings, &prompt, |raw| Ok(raw.trim().to_string()))
            .await?;
        Ok(Outcome {
            payload,
            model_used,
        })
    }

    /// Orchestrate one request and cache the successful result.
    pub async fn execute(
        &self,
        kind: RequestKind,
        text: &str,
        settings: &Settings,
    ) -> Result<Outcome> {
        let outcome = self.generate(kind, text, settings).await?;
        self.cache
            .store(kind, text, &outcome.payload, &outcome.model_used)
            .await;
        Ok(outcome)
    }

    async fn cached_translation(&self, text: &str) -> Option<Translation> {
        match self.cache.lookup(RequestKind::Translation, text).await {
            Some(entry) => {
                self.events.publish(OrchestratorEvent::CacheHit {
                    kind: RequestKind::Translation,
                });
                Some(Translation {
                    translation: entry.payload,
                    model_used: entry.model_used,
                })
            }
            None => {
                self.events.publish(OrchestratorEvent::CacheMiss {
                    kind: RequestKind::Translation,
                });
                None
            }
        }
    }

    pub async fn translate_single(&self, text: &str) -> Result<Translation> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(empty_text());
        }

        if let Some(hit) = self.cached_translation(text).await {
            return Ok(hit);
        }

        let settings = self.settings().await?;
        let outcome = self.execute(RequestKind::Translation, text, &settings).await?;
        Ok(Translation {
            translation: outcome.payload,
            model_used: outcome.model_used,
        })
    }

    /// Translate several texts. Settings problems fail the whole batch;
    /// per-text failures are reported in that text's slot only.
    pub async fn translate_batch(&self, texts: &[String]) -> Result<Vec<BatchSlot>> {
        let settings = self.settings().await?;

        let mut slots: HashMap<&str, BatchSlot> = HashMap::new();
        let mut misses: Vec<&str> = Vec::new();

        for text in texts.iter().map(|t| normalize(t)) {
            if slots.contains_key(text) || misses.contains(&text) {
                continue;
            }
            if text.is_empty() {
                slots.insert(
                    text,
                    BatchSlot::Failed {
                        error: empty_text().user_message(),
                    },
                );
            } else if let Some(hit) = self.cached_translation(text).await {
                slots.insert(text, BatchSlot::Translated(hit));
            } else {
                misses.push(text);
            }
        }

        if !misses.is_empty() {
            require_api_key(&settings)?;
            select_candidates(&SelectionConfig::from(&settings))?;
        }

        debug!(
            total = texts.len(),
            misses = misses.len(),
            mode = ?self.batch_mode,
            "Translating batch"
        );

        match self.batch_mode {
            BatchMode::Sequential => {
                for text in misses {
                    let slot = match self.execute(RequestKind::Translation, text, &settings).await {
                        Ok(outcome) => BatchSlot::Translated(Translation {
                            translation: outcome.payload,
                            model_used: outcome.model_used,
                        }),
                        Err(e) => {
                            warn!("Batch item failed: {}", e);
                            BatchSlot::Failed {
                                error: e.user_message(),
                            }
                        }
                    };
                    slots.insert(text, slot);
                }
            }
            BatchMode::SingleCall if !misses.is_empty() => {
                let prompt = prompt::build_batch(&misses);
                let expected = misses.len();
                match self
                    .run_candidates(&settings, &prompt, |raw| prompt::split_batch(&raw, expected))
                    .await
                {
                    Ok((lines, model_used)) => {
                        for (text, line) in misses.into_iter().zip(lines) {
                            self.cache
                                .store(RequestKind::Translation, text, &line, &model_used)
                                .await;
                            slots.insert(
                                text,
                                BatchSlot::Translated(Translation {
                                    translation: line,
                                    model_used: model_used.clone(),
                                }),
                            );
                        }
                    }
                    Err(e) => {
                        warn!("Batch call failed: {}", e);
                        let error = e.user_message();
                        for text in misses {
                            slots.insert(
                                text,
                                BatchSlot::Failed {
                                    error: error.clone(),
                                },
                            );
                        }
                    }
                }
            }
            BatchMode::SingleCall => {}
        }

        Ok(texts
            .iter()
            .map(|t| {
                slots.get(normalize(t)).cloned().unwrap_or_else(|| BatchSlot::Failed {
                    error: HoverlateError::Store("missing batch slot".into()).user_message(),
                })
            })
            .collect())
    }

    /// Explain `text`. `force` skips the cache read but still refreshes it.
    pub async fn explain(&self, text: &str, force: bool) -> Result<Explanation> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(empty_text());
        }

        let settings = self.settings().await?;

        if settings.explanation_cache && !force {
            if let Some(entry) = self.cache.lookup(RequestKind::Explanation, text).await {
                self.events.publish(OrchestratorEvent::CacheHit {
                    kind: RequestKind::Explanation,
                });
                return Ok(Explanation {
                    explanation: entry.payload,
                    model_used: entry.model_used,
                    from_cache: true,
                });
            }
            self.events.publish(OrchestratorEvent::CacheMiss {
                kind: RequestKind::Explanation,
            });
        }

        let outcome = if settings.explanation_cache {
            self.execute(RequestKind::Explanation, text, &settings).await?
        } else {
            self.generate(RequestKind::Explanation, text, &settings).await?
        };

        Ok(Explanation {
            explanation: outcome.payload,
            model_used: outcome.model_used,
            from_cache: false,
        })
    }

    /// Try every known model with `api_key` concurrently and replace the
    /// stored permanently-invalid set with the models that rejected it.
    pub async fn validate_models(&self, api_key: &str) -> Result<ValidationReport> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(HoverlateError::MissingApiKey);
        }

        Settings::store_invalid_models(self.store.as_ref(), &BTreeSet::new()).await?;

        let models = known_model_ids();
        let checks = models.iter().map(|model| async move {
            self.limiter.admit(model, 1).await;
            let result = self
                .upstream
                .generate(api_key, model, prompt::VALIDATION_PROMPT)
                .await;
            (model, result)
        });
        let results = futures::future::join_all(checks).await;

        let mut report = ValidationReport::default();
        for (model, result) in results {
            match result {
                Ok(_) => report.valid.push(model.clone()),
                Err(e) if e.is_permanent() => {
                    info!(model = %model, "Model unavailable for this key: {}", e);
                    report.permanently_invalid.insert(model.clone());
                }
                Err(e) => {
                    info!(model = %model, "Model validation failed transiently: {}", e);
                    if e.is_quota() {
                        self.ledger
                            .record_failure(model, FailureKind::QuotaExceeded)
                            .await;
                    }
                    report.transient.insert(model.clone(), e.category().to_string());
                }
            }
        }

        Settings::store_invalid_models(self.store.as_ref(), &report.permanently_invalid).await?;
        info!(
            invalid = report.permanently_invalid.len(),
            valid = report.valid.len(),
            "Model validation complete"
        );
        Ok(report)
    }
}
