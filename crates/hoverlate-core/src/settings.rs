//! User settings persisted in the durable store.
//!
//! Each option lives under its own key so a UI can read or write one at a
//! time. The key names are shared with the settings page.

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{HoverlateError, Result};
use crate::models::{DEFAULT_MODEL, ModelId};
use crate::store::{Entries, KvStore};

pub const KEY_API_KEY: &str = "geminiApiKey";
pub const KEY_MODEL: &str = "geminiModel";
pub const KEY_CYCLING: &str = "modelCyclingEnabled";
pub const KEY_CHAIN: &str = "modelFallbackChain";
pub const KEY_INVALID_MODELS: &str = "permanentlyInvalidModels";
pub const KEY_EXPLANATION_CACHE: &str = "explanationCache";
pub const KEY_SHOW_MODEL_USED: &str = "showModelUsed";
pub const KEY_TRANSLATION_PROMPT: &str = "geminiPrompt";
pub const KEY_EXPLANATION_PROMPT: &str = "explanationPrompt";

const ALL_KEYS: &[&str] = &[
    KEY_API_KEY,
    KEY_MODEL,
    KEY_CYCLING,
    KEY_CHAIN,
    KEY_INVALID_MODELS,
    KEY_EXPLANATION_CACHE,
    KEY_SHOW_MODEL_USED,
    KEY_TRANSLATION_PROMPT,
    KEY_EXPLANATION_PROMPT,
];

/// Keys accepted by [`Settings::set_field`], in display order.
pub const SETTABLE_FIELDS: &[&str] = &[
    "api_key",
    "model",
    "cycling",
    "chain",
    "explanation_cache",
    "show_model_used",
    "translation_prompt",
    "explanation_prompt",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: ModelId,
    pub cycling_enabled: bool,
    /// Ordered fallback chain; empty means "use the built-in chain".
    pub fallback_chain: Vec<ModelId>,
    pub invalid_models: BTreeSet<ModelId>,
    pub explanation_cache: bool,
    pub show_model_used: bool,
    pub translation_prompt: Option<String>,
    pub explanation_prompt: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            cycling_enabled: false,
            fallback_chain: Vec::new(),
            invalid_models: BTreeSet::new(),
            explanation_cache: true,
            show_model_used: false,
            translation_prompt: None,
            explanation_prompt: None,
        }
    }
}

fn read<T: DeserializeOwned>(entries: &Entries, key: &str) -> Option<T> {
    entries
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Drop repeated models, keeping the first occurrence.
pub fn dedup_chain(chain: Vec<ModelId>) -> Vec<ModelId> {
    let mut seen = BTreeSet::new();
    chain
        .into_iter()
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(HoverlateError::InvalidRequest(format!(
            "{} expects true/false, got '{}'",
            field, value
        ))),
    }
}

impl Settings {
    /// Read all settings, substituting defaults for missing or unreadable keys.
    pub async fn load(store: &dyn KvStore) -> Result<Self> {
        let entries = store.get(ALL_KEYS).await?;
        let defaults = Self::default();

        Ok(Self {
            api_key: non_empty(read(&entries, KEY_API_KEY)),
            model: non_empty(read(&entries, KEY_MODEL)).unwrap_or(defaults.model),
            cycling_enabled: read(&entries, KEY_CYCLING).unwrap_or(defaults.cycling_enabled),
            fallback_chain: dedup_chain(read(&entries, KEY_CHAIN).unwrap_or_default()),
            invalid_models: read(&entries, KEY_INVALID_MODELS).unwrap_or_default(),
            explanation_cache: read(&entries, KEY_EXPLANATION_CACHE)
                .unwrap_or(defaults.explanation_cache),
            show_model_used: read(&entries, KEY_SHOW_MODEL_USED)
                .unwrap_or(defaults.show_model_used),
            translation_prompt: non_empty(read(&entries, KEY_TRANSLATION_PROMPT)),
            explanation_prompt: non_empty(read(&entries, KEY_EXPLANATION_PROMPT)),
        })
    }

    /// Write every setting. A changed API key clears the invalid-model set.
    pub async fn save(&self, store: &dyn KvStore) -> Result<()> {
        let previous = Self::load(store).await?;
        let mut invalid = self.invalid_models.clone();
        if previous.api_key != self.api_key {
            invalid.clear();
        }

        let mut entries = Entries::new();
        entries.insert(KEY_API_KEY.into(), json!(self.api_key.clone().unwrap_or_default()));
        entries.insert(KEY_MODEL.into(), json!(self.model));
        entries.insert(KEY_CYCLING.into(), json!(self.cycling_enabled));
        entries.insert(
            KEY_CHAIN.into(),
            json!(dedup_chain(self.fallback_chain.clone())),
        );
        entries.insert(KEY_INVALID_MODELS.into(), json!(invalid));
        entries.insert(KEY_EXPLANATION_CACHE.into(), json!(self.explanation_cache));
        entries.insert(KEY_SHOW_MODEL_USED.into(), json!(self.show_model_used));
        entries.insert(
            KEY_TRANSLATION_PROMPT.into(),
            json!(self.translation_prompt.clone().unwrap_or_default()),
        );
        entries.insert(
            KEY_EXPLANATION_PROMPT.into(),
            json!(self.explanation_prompt.clone().unwrap_or_default()),
        );

        store.set(entries).await
    }

    /// Replace the permanently-invalid set without touching anything else.
    pub async fn store_invalid_models(
        store: &dyn KvStore,
        models: &BTreeSet<ModelId>,
    ) -> Result<()> {
        store.set_one(KEY_INVALID_MODELS, json!(models)).await
    }

    /// Apply a `key = value` edit coming from a settings surface.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<()> {
        match field {
            "api_key" => self.api_key = non_empty(Some(value.trim().to_string())),
            "model" => self.model = value.trim().to_string(),
            "cycling" => self.cycling_enabled = parse_bool(field, value)?,
            "chain" => {
                self.fallback_chain = dedup_chain(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            "explanation_cache" => self.explanation_cache = parse_bool(field, value)?,
            "show_model_used" => self.show_model_used = parse_bool(field, value)?,
            "translation_prompt" => self.translation_prompt = non_empty(Some(value.to_string())),
            "explanation_prompt" => self.explanation_prompt = non_empty(Some(value.to_string())),
            _ => {
                return Err(HoverlateError::InvalidRequest(format!(
                    "unknown setting '{}'",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Settings as JSON, with the API key reduced to whether it is set.
    pub fn to_public_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("apiKeySet".into(), json!(self.api_key.is_some()));
        }
        value
    }
}
