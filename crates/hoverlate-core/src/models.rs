//! Known upstream models and their sustained request rates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque upstream model identifier (e.g. `gemini-2.5-flash`).
pub type ModelId = String;

/// Static metadata for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name.
    pub name: String,
    /// Sustained requests per minute.
    pub rate: u32,
}

struct KnownModel {
    id: &'static str,
    name: &'static str,
    rate: u32,
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        id: "gemini-2.5-pro",
        name: "Gemini 2.5 Pro",
        rate: 5,
    },
    KnownModel {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        rate: 10,
    },
    KnownModel {
        id: "gemini-2.5-flash-lite",
        name: "Gemini 2.5 Flash-Lite",
        rate: 15,
    },
    KnownModel {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
        rate: 15,
    },
    KnownModel {
        id: "gemini-2.0-flash-lite",
        name: "Gemini 2.0 Flash-Lite",
        rate: 30,
    },
];

/// Attempt order used when cycling is on and the user has no chain.
pub const DEFAULT_FALLBACK_CHAIN: &[&str] = &[
    "gemini-2.0-flash-lite",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.5-flash",
    "gemini-2.5-pro",
];

/// Single model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Requests per minute assumed for models missing from the catalogue.
pub const DEFAULT_RATE: u32 = 10;

/// The full catalogue, keyed by model id.
pub fn known_models() -> BTreeMap<ModelId, ModelInfo> {
    KNOWN_MODELS
        .iter()
        .map(|m| {
            (
                m.id.to_string(),
                ModelInfo {
                    name: m.name.to_string(),
                    rate: m.rate,
                },
            )
        })
        .collect()
}

/// Every known model id, in catalogue order.
pub fn known_model_ids() -> Vec<ModelId> {
    KNOWN_MODELS.iter().map(|m| m.id.to_string()).collect()
}

pub fn default_fallback_chain() -> Vec<ModelId> {
    DEFAULT_FALLBACK_CHAIN.iter().map(|m| m.to_string()).collect()
}

/// Sustained requests per minute for `model`.
pub fn rate_for(model: &str) -> u32 {
    KNOWN_MODELS
        .iter()
        .find(|m| m.id == model)
        .map(|m| m.rate)
        .unwrap_or(DEFAULT_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_only_names_known_models() {
        let known = known_models();
        for model in DEFAULT_FALLBACK_CHAIN {
            assert!(known.contains_key(*model), "{} missing", model);
        }
        assert!(known.contains_key(DEFAULT_MODEL));
    }

    #[test]
    fn test_rate_lookup() {
        assert_eq!(rate_for("gemini-2.5-pro"), 5);
        assert_eq!(rate_for("gemini-2.0-flash-lite"), 30);
        assert_eq!(rate_for("some-future-model"), DEFAULT_RATE);
    }
}
