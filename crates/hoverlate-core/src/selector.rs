//! Model selection — which models to try, and in which order.

use std::collections::BTreeSet;

use crate::error::{HoverlateError, Result};
use crate::models::{ModelId, default_fallback_chain};
use crate::settings::Settings;

/// Inputs to candidate selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionConfig {
    pub cycling_enabled: bool,
    /// User chain; empty means the built-in default chain.
    pub chain: Vec<ModelId>,
    pub single_model: ModelId,
    pub invalid_models: BTreeSet<ModelId>,
}

impl From<&Settings> for SelectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            cycling_enabled: settings.cycling_enabled,
            chain: settings.fallback_chain.clone(),
            single_model: settings.model.clone(),
            invalid_models: settings.invalid_models.clone(),
        }
    }
}

/// Ordered candidate list for one request. Pure function of `config`.
///
/// Fails with [`HoverlateError::NoCandidates`] when every model is filtered
/// out; `single_model` tells which mode produced the empty list.
pub fn select_candidates(config: &SelectionConfig) -> Result<Vec<ModelId>> {
    let base = if !config.cycling_enabled {
        vec![config.single_model.clone()]
    } else if config.chain.is_empty() {
        default_fallback_chain()
    } else {
        config.chain.clone()
    };

    let mut seen = BTreeSet::new();
    let candidates: Vec<ModelId> = base
        .into_iter()
        .filter(|m| !m.is_empty() && !config.invalid_models.contains(m))
        .filter(|m| seen.insert(m.clone()))
        .collect();

    if candidates.is_empty() {
        return Err(HoverlateError::NoCandidates {
            single_model: !config.cycling_enabled,
        });
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_FALLBACK_CHAIN;

    fn ids(list: &[&str]) -> Vec<ModelId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_model_mode() {
        let config = SelectionConfig {
            cycling_enabled: false,
            chain: ids(&["a", "b"]),
            single_model: "solo".into(),
            ..Default::default()
        };
        assert_eq!(select_candidates(&config).unwrap(), ids(&["solo"]));
    }

    #[test]
    fn test_cycling_uses_user_chain_in_order() {
        let config = SelectionConfig {
            cycling_enabled: true,
            chain: ids(&["c", "a", "b"]),
            single_model: "solo".into(),
            invalid_models: BTreeSet::from(["a".to_string()]),
        };
        assert_eq!(select_candidates(&config).unwrap(), ids(&["c", "b"]));
    }

    #[test]
    fn test_cycling_with_empty_chain_uses_default() {
        let config = SelectionConfig {
            cycling_enabled: true,
            single_model: "solo".into(),
            ..Default::default()
        };
        let expected: Vec<ModelId> = DEFAULT_FALLBACK_CHAIN.iter().map(|m| m.to_string()).collect();
        assert_eq!(select_candidates(&config).unwrap(), expected);
    }

    #[test]
    fn test_invalid_single_model_reports_single_variant() {
        let config = SelectionConfig {
            cycling_enabled: false,
            single_model: "solo".into(),
            invalid_models: BTreeSet::from(["solo".to_string()]),
            ..Default::default()
        };
        let err = select_candidates(&config).unwrap_err();
        assert!(matches!(err, HoverlateError::NoCandidates { single_model: true }));
    }

    #[test]
    fn test_all_chain_models_invalid_reports_chain_variant() {
        let config = SelectionConfig {
            cycling_enabled: true,
            chain: ids(&["a", "b"]),
            single_model: "solo".into(),
            invalid_models: BTreeSet::from(["a".to_string(), "b".to_string()]),
        };
        let err = select_candidates(&config).unwrap_err();
        assert!(matches!(err, HoverlateError::NoCandidates { single_model: false }));
    }
}
