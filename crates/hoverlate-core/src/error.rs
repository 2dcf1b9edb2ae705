//! Error types for Hoverlate.
//!
//! Two layers: [`UpstreamError`] classifies a single failed call to the
//! remote model, [`HoverlateError`] is what an operation finally returns.
//! Every error maps to one short user-facing message via
//! [`HoverlateError::user_message`].

use thiserror::Error;

use crate::cooldown::CooldownKind;

/// Classification of a failed upstream call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("You exceeded your current quota: {0}")]
    QuotaExceeded(String),

    #[error("Rate limit on model: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("API key not valid: {0}")]
    InvalidKey(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Model not found for API key: {0}")]
    ModelNotFound(String),

    #[error("User location is not supported: {0}")]
    RegionUnsupported(String),

    #[error("Request blocked by API: {0}")]
    Blocked(String),

    #[error("Model reached its maximum output length")]
    MaxOutput,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl UpstreamError {
    /// Quota failures are an expected operational state, not a model defect.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    /// Short stable name of the failure kind, safe to hand to a caller.
    pub fn category(&self) -> &'static str {
        match self {
            Self::QuotaExceeded(_) => "quotaExceeded",
            Self::RateLimited { .. } => "rateLimited",
            Self::InvalidKey(_) => "invalidKey",
            Self::PermissionDenied(_) => "permissionDenied",
            Self::ModelNotFound(_) => "modelNotFound",
            Self::RegionUnsupported(_) => "regionUnsupported",
            Self::Blocked(_) => "blocked",
            Self::MaxOutput => "maxOutput",
            Self::Malformed(_) => "malformedResponse",
            Self::Network(_) => "network",
            Self::Server { .. } => "server",
        }
    }

    /// Whether this rejection means the model can never work with the key
    /// that was used (checked during model validation).
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_)
                | Self::PermissionDenied(_)
                | Self::ModelNotFound(_)
                | Self::RegionUnsupported(_)
        )
    }
}

/// Why a candidate model produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Upstream(UpstreamError),
    CoolingDown { model: String, kind: CooldownKind },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream(e) => write!(f, "{}", e),
            Self::CoolingDown { model, kind } => match kind {
                CooldownKind::DailyQuota => {
                    write!(f, "Model {} is on daily quota cooldown", model)
                }
                CooldownKind::RepeatedFailure => write!(
                    f,
                    "Model {} is on 24h cooldown due to repeated failures",
                    model
                ),
            },
        }
    }
}

/// Core error type for all Hoverlate operations.
#[derive(Error, Debug)]
pub enum HoverlateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API key not set")]
    MissingApiKey,

    #[error("{}", no_candidates_reason(.single_model))]
    NoCandidates { single_model: bool },

    #[error("[AllModelsFailed] {cause}")]
    AllModelsFailed { cause: FailureCause },

    #[error("[SingleModelFailed] {model}: {cause}")]
    SingleModelFailed { model: String, cause: FailureCause },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn no_candidates_reason(single_model: &bool) -> &'static str {
    if *single_model {
        "[SingleModelFailed] Selected model is unavailable."
    } else {
        "[AllModelsFailed] No valid models in fallback chain."
    }
}

pub type Result<T> = std::result::Result<T, HoverlateError>;

const QUOTA_MESSAGE: &str =
    "Daily API quota exceeded. Please check your AI provider's plan and billing.";
const INVALID_KEY_MESSAGE: &str = "Invalid API key. Please check your settings.";
const NETWORK_MESSAGE: &str = "Network error. Please check your connection and try again.";
const GENERIC_MESSAGE: &str = "An unexpected error occurred. Please try again.";

impl HoverlateError {
    /// Short, stable message suitable for showing in a popup.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingApiKey => {
                "API key not set. Please add your key in the settings.".to_string()
            }
            Self::Config(_) => "Configuration error. Please check your settings.".to_string(),
            Self::NoCandidates { single_model: true } => {
                "The selected model is unavailable for your API key. Choose another model or enable fallback."
                    .to_string()
            }
            Self::NoCandidates { single_model: false } => {
                "No valid models in the fallback chain. Re-validate your API key or edit the chain."
                    .to_string()
            }
            Self::AllModelsFailed { cause } => cause_message(cause).unwrap_or_else(|| {
                "All models failed (fallback was on). Check API key, network, and quota."
                    .to_string()
            }),
            Self::SingleModelFailed { cause, .. } => cause_message(cause).unwrap_or_else(|| {
                "The selected model failed. Check API key/quota or try enabling fallback."
                    .to_string()
            }),
            Self::Upstream(e) => {
                upstream_message(e).unwrap_or_else(|| GENERIC_MESSAGE.to_string())
            }
            Self::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            Self::Store(_) | Self::Json(_) | Self::Io(_) | Self::Internal(_) => {
                GENERIC_MESSAGE.to_string()
            }
        }
    }
}

fn cause_message(cause: &FailureCause) -> Option<String> {
    match cause {
        FailureCause::Upstream(e) => upstream_message(e),
        FailureCause::CoolingDown {
            kind: CooldownKind::DailyQuota,
            ..
        } => Some(QUOTA_MESSAGE.to_string()),
        FailureCause::CoolingDown {
            kind: CooldownKind::RepeatedFailure,
            ..
        } => Some(
            "Models are cooling down after repeated failures. Try again later or clear cooldowns."
                .to_string(),
        ),
    }
}

fn upstream_message(e: &UpstreamError) -> Option<String> {
    match e {
        UpstreamError::QuotaExceeded(_) => Some(QUOTA_MESSAGE.to_string()),
        UpstreamError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } => Some(format!("Per-minute limit hit. Please wait {}s.", secs)),
        UpstreamError::RateLimited { .. } => {
            Some("Per-minute rate limit hit. Please wait a moment.".to_string())
        }
        UpstreamError::InvalidKey(_) => Some(INVALID_KEY_MESSAGE.to_string()),
        UpstreamError::Network(_) => Some(NETWORK_MESSAGE.to_string()),
        UpstreamError::MaxOutput => Some(
            "Model reached its output limit. This is a temporary issue, not a daily quota error."
                .to_string(),
        ),
        UpstreamError::Blocked(_) => Some(
            "Request was blocked by the API, possibly due to safety settings.".to_string(),
        ),
        UpstreamError::PermissionDenied(_)
        | UpstreamError::ModelNotFound(_)
        | UpstreamError::RegionUnsupported(_)
        | UpstreamError::Malformed(_)
        | UpstreamError::Server { .. } => None,
    }
}
