//! Configuration and settings management.
//!
//! Two layers share `hoverlate config`: process options in the TOML file
//! and per-user settings in the durable store. Keys are routed by name.

use std::path::{Path, PathBuf};

use colored::*;

use hoverlate_core::config::HoverlateConfig;
use hoverlate_core::limiter::RateLimitScope;
use hoverlate_core::orchestrator::BatchMode;
use hoverlate_core::settings::{SETTABLE_FIELDS, Settings};
use hoverlate_core::store::KvStore;

/// Keys stored in the TOML config file.
const FILE_KEYS: &[&str] = &[
    "api_base",
    "data_dir",
    "log_filter",
    "server.host",
    "server.port",
    "rate_limit.scope",
    "rate_limit.window_secs",
    "batch.mode",
];

fn is_secret(key: &str) -> bool {
    key.contains("key")
}

fn row(key: &str, value: ColoredString) {
    println!("  {} {} = {}", "│".dimmed(), key.cyan(), value);
}

fn optional(value: Option<&str>) -> ColoredString {
    match value {
        Some(v) => v.green(),
        None => "(default)".dimmed(),
    }
}

/// Store `key` as the API key and return it trimmed.
pub async fn save_api_key(store: &dyn KvStore, key: &str) -> anyhow::Result<String> {
    let mut settings = Settings::load(store).await?;
    settings.set_field("api_key", key)?;
    settings.save(store).await?;
    Ok(settings.api_key.unwrap_or_default())
}

pub async fn run_config_show(
    config_path: &Path,
    config: &HoverlateConfig,
    store: &dyn KvStore,
) -> anyhow::Result<()> {
    let settings = Settings::load(store).await?;

    println!();
    println!("  {} {}", "Config file:".dimmed(), config_path.display());
    println!("  {} {}", "Data dir:".dimmed(), config.data_dir().display());
    println!();

    println!("  {}", "┌─ Settings ─────────────────────".dimmed());
    row(
        "api_key",
        if settings.api_key.is_some() {
            "••••••••(set)".green()
        } else {
            "(not set)".red()
        },
    );
    row("model", settings.model.green());
    row("cycling", settings.cycling_enabled.to_string().yellow());
    row(
        "chain",
        if settings.fallback_chain.is_empty() {
            "(built-in)".dimmed()
        } else {
            settings.fallback_chain.join(", ").green()
        },
    );
    if !settings.invalid_models.is_empty() {
        let invalid: Vec<&str> = settings.invalid_models.iter().map(String::as_str).collect();
        row("invalid_models", invalid.join(", ").red());
    }
    row(
        "explanation_cache",
        settings.explanation_cache.to_string().yellow(),
    );
    row("show_model_used", settings.show_model_used.to_string().yellow());
    for (key, prompt) in [
        ("translation_prompt", &settings.translation_prompt),
        ("explanation_prompt", &settings.explanation_prompt),
    ] {
        match prompt {
            Some(p) => row(key, format!("{}...", p.chars().take(40).collect::<String>()).normal()),
            None => row(key, "(built-in)".dimmed()),
        }
    }

    println!("  {}", "│".dimmed());
    println!("  {}", "├─ Process ──────────────────────".dimmed());
    row("api_base", optional(config.api_base.as_deref()));
    row("log_filter", optional(config.log_filter.as_deref()));
    row(
        "server",
        format!("{}:{}", config.server.host, config.server.port).green(),
    );
    row(
        "rate_limit.scope",
        format!("{:?}", config.rate_limit.scope).to_lowercase().yellow(),
    );
    row(
        "rate_limit.window_secs",
        config.rate_limit.window_secs.to_string().yellow(),
    );
    row(
        "batch.mode",
        format!("{:?}", config.batch.mode).to_lowercase().yellow(),
    );
    println!("  {}", "└───────────────────────────────".dimmed());
    println!();

    Ok(())
}

fn set_file_key(config: &mut HoverlateConfig, key: &str, value: &str) -> anyhow::Result<()> {
    let value = value.trim();
    match key {
        "api_base" => config.api_base = Some(value.to_string()).filter(|v| !v.is_empty()),
        "data_dir" => {
            config.data_dir = Some(PathBuf::from(value)).filter(|p| !p.as_os_str().is_empty())
        }
        "log_filter" => config.log_filter = Some(value.to_string()).filter(|v| !v.is_empty()),
        "server.host" => config.server.host = value.to_string(),
        "server.port" => config.server.port = value.parse()?,
        "rate_limit.scope" => {
            config.rate_limit.scope = match value {
                "per_model" => RateLimitScope::PerModel,
                "global" => RateLimitScope::Global,
                _ => anyhow::bail!("rate_limit.scope expects per_model or global"),
            }
        }
        "rate_limit.window_secs" => config.rate_limit.window_secs = value.parse()?,
        "batch.mode" => {
            config.batch.mode = match value {
                "sequential" => BatchMode::Sequential,
                "single_call" => BatchMode::SingleCall,
                _ => anyhow::bail!("batch.mode expects sequential or single_call"),
            }
        }
        _ => anyhow::bail!("unknown config key '{}'", key),
    }
    Ok(())
}

pub async fn run_config_set(
    config_path: &Path,
    store: &dyn KvStore,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    if SETTABLE_FIELDS.contains(&key) {
        let mut settings = Settings::load(store).await?;
        settings.set_field(key, value)?;
        settings.save(store).await?;
    } else if FILE_KEYS.contains(&key) {
        let mut config = HoverlateConfig::load(config_path)?;
        set_file_key(&mut config, key, value)?;
        config.save(config_path)?;
    } else {
        println!("{} Unknown key: {}", "Error:".red(), key);
        println!("\nAvailable keys:");
        for k in SETTABLE_FIELDS.iter().chain(FILE_KEYS) {
            println!("  • {}", k.cyan());
        }
        return Ok(());
    }

    println!(
        "  {} {} = {}",
        "✅ Set".green(),
        key.cyan(),
        if is_secret(key) {
            "••••••••(hidden)".to_string()
        } else {
            value.to_string()
        }
    );

    Ok(())
}
