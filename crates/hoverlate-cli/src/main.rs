//! Hoverlate CLI — hover translations from the terminal.
//!
//! Runs the same actions the browser extension sends, either one-shot or
//! behind the local HTTP server. Run `hoverlate config set api_key <KEY>`
//! to get started!

mod setup;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use hoverlate_core::clock::SystemClock;
use hoverlate_core::config::HoverlateConfig;
use hoverlate_core::orchestrator::Orchestrator;
use hoverlate_hub::api;
use hoverlate_hub::metrics::new_metrics;
use hoverlate_hub::providers::GeminiClient;
use hoverlate_hub::service::{Action, ActionResponse, ActionService};
use hoverlate_hub::store::SqliteStore;

const DEFAULT_LOG_FILTER: &str = "info,hoverlate_core=debug,hoverlate_hub=debug";

// ─── CLI Definition ────────────────────────────────────────

/// Hoverlate — Japanese → English hover translations 🈂️
#[derive(Parser)]
#[command(name = "hoverlate", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "HOVERLATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 🌐 Serve the action API over HTTP
    Serve {
        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// 🈂️  Translate one or more texts
    Translate {
        /// Texts to translate (several texts are sent as one batch)
        #[arg(required = true)]
        texts: Vec<String>,
    },

    /// 📖 Explain the grammar and meaning of a text
    Explain {
        /// The text to explain
        text: String,

        /// Skip the explanation cache and ask the model again
        #[arg(short, long)]
        force: bool,
    },

    /// 🔑 Check which models the API key can use
    Validate {
        /// Key to validate (defaults to the saved key)
        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },

    /// 📋 List known models and the default fallback chain
    Models,

    /// ⏸️  Show active cooldowns and failure counters
    Cooldowns,

    /// 🧹 Clear every cooldown and failure counter
    ClearCooldowns,

    /// ⚙️  Manage configuration and settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the config file and saved settings
    Show,
    /// Set a value (e.g. `config set model gemini-2.5-pro`)
    Set { key: String, value: String },
    /// Print the config file path
    Path,
}

// ─── Main ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(HoverlateConfig::default_path);
    let config = HoverlateConfig::load(&config_path)?;

    // Logs go to a file so terminal output stays clean
    let log_dir = config.data_dir().join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "hoverlate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = config
        .log_filter
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    match cli.command {
        // ─── Server ────────────────────────────────────
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            run_serve(&config, &host, port).await?;
        }

        // ─── One-shot actions ──────────────────────────
        Commands::Translate { mut texts } => {
            let action = if texts.len() == 1 {
                Action::TranslateSingle {
                    text: texts.remove(0),
                }
            } else {
                Action::TranslateBatch {
                    texts: texts.clone(),
                }
            };
            let response = run_action(&config, action).await?;
            ui::print_response(&response, &texts)?;
        }

        Commands::Explain { text, force } => {
            let response = run_action(&config, Action::Explain { text, force }).await?;
            ui::print_response(&response, &[])?;
        }

        Commands::Validate { api_key } => {
            let service = build_service(&config)?;
            let api_key = match api_key {
                Some(key) => setup::save_api_key(service.orchestrator().store().as_ref(), &key)
                    .await?,
                None => service
                    .orchestrator()
                    .settings()
                    .await?
                    .api_key
                    .unwrap_or_default(),
            };
            ui::print_status("🔑 Probing every known model...");
            let response = service.dispatch(Action::ValidateModels { api_key }).await;
            ui::print_response(&response, &[])?;
        }

        Commands::Models => {
            let response = run_action(&config, Action::GetKnownModels).await?;
            ui::print_response(&response, &[])?;
        }

        Commands::Cooldowns => {
            let response = run_action(&config, Action::CooldownStatus).await?;
            ui::print_response(&response, &[])?;
        }

        Commands::ClearCooldowns => {
            let response = run_action(&config, Action::ClearCooldowns).await?;
            ui::print_response(&response, &[])?;
        }

        // ─── Config Management ─────────────────────────
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let store = open_store(&config)?;
                setup::run_config_show(&config_path, &config, &store).await?;
            }
            ConfigAction::Set { key, value } => {
                let store = open_store(&config)?;
                setup::run_config_set(&config_path, &store, &key, &value).await?;
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
            }
        },
    }

    Ok(())
}

// ─── Wiring ────────────────────────────────────────────────

fn open_store(config: &HoverlateConfig) -> anyhow::Result<SqliteStore> {
    Ok(SqliteStore::open(&config.data_dir().join("hoverlate.db"))?)
}

fn build_service(config: &HoverlateConfig) -> anyhow::Result<ActionService> {
    let store = Arc::new(open_store(config)?);
    let upstream = Arc::new(GeminiClient::new(config.api_base.clone()));
    let orchestrator = Orchestrator::new(
        store,
        upstream,
        Arc::new(SystemClock),
        config.orchestrator_options(),
    );
    Ok(ActionService::new(Arc::new(orchestrator), new_metrics()))
}

/// Run one action, echoing orchestration progress to stderr.
async fn run_action(config: &HoverlateConfig, action: Action) -> anyhow::Result<ActionResponse> {
    let service = build_service(config)?;
    let mut rx = service.orchestrator().events().subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let Some(line) = event.format_status() {
                ui::print_status(&line);
            }
        }
    });

    let response = service.dispatch(action).await;
    // Dropping the service closes the event channel so the printer drains and exits.
    drop(service);
    progress.await.ok();
    Ok(response)
}

async fn run_serve(config: &HoverlateConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let service = build_service(config)?;
    let settings = service.orchestrator().settings().await?;

    ui::print_banner();
    println!(
        "  {} http://{}:{}/v1/action",
        "Listening:".dimmed(),
        host,
        port
    );
    println!("  {} {}", "Model:".dimmed(), settings.model.green());
    println!(
        "  {} {}",
        "Fallback:".dimmed(),
        if settings.cycling_enabled {
            "on".green()
        } else {
            "off".yellow()
        }
    );
    if settings.api_key.is_none() {
        println!(
            "  {}",
            "⚠️  No API key yet, run `hoverlate config set api_key <KEY>`".yellow()
        );
    }
    println!();

    api::start_server(service, host, port).await
}
