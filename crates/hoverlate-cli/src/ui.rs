//! Hoverlate CLI — terminal rendering.
//!
//! `main.rs` calls these functions and stays clean. Results go to stdout,
//! progress goes to stderr so output can be piped.

use colored::*;

use hoverlate_core::orchestrator::BatchSlot;
use hoverlate_hub::service::ActionResponse;

// ─── Banner ──────────────────────────────────────────────────

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");

    println!();
    println!("{}", "  ╔════════════════════════════════════════════╗".cyan());
    println!(
        "{}",
        format!("  ║  🈂️  Hoverlate v{:<27}║", version).cyan().bold()
    );
    println!("{}", "  ║     Japanese → English, on hover           ║".cyan());
    println!("{}", "  ╚════════════════════════════════════════════╝".cyan());
    println!();
}

/// One dimmed progress line on stderr.
pub fn print_status(line: &str) {
    eprintln!("  {}", line.dimmed());
}

fn model_tag(model: &str) -> ColoredString {
    format!("[{}]", model).cyan()
}

// ─── Action results ──────────────────────────────────────────

/// Render an action result. An `{error}` response becomes an `Err` so the
/// process exits non-zero.
pub fn print_response(response: &ActionResponse, texts: &[String]) -> anyhow::Result<()> {
    match response {
        ActionResponse::Translation {
            translation,
            model_used,
            ..
        } => {
            println!("{}  {}", translation.green().bold(), model_tag(model_used));
        }

        ActionResponse::Batch { translations, .. } => {
            for (text, slot) in texts.iter().zip(translations) {
                match slot {
                    BatchSlot::Translated(t) => println!(
                        "  {} {} {}  {}",
                        text.dimmed(),
                        "→".dimmed(),
                        t.translation.green(),
                        model_tag(&t.model_used)
                    ),
                    BatchSlot::Failed { error } => {
                        println!("  {} {} {}", text.dimmed(), "→".dimmed(), error.red())
                    }
                }
            }
        }

        ActionResponse::Explanation(explanation) => {
            println!("{}", explanation.explanation);
            println!();
            println!(
                "  {} {}",
                model_tag(&explanation.model_used),
                if explanation.from_cache {
                    "💾 cached".dimmed()
                } else {
                    "".normal()
                }
            );
        }

        ActionResponse::Validation {
            permanently_invalid_models,
            valid_models,
            transient_failures,
        } => {
            for model in valid_models {
                println!("  {} {}", "✅".green(), model);
            }
            for (model, reason) in transient_failures {
                println!("  {} {} {}", "⚠️ ".yellow(), model, reason.dimmed());
            }
            for model in permanently_invalid_models {
                println!("  {} {} {}", "❌".red(), model, "(unavailable for this key)".dimmed());
            }
        }

        ActionResponse::KnownModels {
            models,
            default_chain,
        } => {
            println!("  {}", "Known models:".bold());
            for (id, info) in models {
                println!(
                    "    {:<24} {:<24} {}",
                    id.cyan(),
                    info.name,
                    format!("{}/min", info.rate).yellow()
                );
            }
            println!();
            println!(
                "  {} {}",
                "Default chain:".bold(),
                default_chain.join(" → ")
            );
        }

        ActionResponse::Cleared { cleared_count, .. } => {
            println!(
                "  {} Cleared {} cooldown(s)",
                "✅".green(),
                cleared_count.to_string().cyan()
            );
        }

        ActionResponse::Cooldowns(status) => {
            let active: Vec<_> = status.cooldowns.iter().filter(|c| c.active).collect();
            if active.is_empty() && status.failure_counts.is_empty() {
                println!("  {}", "No active cooldowns.".green());
            }
            for cooldown in active {
                println!(
                    "  {} {} {:?}, {} remaining",
                    "⏸️ ".yellow(),
                    cooldown.model.cyan(),
                    cooldown.kind,
                    format_remaining(cooldown.remaining_secs).yellow()
                );
            }
            for (model, count) in &status.failure_counts {
                println!(
                    "  {} {} {} recent failure(s)",
                    "•".dimmed(),
                    model.cyan(),
                    count
                );
            }
        }

        ActionResponse::Settings(value) => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }

        ActionResponse::Error { error } => anyhow::bail!("{}", error),
    }

    Ok(())
}

fn format_remaining(secs: i64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(86_400), "24h 0m");
        assert_eq!(format_remaining(95), "1m 35s");
    }

    #[test]
    fn test_error_response_is_err() {
        let response = ActionResponse::Error {
            error: "Invalid API key. Please check your settings.".into(),
        };
        let err = print_response(&response, &[]).unwrap_err();
        assert!(err.to_string().starts_with("Invalid API key"));
    }
}
