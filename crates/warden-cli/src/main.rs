//! `warden` – operator CLI for the Warden governance layer.
//!
//! Reads `~/.warden/config.toml` (or `--config` / `WARDEN_CONFIG`), builds
//! the same [`GovernanceContext`] a service would, and exposes the parts an
//! operator needs from a shell:
//!
//! | Command | Purpose |
//! |---|---|
//! | `warden audit` | Run the startup completeness audits. Exits 1 on failure. |
//! | `warden config [--init]` | Show the effective config; `--init` writes the defaults. |
//! | `warden classify <code> [message]` | Show how a failure signal is classified and retried. |
//! | `warden dlq list` | List dead letters, newest first. |
//! | `warden dlq purge --older-than-hours H` | Drop letters older than `H` hours. |
//! | `warden dlq evaluate <letter_id>` | Dry-run the replay policy for one letter. |
//! | `warden schema` | JSON Schemas of the persisted record shapes. |

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::debug;

use warden_kernel::RetryDecision;
use warden_runtime::{
    ActionFailure, GovernanceContext, GovernedExecutor, ReplayOutcome, telemetry,
};
use warden_types::{ConfirmationRequirement, DeadLetter, ReplayDecision};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Governance control plane for dependency calls and autonomous actions")]
struct Cli {
    /// Config file (defaults to `WARDEN_CONFIG` or `~/.warden/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the taxonomy, transition-matrix and recovery-table audits.
    Audit,
    /// Show the effective configuration.
    Config {
        /// Write the default configuration if no file exists yet.
        #[arg(long)]
        init: bool,
    },
    /// Classify a failure signal and show the retry decision.
    Classify {
        code: String,
        #[arg(default_value = "")]
        message: String,
        /// Zero-based attempt number the failure happened on.
        #[arg(long, default_value_t = 0)]
        attempt: u32,
    },
    /// Inspect the dead-letter queue.
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Print JSON Schemas for the persisted records and the config file.
    Schema,
}

#[derive(Subcommand, Debug)]
enum DlqCommand {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Purge {
        #[arg(long)]
        older_than_hours: f64,
    },
    /// Dry-run replay evaluation.  Never mutates cooldowns or budgets.
    Evaluate {
        letter_id: String,
        /// Breaker to consult (defaults to the letter's intent).
        #[arg(long)]
        dependency: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config::config_path);

    let cfg = match config::load_or_default(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = telemetry::init_tracing("warden", &cfg.to_telemetry());
    debug!(path = %path.display(), "configuration loaded");

    let result = match cli.command {
        Command::Config { init } => cmd_config(&cfg, &path, init),
        Command::Schema => cmd_schema(),
        command => match build_context(&cfg) {
            Ok(ctx) => run_with_context(command, ctx).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn build_context(cfg: &config::Config) -> Result<Arc<GovernanceContext>, String> {
    let governance = cfg.to_governance(&config::home_dir())?;
    GovernanceContext::new(governance)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

async fn run_with_context(command: Command, ctx: Arc<GovernanceContext>) -> Result<ExitCode, String> {
    match command {
        Command::Audit => Ok(cmd_audit(&ctx)),
        Command::Classify {
            code,
            message,
            attempt,
        } => {
            cmd_classify(&ctx, &code, &message, attempt);
            Ok(ExitCode::SUCCESS)
        }
        Command::Dlq { command } => cmd_dlq(ctx, command).await,
        Command::Config { .. } | Command::Schema => Ok(ExitCode::SUCCESS),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_audit(ctx: &GovernanceContext) -> ExitCode {
    let report = ctx.audit();
    println!();
    println!("  {}", "Startup audits".bold());
    for check in &report.checks {
        match &check.failure {
            None => println!("    {} {}", "✓".green().bold(), check.name),
            Some(why) => println!("    {} {}  {}", "✗".red().bold(), check.name, why.dimmed()),
        }
    }
    println!();
    if report.passed() {
        println!("  {}", "All audits passed.".green());
        ExitCode::SUCCESS
    } else {
        println!("  {} audit(s) failed.", report.failures().count().to_string().red().bold());
        ExitCode::FAILURE
    }
}

fn cmd_config(cfg: &config::Config, path: &std::path::Path, init: bool) -> Result<ExitCode, String> {
    if init {
        if path.exists() {
            println!("  Config already exists at {}", path.display().to_string().bold());
        } else {
            config::save_to(&config::Config::default(), path)?;
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let source = if path.exists() {
        path.display().to_string().bold()
    } else {
        "built-in defaults".dimmed()
    };
    println!("  {} {}", "# effective config from".dimmed(), source);
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
    println!("{raw}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_classify(ctx: &GovernanceContext, code: &str, message: &str, attempt: u32) {
    let class = ctx.taxonomy().classify(code, message);
    let policy = ctx.taxonomy().policy(class);
    println!("  {:<10} {}", "class".dimmed(), class.to_string().bold());
    println!(
        "  {:<10} max_attempts={} backoff_base_ms={} retryable={}",
        "policy".dimmed(),
        policy.max_attempts,
        policy.backoff_base_ms,
        policy.retryable
    );
    let decision = match ctx.taxonomy().decide(class, attempt) {
        RetryDecision::Retry { backoff } => {
            format!("RETRY after {} ms", backoff.as_millis()).green()
        }
        RetryDecision::NoRetry => "NO_RETRY".red(),
        RetryDecision::Escalate => "ESCALATE".yellow(),
    };
    println!("  {:<10} {} (attempt {})", "decision".dimmed(), decision, attempt);
}

async fn cmd_dlq(ctx: Arc<GovernanceContext>, command: DlqCommand) -> Result<ExitCode, String> {
    match command {
        DlqCommand::List { limit } => {
            let letters = ctx.dead_letters().list(limit);
            if letters.is_empty() {
                println!("  {}", "Dead-letter queue is empty.".dimmed());
            }
            for letter in &letters {
                print_letter(letter);
            }
            let stats = ctx.dead_letters().stats();
            println!(
                "\n  {} of {} letters shown ({} awaiting replay, {} replayed)",
                letters.len(),
                stats.count,
                stats.awaiting_replay,
                stats.replayed
            );
            Ok(ExitCode::SUCCESS)
        }
        DlqCommand::Purge { older_than_hours } => {
            let removed = ctx.dead_letters().purge(older_than_hours);
            println!(
                "  {} Purged {} letter(s) older than {} h",
                "✓".green().bold(),
                removed,
                older_than_hours
            );
            Ok(ExitCode::SUCCESS)
        }
        DlqCommand::Evaluate {
            letter_id,
            dependency,
        } => {
            let dependency = match dependency {
                Some(d) => d,
                None => ctx
                    .dead_letters()
                    .get(&letter_id)
                    .map(|l| l.intent)
                    .ok_or_else(|| format!("dead letter {letter_id} not found"))?,
            };
            let executor = GovernedExecutor::new(ctx);
            let outcome = executor
                .replay(&letter_id, &dependency, true, |_| async {
                    Ok::<(), ActionFailure>(())
                })
                .await
                .map_err(|e| e.to_string())?;
            let ReplayOutcome::Evaluated(trace) = outcome else {
                return Err("dry run unexpectedly executed".to_string());
            };
            let decision = match trace.decision {
                ReplayDecision::Approve => "APPROVE".green().bold(),
                ReplayDecision::Reject => "REJECT".red().bold(),
                ReplayDecision::Defer => "DEFER".yellow().bold(),
            };
            let reason = trace
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {} {}  {}", trace.letter_id.dimmed(), decision, reason);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_schema() -> Result<ExitCode, String> {
    let schemas = serde_json::json!({
        "dead_letter": schemars::schema_for!(DeadLetter),
        "confirmation_requirement": schemars::schema_for!(ConfirmationRequirement),
        "config": schemars::schema_for!(config::Config),
    });
    let raw = serde_json::to_string_pretty(&schemas).map_err(|e| e.to_string())?;
    println!("{raw}");
    Ok(ExitCode::SUCCESS)
}

fn print_letter(letter: &DeadLetter) {
    let status = if letter.replayed {
        "replayed".green()
    } else {
        "pending".yellow()
    };
    println!(
        "  {}  {}  {}  {}",
        letter.letter_id.bold(),
        letter.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        letter.failure_class.to_string().cyan(),
        status
    );
    println!(
        "      {} {}  {} {}",
        "intent".dimmed(),
        letter.intent,
        "correlation".dimmed(),
        letter.correlation_id
    );
    println!("      {}: {}", letter.error_code.red(), letter.error_message);
}
