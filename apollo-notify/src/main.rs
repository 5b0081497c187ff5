use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use apollo_notify::logging;
use apollo_notify::notification::{
    ChannelCheckpointHandler, CheckpointHandler, NotificationsConfig, build_router,
};
use clap::{Parser, Subcommand};
use colored::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the notifications config (TOML)
    #[arg(short, long, env = "APOLLO_NOTIFY_CONFIG", default_value = "notifications.toml")]
    config: PathBuf,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, env = "APOLLO_NOTIFY_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the config and list the channels it would register
    Check,
    /// Send a test notification through every channel
    Test,
    /// Run one checkpoint approval round and print the decision
    Approve {
        /// Session the checkpoint belongs to
        #[arg(long)]
        session: String,
        /// Phase awaiting approval
        #[arg(long)]
        phase: String,
        /// Summary shown to approvers
        #[arg(long, default_value = "")]
        summary: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guard = logging::init_logging(args.log_dir.as_deref())?;
    if let Some(dir) = &args.log_dir
        && let Err(e) = logging::cleanup_old_logs(dir, logging::LOG_RETENTION_DAYS).await
    {
        tracing::warn!(error = %e, "Failed to cleanup old logs");
    }

    let config = NotificationsConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let router = Arc::new(build_router(&config));

    match args.command {
        Command::Check => {
            let state = if config.enabled {
                "enabled".green()
            } else {
                "disabled".yellow()
            };
            println!(
                "{} {} (heartbeat: {}s, approval timeout: {}s)",
                "Notifications:".bold(),
                state,
                config.heartbeat_interval_secs,
                config.approval_timeout_secs
            );

            for record in &config.channels {
                let marker = if config.enabled && record.is_enabled() {
                    "+".green()
                } else {
                    "-".dimmed()
                };
                println!("  {} {}", marker, record.channel_type().cyan());
            }
            println!("{} {}", "Registered:".bold(), router.channel_names().join(", "));
        }
        Command::Test => {
            if router.is_empty() {
                anyhow::bail!("No channels registered; is `enabled = true` set?");
            }

            router.connect_all().await;
            let results = router.test_all().await;
            router.disconnect_all().await;

            let mut failures = 0;
            for (name, result) in results {
                match result {
                    Ok(()) => println!("  {} {}", "ok".green(), name),
                    Err(e) => {
                        failures += 1;
                        println!("  {} {}: {}", "failed".red().bold(), name, e);
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{} channel(s) failed the self-test", failures);
            }
        }
        Command::Approve {
            session,
            phase,
            summary,
        } => {
            router.connect_all().await;
            let handler = ChannelCheckpointHandler::new(Arc::clone(&router), session);
            let approved = handler.request_approval(&phase, &summary).await;
            router.drain().await;
            router.disconnect_all().await;

            return Ok(report_decision(&phase, approved));
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the checkpoint decision. A denial maps to a failing exit code.
fn report_decision(phase: &str, approved: bool) -> ExitCode {
    if approved {
        println!("{} {}", "approved".green().bold(), phase);
        ExitCode::SUCCESS
    } else {
        println!("{} {}", "denied".red().bold(), phase);
        ExitCode::FAILURE
    }
}
