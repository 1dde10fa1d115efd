mod backup;
mod cli;
mod compose;
mod config;
mod deploy;
mod discovery;
mod docker;
mod error;
mod paths;
mod source;
mod status;
mod vars;

use anyhow::{anyhow, Result};
use cli::{BackupCommand, Cli, Command};
use config::TopLevelConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if let Err(e) = run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let cwd = std::env::current_dir()?;

    let top = TopLevelConfig::load(&cwd, cli.config.as_deref())
        .map_err(|e| anyhow!("{e}"))?;

    match cli.command {
        Command::Deploy { stack, system, pull } => deploy_cmd(&cwd, &top, stack, system, pull).await,
        Command::Start { stack, pull } => {
            deploy::start(&cwd, &stack, pull).map_err(|e| anyhow!("{e}"))
        }
        Command::Stop { stack } => deploy::stop(&cwd, &stack, false).map_err(|e| anyhow!("{e}")),
        Command::Reset { stack } => deploy::reset(&cwd, &stack).map_err(|e| anyhow!("{e}")),
        Command::Status { stack, stats, json } => status_cmd(&cwd, &stack, stats, json).await,
        Command::List => list_cmd(&cwd),
        Command::Backup { command } => backup_cmd(&cwd, &top, command).await,
    }
}

async fn deploy_cmd(
    cwd: &std::path::Path,
    top: &TopLevelConfig,
    stack: Option<String>,
    system: bool,
    pull: bool,
) -> Result<()> {
    if system {
        return deploy::deploy_system(cwd, top).await.map_err(|e| anyhow!("{e}"));
    }

    let name = stack.ok_or_else(|| anyhow!("a stack name is required unless --system is given"))?;
    let record = discovery::find_stack(cwd, &name).map_err(|e| anyhow!("{e}"))?;
    let client = reqwest::Client::new();
    deploy::deploy(cwd, &record, top, pull, &client)
        .await
        .map_err(|e| anyhow!("{e}"))
}

async fn status_cmd(cwd: &std::path::Path, stack: &str, stats: bool, json: bool) -> Result<()> {
    let report = status::get_stack_status(cwd, stack, stats)
        .await
        .map_err(|e| anyhow!("{e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{stack}: {}", report.status_text);
    if report.services.is_empty() {
        return Ok(());
    }
    println!("health: {}", report.health_summary);
    for svc in &report.services {
        let health = svc.health.as_deref().unwrap_or("-");
        if stats {
            println!(
                "  {:<20} {:<24} health={health:<10} cpu={:.1}% mem={}MiB",
                svc.name,
                svc.status,
                svc.cpu_percent,
                svc.memory_bytes / (1024 * 1024)
            );
        } else {
            println!("  {:<20} {:<24} health={health}", svc.name, svc.status);
        }
    }
    if stats {
        println!(
            "total: cpu={:.1}% mem={}MiB",
            report.cpu_percent_total,
            report.memory_bytes_total / (1024 * 1024)
        );
    }
    Ok(())
}

fn list_cmd(cwd: &std::path::Path) -> Result<()> {
    let records = discovery::discover_stacks(cwd).map_err(|e| anyhow!("{e}"))?;
    if records.is_empty() {
        println!("no stacks found");
        return Ok(());
    }
    for record in records {
        if record.valid {
            let deployable = if record.is_deployable_local() { "" } else { " (compose file missing)" };
            println!("{}{deployable}", record.name());
        } else {
            println!("{} - invalid: {}", record.name(), record.error.as_deref().unwrap_or("unknown error"));
        }
    }
    Ok(())
}

async fn backup_cmd(cwd: &std::path::Path, top: &TopLevelConfig, command: BackupCommand) -> Result<()> {
    let backup_config = top
        .backup
        .as_ref()
        .ok_or_else(|| anyhow!("backup is not configured in surek.yml"))?;

    match command {
        BackupCommand::List => {
            let entries = backup::list(backup_config).await.map_err(|e| anyhow!("{e}"))?;
            if entries.is_empty() {
                println!("no backups found");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "{:<40} {:<8} {:>10} bytes  {}",
                    entry.name,
                    entry.kind.as_str(),
                    entry.size,
                    entry.created.to_rfc3339()
                );
            }
            Ok(())
        }
        BackupCommand::Run => {
            backup::trigger(cwd).await.map_err(|e| anyhow!("{e}"))?;
            info!("backup triggered");
            Ok(())
        }
        BackupCommand::Restore { id, stack, volume } => {
            if volume.is_some() && stack.is_none() {
                return Err(anyhow!("--volume requires --stack"));
            }
            backup::restore(cwd, top, &id, stack.as_deref(), volume.as_deref())
                .await
                .map_err(|e| anyhow!("{e}"))?;
            info!("restore complete");
            Ok(())
        }
        BackupCommand::Failures { limit } => {
            let failures = backup::recent_failures(cwd, limit).map_err(|e| anyhow!("{e}"))?;
            if failures.is_empty() {
                println!("no recorded backup failures");
                return Ok(());
            }
            for f in failures {
                println!("{} [{}] {}", f.timestamp.to_rfc3339(), f.backup_type, f.error);
            }
            Ok(())
        }
    }
}
