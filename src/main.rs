//! valo-deploy - 单机发布编排
//!
//! Usage:
//! - Full deploy (default): `valo-deploy` or `valo-deploy deploy`
//! - Restart without rebuild: `valo-deploy quick`
//! - Database backup only: `valo-deploy backup`
//! - Follow logs: `valo-deploy logs --tail 200`
//! - Service state: `valo-deploy status`
//! - Stop / restart everything: `valo-deploy stop`, `valo-deploy restart`

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info};

use valo_release::config::env::constants::VERSION;
use valo_release::domain::ReleaseMode;
use valo_release::infra::{ComposePlatform, GitSource, HttpHealthCheck};
use valo_release::services::ReleaseOrchestrator;
use valo_release::{logging, ReleaseConfig, ReleaseError};

#[derive(Parser)]
#[command(
    name = "valo-deploy",
    about = "Zero-downtime release orchestrator for the Valomaison stack",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Backup, sync, build, staged rollout, migrate, verify (rollback on failure)
    Deploy,
    /// Restart from existing images, migrate and verify. Never rolls back
    Quick,
    /// Dump and compress the database
    Backup,
    /// Follow service logs
    Logs {
        /// Number of history lines to show before following
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Show service states and the latest backup
    Status,
    /// Stop all services
    Stop,
    /// Restart all services without rebuilding
    Restart,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(run(cli.command.unwrap_or(Command::Deploy)))
}

async fn run(command: Command) -> ExitCode {
    let config = ReleaseConfig::from_env();
    info!(
        version = VERSION,
        project_dir = %config.project_dir.display(),
        "valo-deploy starting"
    );

    let platform = Arc::new(ComposePlatform::detect(&config).await);
    let source = Arc::new(GitSource::new(&config));
    let health = match HttpHealthCheck::new(config.health.request_timeout) {
        Ok(check) => Arc::new(check),
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };
    let log_tail = config.log_tail;
    let orchestrator = ReleaseOrchestrator::new(config, platform, source, health);

    let mode = match command {
        Command::Logs { tail } => {
            return match follow_logs(&orchestrator, tail.unwrap_or(log_tail)).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "Log streaming failed");
                    ExitCode::FAILURE
                }
            };
        }
        Command::Deploy => ReleaseMode::Deploy,
        Command::Quick => ReleaseMode::Quick,
        Command::Backup => ReleaseMode::Backup,
        Command::Status => ReleaseMode::Status,
        Command::Stop => ReleaseMode::Stop,
        Command::Restart => ReleaseMode::Restart,
    };

    let report = orchestrator.execute(mode).await;
    if report.is_success() {
        info!("✓ {}", report.summary());
        ExitCode::SUCCESS
    } else {
        error!("✗ {}", report.summary());
        ExitCode::from(report.exit_code())
    }
}

/// Streams logs to stdout until the platform closes the stream or Ctrl+C
async fn follow_logs(orchestrator: &ReleaseOrchestrator, tail: usize) -> Result<(), ReleaseError> {
    let mut lines = orchestrator.logs(tail)?;
    loop {
        tokio::select! {
            next = lines.next() => match next {
                Some(Ok(line)) if line.stream == "stderr" => eprintln!("{}", line.content),
                Some(Ok(line)) => println!("{}", line.content),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping log stream");
                return Ok(());
            }
        }
    }
}
