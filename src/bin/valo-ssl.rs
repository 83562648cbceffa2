//! valo-ssl - TLS 证书生命周期管理
//!
//! Usage:
//! - First issuance: `valo-ssl init --domain valomaison.fr --email contact@valomaison.fr`
//! - Renewal check (run daily by cron): `valo-ssl renew --domain valomaison.fr`
//! - Switch the proxy to its TLS config: `valo-ssl enable`
//! - Expiry report: `valo-ssl status`

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{error, info};

use valo_release::config::env::constants::VERSION;
use valo_release::domain::{CertificateStatus, RenewalResult};
use valo_release::infra::{cron, CertbotClient, ComposePlatform, ContainerPlatform, CrontabScheduler};
use valo_release::services::CertificateManager;
use valo_release::{logging, ReleaseConfig, ReleaseError, ReleaseResult};

#[derive(Parser)]
#[command(
    name = "valo-ssl",
    about = "TLS certificate lifecycle manager for the Valomaison reverse proxy",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Obtain the first certificate, enable TLS and schedule daily renewal
    Init {
        /// Certificate domain (a www. alias is added automatically)
        #[arg(long)]
        domain: Option<String>,
        /// ACME account contact
        #[arg(long)]
        email: Option<String>,
    },
    /// Renew if due, install new material and reload the proxy
    Renew {
        /// Certificate domain, defaults to DOMAIN
        #[arg(long)]
        domain: Option<String>,
    },
    /// Replace the active proxy config with the TLS template
    Enable,
    /// Show the installed certificate's expiry
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        return match print_usage(&mut std::io::stdout()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Failed to print help: {}", e);
                ExitCode::FAILURE
            }
        };
    };
    logging::init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("✗ {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Help for a bare invocation
fn print_usage(out: &mut impl Write) -> std::io::Result<()> {
    Cli::command().write_help(out)?;
    out.flush()
}

async fn run(command: Command) -> ReleaseResult<()> {
    let mut config = ReleaseConfig::from_env();
    if let Command::Init {
        domain: Some(domain),
        ..
    }
    | Command::Renew {
        domain: Some(domain),
    } = &command
    {
        config.tls.domain = domain.clone();
    }
    info!(version = VERSION, domain = %config.tls.domain, "valo-ssl starting");

    let platform = Arc::new(ComposePlatform::detect(&config).await);
    let authority = Arc::new(CertbotClient::new(config.project_dir.clone()));
    let scheduler = Arc::new(CrontabScheduler::new(config.project_dir.clone()));
    let manager = CertificateManager::new(
        platform.clone(),
        authority,
        scheduler,
        config.tls.clone(),
        config.services.proxy.clone(),
        renew_command(&config),
    );

    match command {
        Command::Init { email, .. } => {
            require_platform(platform.as_ref()).await?;
            let email = email.unwrap_or_else(|| config.tls.email.clone());
            let bundle = manager.init(&config.tls.domain, &email).await?;
            info!(
                "✓ Certificate for {} installed at {}",
                bundle.domain,
                bundle.fullchain_path.display()
            );
        }
        Command::Renew { .. } => {
            require_platform(platform.as_ref()).await?;
            match manager.renew().await? {
                RenewalResult::Renewed => info!("✓ Certificate renewed and proxy reloaded"),
                RenewalResult::NotDue => info!("✓ Certificate not due for renewal"),
            }
        }
        Command::Enable => {
            manager.enable().await?;
            info!("✓ TLS configuration enabled, restart the proxy to apply it");
        }
        Command::Status => match manager.status().await {
            CertificateStatus::Missing => {
                println!("{}: no certificate installed", config.tls.domain)
            }
            CertificateStatus::Valid {
                expires_at,
                days_remaining,
            } => println!(
                "{}: valid until {} ({} days remaining)",
                config.tls.domain,
                expires_at.format("%Y-%m-%d"),
                days_remaining
            ),
            CertificateStatus::ExpiringSoon {
                expires_at,
                days_remaining,
            } => println!(
                "{}: EXPIRES SOON on {} ({} days remaining)",
                config.tls.domain,
                expires_at.format("%Y-%m-%d"),
                days_remaining
            ),
        },
    }
    Ok(())
}

async fn require_platform(platform: &dyn ContainerPlatform) -> ReleaseResult<()> {
    platform
        .check_available()
        .await
        .map_err(|e| ReleaseError::prerequisite(e.to_string()))
}

/// Command the cron entry runs: this binary's `renew` for the configured domain
fn renew_command(config: &ReleaseConfig) -> String {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("valo-ssl"));
    let dir = std::fs::canonicalize(&config.project_dir).unwrap_or_else(|_| config.project_dir.clone());
    cron::renew_command(&exe, &dir, &config.tls.domain)
}
