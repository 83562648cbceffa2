//! Individual release stages
//!
//! Each function performs one stage's side effects and reports how it went;
//! the orchestrator in `mod.rs` decides what a failure means for the run.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::ReleaseConfig;
use crate::error::{ReleaseError, ReleaseResult};
use crate::infra::platform::ContainerPlatform;
use crate::infra::git::SourceControl;

/// Outcome of the migration stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied,
    NothingPending,
    /// Migration command failed for a real reason
    Failed(String),
}

/// Phrases migration tools print when the schema is already current
const NOTHING_PENDING_MARKERS: &[&str] = &[
    "no migrations",
    "nothing to migrate",
    "no changes",
    "already up to date",
    "target database is up to date",
];

pub(crate) fn is_nothing_pending(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOTHING_PENDING_MARKERS.iter().any(|m| lower.contains(m))
}

/// Verifies the platform, compose file and configuration file are present.
/// Nothing is mutated here.
pub async fn check_prerequisites(
    platform: &dyn ContainerPlatform,
    config: &ReleaseConfig,
) -> ReleaseResult<()> {
    platform
        .check_available()
        .await
        .map_err(|e| ReleaseError::prerequisite(e.to_string()))?;

    if !config.compose_file.exists() {
        return Err(ReleaseError::prerequisite(format!(
            "compose file not found: {}",
            config.compose_file.display()
        )));
    }
    if !config.env_file.exists() {
        return Err(ReleaseError::prerequisite(format!(
            "configuration file not found: {}",
            config.env_file.display()
        )));
    }
    Ok(())
}

/// Additive-then-recreate rollout of the web service.
///
/// Capacity never drops to zero: the web service is scaled to double its
/// steady replica count without touching the running instances, given time to
/// settle, and only then recreated on the new image.
pub async fn rollout(platform: &dyn ContainerPlatform, config: &ReleaseConfig) -> ReleaseResult<()> {
    let services = &config.services;

    if !platform.is_running(&services.database).await? {
        info!(service = %services.database, "Database not running, starting it");
        platform.start(&services.database).await?;
        settle("database", config.rollout.db_settle).await;
    }

    let surge = config.rollout.web_replicas * 2;
    info!(service = %services.web, replicas = surge, "Scaling up alongside running instances");
    platform.scale_to(&services.web, surge, false).await?;
    settle("new instances", config.rollout.scale_settle).await;

    info!(service = %services.web, "Recreating service on the new image");
    platform.recreate(&services.web).await?;

    if platform.is_running(&services.proxy).await? {
        platform.restart(&services.proxy).await?;
    } else {
        platform.start(&services.proxy).await?;
    }
    Ok(())
}

/// Runs schema migrations inside the web service
pub async fn migrate(
    platform: &dyn ContainerPlatform,
    config: &ReleaseConfig,
) -> ReleaseResult<MigrationOutcome> {
    let command: Vec<&str> = config
        .database
        .migrate_command
        .iter()
        .map(String::as_str)
        .collect();
    info!(command = %command.join(" "), "Applying migrations");

    let output = platform.exec(&config.services.web, &command).await?;
    let combined = format!("{}\n{}", output.stdout, output.stderr);

    if is_nothing_pending(&combined) {
        return Ok(MigrationOutcome::NothingPending);
    }
    if output.success() {
        return Ok(MigrationOutcome::Applied);
    }
    Ok(MigrationOutcome::Failed(
        output
            .stderr
            .lines()
            .last()
            .unwrap_or("migration command failed")
            .trim()
            .to_string(),
    ))
}

/// Picks the revision to return to if this run has to roll back
pub async fn rollback_target(source: &dyn SourceControl, before_sync: &str) -> ReleaseResult<String> {
    let current = source.current_revision().await?;
    if current != before_sync {
        return Ok(before_sync.to_string());
    }
    // sync brought nothing new, step back one revision
    Ok(source.parent_revision().await?)
}

/// Tears everything down, reverts the source and brings the stack back up.
/// Not retried: any failure is terminal.
pub async fn rollback(
    platform: &dyn ContainerPlatform,
    source: &dyn SourceControl,
    revision: &str,
) -> Result<(), String> {
    warn!(revision, "Rolling back");
    platform
        .down_all()
        .await
        .map_err(|e| format!("tearing down services: {}", e))?;
    source
        .checkout(revision)
        .await
        .map_err(|e| format!("reverting source to {}: {}", revision, e))?;
    platform
        .up_all(true)
        .await
        .map_err(|e| format!("bringing services back up: {}", e))?;
    Ok(())
}

async fn settle(what: &str, period: Duration) {
    if period.is_zero() {
        return;
    }
    info!(what, ?period, "Waiting for settle period");
    tokio::time::sleep(period).await;
}
