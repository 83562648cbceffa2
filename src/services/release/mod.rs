//! Release orchestrator
//!
//! Top-level state machine over
//! `prerequisites -> backup -> sync -> build -> rollout -> migrate -> verify -> (cleanup | rollback)`.
//!
//! Control flow is strictly sequential. Only one orchestrator may run against a
//! host at a time; mutating modes hold a `RunLock` for the whole run.

pub mod stages;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{error, info, warn};

use crate::config::ReleaseConfig;
use crate::domain::backup::{BackupArtifact, BackupOutcome};
use crate::domain::container::ServiceState;
use crate::domain::release::{LogLine, ReleaseMode, ReleaseOutcome, ReleaseRun, StageStatus};
use crate::error::{ReleaseError, ReleaseResult};
use crate::infra::git::SourceControl;
use crate::infra::http::HealthCheck;
use crate::infra::lock::RunLock;
use crate::infra::platform::{ContainerPlatform, PlatformError};
use crate::services::backup::BackupManager;
use crate::services::health::HealthProber;

pub use stages::MigrationOutcome;

/// Finished run plus the fatal error that ended it, if any
#[derive(Debug)]
pub struct RunReport {
    pub run: ReleaseRun,
    pub error: Option<ReleaseError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map(|e| e.exit_code()).unwrap_or(0)
    }

    /// One-line summary for the end of the run
    pub fn summary(&self) -> String {
        match &self.error {
            None => format!("{} completed successfully", self.run.mode),
            Some(e) => format!("{} failed ({}): {}", self.run.mode, self.run.outcome.as_str(), e),
        }
    }
}

/// Snapshot printed by the `status` subcommand
#[derive(Debug)]
pub struct StatusReport {
    pub services: BTreeMap<String, ServiceState>,
    pub latest_backup: Option<BackupArtifact>,
}

pub struct ReleaseOrchestrator {
    config: ReleaseConfig,
    platform: Arc<dyn ContainerPlatform>,
    source: Arc<dyn SourceControl>,
    prober: HealthProber,
    backups: BackupManager,
}

impl ReleaseOrchestrator {
    pub fn new(
        config: ReleaseConfig,
        platform: Arc<dyn ContainerPlatform>,
        source: Arc<dyn SourceControl>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let backups = BackupManager::new(platform.clone(), &config.backup);
        Self {
            prober: HealthProber::new(health),
            backups,
            config,
            platform,
            source,
        }
    }

    /// Run one invocation to completion
    pub async fn execute(&self, mode: ReleaseMode) -> RunReport {
        let mut run = ReleaseRun::new(mode);
        info!(mode = %mode, started_at = %run.started_at, "Release run started");

        let result = self.execute_mode(mode, &mut run).await;

        let outcome = match &result {
            Ok(()) => ReleaseOutcome::Success,
            Err(ReleaseError::RolledBack { .. }) => ReleaseOutcome::RolledBack,
            Err(ReleaseError::RollbackFailed(_)) => ReleaseOutcome::RollbackFailed,
            Err(_) => ReleaseOutcome::FailedNoRollback,
        };
        run.complete(outcome);

        info!("========== {} summary ==========", mode);
        for line in run.summary_lines() {
            info!("{}", line);
        }
        if let Ok(json) = serde_json::to_string(&run) {
            tracing::debug!(run = %json, "Release run record");
        }

        RunReport {
            run,
            error: result.err(),
        }
    }

    async fn execute_mode(&self, mode: ReleaseMode, run: &mut ReleaseRun) -> ReleaseResult<()> {
        let idx = run.begin_stage("prerequisites", "Prerequisites");
        if let Err(e) = stages::check_prerequisites(self.platform.as_ref(), &self.config).await {
            run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
            return Err(e);
        }
        run.finish_stage(idx, StageStatus::Success, None);

        let _lock = if mode.is_mutating() {
            Some(RunLock::acquire(&self.config.lock_file)?)
        } else {
            None
        };

        match mode {
            ReleaseMode::Deploy => self.deploy(run).await,
            ReleaseMode::Quick => self.quick(run).await,
            ReleaseMode::Backup => self.backup_only(run).await,
            ReleaseMode::Status => self.status().await.map(|_| ()),
            ReleaseMode::Stop => self.simple_stage(run, "stop", "Stop services", self.platform.down_all()).await,
            ReleaseMode::Restart => {
                self.simple_stage(run, "restart", "Restart services", self.platform.restart_all())
                    .await
            }
        }
    }

    /// Full zero-downtime deploy with rollback on failed verification
    async fn deploy(&self, run: &mut ReleaseRun) -> ReleaseResult<()> {
        // backup: best effort, never blocks the deploy
        let idx = run.begin_stage("backup", "Backup");
        match self.backups.backup(&self.config.db_credentials()).await {
            Ok(BackupOutcome::Created(artifact)) => run.finish_stage(
                idx,
                StageStatus::Success,
                Some(artifact.path.display().to_string()),
            ),
            Ok(BackupOutcome::Skipped { reason }) => {
                run.finish_stage(idx, StageStatus::Warning, Some(reason))
            }
            Err(e) => {
                warn!(error = %e, "Backup failed, continuing deploy");
                run.finish_stage(idx, StageStatus::Warning, Some(e.to_string()));
            }
        }

        // sync
        let idx = run.begin_stage("sync", "Source sync");
        let before_sync = match self.sync().await {
            Ok(before) => {
                run.finish_stage(idx, StageStatus::Success, Some(short_rev(&before)));
                before
            }
            Err(e) => {
                run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
                return Err(e);
            }
        };

        // build: rollout has not started, so failure needs no rollback
        let idx = run.begin_stage("build", "Build");
        if let Err(e) = self.platform.build(&self.config.services.web, true).await {
            let e = ReleaseError::Build(e.to_string());
            run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
            return Err(e);
        }
        run.finish_stage(idx, StageStatus::Success, None);

        // rollout
        let idx = run.begin_stage("rollout", "Rollout");
        if let Err(e) = stages::rollout(self.platform.as_ref(), &self.config).await {
            run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
            return self
                .roll_back(run, &before_sync, format!("rollout failed: {}", e))
                .await;
        }
        run.finish_stage(idx, StageStatus::Success, None);

        // migrate
        if let Err(reason) = self.run_migrations(run).await {
            if self.config.database.strict_migrations {
                return self.roll_back(run, &before_sync, reason).await;
            }
        }

        // verify
        let idx = run.begin_stage("verify", "Verify");
        let verdict = self.prober.probe_with(&self.config.health).await;
        if !verdict.is_healthy() {
            let reason = format!(
                "health verification exhausted after {} attempts",
                verdict.attempts()
            );
            run.finish_stage(idx, StageStatus::Failed, Some(reason.clone()));
            return self.roll_back(run, &before_sync, reason).await;
        }
        run.finish_stage(
            idx,
            StageStatus::Success,
            Some(format!("healthy after {} attempt(s)", verdict.attempts())),
        );

        // cleanup: non-fatal
        let idx = run.begin_stage("cleanup", "Cleanup");
        match self.platform.prune().await {
            Ok(()) => run.finish_stage(idx, StageStatus::Success, None),
            Err(e) => {
                warn!(error = %e, "Cleanup failed");
                run.finish_stage(idx, StageStatus::Warning, Some(e.to_string()));
            }
        }

        Ok(())
    }

    /// Restart from already-built images, then migrate and verify.
    ///
    /// Best effort: a failed verification is reported but never rolled back.
    async fn quick(&self, run: &mut ReleaseRun) -> ReleaseResult<()> {
        warn!("Quick mode: no build, no staged rollout, and no rollback if verification fails");
        run.skip_stage("build", "Build", "quick mode");

        let idx = run.begin_stage("restart", "Restart services");
        if let Err(e) = self.platform.restart_all().await {
            run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
            return Err(e.into());
        }
        run.finish_stage(idx, StageStatus::Success, None);

        // quick mode never escalates migrations, strict or not
        let _ = self.run_migrations(run).await;

        let idx = run.begin_stage("verify", "Verify");
        let verdict = self.prober.probe_with(&self.config.health).await;
        if !verdict.is_healthy() {
            let attempts = verdict.attempts();
            run.finish_stage(
                idx,
                StageStatus::Failed,
                Some(format!("exhausted after {} attempts, not rolling back", attempts)),
            );
            return Err(ReleaseError::VerificationFailed { attempts });
        }
        run.finish_stage(idx, StageStatus::Success, None);
        Ok(())
    }

    /// Backup-only invocation: failures here are fatal
    async fn backup_only(&self, run: &mut ReleaseRun) -> ReleaseResult<()> {
        let idx = run.begin_stage("backup", "Backup");
        match self.backups.backup(&self.config.db_credentials()).await {
            Ok(BackupOutcome::Created(artifact)) => {
                run.finish_stage(
                    idx,
                    StageStatus::Success,
                    Some(format!("{} ({})", artifact.path.display(), artifact.human_size())),
                );
                Ok(())
            }
            Ok(BackupOutcome::Skipped { reason }) => {
                run.finish_stage(idx, StageStatus::Warning, Some(reason));
                Ok(())
            }
            Err(e) => {
                run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Service states and the most recent backup
    pub async fn status(&self) -> ReleaseResult<StatusReport> {
        let services = self.platform.status().await?;
        for (name, state) in &services {
            if state.is_running() {
                info!(service = %name, state = %state, "Service");
            } else {
                warn!(service = %name, state = %state, "Service");
            }
        }

        let latest_backup = self.backups.latest()?;
        match &latest_backup {
            Some(artifact) => info!(
                path = %artifact.path.display(),
                size = %artifact.human_size(),
                created_at = %artifact.created_at,
                "Latest backup"
            ),
            None => info!("No backups yet"),
        }

        Ok(StatusReport {
            services,
            latest_backup,
        })
    }

    /// Follow service logs
    pub fn logs(
        &self,
        tail: usize,
    ) -> ReleaseResult<BoxStream<'static, Result<LogLine, PlatformError>>> {
        Ok(self.platform.logs(tail)?)
    }

    async fn sync(&self) -> ReleaseResult<String> {
        let before = self
            .source
            .current_revision()
            .await
            .map_err(|e| ReleaseError::Sync(e.to_string()))?;
        self.source
            .sync()
            .await
            .map_err(|e| ReleaseError::Sync(e.to_string()))?;
        Ok(before)
    }

    /// Records the migrate stage. `Err` carries the reason for a real failure.
    async fn run_migrations(&self, run: &mut ReleaseRun) -> Result<(), String> {
        let idx = run.begin_stage("migrate", "Migrate");
        let outcome = stages::migrate(self.platform.as_ref(), &self.config)
            .await
            .unwrap_or_else(|e| MigrationOutcome::Failed(e.to_string()));
        match outcome {
            MigrationOutcome::Applied => {
                run.finish_stage(idx, StageStatus::Success, None);
                Ok(())
            }
            MigrationOutcome::NothingPending => {
                info!("No migrations pending");
                run.finish_stage(idx, StageStatus::Success, Some("nothing pending".to_string()));
                Ok(())
            }
            MigrationOutcome::Failed(reason) => {
                warn!(%reason, "Migration failed");
                run.finish_stage(idx, StageStatus::Warning, Some(reason.clone()));
                Err(format!("migration failed: {}", reason))
            }
        }
    }

    /// Runs the rollback stage and converts the result into the run's terminal error
    async fn roll_back(
        &self,
        run: &mut ReleaseRun,
        before_sync: &str,
        reason: String,
    ) -> ReleaseResult<()> {
        error!(%reason, "Release failed after rollout began");
        let idx = run.begin_stage("rollback", "Rollback");

        let target = match stages::rollback_target(self.source.as_ref(), before_sync).await {
            Ok(target) => target,
            Err(e) => {
                let message = format!("could not determine rollback target: {}", e);
                run.finish_stage(idx, StageStatus::Failed, Some(message.clone()));
                return Err(ReleaseError::RollbackFailed(message));
            }
        };

        match stages::rollback(self.platform.as_ref(), self.source.as_ref(), &target).await {
            Ok(()) => {
                run.finish_stage(idx, StageStatus::Success, Some(short_rev(&target)));
                Err(ReleaseError::RolledBack {
                    reason,
                    revision: short_rev(&target),
                })
            }
            Err(message) => {
                run.finish_stage(idx, StageStatus::Failed, Some(message.clone()));
                Err(ReleaseError::RollbackFailed(message))
            }
        }
    }

    async fn simple_stage<F>(
        &self,
        run: &mut ReleaseRun,
        name: &str,
        display_name: &str,
        op: F,
    ) -> ReleaseResult<()>
    where
        F: std::future::Future<Output = Result<(), PlatformError>>,
    {
        let idx = run.begin_stage(name, display_name);
        match op.await {
            Ok(()) => {
                run.finish_stage(idx, StageStatus::Success, None);
                Ok(())
            }
            Err(e) => {
                run.finish_stage(idx, StageStatus::Failed, Some(e.to_string()));
                Err(e.into())
            }
        }
    }
}

fn short_rev(rev: &str) -> String {
    rev.chars().take(12).collect()
}
