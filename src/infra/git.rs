//! 源码同步
//!
//! `SourceControl` 抽象 git 工作树操作，`GitSource` 通过 git CLI 实现

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::env::constants::COMMAND_TIMEOUT_SECS;
use crate::config::ReleaseConfig;
use crate::infra::command::{CommandError, CommandRunner};

/// 源码控制
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// 当前检出的修订
    async fn current_revision(&self) -> Result<String, CommandError>;

    /// 当前修订的父修订
    async fn parent_revision(&self) -> Result<String, CommandError>;

    /// 拉取最新修订
    async fn sync(&self) -> Result<(), CommandError>;

    /// 将工作树重置到指定修订
    async fn checkout(&self, revision: &str) -> Result<(), CommandError>;
}

/// 基于 git CLI 的实现
pub struct GitSource {
    work_dir: PathBuf,
    remote: String,
    branch: String,
}

impl GitSource {
    pub fn new(config: &ReleaseConfig) -> Self {
        Self {
            work_dir: config.project_dir.clone(),
            remote: config.source.remote.clone(),
            branch: config.source.branch.clone(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, CommandError> {
        let output = CommandRunner::run_checked(
            "git",
            args,
            &self.work_dir,
            Duration::from_secs(COMMAND_TIMEOUT_SECS),
        )
        .await?;
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitSource {
    async fn current_revision(&self) -> Result<String, CommandError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn parent_revision(&self) -> Result<String, CommandError> {
        self.git(&["rev-parse", "HEAD~1"]).await
    }

    async fn sync(&self) -> Result<(), CommandError> {
        info!(">>> git pull --ff-only {} {}", self.remote, self.branch);
        self.git(&["pull", "--ff-only", &self.remote, &self.branch])
            .await
            .map(|_| ())
    }

    async fn checkout(&self, revision: &str) -> Result<(), CommandError> {
        info!(">>> git reset --hard {}", revision);
        self.git(&["reset", "--hard", revision]).await.map(|_| ())
    }
}
