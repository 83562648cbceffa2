//! 定时续期注册
//!
//! 通过用户 crontab 安装每日续期任务；重复注册会替换旧条目而不是追加

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::env::constants::COMMAND_TIMEOUT_SECS;
use crate::infra::command::{CommandError, CommandRunner};

/// crontab 条目标记
pub const CRON_MARKER: &str = "# valo-ssl-renew";

/// 续期调度器
#[async_trait]
pub trait RenewalScheduler: Send + Sync {
    /// 注册（或替换）周期性任务
    async fn install(&self, schedule: &str, command: &str) -> Result<(), CommandError>;
}

/// 基于 crontab 的实现
pub struct CrontabScheduler {
    work_dir: PathBuf,
}

impl CrontabScheduler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

/// 定时任务执行的续期命令：在项目目录下以指定域名运行 `renew`
pub fn renew_command(exe: &Path, project_dir: &Path, domain: &str) -> String {
    let line = format!(
        "cd {} && {} renew --domain {}",
        shell_quote(&project_dir.to_string_lossy()),
        shell_quote(&exe.to_string_lossy()),
        shell_quote(domain)
    );
    // cron turns a bare % into a newline
    line.replace('%', "\\%")
}

/// POSIX shell 单引号转义
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// 合并新的续期条目到已有 crontab
pub fn merge_crontab(existing: &str, schedule: &str, command: &str) -> String {
    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !line.contains(CRON_MARKER))
        .map(str::to_string)
        .collect();
    lines.push(format!("{} {} {}", schedule, command, CRON_MARKER));
    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

#[async_trait]
impl RenewalScheduler for CrontabScheduler {
    async fn install(&self, schedule: &str, command: &str) -> Result<(), CommandError> {
        let timeout = Duration::from_secs(COMMAND_TIMEOUT_SECS);
        // `crontab -l` exits non-zero when the user has no crontab yet
        let existing = CommandRunner::run("crontab", &["-l"], &self.work_dir, timeout)
            .await?;
        let current = if existing.success() {
            existing.stdout
        } else {
            String::new()
        };

        let merged = merge_crontab(&current, schedule, command);
        let output = CommandRunner::run_with_input(
            "crontab",
            &["-"],
            &self.work_dir,
            Some(merged.as_bytes()),
            timeout,
        )
        .await?;
        if !output.success() {
            return Err(CommandError::Failed {
                program: "crontab".to_string(),
                code: output.code,
                stderr: output.stderr,
            });
        }
        info!(schedule, "Renewal job registered");
        Ok(())
    }
}
