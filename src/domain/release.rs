//! 发布运行相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 发布调用模式
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMode {
    /// 完整部署：备份、同步、构建、滚动发布、迁移、校验
    Deploy,
    /// 快速部署：使用已构建镜像重启，失败不回滚
    Quick,
    /// 仅备份
    Backup,
    Status,
    Stop,
    Restart,
}

impl ReleaseMode {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseMode::Deploy => "deploy",
            ReleaseMode::Quick => "quick",
            ReleaseMode::Backup => "backup",
            ReleaseMode::Status => "status",
            ReleaseMode::Stop => "stop",
            ReleaseMode::Restart => "restart",
        }
    }

    /// 是否会修改目标主机状态（需要加锁）
    pub fn is_mutating(&self) -> bool {
        !matches!(self, ReleaseMode::Status)
    }
}

impl std::fmt::Display for ReleaseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 发布运行结果
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Running,
    Success,
    /// 校验失败，已回滚到上一版本
    RolledBack,
    /// 失败且未回滚（构建失败、同步失败、快速模式校验失败）
    FailedNoRollback,
    /// 回滚本身失败
    RollbackFailed,
}

impl ReleaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseOutcome::Running => "running",
            ReleaseOutcome::Success => "success",
            ReleaseOutcome::RolledBack => "rolled_back",
            ReleaseOutcome::FailedNoRollback => "failed_no_rollback",
            ReleaseOutcome::RollbackFailed => "rollback_failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReleaseOutcome::Running)
    }
}

/// 阶段状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    /// 完成但带警告（备份跳过、迁移失败被容忍等）
    Warning,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Success => "✓",
            StageStatus::Warning => "!",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "⊘",
            StageStatus::Running => "⟳",
            StageStatus::Pending => "○",
        }
    }
}

/// 发布阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseStage {
    /// 阶段标识 (e.g., "backup", "rollout", "verify")
    pub name: String,
    /// 显示名称
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl ReleaseStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, status: StageStatus, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = status;
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 一次编排器执行
///
/// 进程内创建并在退出时结束，只通过日志输出留存
#[derive(Clone, Debug, Serialize)]
pub struct ReleaseRun {
    pub mode: ReleaseMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: ReleaseOutcome,
    #[serde(default)]
    pub stages: Vec<ReleaseStage>,
}

impl ReleaseRun {
    /// 创建新运行
    pub fn new(mode: ReleaseMode) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            finished_at: None,
            outcome: ReleaseOutcome::Running,
            stages: Vec::new(),
        }
    }

    /// 开始一个阶段，返回阶段下标
    pub fn begin_stage(&mut self, name: &str, display_name: &str) -> usize {
        let mut stage = ReleaseStage::new(name, display_name);
        stage.start();
        self.stages.push(stage);
        self.stages.len() - 1
    }

    pub fn finish_stage(&mut self, index: usize, status: StageStatus, message: Option<String>) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.finish(status, message);
        }
    }

    pub fn skip_stage(&mut self, name: &str, display_name: &str, reason: &str) {
        let mut stage = ReleaseStage::new(name, display_name);
        stage.skip(Some(reason.to_string()));
        self.stages.push(stage);
    }

    pub fn stage(&self, name: &str) -> Option<&ReleaseStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// 设置运行结束
    pub fn complete(&mut self, outcome: ReleaseOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    /// 阶段汇总行
    pub fn summary_lines(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| {
                let duration = stage
                    .duration_ms
                    .map(|d| format!("{}ms", d))
                    .unwrap_or_else(|| "-".to_string());
                match &stage.message {
                    Some(msg) => format!(
                        "{} {} ({}) - {}",
                        stage.status.icon(),
                        stage.display_name,
                        duration,
                        msg
                    ),
                    None => format!("{} {} ({})", stage.status.icon(), stage.display_name, duration),
                }
            })
            .collect()
    }
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new("stdout", content)
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new("stderr", content)
    }
}
