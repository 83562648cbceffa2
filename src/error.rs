//! 统一错误处理
//!
//! `ReleaseError` 覆盖编排器的全部致命错误，并按是否已修改目标主机分类

use std::path::PathBuf;
use thiserror::Error;

use crate::infra::command::CommandError;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 尚未修改任何状态即中止
    AbortBeforeMutation,
    /// 已备份/同步但尚未发布，中止且不回滚
    AbortAfterMutation,
    /// 校验失败并已回滚
    RolledBack,
    /// 回滚本身失败
    RollbackFailed,
}

/// 编排器错误
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Prerequisite check failed: {0}")]
    Prerequisite(String),

    #[error("Another release is already running (lock file {})", .0.display())]
    Locked(PathBuf),

    #[error("Required template is missing: {}", .0.display())]
    MissingTemplate(PathBuf),

    #[error("Source sync failed: {0}")]
    Sync(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Release rolled back to {revision}: {reason}")]
    RolledBack { reason: String, revision: String },

    #[error("Health verification failed after {attempts} attempts (no rollback in quick mode)")]
    VerificationFailed { attempts: u32 },

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Container platform error: {0}")]
    Platform(String),

    #[error("Certificate operation failed: {0}")]
    Certificate(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReleaseError {
    pub fn prerequisite(message: impl Into<String>) -> Self {
        Self::Prerequisite(message.into())
    }

    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate(message.into())
    }

    /// 错误分类
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReleaseError::Prerequisite(_)
            | ReleaseError::Locked(_)
            | ReleaseError::MissingTemplate(_) => ErrorCategory::AbortBeforeMutation,
            ReleaseError::RolledBack { .. } => ErrorCategory::RolledBack,
            ReleaseError::RollbackFailed(_) => ErrorCategory::RollbackFailed,
            _ => ErrorCategory::AbortAfterMutation,
        }
    }

    /// 进程退出码：任何致命错误均为 1
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// 便捷类型别名
pub type ReleaseResult<T> = Result<T, ReleaseError>;
