//! 数据库备份领域模型

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// 备份文件名前缀
pub const BACKUP_PREFIX: &str = "backup_";
/// 压缩后的备份扩展名
pub const BACKUP_EXTENSION: &str = ".sql.gz";
/// 文件名中的时间戳格式
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// 数据库凭据（备份目标）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCredentials {
    /// 数据库服务名
    pub service: String,
    pub user: String,
    pub database: String,
}

/// 压缩后的数据库快照
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// 压缩后大小（字节）
    pub size_bytes: u64,
}

impl BackupArtifact {
    /// 人类可读大小
    pub fn human_size(&self) -> String {
        let size = self.size_bytes as f64;
        if size >= 1024.0 * 1024.0 {
            format!("{:.1} MiB", size / (1024.0 * 1024.0))
        } else if size >= 1024.0 {
            format!("{:.1} KiB", size / 1024.0)
        } else {
            format!("{} B", self.size_bytes)
        }
    }
}

/// 备份结果
#[derive(Debug, Clone)]
pub enum BackupOutcome {
    Created(BackupArtifact),
    /// 数据库服务未运行，跳过（警告而非错误）
    Skipped { reason: String },
}

/// 生成备份文件基础名（不含扩展名）
pub fn backup_stem(at: DateTime<Utc>) -> String {
    format!("{}{}", BACKUP_PREFIX, at.format(TIMESTAMP_FORMAT))
}

/// 判断文件名是否为本工具生成的备份
pub fn is_backup_file(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_EXTENSION)
}

/// 从文件名解析创建时间
pub fn parse_backup_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_EXTENSION)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
