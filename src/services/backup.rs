//! 数据库备份管理
//!
//! 部署前的尽力而为的安全措施：数据库未运行时跳过并告警。
//! 成功时依次执行：导出 -> 压缩 -> 按修改时间保留最近 N 份

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::domain::backup::{
    backup_stem, is_backup_file, parse_backup_timestamp, BackupArtifact, BackupOutcome,
    DbCredentials, BACKUP_EXTENSION,
};
use crate::error::{ReleaseError, ReleaseResult};
use crate::infra::platform::ContainerPlatform;

/// 备份管理器
pub struct BackupManager {
    platform: Arc<dyn ContainerPlatform>,
    dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(platform: Arc<dyn ContainerPlatform>, config: &BackupConfig) -> Self {
        Self {
            platform,
            dir: config.dir.clone(),
            retention: config.retention.max(1),
        }
    }

    /// 执行一次备份
    pub async fn backup(&self, creds: &DbCredentials) -> ReleaseResult<BackupOutcome> {
        self.backup_at(creds, Utc::now()).await
    }

    pub(crate) async fn backup_at(
        &self,
        creds: &DbCredentials,
        now: DateTime<Utc>,
    ) -> ReleaseResult<BackupOutcome> {
        let running = match self.platform.is_running(&creds.service).await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "Could not query database state");
                false
            }
        };
        if !running {
            let reason = format!("database service '{}' is not running", creds.service);
            warn!("Skipping backup: {}", reason);
            return Ok(BackupOutcome::Skipped { reason });
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let stem = backup_stem(now);
        let sql_path = self.dir.join(format!("{}.sql", stem));
        let gz_path = self.dir.join(format!("{}{}", stem, BACKUP_EXTENSION));

        info!(database = %creds.database, user = %creds.user, "Dumping database");
        let dump = self
            .platform
            .exec_to_file(
                &creds.service,
                &["pg_dump", "-U", &creds.user, &creds.database],
                &sql_path,
            )
            .await;
        let failure = match dump {
            Ok(dump) if dump.success() => None,
            Ok(dump) => Some(ReleaseError::Backup(format!(
                "pg_dump exited with {:?}: {}",
                dump.code,
                dump.stderr.trim()
            ))),
            Err(e) => Some(e.into()),
        };
        if let Some(e) = failure {
            // 不留下不完整的导出
            if let Err(remove) = tokio::fs::remove_file(&sql_path).await {
                if remove.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %sql_path.display(), error = %remove, "Failed to remove partial dump");
                }
            }
            return Err(e);
        }

        let (src, dst) = (sql_path.clone(), gz_path.clone());
        tokio::task::spawn_blocking(move || compress_file(&src, &dst))
            .await
            .map_err(|e| ReleaseError::Backup(format!("compression task failed: {}", e)))?
            .map_err(|e| ReleaseError::Backup(format!("compression failed: {}", e)))?;
        tokio::fs::remove_file(&sql_path).await?;

        let size_bytes = tokio::fs::metadata(&gz_path).await?.len();
        let artifact = BackupArtifact {
            path: gz_path,
            created_at: now,
            size_bytes,
        };
        info!(
            path = %artifact.path.display(),
            size = %artifact.human_size(),
            "Backup created"
        );

        let removed = self.prune()?;
        if !removed.is_empty() {
            info!(removed = removed.len(), retention = self.retention, "Pruned old backups");
        }

        Ok(BackupOutcome::Created(artifact))
    }

    /// 删除超出保留数量的旧备份，返回被删除的路径
    pub fn prune(&self) -> ReleaseResult<Vec<PathBuf>> {
        let artifacts = list_artifacts(&self.dir)?;
        let mut removed = Vec::new();
        for (path, _) in artifacts.into_iter().skip(self.retention) {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
        Ok(removed)
    }

    /// 最近一次备份，创建时间取自文件名，无法解析时取修改时间
    pub fn latest(&self) -> ReleaseResult<Option<BackupArtifact>> {
        let Some((path, modified)) = list_artifacts(&self.dir)?.into_iter().next() else {
            return Ok(None);
        };
        let size_bytes = std::fs::metadata(&path)?.len();
        let created_at = path
            .file_name()
            .and_then(|name| parse_backup_timestamp(&name.to_string_lossy()))
            .unwrap_or_else(|| DateTime::<Utc>::from(modified));
        Ok(Some(BackupArtifact {
            path,
            created_at,
            size_bytes,
        }))
    }
}

/// 列出备份，按修改时间从新到旧排序（同一时间按文件名）
fn list_artifacts(dir: &Path) -> std::io::Result<Vec<(PathBuf, SystemTime)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !is_backup_file(&name.to_string_lossy()) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        artifacts.push((entry.path(), modified));
    }
    artifacts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(artifacts)
}

fn compress_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut input = File::open(src)?;
    let output = BufWriter::new(File::create(dst)?);
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}
