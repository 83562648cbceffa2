//! 运行互斥锁
//!
//! 同一主机同一时间只允许一个变更型编排运行。锁文件以 create-new 语义创建，
//! 写入 pid 与时间戳，在 drop 时删除

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ReleaseError, ReleaseResult};

/// 持有期间排他的运行锁
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// 获取锁；已被占用时返回 `ReleaseError::Locked`
    pub fn acquire(path: &Path) -> ReleaseResult<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Ok(holder) = std::fs::read_to_string(path) {
                    warn!(lock = %path.display(), holder = holder.trim(), "Release lock is held");
                }
                return Err(ReleaseError::Locked(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(
            file,
            "pid={} started_at={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        debug!(lock = %path.display(), "Release lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove release lock");
        }
    }
}
