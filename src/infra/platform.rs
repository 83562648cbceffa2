//! 容器平台接口
//!
//! 编排器只通过这个窄接口操作容器平台；生产实现见 `infra::compose`

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::container::ServiceState;
use crate::domain::release::LogLine;
use crate::error::ReleaseError;
use crate::infra::command::{CommandError, CommandOutput};

/// 容器平台错误
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("container platform unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unexpected platform output: {0}")]
    Parse(String),
}

impl From<PlatformError> for ReleaseError {
    fn from(e: PlatformError) -> Self {
        ReleaseError::Platform(e.to_string())
    }
}

/// 容器生命周期控制
///
/// 每个操作都是一次性的副作用，内部不重试；需要确认结果的调用方通过健康探测自行重试
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// 平台及其编排 CLI 是否可用
    async fn check_available(&self) -> Result<(), PlatformError>;

    /// 构建服务镜像，`no_cache` 为 true 时不使用层缓存
    async fn build(&self, service: &str, no_cache: bool) -> Result<(), PlatformError>;

    /// 调整服务副本数，`recreate` 为 false 时保留现有实例
    async fn scale_to(&self, service: &str, replicas: u32, recreate: bool)
        -> Result<(), PlatformError>;

    /// 按当前定义重建服务的全部实例
    async fn recreate(&self, service: &str) -> Result<(), PlatformError>;

    async fn start(&self, service: &str) -> Result<(), PlatformError>;

    async fn stop(&self, service: &str) -> Result<(), PlatformError>;

    async fn restart(&self, service: &str) -> Result<(), PlatformError>;

    /// 使用已构建镜像重启全部服务
    async fn restart_all(&self) -> Result<(), PlatformError>;

    /// 启动全部服务，`build` 为 true 时从当前源码重新构建
    async fn up_all(&self, build: bool) -> Result<(), PlatformError>;

    /// 停止并移除全部服务
    async fn down_all(&self) -> Result<(), PlatformError>;

    /// 服务名 -> 状态
    async fn status(&self) -> Result<BTreeMap<String, ServiceState>, PlatformError>;

    /// 在服务容器内执行命令，非零退出不视为错误，由调用方判断
    async fn exec(&self, service: &str, command: &[&str]) -> Result<CommandOutput, PlatformError>;

    /// 同 `exec`，但 stdout 字节原样写入 `dest`（返回值的 stdout 为空）
    async fn exec_to_file(
        &self,
        service: &str,
        command: &[&str],
        dest: &Path,
    ) -> Result<CommandOutput, PlatformError>;

    /// 清理未使用的镜像和卷
    async fn prune(&self) -> Result<(), PlatformError>;

    /// 跟随服务日志
    ///
    /// 返回惰性且无限的日志流；重新调用即重新开始，不可定位
    fn logs(
        &self,
        tail: usize,
    ) -> Result<BoxStream<'static, Result<LogLine, PlatformError>>, PlatformError>;

    /// 服务是否处于运行状态
    async fn is_running(&self, service: &str) -> Result<bool, PlatformError> {
        Ok(self
            .status()
            .await?
            .get(service)
            .map(|s| s.is_running())
            .unwrap_or(false))
    }
}
