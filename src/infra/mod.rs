//! 基础设施模块
//!
//! 封装外部依赖（容器平台、git、ACME 客户端、crontab、HTTP 探测、命令执行等）

pub mod acme;
pub mod command;
pub mod compose;
pub mod cron;
pub mod git;
pub mod http;
pub mod lock;
pub mod platform;
pub mod retry;

#[cfg(test)]
pub mod fake;

pub use acme::{CertbotClient, CertificateAuthorityClient};
pub use command::{CommandError, CommandOutput, CommandRunner};
pub use compose::ComposePlatform;
pub use cron::{CrontabScheduler, RenewalScheduler};
pub use git::{GitSource, SourceControl};
pub use http::{HealthCheck, HttpHealthCheck};
pub use lock::RunLock;
pub use platform::{ContainerPlatform, PlatformError};
pub use retry::{retry, Attempted, RetryError};
