//! 服务层模块
//!
//! 包含核心业务逻辑：健康探测、备份、证书生命周期与发布编排

pub mod backup;
pub mod certificate;
pub mod health;
pub mod release;

pub use backup::BackupManager;
pub use certificate::CertificateManager;
pub use health::HealthProber;
pub use release::{ReleaseOrchestrator, RunReport, StatusReport};
