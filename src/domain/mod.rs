//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio

pub mod backup;
pub mod certificate;
pub mod container;
pub mod health;
pub mod release;

// Re-exports for convenience
pub use backup::{BackupArtifact, BackupOutcome, DbCredentials};
pub use certificate::{CertificateBundle, CertificateStatus, RenewalResult};
pub use container::{ServiceHandle, ServiceState};
pub use health::{HealthProbeResult, ProbeVerdict};
pub use release::{LogLine, ReleaseMode, ReleaseOutcome, ReleaseRun, ReleaseStage, StageStatus};
