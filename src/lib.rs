//! Valo Release - 单机发布编排与 TLS 证书生命周期管理
//!
//! 库入口，`valo-deploy` 与 `valo-ssl` 两个二进制共用

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod logging;
pub mod services;

pub use config::ReleaseConfig;
pub use error::{ReleaseError, ReleaseResult};
