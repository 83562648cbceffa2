//! HTTP 健康检查
//!
//! 单次同步检查：2xx 为成功，其他状态码与连接错误都视为可重试的瞬时失败

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::health::HealthProbeResult;

/// 单次健康检查
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, url: &str) -> HealthProbeResult;
}

/// 基于 reqwest 的实现
pub struct HttpHealthCheck {
    client: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("valo-release/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, url: &str) -> HealthProbeResult {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => HealthProbeResult::Success,
            Ok(response) => HealthProbeResult::transient(format!("status {}", response.status())),
            Err(e) => HealthProbeResult::transient(e.to_string()),
        }
    }
}
