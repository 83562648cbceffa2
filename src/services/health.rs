//! 健康探测器
//!
//! 轮询目标端点直到健康或重试预算耗尽。预算是硬上限，用于约束整个编排的耗时

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::domain::health::{HealthProbeResult, ProbeVerdict};
use crate::infra::http::HealthCheck;
use crate::infra::retry::retry;

/// 健康探测器
pub struct HealthProber {
    check: Arc<dyn HealthCheck>,
}

impl HealthProber {
    pub fn new(check: Arc<dyn HealthCheck>) -> Self {
        Self { check }
    }

    /// 按配置探测
    pub async fn probe_with(&self, config: &HealthConfig) -> ProbeVerdict {
        self.probe(&config.url, config.max_attempts, config.interval)
            .await
    }

    /// 探测 `url`，最多 `max_attempts` 次，每次失败后等待 `interval`
    ///
    /// 可重复调用，除网络 I/O 外无副作用
    pub async fn probe(&self, url: &str, max_attempts: u32, interval: Duration) -> ProbeVerdict {
        info!(url, max_attempts, ?interval, "Waiting for service health");

        let result = retry(max_attempts, interval, |attempt| {
            let check = self.check.clone();
            async move {
                match check.check(url).await {
                    HealthProbeResult::Success => Ok(()),
                    HealthProbeResult::TransientFailure { reason } => {
                        warn!(attempt, max_attempts, %reason, "Health check not passing yet");
                        Err(reason)
                    }
                }
            }
        })
        .await;

        match result {
            Ok(done) => {
                info!(url, attempts = done.attempts, "Service is healthy");
                ProbeVerdict::Healthy {
                    attempts: done.attempts,
                }
            }
            Err(e) => ProbeVerdict::Exhausted {
                attempts: e.attempts,
                last_error: e.last_error,
            },
        }
    }
}
