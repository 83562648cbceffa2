//! 健康探测结果

use serde::Serialize;

/// 单次探测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthProbeResult {
    /// 端点返回 2xx
    Success,
    /// 网络错误或非成功状态码，可重试
    TransientFailure { reason: String },
}

impl HealthProbeResult {
    pub fn transient(reason: impl Into<String>) -> Self {
        HealthProbeResult::TransientFailure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HealthProbeResult::Success)
    }
}

/// 探测循环的最终结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    Healthy { attempts: u32 },
    /// 重试预算耗尽
    Exhausted { attempts: u32, last_error: String },
}

impl ProbeVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeVerdict::Healthy { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ProbeVerdict::Healthy { attempts } | ProbeVerdict::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}
