//! 容器服务相关领域模型

use serde::{Deserialize, Serialize};

/// 逻辑服务句柄
///
/// 编排器只通过名称和期望副本数了解服务，从不直接检查容器内部状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: String,
    pub replicas: u32,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>, replicas: u32) -> Self {
        Self {
            name: name.into(),
            replicas,
        }
    }
}

/// 服务状态（由平台的状态查询给出）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Restarting,
    Paused,
    Exited,
    Created,
    Dead,
    Unknown,
}

impl ServiceState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" => ServiceState::Running,
            "restarting" => ServiceState::Restarting,
            "paused" => ServiceState::Paused,
            "exited" => ServiceState::Exited,
            "created" => ServiceState::Created,
            "dead" => ServiceState::Dead,
            _ => ServiceState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Running => "running",
            ServiceState::Restarting => "restarting",
            ServiceState::Paused => "paused",
            ServiceState::Exited => "exited",
            ServiceState::Created => "created",
            ServiceState::Dead => "dead",
            ServiceState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// `docker compose ps --format json` 输出的单条记录
#[derive(Debug, Clone, Deserialize)]
pub struct ComposePsEntry {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Health", default)]
    pub health: String,
}

/// 解析 compose ps 输出
///
/// 新版 compose 每行一个 JSON 对象，旧版输出单个 JSON 数组，两种都接受
pub fn parse_ps_output(output: &str) -> Result<Vec<ComposePsEntry>, serde_json::Error> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
