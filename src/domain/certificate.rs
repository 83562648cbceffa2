//! TLS 证书领域模型

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// 私钥文件权限：仅属主可读写
pub const PRIVATE_KEY_MODE: u32 = 0o600;

/// 证书链文件名
pub const FULLCHAIN_FILE: &str = "fullchain.pem";
/// 私钥文件名
pub const PRIVKEY_FILE: &str = "privkey.pem";
/// 已安装新证书但代理尚未成功重新加载
pub const RELOAD_PENDING_FILE: &str = ".reload-pending";

/// 域名 + www 别名的完整证书链与私钥
#[derive(Debug, Clone, Serialize)]
pub struct CertificateBundle {
    pub domain: String,
    pub fullchain_path: PathBuf,
    pub privkey_path: PathBuf,
    pub expires_at: Option<DateTime<Utc>>,
    pub key_mode: u32,
}

impl CertificateBundle {
    /// 证书覆盖的全部名称
    pub fn names(domain: &str) -> Vec<String> {
        vec![domain.to_string(), format!("www.{}", domain)]
    }
}

/// 证书状态查询结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CertificateStatus {
    /// 尚未安装证书（报告，不是错误）
    Missing,
    Valid {
        expires_at: DateTime<Utc>,
        days_remaining: i64,
    },
    /// 剩余天数低于告警阈值
    ExpiringSoon {
        expires_at: DateTime<Utc>,
        days_remaining: i64,
    },
}

impl CertificateStatus {
    /// 根据到期时间计算状态
    pub fn evaluate(expires_at: DateTime<Utc>, now: DateTime<Utc>, warning_days: i64) -> Self {
        let days_remaining = (expires_at - now).num_days();
        if days_remaining < warning_days {
            CertificateStatus::ExpiringSoon {
                expires_at,
                days_remaining,
            }
        } else {
            CertificateStatus::Valid {
                expires_at,
                days_remaining,
            }
        }
    }
}

/// 续期检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalResult {
    /// 没有证书进入续期窗口，不算失败
    NotDue,
    /// 已签发新证书并安装、重新加载代理
    Renewed,
}

/// 解析 `openssl x509 -enddate -noout` 输出
///
/// 形如 `notAfter=Jan 14 08:30:00 2027 GMT`
pub fn parse_openssl_enddate(output: &str) -> Option<DateTime<Utc>> {
    let value = output.trim().strip_prefix("notAfter=")?.trim();
    let value = value.strip_suffix("GMT").unwrap_or(value).trim();
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
