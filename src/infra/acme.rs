//! ACME 客户端接口
//!
//! `CertbotClient` 通过 certbot（standalone HTTP-01）签发与续期，通过 openssl 读取证书到期时间

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::env::constants::{CERT_TIMEOUT_SECS, COMMAND_TIMEOUT_SECS};
use crate::domain::certificate::parse_openssl_enddate;
use crate::infra::command::{CommandError, CommandRunner};

/// 证书颁发机构客户端
#[async_trait]
pub trait CertificateAuthorityClient: Send + Sync {
    /// 为给定域名签发证书（需要挑战端口空闲）
    async fn issue(&self, domains: &[String], email: &str) -> Result<(), CommandError>;

    /// 续期检查；没有证书进入续期窗口时不做任何事
    async fn renew(&self) -> Result<(), CommandError>;

    /// 读取证书到期时间，文件不存在或无法解析时返回 None
    async fn read_expiry(&self, cert: &Path) -> Result<Option<DateTime<Utc>>, CommandError>;
}

/// certbot + openssl 实现
pub struct CertbotClient {
    work_dir: PathBuf,
}

impl CertbotClient {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

/// 构造 certbot certonly 参数
fn issue_args<'a>(domains: &'a [String], email: &'a str) -> Vec<&'a str> {
    let mut args = vec![
        "certonly",
        "--standalone",
        "--non-interactive",
        "--agree-tos",
        "--email",
        email,
    ];
    for domain in domains {
        args.push("-d");
        args.push(domain.as_str());
    }
    args
}

#[async_trait]
impl CertificateAuthorityClient for CertbotClient {
    async fn issue(&self, domains: &[String], email: &str) -> Result<(), CommandError> {
        let args = issue_args(domains, email);
        info!(">>> certbot {}", args.join(" "));
        CommandRunner::run_checked(
            "certbot",
            &args,
            &self.work_dir,
            Duration::from_secs(CERT_TIMEOUT_SECS),
        )
        .await
        .map(|_| ())
    }

    async fn renew(&self) -> Result<(), CommandError> {
        info!(">>> certbot renew --quiet");
        CommandRunner::run_checked(
            "certbot",
            &["renew", "--quiet"],
            &self.work_dir,
            Duration::from_secs(CERT_TIMEOUT_SECS),
        )
        .await
        .map(|_| ())
    }

    async fn read_expiry(&self, cert: &Path) -> Result<Option<DateTime<Utc>>, CommandError> {
        if !cert.exists() {
            return Ok(None);
        }
        let path = cert.to_string_lossy();
        let output = CommandRunner::run_checked(
            "openssl",
            &["x509", "-enddate", "-noout", "-in", path.as_ref()],
            &self.work_dir,
            Duration::from_secs(COMMAND_TIMEOUT_SECS),
        )
        .await?;
        Ok(parse_openssl_enddate(&output.stdout))
    }
}
