//! TLS 证书生命周期管理
//!
//! 状态：未初始化 --init--> 生效且自动续期 --renew--> 生效且自动续期（自环）。
//! 没有终态，证书生命周期伴随服务整个运行期

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::TlsConfig;
use crate::domain::certificate::{
    CertificateBundle, CertificateStatus, RenewalResult, FULLCHAIN_FILE, PRIVATE_KEY_MODE,
    PRIVKEY_FILE, RELOAD_PENDING_FILE,
};
use crate::error::{ReleaseError, ReleaseResult};
use crate::infra::acme::CertificateAuthorityClient;
use crate::infra::cron::RenewalScheduler;
use crate::infra::platform::ContainerPlatform;

/// 证书生命周期管理器
pub struct CertificateManager {
    platform: Arc<dyn ContainerPlatform>,
    authority: Arc<dyn CertificateAuthorityClient>,
    scheduler: Arc<dyn RenewalScheduler>,
    config: TlsConfig,
    proxy_service: String,
    /// 定时任务执行的续期命令
    renew_command: String,
}

impl CertificateManager {
    pub fn new(
        platform: Arc<dyn ContainerPlatform>,
        authority: Arc<dyn CertificateAuthorityClient>,
        scheduler: Arc<dyn RenewalScheduler>,
        config: TlsConfig,
        proxy_service: impl Into<String>,
        renew_command: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            authority,
            scheduler,
            config,
            proxy_service: proxy_service.into(),
            renew_command: renew_command.into(),
        }
    }

    fn installed_chain(&self) -> PathBuf {
        self.config.ssl_dir.join(FULLCHAIN_FILE)
    }

    fn reload_marker(&self) -> PathBuf {
        self.config.ssl_dir.join(RELOAD_PENDING_FILE)
    }

    /// 首次签发并切换代理到 TLS 配置
    pub async fn init(&self, domain: &str, email: &str) -> ReleaseResult<CertificateBundle> {
        // 模板缺失是前置条件错误，此时尚未做任何修改
        self.require_template()?;

        info!(domain, email, "Initializing TLS certificate");

        // 释放 HTTP-01 挑战所需端口
        info!(service = %self.proxy_service, "Stopping reverse proxy for ACME challenge");
        self.platform.stop(&self.proxy_service).await?;

        let mut bundle = match self.issue_and_install(domain, email).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(error = %e, "TLS initialization failed, bringing proxy back");
                if let Err(restart) = self.platform.start(&self.proxy_service).await {
                    error!(error = %restart, "Failed to restart reverse proxy");
                }
                return Err(e);
            }
        };

        info!(service = %self.proxy_service, "Starting reverse proxy with TLS configuration");
        self.platform.start(&self.proxy_service).await?;

        self.scheduler
            .install(&self.config.renew_schedule, &self.renew_command)
            .await
            .map_err(|e| ReleaseError::certificate(format!("failed to schedule renewal: {}", e)))?;

        bundle.expires_at = self
            .authority
            .read_expiry(&bundle.fullchain_path)
            .await
            .unwrap_or(None);
        info!(domain, expires_at = ?bundle.expires_at, "TLS certificate installed");
        Ok(bundle)
    }

    /// 签发并安装证书，启用 TLS 配置（代理已停止）
    async fn issue_and_install(&self, domain: &str, email: &str) -> ReleaseResult<CertificateBundle> {
        let names = CertificateBundle::names(domain);
        self.authority
            .issue(&names, email)
            .await
            .map_err(|e| ReleaseError::certificate(format!("issuance failed: {}", e)))?;

        let bundle = self.install_material(domain).await?;
        self.enable().await?;
        Ok(bundle)
    }

    /// 续期检查
    ///
    /// 以 ACME live 目录与代理目录中已安装证书的差异判断是否有新证书，
    /// 因此也会安装由其他定时器续期的证书。上次安装后重新加载失败的，本次重试。
    /// 没有新证书时不复制任何文件、不重新加载代理，仍然视为成功
    pub async fn renew(&self) -> ReleaseResult<RenewalResult> {
        let domain = self.config.domain.clone();
        let live_chain = self.config.live_dir_for(&domain).join(FULLCHAIN_FILE);

        self.authority
            .renew()
            .await
            .map_err(|e| ReleaseError::certificate(format!("renewal failed: {}", e)))?;

        let Some(live) = fingerprint(&live_chain).await else {
            return Err(ReleaseError::certificate(format!(
                "no issued certificate for {} at {}, run init first",
                domain,
                live_chain.display()
            )));
        };
        let up_to_date = fingerprint(&self.installed_chain()).await.as_deref() == Some(live.as_str());
        let reload_pending = self.reload_marker().exists();

        if up_to_date && !reload_pending {
            info!(domain = %domain, "No certificate due for renewal");
            return Ok(RenewalResult::NotDue);
        }

        if !up_to_date {
            info!(domain = %domain, "New certificate available, installing");
            self.install_material(&domain).await?;
            fs::write(self.reload_marker(), domain.as_bytes()).await?;
        } else {
            warn!(domain = %domain, "Previous reload did not complete, retrying");
        }

        self.reload_proxy().await?;
        fs::remove_file(self.reload_marker()).await?;
        Ok(RenewalResult::Renewed)
    }

    /// 用 TLS 模板覆盖代理的生效配置（幂等）
    pub async fn enable(&self) -> ReleaseResult<()> {
        self.require_template()?;
        fs::copy(&self.config.proxy_tls_template, &self.config.proxy_conf).await?;
        info!(
            template = %self.config.proxy_tls_template.display(),
            active = %self.config.proxy_conf.display(),
            "TLS configuration enabled"
        );
        Ok(())
    }

    /// 查询已安装证书的剩余有效期
    pub async fn status(&self) -> CertificateStatus {
        let chain = self.installed_chain();
        let expiry = match self.authority.read_expiry(&chain).await {
            Ok(expiry) => expiry,
            Err(e) => {
                warn!(path = %chain.display(), error = %e, "Could not read installed certificate");
                None
            }
        };

        let Some(expires_at) = expiry else {
            info!(path = %chain.display(), "No TLS certificate installed");
            return CertificateStatus::Missing;
        };

        let status = CertificateStatus::evaluate(expires_at, Utc::now(), self.config.warning_days);
        match &status {
            CertificateStatus::ExpiringSoon { days_remaining, .. } => {
                warn!(
                    domain = %self.config.domain,
                    %expires_at,
                    days_remaining,
                    "TLS certificate expires soon"
                );
            }
            CertificateStatus::Valid { days_remaining, .. } => {
                info!(
                    domain = %self.config.domain,
                    %expires_at,
                    days_remaining,
                    "TLS certificate valid"
                );
            }
            CertificateStatus::Missing => {}
        }
        status
    }

    fn require_template(&self) -> ReleaseResult<()> {
        if self.config.proxy_tls_template.exists() {
            Ok(())
        } else {
            Err(ReleaseError::MissingTemplate(
                self.config.proxy_tls_template.clone(),
            ))
        }
    }

    /// 复制证书链与私钥到代理目录，私钥权限限制为仅属主读写
    async fn install_material(&self, domain: &str) -> ReleaseResult<CertificateBundle> {
        let live = self.config.live_dir_for(domain);
        fs::create_dir_all(&self.config.ssl_dir).await?;

        let fullchain_path = self.config.ssl_dir.join(FULLCHAIN_FILE);
        let privkey_path = self.config.ssl_dir.join(PRIVKEY_FILE);

        copy_material(&live.join(FULLCHAIN_FILE), &fullchain_path).await?;
        copy_material(&live.join(PRIVKEY_FILE), &privkey_path).await?;

        #[cfg(unix)]
        fs::set_permissions(
            &privkey_path,
            std::fs::Permissions::from_mode(PRIVATE_KEY_MODE),
        )
        .await?;

        Ok(CertificateBundle {
            domain: domain.to_string(),
            fullchain_path,
            privkey_path,
            expires_at: None,
            key_mode: PRIVATE_KEY_MODE,
        })
    }

    /// 重新加载代理配置（不重启，避免中断连接）
    async fn reload_proxy(&self) -> ReleaseResult<()> {
        info!(service = %self.proxy_service, "Reloading reverse proxy");
        let output = self
            .platform
            .exec(&self.proxy_service, &["nginx", "-s", "reload"])
            .await?;
        if !output.success() {
            return Err(ReleaseError::certificate(format!(
                "proxy reload failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

async fn copy_material(src: &Path, dst: &Path) -> ReleaseResult<()> {
    fs::copy(src, dst).await.map_err(|e| {
        ReleaseError::certificate(format!("failed to copy {}: {}", src.display(), e))
    })?;
    Ok(())
}

/// 证书文件的 SHA-256 指纹，文件不存在时为 None
async fn fingerprint(path: &Path) -> Option<String> {
    let contents = fs::read(path).await.ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Some(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::fake::{journal, output, FakeAuthority, FakePlatform, FakeScheduler, Journal};
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        journal: Journal,
        platform: Arc<FakePlatform>,
        authority: Arc<FakeAuthority>,
        config: TlsConfig,
        manager: CertificateManager,
    }

    fn fixture(with_template: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("nginx")).unwrap();
        std::fs::write(root.join("nginx/nginx.conf"), "listen 80;").unwrap();
        if with_template {
            std::fs::write(root.join("nginx/nginx-ssl.conf"), "listen 443 ssl;").unwrap();
        }

        let config = TlsConfig {
            domain: "valomaison.fr".to_string(),
            email: "contact@valomaison.fr".to_string(),
            letsencrypt_dir: root.join("letsencrypt"),
            ssl_dir: root.join("nginx/ssl"),
            proxy_conf: root.join("nginx/nginx.conf"),
            proxy_tls_template: root.join("nginx/nginx-ssl.conf"),
            renew_schedule: "0 3 * * *".to_string(),
            warning_days: 30,
        };

        let journal = journal();
        let platform = Arc::new(FakePlatform::new(journal.clone()));
        let authority = Arc::new(FakeAuthority::new(
            journal.clone(),
            &config.letsencrypt_dir.join("live"),
        ));
        let scheduler = Arc::new(FakeScheduler {
            journal: journal.clone(),
        });
        let manager = CertificateManager::new(
            platform.clone(),
            authority.clone(),
            scheduler,
            config.clone(),
            "nginx",
            "valo-ssl renew",
        );
        Fixture {
            _dir: dir,
            journal,
            platform,
            authority,
            config,
            manager,
        }
    }

    fn calls(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_init_issues_installs_and_schedules() {
        let f = fixture(true);
        let bundle = f
            .manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap();

        assert_eq!(
            calls(&f.journal),
            vec![
                "stop nginx",
                "issue valomaison.fr,www.valomaison.fr contact@valomaison.fr",
                "start nginx",
                "cron 0 3 * * * valo-ssl renew",
            ]
        );

        assert_eq!(
            std::fs::read_to_string(&bundle.fullchain_path).unwrap(),
            "CHAIN issued"
        );
        assert_eq!(
            std::fs::read_to_string(&f.config.proxy_conf).unwrap(),
            "listen 443 ssl;"
        );

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&bundle.privkey_path)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_init_without_template_changes_nothing() {
        let f = fixture(false);
        let err = f
            .manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::MissingTemplate(_)));
        assert!(calls(&f.journal).is_empty());
        assert_eq!(
            std::fs::read_to_string(&f.config.proxy_conf).unwrap(),
            "listen 80;"
        );
    }

    #[tokio::test]
    async fn test_init_failure_restarts_proxy() {
        let f = fixture(true);
        f.authority.failing.lock().unwrap().insert("issue".to_string());
        let err = f
            .manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Certificate(_)));
        let journal = calls(&f.journal);
        assert_eq!(journal.last().map(String::as_str), Some("start nginx"));
        assert!(!f.config.ssl_dir.join(FULLCHAIN_FILE).exists());
    }

    #[tokio::test]
    async fn test_init_without_issued_material_restarts_proxy() {
        let f = fixture(true);
        *f.authority.writes_material.lock().unwrap() = false;
        let err = f
            .manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Certificate(ref m) if m.contains("failed to copy")));
        assert_eq!(
            calls(&f.journal).last().map(String::as_str),
            Some("start nginx")
        );
        assert_eq!(
            std::fs::read_to_string(&f.config.proxy_conf).unwrap(),
            "listen 80;"
        );
    }

    #[tokio::test]
    async fn test_renew_not_due_is_a_noop_success() {
        let f = fixture(true);
        f.manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap();
        f.journal.lock().unwrap().clear();
        let installed_before = std::fs::read_to_string(f.config.ssl_dir.join(FULLCHAIN_FILE)).unwrap();

        let result = f.manager.renew().await.unwrap();

        assert_eq!(result, RenewalResult::NotDue);
        // only the ACME check ran: no copies, no reloads
        assert_eq!(calls(&f.journal), vec!["renew"]);
        assert_eq!(
            std::fs::read_to_string(f.config.ssl_dir.join(FULLCHAIN_FILE)).unwrap(),
            installed_before
        );
    }

    #[tokio::test]
    async fn test_renew_installs_and_reloads() {
        let f = fixture(true);
        f.manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap();
        f.journal.lock().unwrap().clear();
        *f.authority.renewal_due.lock().unwrap() = true;

        let result = f.manager.renew().await.unwrap();

        assert_eq!(result, RenewalResult::Renewed);
        assert_eq!(calls(&f.journal), vec!["renew", "exec nginx nginx -s reload"]);
        assert_eq!(
            std::fs::read_to_string(f.config.ssl_dir.join(FULLCHAIN_FILE)).unwrap(),
            "CHAIN renewed"
        );
        #[cfg(unix)]
        {
            let mode = std::fs::metadata(f.config.ssl_dir.join(PRIVKEY_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_renew_installs_certificate_renewed_elsewhere() {
        let f = fixture(true);
        f.manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap();
        // a distro certbot timer renewed the live copy on its own
        f.authority.write_material("valomaison.fr", "renewed-by-timer");
        f.journal.lock().unwrap().clear();

        let result = f.manager.renew().await.unwrap();

        assert_eq!(result, RenewalResult::Renewed);
        assert_eq!(calls(&f.journal), vec!["renew", "exec nginx nginx -s reload"]);
        assert_eq!(
            std::fs::read_to_string(f.config.ssl_dir.join(FULLCHAIN_FILE)).unwrap(),
            "CHAIN renewed-by-timer"
        );
    }

    #[tokio::test]
    async fn test_renew_retries_reload_after_failure() {
        let f = fixture(true);
        f.manager
            .init("valomaison.fr", "contact@valomaison.fr")
            .await
            .unwrap();
        *f.authority.renewal_due.lock().unwrap() = true;
        f.platform.exec_result("nginx", output(1, "", "emerg: bad config"));

        let err = f.manager.renew().await.unwrap_err();
        assert!(err.to_string().contains("emerg: bad config"));

        f.platform.exec_results.lock().unwrap().remove("nginx");
        *f.authority.renewal_due.lock().unwrap() = false;
        f.journal.lock().unwrap().clear();

        let result = f.manager.renew().await.unwrap();
        assert_eq!(result, RenewalResult::Renewed);
        assert_eq!(calls(&f.journal), vec!["renew", "exec nginx nginx -s reload"]);
        assert!(!f.config.ssl_dir.join(RELOAD_PENDING_FILE).exists());

        // once reloaded, the next check is a no-op again
        f.journal.lock().unwrap().clear();
        assert_eq!(f.manager.renew().await.unwrap(), RenewalResult::NotDue);
        assert_eq!(calls(&f.journal), vec!["renew"]);
    }

    #[tokio::test]
    async fn test_renew_without_issued_certificate_fails() {
        let f = fixture(true);
        // issued for another domain than the configured one
        f.manager
            .init("example.org", "contact@example.org")
            .await
            .unwrap();
        *f.authority.renewal_due.lock().unwrap() = true;

        let err = f.manager.renew().await.unwrap_err();
        assert!(
            matches!(err, ReleaseError::Certificate(ref m) if m.contains("no issued certificate for valomaison.fr"))
        );
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let f = fixture(true);
        f.manager.enable().await.unwrap();
        f.manager.enable().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&f.config.proxy_conf).unwrap(),
            "listen 443 ssl;"
        );

        let missing = fixture(false);
        assert!(matches!(
            missing.manager.enable().await,
            Err(ReleaseError::MissingTemplate(_))
        ));
    }

    #[tokio::test]
    async fn test_status_thresholds() {
        let f = fixture(true);
        assert_eq!(f.manager.status().await, CertificateStatus::Missing);

        std::fs::create_dir_all(&f.config.ssl_dir).unwrap();
        std::fs::write(f.config.ssl_dir.join(FULLCHAIN_FILE), "CHAIN").unwrap();

        *f.authority.expiry.lock().unwrap() = Some(Utc::now() + Duration::days(10) + Duration::hours(1));
        assert!(matches!(
            f.manager.status().await,
            CertificateStatus::ExpiringSoon { days_remaining: 10, .. }
        ));

        *f.authority.expiry.lock().unwrap() = Some(Utc::now() + Duration::days(90) + Duration::hours(1));
        assert!(matches!(
            f.manager.status().await,
            CertificateStatus::Valid { days_remaining: 90, .. }
        ));
    }
}
