//! 环境变量配置加载
//!
//! 启动时读取一次，构造成不可变的 `ReleaseConfig`，之后显式传入各组件

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::domain::backup::DbCredentials;

/// 发布编排配置
#[derive(Clone, Debug)]
pub struct ReleaseConfig {
    /// 项目根目录（compose 文件、.env、git 工作树所在）
    pub project_dir: PathBuf,
    /// compose 文件（相对 project_dir）
    pub compose_file: PathBuf,
    /// 前置检查要求存在的配置文件
    pub env_file: PathBuf,
    pub services: ServiceNames,
    pub database: DatabaseConfig,
    pub backup: BackupConfig,
    pub health: HealthConfig,
    pub rollout: RolloutConfig,
    pub source: SourceConfig,
    pub tls: TlsConfig,
    /// 互斥锁文件
    pub lock_file: PathBuf,
    /// `logs` 默认行数
    pub log_tail: usize,
}

/// 服务名称
#[derive(Clone, Debug)]
pub struct ServiceNames {
    pub web: String,
    pub database: String,
    pub proxy: String,
}

/// 数据库配置
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub user: String,
    pub name: String,
    /// 在 web 服务内执行的迁移命令
    pub migrate_command: Vec<String>,
    /// 为 true 时真实的迁移失败会触发回滚
    pub strict_migrations: bool,
}

/// 备份配置
#[derive(Clone, Debug)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub retention: usize,
}

/// 健康检查配置
#[derive(Clone, Debug)]
pub struct HealthConfig {
    pub url: String,
    pub max_attempts: u32,
    pub interval: Duration,
    /// 单次请求超时
    pub request_timeout: Duration,
}

/// 滚动发布配置
#[derive(Clone, Debug)]
pub struct RolloutConfig {
    /// 启动数据库后的等待
    pub db_settle: Duration,
    /// 扩容后的等待
    pub scale_settle: Duration,
    /// 稳态副本数，发布时扩到两倍
    pub web_replicas: u32,
}

/// 源码同步配置
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub remote: String,
    pub branch: String,
}

/// TLS 证书配置
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub domain: String,
    pub email: String,
    /// ACME 客户端的根目录（其下 live/<domain>/）
    pub letsencrypt_dir: PathBuf,
    /// 代理使用的证书目录
    pub ssl_dir: PathBuf,
    /// 代理当前生效配置
    pub proxy_conf: PathBuf,
    /// TLS 配置模板
    pub proxy_tls_template: PathBuf,
    /// 每日续期的 cron 表达式
    pub renew_schedule: String,
    pub warning_days: i64,
}

impl ReleaseConfig {
    /// 从进程环境加载配置
    ///
    /// 先尝试加载 `.env`（不存在时忽略）
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Failed to load .env file, using process environment only");
            }
        }
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// 从给定变量表构造配置
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| -> String {
            vars.get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        // 外部命令以 project_dir 为工作目录执行，其余路径必须与之无关
        let project_dir = PathBuf::from(get("PROJECT_DIR", "."));
        let project_dir = std::path::absolute(&project_dir).unwrap_or(project_dir);

        let services = ServiceNames {
            web: get("WEB_SERVICE", "web"),
            database: get("DB_SERVICE", "db"),
            proxy: get("PROXY_SERVICE", "nginx"),
        };

        let database = DatabaseConfig {
            user: get("POSTGRES_USER", "valomaison"),
            name: get("POSTGRES_DB", "valomaison"),
            migrate_command: get("MIGRATE_COMMAND", "flask db upgrade")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            strict_migrations: parse_bool(vars, "STRICT_MIGRATIONS", false),
        };

        let backup = BackupConfig {
            dir: project_dir.join(get("BACKUP_DIR", "backups")),
            retention: parse_or(vars, "BACKUP_RETENTION", 10),
        };

        let health = HealthConfig {
            url: get("HEALTH_URL", "http://localhost/api/health"),
            max_attempts: parse_or(vars, "HEALTH_MAX_ATTEMPTS", 30),
            interval: Duration::from_secs(parse_or(vars, "HEALTH_INTERVAL_SECS", 2)),
            request_timeout: Duration::from_secs(parse_or(vars, "HEALTH_TIMEOUT_SECS", 5)),
        };

        let rollout = RolloutConfig {
            db_settle: Duration::from_secs(parse_or(vars, "DB_SETTLE_SECS", 5)),
            scale_settle: Duration::from_secs(parse_or(vars, "SCALE_SETTLE_SECS", 10)),
            web_replicas: parse_or(vars, "WEB_REPLICAS", 1u32).max(1),
        };

        let source = SourceConfig {
            remote: get("GIT_REMOTE", "origin"),
            branch: get("GIT_BRANCH", "main"),
        };

        let tls = TlsConfig {
            domain: get("DOMAIN", "valomaison.fr"),
            email: get("SSL_EMAIL", "contact@valomaison.fr"),
            letsencrypt_dir: PathBuf::from(get("LETSENCRYPT_DIR", "/etc/letsencrypt")),
            ssl_dir: project_dir.join(get("SSL_DIR", "nginx/ssl")),
            proxy_conf: project_dir.join(get("NGINX_CONF", "nginx/nginx.conf")),
            proxy_tls_template: project_dir.join(get("NGINX_SSL_TEMPLATE", "nginx/nginx-ssl.conf")),
            renew_schedule: get("RENEW_SCHEDULE", "0 3 * * *"),
            warning_days: parse_or(vars, "CERT_WARNING_DAYS", 30),
        };

        Self {
            compose_file: project_dir.join(get("COMPOSE_FILE", "docker-compose.yml")),
            env_file: project_dir.join(get("ENV_FILE", ".env")),
            lock_file: project_dir.join(get("LOCK_FILE", ".release.lock")),
            log_tail: parse_or(vars, "LOG_TAIL", 100),
            project_dir,
            services,
            database,
            backup,
            health,
            rollout,
            source,
            tls,
        }
    }

    /// 备份目标凭据
    pub fn db_credentials(&self) -> DbCredentials {
        DbCredentials {
            service: self.services.database.clone(),
            user: self.database.user.clone(),
            database: self.database.name.clone(),
        }
    }
}

impl TlsConfig {
    /// ACME 客户端为该域名维护的 live 目录
    pub fn live_dir_for(&self, domain: &str) -> PathBuf {
        self.letsencrypt_dir.join("live").join(domain)
    }
}

/// 解析数值，失败时回退默认值并告警
fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = raw, default = %default, "Invalid value, falling back to default");
            default
        }),
        None => default,
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> bool {
    vars.get(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(default)
}

/// 常量
pub mod constants {
    /// 单条外部命令的默认超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 600;

    /// 镜像构建超时（秒）
    pub const BUILD_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 证书签发超时（秒）
    pub const CERT_TIMEOUT_SECS: u64 = 300;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
