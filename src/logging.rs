//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 默认过滤规则，可被 `RUST_LOG` 覆盖
pub const DEFAULT_FILTER: &str = "valo_release=info,valo_deploy=info,valo_ssl=info";

/// 安装全局 tracing subscriber
///
/// 终端彩色输出、紧凑格式、不显示 target。重复调用时静默忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .try_init();
}
