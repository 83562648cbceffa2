//! Docker Compose adapter
//!
//! Implements `ContainerPlatform` by shelling out to `docker compose`
//! (or the legacy `docker-compose` binary when that is what the host has).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::env::constants::{BUILD_TIMEOUT_SECS, COMMAND_TIMEOUT_SECS};
use crate::config::ReleaseConfig;
use crate::domain::container::{parse_ps_output, ServiceState};
use crate::domain::release::LogLine;
use crate::infra::command::{CommandOutput, CommandRunner};
use crate::infra::platform::{ContainerPlatform, PlatformError};

/// Compose-backed container platform
pub struct ComposePlatform {
    program: String,
    base_args: Vec<String>,
    project_dir: PathBuf,
    compose_file: PathBuf,
}

impl ComposePlatform {
    /// Build the adapter, detecting which compose command the host provides
    pub async fn detect(config: &ReleaseConfig) -> Self {
        let (program, base_args) = detect_compose_command().await;
        debug!(program, ?base_args, "Using compose command");
        Self::new(program, base_args, config)
    }

    pub fn new(program: &str, base_args: Vec<&str>, config: &ReleaseConfig) -> Self {
        Self {
            program: program.to_string(),
            base_args: base_args.into_iter().map(str::to_string).collect(),
            project_dir: config.project_dir.clone(),
            compose_file: config.compose_file.clone(),
        }
    }

    /// Full argument vector: base args, `-f <file>`, then the subcommand
    fn args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.base_args.iter().map(String::as_str).collect();
        args.push("-f");
        args.push(self.compose_file.to_str().unwrap_or("docker-compose.yml"));
        args.extend_from_slice(rest);
        args
    }

    async fn compose(&self, rest: &[&str], timeout: Duration) -> Result<CommandOutput, PlatformError> {
        let args = self.args(rest);
        info!(">>> {} {}", self.program, args.join(" "));
        Ok(CommandRunner::run_checked(&self.program, &args, &self.project_dir, timeout).await?)
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(COMMAND_TIMEOUT_SECS)
    }
}

#[async_trait]
impl ContainerPlatform for ComposePlatform {
    async fn check_available(&self) -> Result<(), PlatformError> {
        if !CommandRunner::is_available("docker", &["--version"], &self.project_dir).await {
            return Err(PlatformError::Unavailable("docker is not installed".to_string()));
        }
        let mut version_args: Vec<&str> = self.base_args.iter().map(String::as_str).collect();
        version_args.push("version");
        if !CommandRunner::is_available(&self.program, &version_args, &self.project_dir).await {
            return Err(PlatformError::Unavailable(format!(
                "{} is not available",
                self.program
            )));
        }
        Ok(())
    }

    async fn build(&self, service: &str, no_cache: bool) -> Result<(), PlatformError> {
        let mut rest = vec!["build"];
        if no_cache {
            rest.push("--no-cache");
        }
        rest.push(service);
        self.compose(&rest, Duration::from_secs(BUILD_TIMEOUT_SECS))
            .await
            .map(|_| ())
    }

    async fn scale_to(
        &self,
        service: &str,
        replicas: u32,
        recreate: bool,
    ) -> Result<(), PlatformError> {
        let scale = format!("{}={}", service, replicas);
        let mut rest = vec!["up", "-d", "--scale", scale.as_str()];
        if !recreate {
            rest.push("--no-recreate");
        }
        rest.push(service);
        self.compose(&rest, Self::default_timeout()).await.map(|_| ())
    }

    async fn recreate(&self, service: &str) -> Result<(), PlatformError> {
        self.compose(
            &["up", "-d", "--no-deps", "--force-recreate", service],
            Self::default_timeout(),
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, service: &str) -> Result<(), PlatformError> {
        self.compose(&["up", "-d", service], Self::default_timeout())
            .await
            .map(|_| ())
    }

    async fn stop(&self, service: &str) -> Result<(), PlatformError> {
        self.compose(&["stop", service], Self::default_timeout())
            .await
            .map(|_| ())
    }

    async fn restart(&self, service: &str) -> Result<(), PlatformError> {
        self.compose(&["restart", service], Self::default_timeout())
            .await
            .map(|_| ())
    }

    async fn restart_all(&self) -> Result<(), PlatformError> {
        self.compose(
            &["up", "-d", "--no-build", "--force-recreate"],
            Self::default_timeout(),
        )
        .await
        .map(|_| ())
    }

    async fn up_all(&self, build: bool) -> Result<(), PlatformError> {
        let rest: &[&str] = if build {
            &["up", "-d", "--build"]
        } else {
            &["up", "-d"]
        };
        let timeout = if build {
            Duration::from_secs(BUILD_TIMEOUT_SECS)
        } else {
            Self::default_timeout()
        };
        self.compose(rest, timeout).await.map(|_| ())
    }

    async fn down_all(&self) -> Result<(), PlatformError> {
        self.compose(&["down"], Self::default_timeout())
            .await
            .map(|_| ())
    }

    async fn status(&self) -> Result<BTreeMap<String, ServiceState>, PlatformError> {
        let output = self
            .compose(&["ps", "--all", "--format", "json"], Self::default_timeout())
            .await?;
        let entries =
            parse_ps_output(&output.stdout).map_err(|e| PlatformError::Parse(e.to_string()))?;

        let mut states: BTreeMap<String, ServiceState> = BTreeMap::new();
        for entry in entries {
            let state = ServiceState::parse(&entry.state);
            // A scaled service is running if any of its replicas is
            states
                .entry(entry.service)
                .and_modify(|s| {
                    if state.is_running() {
                        *s = state;
                    }
                })
                .or_insert(state);
        }
        Ok(states)
    }

    async fn exec(&self, service: &str, command: &[&str]) -> Result<CommandOutput, PlatformError> {
        let mut rest = vec!["exec", "-T", service];
        rest.extend_from_slice(command);
        let args = self.args(&rest);
        debug!(service, ?command, "Executing inside service");
        Ok(CommandRunner::run(&self.program, &args, &self.project_dir, Self::default_timeout()).await?)
    }

    async fn exec_to_file(
        &self,
        service: &str,
        command: &[&str],
        dest: &Path,
    ) -> Result<CommandOutput, PlatformError> {
        let mut rest = vec!["exec", "-T", service];
        rest.extend_from_slice(command);
        let args = self.args(&rest);
        debug!(service, ?command, dest = %dest.display(), "Executing inside service into file");
        Ok(CommandRunner::run_to_file(
            &self.program,
            &args,
            &self.project_dir,
            dest,
            Duration::from_secs(BUILD_TIMEOUT_SECS),
        )
        .await?)
    }

    async fn prune(&self) -> Result<(), PlatformError> {
        info!(">>> docker image prune -f");
        CommandRunner::run_checked(
            "docker",
            &["image", "prune", "-f"],
            &self.project_dir,
            Self::default_timeout(),
        )
        .await?;
        info!(">>> docker volume prune -f");
        CommandRunner::run_checked(
            "docker",
            &["volume", "prune", "-f"],
            &self.project_dir,
            Self::default_timeout(),
        )
        .await?;
        Ok(())
    }

    fn logs(
        &self,
        tail: usize,
    ) -> Result<BoxStream<'static, Result<LogLine, PlatformError>>, PlatformError> {
        let tail = format!("--tail={}", tail);
        let args = self.args(&["logs", "-f", tail.as_str()]);
        let stream = CommandRunner::stream_lines(&self.program, &args, &self.project_dir)?;
        Ok(stream.map(|line| line.map_err(PlatformError::from)).boxed())
    }
}

/// Detect which docker-compose command to use
async fn detect_compose_command() -> (&'static str, Vec<&'static str>) {
    let plugin = Command::new("docker")
        .args(["compose", "version"])
        .output()
        .await;

    if plugin.map(|o| o.status.success()).unwrap_or(false) {
        ("docker", vec!["compose"])
    } else {
        ("docker-compose", vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn platform() -> ComposePlatform {
        let mut vars = HashMap::new();
        vars.insert("PROJECT_DIR".to_string(), "/srv/valo".to_string());
        let config = ReleaseConfig::from_vars(&vars);
        ComposePlatform::new("docker", vec!["compose"], &config)
    }

    #[test]
    fn test_args_prefix_compose_file() {
        let platform = platform();
        assert_eq!(
            platform.args(&["up", "-d", "web"]),
            vec!["compose", "-f", "/srv/valo/docker-compose.yml", "up", "-d", "web"]
        );
    }

    #[test]
    fn test_legacy_binary_has_no_base_args() {
        let config = ReleaseConfig::from_vars(&HashMap::new());
        let platform = ComposePlatform::new("docker-compose", vec![], &config);
        let args = platform.args(&["ps"]);
        assert_eq!(args[0], "-f");
        assert!(args[1].ends_with("docker-compose.yml"));
        assert_eq!(args[2], "ps");
    }
}
