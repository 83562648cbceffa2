//! Recording fakes for the infrastructure traits, used by service tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use crate::domain::container::ServiceState;
use crate::domain::health::HealthProbeResult;
use crate::domain::release::LogLine;
use crate::infra::acme::CertificateAuthorityClient;
use crate::infra::command::{CommandError, CommandOutput};
use crate::infra::cron::RenewalScheduler;
use crate::infra::git::SourceControl;
use crate::infra::http::HealthCheck;
use crate::infra::platform::{ContainerPlatform, PlatformError};

/// Shared, ordered call journal so several fakes can interleave into one sequence
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn failed(op: &str) -> CommandError {
    CommandError::Failed {
        program: op.to_string(),
        code: Some(1),
        stderr: format!("{} failed", op),
    }
}

pub fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

pub struct FakePlatform {
    pub journal: Journal,
    pub states: Mutex<BTreeMap<String, ServiceState>>,
    pub failing: Mutex<HashSet<String>>,
    /// keyed by the first word of the executed command
    pub exec_results: Mutex<HashMap<String, CommandOutput>>,
    /// raw stdout written by `exec_to_file`, overriding the scripted text
    pub file_output: Mutex<Option<Vec<u8>>>,
    pub available: Mutex<bool>,
}

impl FakePlatform {
    pub fn new(journal: Journal) -> Self {
        let mut states = BTreeMap::new();
        states.insert("web".to_string(), ServiceState::Running);
        states.insert("db".to_string(), ServiceState::Running);
        states.insert("nginx".to_string(), ServiceState::Running);
        Self {
            journal,
            states: Mutex::new(states),
            failing: Mutex::new(HashSet::new()),
            exec_results: Mutex::new(HashMap::new()),
            file_output: Mutex::new(None),
            available: Mutex::new(true),
        }
    }

    pub fn set_state(&self, service: &str, state: ServiceState) {
        self.states.lock().unwrap().insert(service.to_string(), state);
    }

    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn exec_result(&self, program: &str, result: CommandOutput) {
        self.exec_results
            .lock()
            .unwrap()
            .insert(program.to_string(), result);
    }

    fn record(&self, op: &str, entry: String) -> Result<(), PlatformError> {
        self.journal.lock().unwrap().push(entry);
        if self.failing.lock().unwrap().contains(op) {
            return Err(PlatformError::Command(failed(op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerPlatform for FakePlatform {
    async fn check_available(&self) -> Result<(), PlatformError> {
        if *self.available.lock().unwrap() {
            Ok(())
        } else {
            Err(PlatformError::Unavailable("docker is not installed".to_string()))
        }
    }

    async fn build(&self, service: &str, no_cache: bool) -> Result<(), PlatformError> {
        let cache = if no_cache { " --no-cache" } else { "" };
        self.record("build", format!("build {}{}", service, cache))
    }

    async fn scale_to(&self, service: &str, replicas: u32, recreate: bool) -> Result<(), PlatformError> {
        let mode = if recreate { "" } else { " --no-recreate" };
        self.record("scale", format!("scale {}={}{}", service, replicas, mode))
    }

    async fn recreate(&self, service: &str) -> Result<(), PlatformError> {
        self.record("recreate", format!("recreate {}", service))
    }

    async fn start(&self, service: &str) -> Result<(), PlatformError> {
        self.record("start", format!("start {}", service))?;
        self.set_state(service, ServiceState::Running);
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), PlatformError> {
        self.record("stop", format!("stop {}", service))?;
        self.set_state(service, ServiceState::Exited);
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<(), PlatformError> {
        self.record("restart", format!("restart {}", service))
    }

    async fn restart_all(&self) -> Result<(), PlatformError> {
        self.record("restart_all", "restart_all".to_string())
    }

    async fn up_all(&self, build: bool) -> Result<(), PlatformError> {
        let entry = if build { "up_all --build" } else { "up_all" };
        self.record("up_all", entry.to_string())
    }

    async fn down_all(&self) -> Result<(), PlatformError> {
        self.record("down_all", "down_all".to_string())
    }

    async fn status(&self) -> Result<BTreeMap<String, ServiceState>, PlatformError> {
        if self.failing.lock().unwrap().contains("status") {
            return Err(PlatformError::Command(failed("status")));
        }
        Ok(self.states.lock().unwrap().clone())
    }

    async fn exec(&self, service: &str, command: &[&str]) -> Result<CommandOutput, PlatformError> {
        let program = command.first().copied().unwrap_or_default();
        self.record("exec", format!("exec {} {}", service, command.join(" ")))?;
        Ok(self
            .exec_results
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or_else(|| output(0, "", "")))
    }

    async fn exec_to_file(
        &self,
        service: &str,
        command: &[&str],
        dest: &Path,
    ) -> Result<CommandOutput, PlatformError> {
        let mut result = self.exec(service, command).await?;
        let bytes = match self.file_output.lock().unwrap().clone() {
            Some(bytes) => bytes,
            None => std::mem::take(&mut result.stdout).into_bytes(),
        };
        std::fs::write(dest, bytes).map_err(|e| PlatformError::Command(CommandError::Io(e)))?;
        result.stdout.clear();
        Ok(result)
    }

    async fn prune(&self) -> Result<(), PlatformError> {
        self.record("prune", "prune".to_string())
    }

    fn logs(
        &self,
        tail: usize,
    ) -> Result<BoxStream<'static, Result<LogLine, PlatformError>>, PlatformError> {
        self.journal.lock().unwrap().push(format!("logs {}", tail));
        let lines = (0..tail.min(3)).map(|i| Ok(LogLine::stdout(format!("line {}", i))));
        Ok(stream::iter(lines.collect::<Vec<_>>()).boxed())
    }
}

pub struct FakeSource {
    pub journal: Journal,
    pub revisions: Mutex<Vec<String>>,
    /// revision produced by the next sync, None leaves HEAD unchanged
    pub incoming: Mutex<Option<String>>,
    pub failing: Mutex<HashSet<String>>,
}

impl FakeSource {
    pub fn new(journal: Journal, head: &str, incoming: Option<&str>) -> Self {
        Self {
            journal,
            revisions: Mutex::new(vec!["parent0".to_string(), head.to_string()]),
            incoming: Mutex::new(incoming.map(str::to_string)),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    fn check(&self, op: &str) -> Result<(), CommandError> {
        if self.failing.lock().unwrap().contains(op) {
            Err(failed(op))
        } else {
            Ok(())
        }
    }

    pub fn head(&self) -> String {
        self.revisions.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn current_revision(&self) -> Result<String, CommandError> {
        Ok(self.head())
    }

    async fn parent_revision(&self) -> Result<String, CommandError> {
        let revisions = self.revisions.lock().unwrap();
        Ok(revisions
            .len()
            .checked_sub(2)
            .and_then(|i| revisions.get(i).cloned())
            .unwrap_or_default())
    }

    async fn sync(&self) -> Result<(), CommandError> {
        self.journal.lock().unwrap().push("git sync".to_string());
        self.check("sync")?;
        if let Some(rev) = self.incoming.lock().unwrap().take() {
            self.revisions.lock().unwrap().push(rev);
        }
        Ok(())
    }

    async fn checkout(&self, revision: &str) -> Result<(), CommandError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("git checkout {}", revision));
        self.check("checkout")?;
        self.revisions.lock().unwrap().push(revision.to_string());
        Ok(())
    }
}

/// Scripted health endpoint: pops results in order, repeating the last one
pub struct ScriptedHealthCheck {
    script: Mutex<VecDeque<HealthProbeResult>>,
    last: Mutex<HealthProbeResult>,
    calls: AtomicU32,
    journal: Option<Journal>,
}

impl ScriptedHealthCheck {
    pub fn new(script: Vec<HealthProbeResult>) -> Self {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| HealthProbeResult::transient("no script"));
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
            journal: None,
        }
    }

    pub fn always(result: HealthProbeResult) -> Self {
        Self::new(vec![result])
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealthCheck {
    async fn check(&self, url: &str) -> HealthProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("probe {}", url));
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self.last.lock().unwrap().clone(),
        }
    }
}

/// Fake ACME client that writes PEM files under `<live_root>/<domain>`
pub struct FakeAuthority {
    pub journal: Journal,
    pub live_root: PathBuf,
    /// whether `renew` finds the issued certificates inside their renewal window
    pub renewal_due: Mutex<bool>,
    /// false makes `issue` succeed without leaving any material behind
    pub writes_material: Mutex<bool>,
    pub expiry: Mutex<Option<DateTime<Utc>>>,
    pub failing: Mutex<HashSet<String>>,
}

impl FakeAuthority {
    pub fn new(journal: Journal, live_root: &Path) -> Self {
        Self {
            journal,
            live_root: live_root.to_path_buf(),
            renewal_due: Mutex::new(false),
            writes_material: Mutex::new(true),
            expiry: Mutex::new(None),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn write_material(&self, domain: &str, tag: &str) {
        let dir = self.live_root.join(domain);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("fullchain.pem"), format!("CHAIN {}", tag)).unwrap();
        std::fs::write(dir.join("privkey.pem"), format!("KEY {}", tag)).unwrap();
    }
}

#[async_trait]
impl CertificateAuthorityClient for FakeAuthority {
    async fn issue(&self, domains: &[String], email: &str) -> Result<(), CommandError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("issue {} {}", domains.join(","), email));
        if self.failing.lock().unwrap().contains("issue") {
            return Err(failed("certbot"));
        }
        if *self.writes_material.lock().unwrap() {
            if let Some(domain) = domains.first() {
                self.write_material(domain, "issued");
            }
        }
        Ok(())
    }

    async fn renew(&self) -> Result<(), CommandError> {
        self.journal.lock().unwrap().push("renew".to_string());
        if self.failing.lock().unwrap().contains("renew") {
            return Err(failed("certbot"));
        }
        if *self.renewal_due.lock().unwrap() && self.live_root.exists() {
            for entry in std::fs::read_dir(&self.live_root).unwrap() {
                let domain = entry.unwrap().file_name();
                self.write_material(&domain.to_string_lossy(), "renewed");
            }
        }
        Ok(())
    }

    async fn read_expiry(&self, cert: &Path) -> Result<Option<DateTime<Utc>>, CommandError> {
        if !cert.exists() {
            return Ok(None);
        }
        Ok(*self.expiry.lock().unwrap())
    }
}

pub struct FakeScheduler {
    pub journal: Journal,
}

#[async_trait]
impl RenewalScheduler for FakeScheduler {
    async fn install(&self, schedule: &str, command: &str) -> Result<(), CommandError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("cron {} {}", schedule, command));
        Ok(())
    }
}
