//! The process table and the start/stop/status state machine.

use futures::future::join_all;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ProcessError, Result};
use crate::logs::log_tail;
use crate::pid::{self, PidStatus};

/// How long a freshly launched process is watched for an instant exit.
pub const LAUNCH_WINDOW: Duration = Duration::from_millis(500);
const LAUNCH_POLL: Duration = Duration::from_millis(50);
const STOP_POLL: Duration = Duration::from_millis(100);
/// Liveness checks after SIGKILL, `STOP_POLL` apart.
const KILL_CHECKS: u32 = 10;
const LOG_TAIL_LINES: usize = 20;

/// Everything needed to launch one daemon in the foreground.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Where the daemon writes its PID; written by the supervisor otherwise
    pub pid_file: Option<PathBuf>,
    /// Receives stdout and stderr, truncated at each launch
    pub log_file: Option<PathBuf>,
    pub stop_signal: Signal,
}

impl LaunchSpec {
    fn validate(&self, process_id: &str) -> Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(ProcessError::EmptyCommand {
                process_id: process_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            pid_file: None,
            log_file: None,
            stop_signal: Signal::SIGTERM,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn stop_signal(mut self, signal: Signal) -> Self {
        self.stop_signal = signal;
        self
    }

    /// Shell-quoted command line, for logs and status output.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy())
            .chain(self.args.iter().map(|a| a.as_str().into()))
            .map(shell_escape::escape)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A daemon whose PID file location is known without having launched it,
/// so it can be found across supervisor restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownProcess {
    pub pid_file: PathBuf,
    pub signal: Signal,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    known: BTreeMap<String, KnownProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, process_id: impl Into<String>, pid_file: PathBuf, signal: Signal) {
        self.known
            .insert(process_id.into(), KnownProcess { pid_file, signal });
    }

    pub fn get(&self, process_id: &str) -> Option<&KnownProcess> {
        self.known.get(process_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(String::as_str)
    }
}

/// In-memory bookkeeping for one supervised process.
#[derive(Debug)]
struct ProcessRecord {
    process_id: String,
    /// PID captured at launch
    pid: Pid,
    pid_file: Option<PathBuf>,
    command: String,
    log_file: Option<PathBuf>,
    stop_signal: Signal,
    started_at: Instant,
    /// `None` once the launched process has been reaped, e.g. after a
    /// self-daemonizing server forked and exited.
    os_handle: Option<Child>,
}

impl ProcessRecord {
    /// The PID to signal: a fresh PID file read wins over the launch PID.
    async fn authoritative_pid(&self) -> Pid {
        match &self.pid_file {
            Some(path) => pid::read_pid(path).await.unwrap_or(self.pid),
            None => self.pid,
        }
    }

    /// Reap the launched child if it exited, returning its status.
    fn reap(&mut self) -> Option<ExitStatus> {
        let child = self.os_handle.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.os_handle = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("try_wait on {} failed: {}", self.process_id, e);
                None
            }
        }
    }

    /// Liveness of `pid`. The launched child is checked through its handle so
    /// an exited but unreaped child does not count as alive.
    fn is_alive(&mut self, pid: Pid) -> bool {
        self.reap();
        if pid == self.pid {
            return self.os_handle.is_some();
        }
        pid::is_alive(pid)
    }

    /// Authoritative PID when the process is alive.
    async fn live_pid(&mut self) -> Option<Pid> {
        let pid = self.authoritative_pid().await;
        self.is_alive(pid).then_some(pid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running(Pid),
    Stopped,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Pid),
    AlreadyRunning(Pid),
}

impl StartOutcome {
    pub fn pid(&self) -> Pid {
        match self {
            StartOutcome::Started(pid) | StartOutcome::AlreadyRunning(pid) => *pid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: Pid, forced: bool },
    NotRunning,
}

/// Snapshot of a tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub process_id: String,
    pub pid: Pid,
    pub command: String,
    pub log_file: Option<PathBuf>,
    pub uptime: Duration,
}

type Slot = Arc<Mutex<Option<ProcessRecord>>>;

/// Supervises daemons by `process_id`.
///
/// Calls for one id are serialized on a per-id lock; calls for different ids
/// run concurrently. The table is a cache: liveness is always re-checked
/// against PID files and the OS.
pub struct Supervisor {
    table: RwLock<HashMap<String, Slot>>,
    registry: ProcessRegistry,
}

impl Supervisor {
    pub fn new(registry: ProcessRegistry) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            registry,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    async fn slot(&self, process_id: &str) -> Slot {
        if let Some(slot) = self.table.read().await.get(process_id) {
            return slot.clone();
        }
        self.table
            .write()
            .await
            .entry(process_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the table entry of `process_id` when nothing is tracked under it
    /// and no other caller holds its slot. Callers release their own clone of
    /// the slot first.
    async fn prune(&self, process_id: &str) {
        let mut table = self.table.write().await;
        if let Some(slot) = table.get(process_id)
            && Arc::strong_count(slot) == 1
            && slot.try_lock().is_ok_and(|record| record.is_none())
        {
            table.remove(process_id);
        }
    }

    /// Start `process_id` unless it is already running.
    pub async fn start(&self, process_id: &str, spec: &LaunchSpec) -> Result<StartOutcome> {
        spec.validate(process_id)?;
        let slot = self.slot(process_id).await;
        let outcome = {
            let mut record = slot.lock().await;
            self.start_locked(process_id, spec, &mut record).await
        };
        drop(slot);
        self.prune(process_id).await;
        outcome
    }

    async fn start_locked(
        &self,
        process_id: &str,
        spec: &LaunchSpec,
        record: &mut Option<ProcessRecord>,
    ) -> Result<StartOutcome> {
        if let ProcessStatus::Running(pid) = self.status_locked(process_id, record).await {
            info!("{} is already running (pid {})", process_id, pid);
            return Ok(StartOutcome::AlreadyRunning(pid));
        }
        if let Some(pid_file) = &spec.pid_file
            && let PidStatus::Running(pid) = pid::check_pid_file(pid_file).await
        {
            info!(
                "{} is already running (pid {} from {})",
                process_id,
                pid,
                pid_file.display()
            );
            return Ok(StartOutcome::AlreadyRunning(pid));
        }

        let mut child = spawn(process_id, spec).await?;
        let Some(raw_pid) = child.id() else {
            return Err(launch_failed(process_id, spec, "exited before its pid was known".into()));
        };
        let launch_pid = Pid::from_raw(raw_pid as i32);
        debug!("Launched {} as pid {}: {}", process_id, launch_pid, spec.command_line());

        let mut os_handle = Some(child);
        let deadline = Instant::now() + LAUNCH_WINDOW;
        while Instant::now() < deadline {
            tokio::time::sleep(LAUNCH_POLL).await;
            let Some(handle) = os_handle.as_mut() else {
                break;
            };
            let status = match handle.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    debug!("try_wait on {} failed: {}", process_id, e);
                    None
                }
            };
            let Some(status) = status else {
                continue;
            };

            if !status.success() {
                if let Some(pid_file) = &spec.pid_file {
                    pid::remove_pid(pid_file).await;
                }
                return Err(launch_failed(process_id, spec, format!("exited with {}", status)));
            }

            // Exit 0 inside the window: accept only a daemon that forked and
            // left a live PID behind.
            os_handle = None;
            let forked = match &spec.pid_file {
                Some(pid_file) => match pid::check_pid_file(pid_file).await {
                    PidStatus::Running(pid) => Some(pid),
                    _ => None,
                },
                None => None,
            };
            match forked {
                Some(pid) => debug!("{} daemonized as pid {}", process_id, pid),
                None => {
                    return Err(launch_failed(
                        process_id,
                        spec,
                        "exited with status 0 and left no running process".into(),
                    ));
                }
            }
        }

        if let Some(pid_file) = &spec.pid_file
            && pid::read_pid(pid_file).await.is_none()
        {
            debug!(
                "{} did not write {}, recording launch pid",
                process_id,
                pid_file.display()
            );
            pid::write_pid(pid_file, launch_pid)
                .await
                .map_err(|e| ProcessError::io(process_id, pid_file, e))?;
        }

        let new_record = ProcessRecord {
            process_id: process_id.to_string(),
            pid: launch_pid,
            pid_file: spec.pid_file.clone(),
            command: spec.command_line(),
            log_file: spec.log_file.clone(),
            stop_signal: spec.stop_signal,
            started_at: Instant::now(),
            os_handle,
        };
        let pid = new_record.authoritative_pid().await;
        *record = Some(new_record);

        info!("Started {} (pid {})", process_id, pid);
        Ok(StartOutcome::Started(pid))
    }

    /// Current status, cleaning up stale records and PID files.
    pub async fn status(&self, process_id: &str) -> ProcessStatus {
        let slot = self.slot(process_id).await;
        let status = {
            let mut record = slot.lock().await;
            self.status_locked(process_id, &mut record).await
        };
        drop(slot);
        self.prune(process_id).await;
        status
    }

    async fn status_locked(
        &self,
        process_id: &str,
        record: &mut Option<ProcessRecord>,
    ) -> ProcessStatus {
        if let Some(tracked) = record.as_mut() {
            if let Some(pid) = tracked.live_pid().await {
                return ProcessStatus::Running(pid);
            }
            warn!("{} is no longer running, dropping its record", process_id);
            if let Some(pid_file) = &tracked.pid_file {
                pid::check_pid_file(pid_file).await;
            }
            *record = None;
            return ProcessStatus::Stopped;
        }

        match self.registry.get(process_id) {
            Some(known) => match pid::check_pid_file(&known.pid_file).await {
                PidStatus::Running(pid) => ProcessStatus::Running(pid),
                PidStatus::NotFound | PidStatus::StaleRemoved => ProcessStatus::Stopped,
            },
            None => ProcessStatus::Stopped,
        }
    }

    /// Stop `process_id`: `signal` (or its default) first, SIGKILL once
    /// `timeout` has elapsed.
    ///
    /// Only the process exiting ends the wait; a PID file removed by the
    /// daemon while it shuts down is logged and waiting continues.
    pub async fn stop(
        &self,
        process_id: &str,
        signal: Option<Signal>,
        timeout: Duration,
    ) -> Result<StopOutcome> {
        let slot = self.slot(process_id).await;
        let outcome = {
            let mut record = slot.lock().await;
            self.stop_locked(process_id, signal, timeout, &mut record)
                .await
        };
        drop(slot);
        self.prune(process_id).await;
        outcome
    }

    async fn stop_locked(
        &self,
        process_id: &str,
        signal: Option<Signal>,
        timeout: Duration,
        record: &mut Option<ProcessRecord>,
    ) -> Result<StopOutcome> {
        let known = self.registry.get(process_id);

        let (mut target, pid_file, default_signal) = match record.take() {
            Some(tracked) => {
                let pid_file = tracked.pid_file.clone();
                let signal = tracked.stop_signal;
                (Target::Tracked(tracked), pid_file, signal)
            }
            None => {
                let Some(known) = known else {
                    debug!("{} is not tracked and has no known PID file", process_id);
                    return Ok(StopOutcome::NotRunning);
                };
                match pid::check_pid_file(&known.pid_file).await {
                    PidStatus::Running(pid) => (
                        Target::External(pid),
                        Some(known.pid_file.clone()),
                        known.signal,
                    ),
                    PidStatus::NotFound | PidStatus::StaleRemoved => {
                        return Ok(StopOutcome::NotRunning);
                    }
                }
            }
        };
        let signal = signal.unwrap_or(default_signal);

        let Some(pid) = target.live_pid().await else {
            if let Some(pid_file) = &pid_file {
                pid::check_pid_file(pid_file).await;
            }
            debug!("{} was already stopped", process_id);
            return Ok(StopOutcome::NotRunning);
        };

        info!("Stopping {} (pid {}) with {}", process_id, pid, signal);
        match signal::kill(pid, signal) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                finish_stop(&mut target, pid, pid_file.as_deref()).await;
                return Ok(StopOutcome::Stopped { pid, forced: false });
            }
            Err(source) => {
                target.put_back(record);
                return Err(ProcessError::Signal {
                    process_id: process_id.to_string(),
                    pid,
                    signal,
                    source,
                });
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if !target.is_alive(pid) {
                finish_stop(&mut target, pid, pid_file.as_deref()).await;
                info!("Stopped {}", process_id);
                return Ok(StopOutcome::Stopped { pid, forced: false });
            }
            if let Some(pid_file) = &pid_file
                && !pid_file.exists()
            {
                debug!(
                    "{} removed {}, waiting for pid {} to exit",
                    process_id,
                    pid_file.display(),
                    pid
                );
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        warn!(
            "{} did not stop within {}s, sending SIGKILL",
            process_id,
            timeout.as_secs_f32()
        );
        if let Err(e) = signal::kill(pid, Signal::SIGKILL)
            && e != Errno::ESRCH
        {
            warn!("Failed to send SIGKILL to {}: {}", pid, e);
        }
        for _ in 0..KILL_CHECKS {
            tokio::time::sleep(STOP_POLL).await;
            if !target.is_alive(pid) {
                finish_stop(&mut target, pid, pid_file.as_deref()).await;
                info!("Killed {}", process_id);
                return Ok(StopOutcome::Stopped { pid, forced: true });
            }
        }

        target.put_back(record);
        Err(ProcessError::StopTimeout {
            process_id: process_id.to_string(),
            pid,
            signal,
        })
    }

    /// Stop then start under one lock.
    pub async fn restart(
        &self,
        process_id: &str,
        spec: &LaunchSpec,
        signal: Option<Signal>,
        timeout: Duration,
    ) -> Result<StartOutcome> {
        spec.validate(process_id)?;
        let slot = self.slot(process_id).await;
        let outcome = {
            let mut record = slot.lock().await;
            match self
                .stop_locked(process_id, signal, timeout, &mut record)
                .await
            {
                Ok(_) => self.start_locked(process_id, spec, &mut record).await,
                Err(e) => Err(e),
            }
        };
        drop(slot);
        self.prune(process_id).await;
        outcome
    }

    /// Live tracked processes, sorted by id.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let slots: Vec<(String, Slot)> = self
            .table
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut infos = Vec::new();
        for (id, slot) in slots {
            let mut record = slot.lock().await;
            if let ProcessStatus::Running(pid) = self.status_locked(&id, &mut record).await
                && let Some(tracked) = record.as_ref()
            {
                infos.push(ProcessInfo {
                    process_id: id,
                    pid,
                    command: tracked.command.clone(),
                    log_file: tracked.log_file.clone(),
                    uptime: tracked.started_at.elapsed(),
                });
            }
        }
        infos.sort_by(|a, b| a.process_id.cmp(&b.process_id));
        infos
    }

    /// Stop every registered and every tracked process. True only if every
    /// stop succeeded.
    pub async fn stop_all(&self, timeout: Duration) -> bool {
        let mut ids: Vec<String> = self.registry.ids().map(str::to_string).collect();
        for id in self.table.read().await.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }

        let results = join_all(ids.iter().map(|id| self.stop(id, None, timeout))).await;

        let mut ok = true;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to stop {}: {}", id, e);
                ok = false;
            }
        }
        ok
    }
}

/// What `stop` is acting on.
enum Target {
    Tracked(ProcessRecord),
    External(Pid),
}

impl Target {
    async fn live_pid(&mut self) -> Option<Pid> {
        match self {
            Target::Tracked(record) => record.live_pid().await,
            Target::External(pid) => pid::is_alive(*pid).then_some(*pid),
        }
    }

    fn is_alive(&mut self, pid: Pid) -> bool {
        match self {
            Target::Tracked(record) => record.is_alive(pid),
            Target::External(_) => pid::is_alive(pid),
        }
    }

    fn put_back(self, record: &mut Option<ProcessRecord>) {
        if let Target::Tracked(tracked) = self {
            *record = Some(tracked);
        }
    }
}

/// Remove the PID file once the process is confirmed dead, unless it now
/// names a different live process.
async fn finish_stop(target: &mut Target, pid: Pid, pid_file: Option<&Path>) {
    if let Target::Tracked(record) = target {
        record.reap();
    }
    let Some(pid_file) = pid_file else {
        return;
    };
    match pid::read_pid(pid_file).await {
        Some(current) if current != pid && pid::is_alive(current) => {
            warn!(
                "{} now names live pid {}, leaving it in place",
                pid_file.display(),
                current
            );
        }
        _ => pid::remove_pid(pid_file).await,
    }
}

async fn spawn(process_id: &str, spec: &LaunchSpec) -> Result<Child> {
    let (stdout, stderr) = match &spec.log_file {
        Some(log_file) => {
            if let Some(parent) = log_file.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ProcessError::io(process_id, parent, e))?;
            }
            let file = std::fs::File::create(log_file)
                .map_err(|e| ProcessError::io(process_id, log_file, e))?;
            let err = file
                .try_clone()
                .map_err(|e| ProcessError::io(process_id, log_file, e))?;
            (Stdio::from(file), Stdio::from(err))
        }
        None => (Stdio::null(), Stdio::null()),
    };

    if let Some(pid_file) = &spec.pid_file {
        if let Some(parent) = pid_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProcessError::io(process_id, parent, e))?;
        }
        // Anything left here is stale; live owners were ruled out by the caller
        pid::remove_pid(pid_file).await;
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    // New session so signals aimed at the caller's group never reach the daemon
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }

    command.spawn().map_err(|e| {
        launch_failed(
            process_id,
            spec,
            format!("failed to execute {}: {}", spec.program.display(), e),
        )
    })
}

fn launch_failed(process_id: &str, spec: &LaunchSpec, reason: String) -> ProcessError {
    let log_tail = spec
        .log_file
        .as_deref()
        .map(|path| log_tail(path, LOG_TAIL_LINES))
        .unwrap_or_default();
    warn!("{} failed to start: {}", process_id, reason);
    ProcessError::LaunchFailed {
        process_id: process_id.to_string(),
        reason,
        log_tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_is_shell_quoted() {
        let spec = LaunchSpec::new("/opt/nginx/sbin/nginx").args(["-g", "daemon off;"]);
        assert_eq!(spec.command_line(), "/opt/nginx/sbin/nginx -g 'daemon off;'");
    }

    #[test]
    fn registry_lists_ids_sorted() {
        let mut registry = ProcessRegistry::new();
        registry.register("nginx", PathBuf::from("/run/nginx.pid"), Signal::SIGQUIT);
        registry.register("mysql-a", PathBuf::from("/run/a.pid"), Signal::SIGTERM);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["mysql-a", "nginx"]);
        assert_eq!(registry.get("nginx").unwrap().signal, Signal::SIGQUIT);
    }

    #[tokio::test]
    async fn untracked_unknown_id_is_stopped() {
        let supervisor = Supervisor::new(ProcessRegistry::new());
        assert_eq!(supervisor.status("ghost").await, ProcessStatus::Stopped);
        assert_eq!(
            supervisor
                .stop("ghost", None, Duration::from_secs(1))
                .await
                .unwrap(),
            StopOutcome::NotRunning
        );
        assert!(supervisor.table.read().await.is_empty());
    }

    #[tokio::test]
    async fn failed_start_leaves_no_slot() {
        let supervisor = Supervisor::new(ProcessRegistry::new());
        let spec = LaunchSpec::new("/nonexistent/bin/daemon");
        assert!(supervisor.start("svcA", &spec).await.is_err());
        assert!(supervisor.table.read().await.is_empty());
    }
}
