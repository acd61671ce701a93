//! Shared test utilities for devstack-processes integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use devstack_processes::{LaunchSpec, ProcessRegistry, Supervisor};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::fs;

/// Test context that manages temp directories and cleanup
pub struct TestContext {
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn pid_file(&self, name: &str) -> PathBuf {
        self.temp_path().join("run").join(format!("{}.pid", name))
    }

    pub fn log_file(&self, name: &str) -> PathBuf {
        self.temp_path().join("logs").join(format!("{}.log", name))
    }

    /// Create an executable script in the temp directory
    pub async fn create_script(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, content)
            .await
            .expect("Failed to write script");
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .await
            .expect("Failed to set permissions");
        path
    }

    /// `sleep` with a PID file and log under the temp dir
    pub fn sleep_spec(&self, name: &str, secs: u32) -> LaunchSpec {
        LaunchSpec::new("sleep")
            .args([secs.to_string()])
            .pid_file(self.pid_file(name))
            .log_file(self.log_file(name))
    }
}

pub fn supervisor() -> Supervisor {
    Supervisor::new(ProcessRegistry::new())
}

/// Wait for a condition with exponential backoff
pub async fn wait_for_condition<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = Duration::from_millis(10);
    let max_delay = Duration::from_millis(500);

    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
    false
}

/// A pid that belonged to a process which has exited and been reaped
pub fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("Failed to spawn true");
    let pid = child.id();
    child.wait().expect("Failed to wait for true");
    pid
}

/// Spawn `sleep` outside any supervisor. A thread reaps it so it does not
/// linger as a zombie once killed.
pub fn spawn_external_sleep(secs: u32) -> u32 {
    let mut child = std::process::Command::new("sleep")
        .arg(secs.to_string())
        .spawn()
        .expect("Failed to spawn sleep");
    let pid = child.id();
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    pid
}

/// Default timeout for a whole test
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
