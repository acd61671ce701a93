//! PID file utilities.

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Result of validating a PID file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStatus {
    /// Process is running with the given PID
    Running(Pid),
    /// PID file doesn't exist
    NotFound,
    /// PID file was stale and has been removed
    StaleRemoved,
}

/// Parse the PID on the first line. Later lines are ignored so files like
/// `postmaster.pid` are accepted.
pub fn parse_pid(content: &str) -> Option<Pid> {
    let first = content.lines().next()?.trim();
    match first.parse::<i32>() {
        Ok(n) if n > 0 => Some(Pid::from_raw(n)),
        _ => None,
    }
}

/// Signal-0 liveness check. EPERM means the process exists but belongs to
/// someone else.
pub fn is_alive(pid: Pid) -> bool {
    match signal::kill(pid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Read the PID from a file, `None` when missing or unparsable.
pub async fn read_pid(pid_file: &Path) -> Option<Pid> {
    let content = fs::read_to_string(pid_file).await.ok()?;
    parse_pid(&content)
}

/// Check if a PID file exists and the process is still running.
/// Removes stale PID files automatically.
pub async fn check_pid_file(pid_file: &Path) -> PidStatus {
    let content = match fs::read_to_string(pid_file).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PidStatus::NotFound,
        Err(e) => {
            warn!("Unreadable PID file {}: {}", pid_file.display(), e);
            remove_pid(pid_file).await;
            return PidStatus::StaleRemoved;
        }
    };

    let Some(pid) = parse_pid(&content) else {
        warn!(
            "Invalid PID format in {}: '{}'",
            pid_file.display(),
            content.lines().next().unwrap_or_default().trim()
        );
        remove_pid(pid_file).await;
        return PidStatus::StaleRemoved;
    };

    if is_alive(pid) {
        PidStatus::Running(pid)
    } else {
        warn!("Stale PID {} in {}, removing", pid, pid_file.display());
        remove_pid(pid_file).await;
        PidStatus::StaleRemoved
    }
}

/// Write PID to a file
pub async fn write_pid(pid_file: &Path, pid: Pid) -> std::io::Result<()> {
    if let Some(parent) = pid_file.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(pid_file, format!("{}\n", pid)).await
}

/// Remove a PID file, ignoring a file that is already gone
pub async fn remove_pid(pid_file: &Path) {
    match fs::remove_file(pid_file).await {
        Ok(()) => debug!("Removed PID file {}", pid_file.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove PID file {}: {}", pid_file.display(), e),
    }
}
