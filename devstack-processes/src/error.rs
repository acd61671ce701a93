use miette::Diagnostic;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ProcessError {
    #[error("{process_id} failed to start: {reason}\n{log_tail}")]
    #[diagnostic(help("the last lines of the process log are shown above"))]
    LaunchFailed {
        process_id: String,
        reason: String,
        log_tail: String,
    },

    #[error("{process_id} (pid {pid}) is still alive after {signal} and SIGKILL")]
    StopTimeout {
        process_id: String,
        pid: Pid,
        signal: Signal,
    },

    #[error("{process_id}: failed to send {signal} to pid {pid}: {source}")]
    Signal {
        process_id: String,
        pid: Pid,
        signal: Signal,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("{process_id}: I/O error at {}: {source}", path.display())]
    Io {
        process_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{process_id}: empty launch command")]
    EmptyCommand { process_id: String },
}

impl ProcessError {
    pub(crate) fn io(process_id: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            process_id: process_id.to_string(),
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
