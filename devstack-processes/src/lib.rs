//! Process supervision for devstack.
//!
//! [`Supervisor`] starts daemons in their own session, tracks them by
//! process id, and stops them with a graceful signal followed by SIGKILL.
//! PID files are the source of truth across supervisor restarts: anything
//! registered in the [`ProcessRegistry`] is found again by its PID file.

pub mod error;
pub mod logs;
pub mod pid;
pub mod supervisor;

pub use error::{ProcessError, Result};
pub use logs::log_tail;
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;
pub use pid::{PidStatus, check_pid_file, parse_pid, read_pid};
pub use supervisor::{
    KnownProcess, LAUNCH_WINDOW, LaunchSpec, ProcessInfo, ProcessRegistry, ProcessStatus,
    StartOutcome, StopOutcome, Supervisor,
};
