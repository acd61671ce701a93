//! Shim side of version resolution: ask the resolver, then replace the shim
//! with the versioned binary or with the system one.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use devstack_core::{Catalog, Settings};
use tracing::{debug, warn};

use crate::error::ShimError;
use crate::protocol::{Reply, Resolved};
use crate::runtime::{Runtime, library_path_env};

/// Name under which the shim binary dispatches on its first argument.
pub const SHIM_BINARY: &str = "devstack-shim";

/// Overrides the resolver executable.
pub const RESOLVER_ENV: &str = "DEVSTACK_RESOLVER";

const RESOLVER_BINARY: &str = "devstack";
const RESOLVER_TIMEOUT: Duration = Duration::from_secs(10);
const RESOLVER_POLL: Duration = Duration::from_millis(10);

/// Command name and passthrough arguments of one shim invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub runtime: Runtime,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Split `argv` into the intercepted command and its arguments. The
    /// command is the basename the shim was invoked as, or the first argument
    /// when it runs as `devstack-shim` itself.
    pub fn from_args(argv: impl IntoIterator<Item = OsString>) -> Result<Self, ShimError> {
        let mut argv = argv.into_iter();
        let argv0 = argv.next().unwrap_or_default();
        let mut command = Path::new(&argv0)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if command == SHIM_BINARY {
            command = argv
                .next()
                .map(|arg| arg.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        let runtime =
            Runtime::for_command(&command).ok_or_else(|| ShimError::UnknownCommand(command.clone()))?;
        Ok(Self {
            command,
            runtime,
            args: argv.collect(),
        })
    }
}

/// Everything needed to exec the target binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlan {
    pub program: PathBuf,
    pub env_remove: Vec<String>,
    pub env_set: Vec<(String, OsString)>,
}

impl ExecPlan {
    /// Run `command` from the resolved bundle. The inherited scan variable is
    /// unset before being re-exported so a stale value cannot leak through.
    pub fn resolved(command: &str, resolved: &Resolved, inherited_lib_path: Option<&OsStr>) -> Self {
        let runtime = resolved.runtime;
        let program = resolved.binary.with_file_name(command);

        let mut lib_path = vec![resolved.lib_dir.clone()];
        if let Some(inherited) = inherited_lib_path {
            lib_path.extend(std::env::split_paths(inherited).filter(|p| !p.as_os_str().is_empty()));
        }
        let lib_path = std::env::join_paths(lib_path)
            .unwrap_or_else(|_| resolved.lib_dir.clone().into_os_string());

        Self {
            program,
            env_remove: vec![runtime.scan_env().to_string()],
            env_set: vec![
                (library_path_env().to_string(), lib_path),
                (
                    runtime.scan_env().to_string(),
                    resolved.scan_dir.clone().into_os_string(),
                ),
                (
                    runtime.config_env().to_string(),
                    resolved.config_file.clone().into_os_string(),
                ),
            ],
        }
    }

    /// Run the system binary, leaving the environment alone.
    pub fn system(program: PathBuf) -> Self {
        Self {
            program,
            env_remove: Vec::new(),
            env_set: Vec::new(),
        }
    }

    pub fn command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.env_set {
            cmd.env(key, value);
        }
        cmd
    }

    /// Replace the current process. Only returns on failure.
    pub fn exec(&self, args: &[OsString]) -> ShimError {
        debug!("Executing {}", self.program.display());
        let source = self.command(args).exec();
        ShimError::Exec {
            program: self.program.clone(),
            source,
        }
    }
}

/// Locate `devstack`: the override variable, a sibling of the shim, then
/// `PATH`.
pub fn find_resolver(shim_exe: Option<&Path>) -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(RESOLVER_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    if let Some(dir) = shim_exe.and_then(Path::parent) {
        let candidate = dir.join(RESOLVER_BINARY);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    which::which(RESOLVER_BINARY).ok()
}

/// Run `<resolver> resolve <runtime> --cwd <cwd>` and parse its reply. Any
/// failure, including a resolver that does not finish in time, is `None`.
pub fn request_resolution(
    resolver: &Path,
    runtime: Runtime,
    cwd: &Path,
    debug_output: bool,
) -> Option<Reply> {
    let mut child = Command::new(resolver)
        .arg("resolve")
        .arg(runtime.type_id())
        .arg("--cwd")
        .arg(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if debug_output {
            Stdio::inherit()
        } else {
            Stdio::null()
        })
        .spawn()
        .inspect_err(|e| debug!("Cannot run resolver {}: {}", resolver.display(), e))
        .ok()?;

    let deadline = Instant::now() + RESOLVER_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() < deadline => std::thread::sleep(RESOLVER_POLL),
            Ok(None) => {
                warn!("Resolver did not answer within {:?}", RESOLVER_TIMEOUT);
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Err(e) => {
                debug!("Waiting for resolver failed: {}", e);
                return None;
            }
        }
    };
    if !status.success() {
        debug!("Resolver exited with {}", status);
        return None;
    }

    let mut stdout = Vec::new();
    child.stdout.take()?.read_to_end(&mut stdout).ok()?;
    let reply = Reply::parse(&stdout);
    if reply.is_none() && !stdout.is_empty() {
        debug!("Ignoring malformed resolver output");
    }
    reply
}

/// Bundle paths of a resolver reply, read from the same settings the
/// resolver uses.
pub fn locate_bundle(runtime: Runtime, reply: Reply) -> Option<Resolved> {
    let config = std::env::var_os("DEVSTACK_CONFIG").map(PathBuf::from);
    let root = std::env::var_os("DEVSTACK_ROOT").map(PathBuf::from);
    let settings = Settings::load(config.as_deref())
        .inspect_err(|e| debug!("Cannot load settings: {}", e))
        .ok()?
        .with_root(root);
    let catalog = Catalog::builtin(&settings.root).ok()?;
    let paths = catalog
        .resolve(runtime.type_id(), &reply.version, None)
        .inspect_err(|e| debug!("Cannot resolve bundle paths: {}", e))
        .ok()?;
    Some(reply.into_resolved(runtime, &paths))
}

/// `PATH` entries that cannot lead back into the shim.
pub fn strip_shim_dirs(path: &OsStr, command: &str, shim_exe: Option<&Path>) -> Vec<PathBuf> {
    let shim_exe = shim_exe.and_then(|exe| exe.canonicalize().ok());
    let shim_dir = shim_exe.as_deref().and_then(Path::parent);

    std::env::split_paths(path)
        .filter(|entry| !entry.as_os_str().is_empty())
        .filter(|entry| {
            let canonical = entry.canonicalize().ok();
            if shim_dir.is_some() && canonical.as_deref() == shim_dir {
                return false;
            }
            let candidate = entry.join(command).canonicalize().ok();
            shim_exe.is_none() || candidate != shim_exe
        })
        .collect()
}

/// The system binary for `command`, searched with the shim removed from
/// `PATH`.
pub fn system_binary(
    command: &str,
    path: Option<&OsStr>,
    shim_exe: Option<&Path>,
    cwd: &Path,
) -> Result<PathBuf, ShimError> {
    let not_found = || ShimError::NotFound {
        command: command.to_string(),
    };
    let entries = strip_shim_dirs(path.unwrap_or_default(), command, shim_exe);
    let search = std::env::join_paths(entries).map_err(|_| not_found())?;
    which::which_in(command, Some(search), cwd).map_err(|_| not_found())
}

/// Resolve and exec. Returns only when no binary could be executed.
pub fn run(invocation: &Invocation, cwd: &Path, debug_output: bool) -> ShimError {
    let shim_exe = std::env::current_exe().ok();

    let resolved = find_resolver(shim_exe.as_deref())
        .and_then(|resolver| request_resolution(&resolver, invocation.runtime, cwd, debug_output))
        .and_then(|reply| locate_bundle(invocation.runtime, reply));

    let plan = match resolved {
        Some(resolved) => {
            debug!(
                "{} resolved to {} {}",
                cwd.display(),
                invocation.runtime,
                resolved.version
            );
            let inherited = std::env::var_os(library_path_env());
            ExecPlan::resolved(&invocation.command, &resolved, inherited.as_deref())
        }
        None => {
            debug!("Falling back to the system {}", invocation.command);
            let path = std::env::var_os("PATH");
            match system_binary(&invocation.command, path.as_deref(), shim_exe.as_deref(), cwd) {
                Ok(program) => ExecPlan::system(program),
                Err(e) => return e,
            }
        }
    };
    plan.exec(&invocation.args)
}
