//! Three-line reply of `devstack resolve`.
//!
//! Line one is the resolved version, line two the active configuration file,
//! line three the scan directory. Anything else, including non-UTF-8 output,
//! is rejected and the shim runs the system binary instead.

use devstack_core::PathSet;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::runtime::Runtime;

/// Paths a shim needs to run a resolved runtime version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub runtime: Runtime,
    pub version: String,
    pub config_file: PathBuf,
    pub scan_dir: PathBuf,
    /// Main binary of the runtime in its bundle
    pub binary: PathBuf,
    pub lib_dir: PathBuf,
}

impl Resolved {
    pub fn reply(&self) -> Reply {
        Reply {
            version: self.version.clone(),
            config_file: self.config_file.clone(),
            scan_dir: self.scan_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Resolved),
    /// Run the system binary
    SystemFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub version: String,
    pub config_file: PathBuf,
    pub scan_dir: PathBuf,
}

impl Reply {
    pub fn write_to(&self, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "{}", self.version)?;
        writeln!(out, "{}", self.config_file.display())?;
        writeln!(out, "{}", self.scan_dir.display())?;
        out.flush()
    }

    /// Combine the reply with the bundle paths of the resolved version.
    pub fn into_resolved(self, runtime: Runtime, paths: &PathSet) -> Resolved {
        Resolved {
            runtime,
            version: self.version,
            config_file: self.config_file,
            scan_dir: self.scan_dir,
            binary: paths.binary.clone(),
            lib_dir: paths.lib_dir.clone(),
        }
    }

    /// Parse resolver stdout, `None` on any deviation from the format.
    pub fn parse(stdout: &[u8]) -> Option<Reply> {
        let text = std::str::from_utf8(stdout).ok()?;
        let text = text.strip_suffix('\n').unwrap_or(text);
        let lines: Vec<&str> = text.split('\n').collect();
        let [version, config_file, scan_dir] = lines.as_slice() else {
            return None;
        };

        if version.is_empty() || version.contains(char::is_whitespace) {
            return None;
        }
        let config_file = PathBuf::from(config_file);
        let scan_dir = PathBuf::from(scan_dir);
        if !config_file.is_absolute() || !scan_dir.is_absolute() {
            return None;
        }

        Some(Reply {
            version: version.to_string(),
            config_file,
            scan_dir,
        })
    }
}
