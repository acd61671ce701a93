use std::fmt;
use std::str::FromStr;

/// A runtime whose commands are intercepted by shims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    Php,
    Node,
}

impl Runtime {
    pub const ALL: [Runtime; 2] = [Runtime::Php, Runtime::Node];

    /// Catalog type id of the runtime.
    pub fn type_id(self) -> &'static str {
        match self {
            Runtime::Php => "php",
            Runtime::Node => "node",
        }
    }

    /// Commands a shim named after them dispatches to this runtime.
    pub fn commands(self) -> &'static [&'static str] {
        match self {
            Runtime::Php => &["php", "php-config", "phpize"],
            Runtime::Node => &["node", "npm", "npx", "corepack"],
        }
    }

    pub fn for_command(command: &str) -> Option<Runtime> {
        Self::ALL
            .into_iter()
            .find(|runtime| runtime.commands().contains(&command))
    }

    /// Variable carrying the module/extension scan path.
    pub fn scan_env(self) -> &'static str {
        match self {
            Runtime::Php => "PHP_INI_SCAN_DIR",
            Runtime::Node => "NODE_PATH",
        }
    }

    /// Variable pointing the runtime at its configuration file.
    pub fn config_env(self) -> &'static str {
        match self {
            Runtime::Php => "PHPRC",
            Runtime::Node => "NPM_CONFIG_USERCONFIG",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_id())
    }
}

impl FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|runtime| runtime.type_id() == s)
            .ok_or_else(|| format!("unknown runtime '{}', expected php or node", s))
    }
}

/// Shared library search path variable of the platform.
pub fn library_path_env() -> &'static str {
    if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}
