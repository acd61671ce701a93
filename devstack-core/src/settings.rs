//! User settings loaded from `devstack.yaml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

pub const SETTINGS_FILE: &str = "devstack.yaml";
const APP_PREFIX: &str = "devstack";

/// Default grace period before a stop escalates to SIGKILL.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct Settings {
    /// Holds `bundles/`, `config/`, `data/`, `run/` and `logs/`
    pub root: PathBuf,
    pub stop_timeout_secs: u64,
    /// Site registry, defaults to `<root>/sites.json`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sites_file: Option<PathBuf>,
    /// Instance store, defaults to `<root>/instances.json`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let root = xdg::BaseDirectories::with_prefix(APP_PREFIX)
            .get_data_home()
            .unwrap_or_else(|| std::env::temp_dir().join(APP_PREFIX));
        Self {
            root,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            sites_file: None,
            instances_file: None,
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or from the XDG config
    /// directory when none is given. A missing default file yields defaults;
    /// a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::config(path, "file does not exist"));
                }
                Some(path.to_path_buf())
            }
            None => Self::default_path().filter(|p| p.exists()),
        };

        let Some(path) = path else {
            debug!("No {} found, using defaults", SETTINGS_FILE);
            return Ok(Self::default());
        };

        debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| Error::config(&path, e))?;
        Self::from_yaml(&content).map_err(|e| Error::config(&path, e))
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn default_path() -> Option<PathBuf> {
        xdg::BaseDirectories::with_prefix(APP_PREFIX)
            .get_config_home()
            .map(|dir| dir.join(SETTINGS_FILE))
    }

    /// Apply `DEVSTACK_ROOT`-style overrides.
    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        if let Some(root) = root {
            self.root = root;
        }
        self
    }

    pub fn sites_file(&self) -> PathBuf {
        self.sites_file
            .clone()
            .unwrap_or_else(|| self.root.join("sites.json"))
    }

    pub fn instances_file(&self) -> PathBuf {
        self.instances_file
            .clone()
            .unwrap_or_else(|| self.root.join("instances.json"))
    }

    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stop_timeout_secs)
    }
}
