//! JSON stores for sites and service instances.
//!
//! Both files are owned by the front-end; devstack reads them and, for
//! instances, writes them back when instances are added or removed from the
//! CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Value of a site runtime entry that selects the system binary.
pub const SYSTEM_DEFAULT: &[&str] = &["default", "system"];

/// A project directory and the runtime versions it wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub php: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl Site {
    /// Requested version for a runtime, `None` when the site defers to the
    /// system binary.
    pub fn version_for(&self, runtime: &str) -> Option<&str> {
        let requested = match runtime {
            "php" => self.php.as_deref(),
            "node" => self.node.as_deref(),
            _ => None,
        }?;
        if SYSTEM_DEFAULT.contains(&requested) {
            None
        } else {
            Some(requested)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteRegistry {
    sites: Vec<Site>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Load `sites.json`; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_json_list(path)?))
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Nearest enclosing site of `dir` (longest root prefix wins).
    pub fn find(&self, dir: &Path) -> Option<&Site> {
        let canonical = dir.canonicalize().ok();
        self.sites
            .iter()
            .filter(|site| {
                dir.starts_with(&site.path)
                    || canonical.as_deref().is_some_and(|c| c.starts_with(&site.path))
            })
            .max_by_key(|site| site.path.components().count())
    }
}

/// A user-defined instance of a multi-instance service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_type_id: String,
    pub display_name: String,
    pub port: u16,
    #[serde(default)]
    pub autostart: bool,
    /// Bundle version; the newest installed bundle when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstanceStore {
    path: PathBuf,
    instances: Vec<ServiceInstance>,
}

impl InstanceStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let instances = read_json_list(&path)?;
        Ok(Self { path, instances })
    }

    pub fn list(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn get(&self, instance_id: &str) -> Option<&ServiceInstance> {
        self.instances.iter().find(|i| i.instance_id == instance_id)
    }

    pub fn autostart(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.instances.iter().filter(|i| i.autostart)
    }

    /// Derive an unused instance id from a display name.
    pub fn next_id(&self, display_name: &str) -> String {
        let mut base: String = display_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        base = base.trim_matches('-').to_string();
        if base.is_empty() {
            base = "instance".to_string();
        }

        let mut candidate = base.clone();
        let mut n = 2;
        while self.get(&candidate).is_some() {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        candidate
    }

    pub fn add(&mut self, instance: ServiceInstance) -> Result<()> {
        if self.get(&instance.instance_id).is_some() {
            return Err(Error::config(
                &self.path,
                format!("instance '{}' already exists", instance.instance_id),
            ));
        }
        self.instances.push(instance);
        self.save()
    }

    pub fn remove(&mut self, instance_id: &str) -> Result<ServiceInstance> {
        let index = self
            .instances
            .iter()
            .position(|i| i.instance_id == instance_id)
            .ok_or_else(|| {
                Error::config(&self.path, format!("no instance '{}'", instance_id))
            })?;
        let removed = self.instances.remove(index);
        self.save()?;
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::config(parent, e))?;
        }

        // Write atomically
        let temp_path = self.path.with_extension("tmp");
        let content =
            serde_json::to_string_pretty(&self.instances).map_err(|e| Error::config(&self.path, e))?;
        std::fs::write(&temp_path, content).map_err(|e| Error::config(&temp_path, e))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| Error::config(&self.path, e))?;
        Ok(())
    }
}

fn read_json_list<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} does not exist, treating as empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(Error::config(path, e)),
    };
    serde_json::from_str(&content).map_err(|e| Error::config(path, e))
}
