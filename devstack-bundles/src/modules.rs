//! Module enable/disable state, stored as symlinks from each SAPI scan
//! directory into the active `mods-available` directory.

use devstack_core::{Error, PathSet, Result};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::materialize::{MARKER_FILE, ensure_symlink};

/// Modules loaded through `zend_extension` instead of `extension`.
const ZEND_EXTENSIONS: &[&str] = &["opcache", "xdebug"];

const MODULE_SUFFIX: &str = ".ini";

/// Activation state of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleState {
    pub name: String,
    /// SAPIs whose scan directory links the module
    pub enabled_in: Vec<String>,
}

impl ModuleState {
    pub fn is_enabled(&self) -> bool {
        !self.enabled_in.is_empty()
    }
}

/// Module toggles over a materialized active configuration.
pub struct ModuleActivation {
    paths: PathSet,
}

impl ModuleActivation {
    /// Open the module state of a materialized tree.
    pub fn open(paths: PathSet) -> Result<Self> {
        let marker = paths.active_root.join(MARKER_FILE);
        if !marker.exists() || !paths.mods_available.is_dir() {
            return Err(Error::NotMaterialized {
                identity: paths.identity.clone(),
                path: paths.active_root.clone(),
            });
        }
        if paths.sapis.is_empty() {
            return Err(Error::InvalidDefinition {
                service: paths.identity.service.clone(),
                reason: "service has no SAPI scan directories, modules cannot be toggled"
                    .to_string(),
            });
        }
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    fn definition(&self, module: &str) -> PathBuf {
        self.paths
            .mods_available
            .join(format!("{}{}", module, MODULE_SUFFIX))
    }

    /// Links in `scan_dir` that point at the module's definition.
    fn links_to(&self, scan_dir: &Path, module: &str) -> Result<Vec<PathBuf>> {
        let wanted = format!("{}{}", module, MODULE_SUFFIX);
        let id = &self.paths.identity;
        let mut links = Vec::new();
        if !scan_dir.is_dir() {
            return Ok(links);
        }
        for entry in WalkDir::new(scan_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::io(id, scan_dir, io::Error::other(e)))?;
            if !entry.path_is_symlink() {
                continue;
            }
            let target =
                std::fs::read_link(entry.path()).map_err(|e| Error::io(id, entry.path(), e))?;
            if target.file_name().is_some_and(|f| f == wanted.as_str()) {
                links.push(entry.into_path());
            }
        }
        Ok(links)
    }

    /// Modules with a definition in `mods-available`, sorted by name.
    pub fn available(&self) -> Result<Vec<String>> {
        let id = &self.paths.identity;
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.paths.mods_available)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry
                .map_err(|e| Error::io(id, &self.paths.mods_available, io::Error::other(e)))?;
            let name = entry.file_name().to_string_lossy();
            if let Some(module) = name.strip_suffix(MODULE_SUFFIX) {
                names.push(module.to_string());
            }
        }
        Ok(names)
    }

    pub fn list(&self) -> Result<Vec<ModuleState>> {
        let mut states: BTreeMap<String, Vec<String>> = self
            .available()?
            .into_iter()
            .map(|name| (name, Vec::new()))
            .collect();
        for (name, enabled_in) in states.iter_mut() {
            for sapi in &self.paths.sapis {
                if !self.links_to(&sapi.scan_dir, name)?.is_empty() {
                    enabled_in.push(sapi.name.clone());
                }
            }
        }
        Ok(states
            .into_iter()
            .map(|(name, enabled_in)| ModuleState { name, enabled_in })
            .collect())
    }

    /// Enabled in every SAPI.
    pub fn is_enabled(&self, module: &str) -> Result<bool> {
        for sapi in &self.paths.sapis {
            if self.links_to(&sapi.scan_dir, module)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Link the module into every SAPI scan directory, writing its definition
    /// first when `mods-available` has none. Returns whether anything changed.
    pub fn enable(&self, module: &str) -> Result<bool> {
        let id = &self.paths.identity;
        let definition = self.definition(module);
        let mut changed = false;

        if !definition.exists() {
            self.write_definition(module, &definition)?;
            changed = true;
        }

        for sapi in &self.paths.sapis {
            if !self.links_to(&sapi.scan_dir, module)?.is_empty() {
                continue;
            }
            std::fs::create_dir_all(&sapi.scan_dir)
                .map_err(|e| Error::io(id, &sapi.scan_dir, e))?;
            let link = sapi.scan_dir.join(format!("{}{}", module, MODULE_SUFFIX));
            ensure_symlink(id, &link, &definition)?;
            debug!("Linked {} into {}", module, sapi.scan_dir.display());
            changed = true;
        }

        if changed {
            info!("Enabled module {} for {}", module, id);
        }
        Ok(changed)
    }

    /// Remove the module's links. The definition file is kept.
    pub fn disable(&self, module: &str) -> Result<bool> {
        let id = &self.paths.identity;
        let mut changed = false;
        for sapi in &self.paths.sapis {
            for link in self.links_to(&sapi.scan_dir, module)? {
                std::fs::remove_file(&link).map_err(|e| Error::io(id, &link, e))?;
                changed = true;
            }
        }
        if changed {
            info!("Disabled module {} for {}", module, id);
        }
        Ok(changed)
    }

    fn write_definition(&self, module: &str, definition: &Path) -> Result<()> {
        let id = &self.paths.identity;
        let file_name = format!("{}.so", module);
        let extensions = self.paths.active_root.join("extensions");
        let compiled = WalkDir::new(&extensions)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name() == file_name.as_str());
        if !compiled {
            return Err(Error::ModuleNotFound {
                identity: id.clone(),
                module: module.to_string(),
                path: extensions,
            });
        }

        let directive = if ZEND_EXTENSIONS.contains(&module) {
            "zend_extension"
        } else {
            "extension"
        };
        std::fs::write(definition, format!("{}={}\n", directive, file_name))
            .map_err(|e| Error::io(id, definition, e))
    }
}
