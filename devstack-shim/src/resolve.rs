use devstack_bundles::ensure_active_config;
use devstack_core::{Catalog, Error, PathSet, Result, SiteRegistry};
use std::path::Path;
use tracing::debug;

use crate::protocol::{Resolution, Resolved};
use crate::runtime::Runtime;

/// Resolve the runtime version wanted by the site enclosing `working_dir`,
/// materializing its active configuration.
pub fn resolve(
    runtime: Runtime,
    working_dir: &Path,
    catalog: &Catalog,
    sites: &SiteRegistry,
) -> Result<Resolution> {
    let Some(site) = sites.find(working_dir) else {
        debug!("No site encloses {}", working_dir.display());
        return Ok(Resolution::SystemFallback);
    };
    let Some(version) = site.version_for(runtime.type_id()) else {
        debug!(
            "Site {} uses the system {}",
            site.path.display(),
            runtime
        );
        return Ok(Resolution::SystemFallback);
    };

    let def = catalog.get(runtime.type_id())?;
    let paths = ensure_active_config(def, catalog.root(), version, None, false)?;
    resolved(runtime, version, &paths).map(Resolution::Resolved)
}

fn resolved(runtime: Runtime, version: &str, paths: &PathSet) -> Result<Resolved> {
    let (config_file, scan_dir) = match runtime {
        Runtime::Php => {
            let cli = paths.sapi("cli").ok_or_else(|| Error::InvalidDefinition {
                service: runtime.type_id().to_string(),
                reason: "no cli SAPI".to_string(),
            })?;
            (cli.config_file.clone(), cli.scan_dir.clone())
        }
        Runtime::Node => (
            paths.active_root.join("etc/npmrc"),
            paths.active_root.join("lib/node_modules"),
        ),
    };

    Ok(Resolved {
        runtime,
        version: version.to_string(),
        config_file,
        scan_dir,
        binary: paths.binary.clone(),
        lib_dir: paths.lib_dir.clone(),
    })
}
