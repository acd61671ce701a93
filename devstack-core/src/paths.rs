//! Path resolution for a service version or instance.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::catalog::ServiceDefinition;
use crate::error::{Error, Result, ServiceIdentity};
use crate::template::{PathTemplate, TemplateVars};

/// Config file and scan directory of one SAPI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SapiPaths {
    pub name: String,
    pub config_file: PathBuf,
    pub scan_dir: PathBuf,
    pub bundle_config_file: PathBuf,
    pub bundle_scan_dir: PathBuf,
}

/// Every absolute path needed to materialize and run one version/instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    pub identity: ServiceIdentity,
    pub process_id: Option<String>,
    pub bundle_root: PathBuf,
    pub binary: PathBuf,
    pub lib_dir: PathBuf,
    pub bundle_mods_available: PathBuf,
    pub active_root: PathBuf,
    pub mods_available: PathBuf,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub socket_dir: Option<PathBuf>,
    pub sapis: Vec<SapiPaths>,
}

impl PathSet {
    pub fn sapi(&self, name: &str) -> Option<&SapiPaths> {
        self.sapis.iter().find(|s| s.name == name)
    }

    /// Config file exported to interactive shells: the `cli` SAPI when the
    /// family has SAPIs, otherwise the first template target.
    pub fn interactive_config(&self, fallback: &Path) -> PathBuf {
        self.sapi("cli")
            .map(|s| s.config_file.clone())
            .unwrap_or_else(|| self.active_root.join(fallback))
    }
}

/// Check that `value` can be joined onto a directory without leaving it:
/// non-empty, not `.` or `..`, and free of separators and NUL bytes.
pub fn validate_component(service: &str, kind: &'static str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\0']);
    if invalid {
        return Err(Error::InvalidComponent {
            service: service.to_string(),
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Compute every path of `def` for `version` and, for multi-instance
/// services, `instance_id`.
///
/// Pure: nothing is read from or written to disk. An instance id passed to a
/// single-instance service is ignored. Versions and instance ids that are not
/// a single path component are rejected.
pub fn resolve_paths(
    def: &ServiceDefinition,
    root: &Path,
    version: &str,
    instance_id: Option<&str>,
) -> Result<PathSet> {
    validate_component(&def.type_id, "version", version)?;
    let instance_id = if def.is_multi_instance {
        let id = instance_id.ok_or_else(|| Error::MissingInstanceId {
            service: def.type_id.clone(),
        })?;
        validate_component(&def.type_id, "instance id", id)?;
        Some(id)
    } else {
        if let Some(id) = instance_id {
            debug!(
                "Ignoring instance id '{}' for single-instance service {}",
                id, def.type_id
            );
        }
        None
    };

    let identity = ServiceIdentity::new(&def.type_id, version, instance_id);
    let vars = TemplateVars::new()
        .root(root)
        .version(version)
        .instance(instance_id);

    let render = |t: &PathTemplate| {
        t.render_path(&vars).map_err(|source| Error::Template {
            identity: identity.clone(),
            source,
        })
    };
    let render_opt = |t: &Option<PathTemplate>| t.as_ref().map(render).transpose();

    let bundle_root = render(&def.bundles_dir)?.join(version);
    let active_root = render(&def.active_root)?;
    let process_id = def
        .process_id
        .as_ref()
        .map(|t| t.render(&vars))
        .transpose()
        .map_err(|source| Error::Template {
            identity: identity.clone(),
            source,
        })?;

    let sapis = def
        .family
        .sapis()
        .iter()
        .map(|sapi| SapiPaths {
            name: sapi.name.to_string(),
            config_file: active_root.join(sapi.config_file),
            scan_dir: active_root.join(sapi.scan_dir()),
            bundle_config_file: bundle_root.join(sapi.config_file),
            bundle_scan_dir: bundle_root.join(sapi.scan_dir()),
        })
        .collect();

    Ok(PathSet {
        process_id,
        binary: bundle_root.join(&def.binary),
        lib_dir: bundle_root.join("lib"),
        bundle_mods_available: bundle_root.join("mods-available"),
        mods_available: active_root.join("mods-available"),
        run_dir: active_root.join("var/run"),
        log_dir: active_root.join("var/log"),
        log_file: render_opt(&def.log_file)?,
        pid_file: render_opt(&def.pid_file)?,
        data_dir: render_opt(&def.data_dir)?,
        socket_dir: render_opt(&def.socket_dir)?,
        sapis,
        bundle_root,
        active_root,
        identity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use pretty_assertions::assert_eq;

    #[test]
    fn php_paths_are_version_scoped() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let paths = catalog.resolve("php", "8.3.4", None).unwrap();

        assert_eq!(paths.process_id.as_deref(), Some("php-fpm-8.3.4"));
        assert_eq!(
            paths.bundle_root,
            PathBuf::from("/srv/devstack/bundles/php/8.3.4")
        );
        assert_eq!(
            paths.binary,
            PathBuf::from("/srv/devstack/bundles/php/8.3.4/bin/php")
        );
        assert_eq!(
            paths.active_root,
            PathBuf::from("/srv/devstack/config/php/8.3.4")
        );
        assert_eq!(
            paths.pid_file,
            Some(PathBuf::from(
                "/srv/devstack/config/php/8.3.4/var/run/php-fpm.pid"
            ))
        );

        let fpm = paths.sapi("fpm").unwrap();
        assert_eq!(
            fpm.scan_dir,
            PathBuf::from("/srv/devstack/config/php/8.3.4/fpm/conf.d")
        );
        assert_eq!(
            fpm.bundle_scan_dir,
            PathBuf::from("/srv/devstack/bundles/php/8.3.4/fpm/conf.d")
        );
    }

    #[test]
    fn instance_paths_use_instance_id() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let paths = catalog.resolve("postgres", "16.2", Some("main")).unwrap();

        assert_eq!(paths.process_id.as_deref(), Some("postgres-main"));
        assert_eq!(
            paths.active_root,
            PathBuf::from("/srv/devstack/config/postgres/main")
        );
        assert_eq!(
            paths.data_dir,
            Some(PathBuf::from("/srv/devstack/data/postgres/main"))
        );
        assert_eq!(
            paths.pid_file,
            Some(PathBuf::from("/srv/devstack/data/postgres/main/postmaster.pid"))
        );
        assert_eq!(
            paths.bundle_root,
            PathBuf::from("/srv/devstack/bundles/postgres/16.2")
        );
    }

    #[test]
    fn multi_instance_without_id_is_an_error() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let err = catalog.resolve("redis", "7.2.4", None).unwrap_err();
        assert!(matches!(err, Error::MissingInstanceId { ref service } if service == "redis"));
    }

    #[test]
    fn single_instance_ignores_instance_id() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let with = catalog.resolve("nginx", "1.25.3", Some("x")).unwrap();
        let without = catalog.resolve("nginx", "1.25.3", None).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn traversing_ids_are_rejected() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        for id in ["..", ".", "", "a/b", "../main"] {
            let err = catalog.resolve("postgres", "16.2", Some(id)).unwrap_err();
            assert!(
                matches!(err, Error::InvalidComponent { kind: "instance id", .. }),
                "{:?} accepted: {}",
                id,
                err
            );
        }
        for version in ["../../etc", "..", "", "8.3/4"] {
            let err = catalog.resolve("php", version, None).unwrap_err();
            assert!(
                matches!(err, Error::InvalidComponent { kind: "version", .. }),
                "{:?} accepted: {}",
                version,
                err
            );
        }
    }

    #[test]
    fn dotted_versions_are_accepted() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let paths = catalog.resolve("postgres", "16.2", Some("main.2")).unwrap();
        assert_eq!(
            paths.data_dir,
            Some(PathBuf::from("/srv/devstack/data/postgres/main.2"))
        );
    }

    #[test]
    fn all_paths_are_absolute() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let paths = catalog.resolve("mysql", "8.4.0", Some("a1")).unwrap();
        for p in [
            &paths.bundle_root,
            &paths.binary,
            &paths.active_root,
            &paths.mods_available,
            &paths.run_dir,
        ] {
            assert!(p.is_absolute(), "{} is relative", p.display());
        }
    }
}
