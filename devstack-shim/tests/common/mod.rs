//! Shared test utilities for devstack-shim integration tests.

#![allow(dead_code)]

use devstack_core::{Catalog, Site, SiteRegistry};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestContext {
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::builtin(self.root()).expect("Builtin catalog is valid")
    }

    pub fn write_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create dir");
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn create_php_bundle(&self, version: &str) {
        let bundle = format!("bundles/php/{}", version);
        for template in ["cli/php.ini", "fpm/php.ini"] {
            self.write_file(
                &format!("{}/{}", bundle, template),
                "memory_limit = 128M\nsession.save_path = \"${PREFIX}/var/sessions\"\n",
            );
        }
        self.write_file(&format!("{}/fpm/php-fpm.conf", bundle), "[global]\n");
        self.write_file(
            &format!("{}/fpm/pool.d/www.conf", bundle),
            "[www]\nuser = ${USER}\n",
        );
        self.write_file(&format!("{}/bin/php", bundle), "#!/bin/sh\n");
        std::fs::create_dir_all(self.root().join(&bundle).join("lib")).unwrap();
    }

    pub fn create_node_bundle(&self, version: &str) {
        let bundle = format!("bundles/node/{}", version);
        self.write_file(&format!("{}/etc/npmrc", bundle), "prefix=${PREFIX}\n");
        self.write_file(&format!("{}/bin/node", bundle), "#!/bin/sh\n");
    }

    /// A project directory registered as a site
    pub fn site(&self, name: &str, php: Option<&str>, node: Option<&str>) -> Site {
        let path = self.root().join("sites").join(name);
        std::fs::create_dir_all(&path).expect("Failed to create site dir");
        Site {
            path,
            php: php.map(str::to_string),
            node: node.map(str::to_string),
        }
    }
}

pub fn registry(sites: Vec<Site>) -> SiteRegistry {
    SiteRegistry::new(sites)
}

/// A fake executable in `dir`
pub fn executable(dir: &Path, name: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
