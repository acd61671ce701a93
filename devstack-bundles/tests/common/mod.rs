//! Shared test utilities for devstack-bundles integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use devstack_core::{
    Catalog, Category, PathTemplate, ServiceDefinition, ServiceFamily, TemplateFile,
};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test context with a devstack root in a temp directory
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

    pub fn bundle_root(&self, service: &str, version: &str) -> PathBuf {
        self.root().join("bundles").join(service).join(version)
    }

    /// Write a file into a bundle, creating parent directories
    pub fn write_bundle_file(&self, service: &str, version: &str, rel: &str, content: &str) {
        let path = self.bundle_root(service, version).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create bundle dir");
        std::fs::write(&path, content).expect("Failed to write bundle file");
    }

    /// A php bundle with two SAPIs, three modules and opcache on by default
    pub fn create_php_bundle(&self, version: &str) -> PathBuf {
        let php_ini = "memory_limit = 128M\nextension_dir = \"/build/lib/php/extensions\"\nsession.save_path = \"${PREFIX}/var/sessions\"\n";
        self.write_bundle_file("php", version, "cli/php.ini", php_ini);
        self.write_bundle_file("php", version, "fpm/php.ini", php_ini);
        self.write_bundle_file(
            "php",
            version,
            "fpm/php-fpm.conf",
            "[global]\npid = /build/var/run/php-fpm.pid\ninclude = /build/etc/pool.d/*.conf\n",
        );
        self.write_bundle_file(
            "php",
            version,
            "fpm/pool.d/www.conf",
            "[www]\nuser = ${USER}\nlisten = ${PREFIX}/var/run/php-fpm.sock\n",
        );
        self.write_bundle_file("php", version, "mods-available/opcache.ini", "zend_extension=opcache.so\n");
        self.write_bundle_file("php", version, "mods-available/redis.ini", "extension=redis.so\n");
        self.write_bundle_file("php", version, "mods-available/intl.ini", "extension=intl.so\n");
        for ext in ["opcache.so", "redis.so", "intl.so", "gd.so"] {
            self.write_bundle_file("php", version, &format!("lib/php/extensions/{}", ext), "");
        }
        std::fs::create_dir_all(self.bundle_root("php", version).join("bin")).unwrap();

        let bundle = self.bundle_root("php", version);
        for sapi in ["cli", "fpm"] {
            let scan_dir = bundle.join(sapi).join("conf.d");
            std::fs::create_dir_all(&scan_dir).unwrap();
            symlink("../../mods-available/opcache.ini", scan_dir.join("10-opcache.ini"))
                .expect("Failed to link default module");
        }
        bundle
    }
}

/// A generic single-instance service with one template
pub fn svc_a_definition() -> ServiceDefinition {
    let tpl = |raw: &str| PathTemplate::parse(raw).expect("valid template");
    ServiceDefinition {
        type_id: "svcA".to_string(),
        display_name: "Service A".to_string(),
        category: Category::Runtime,
        family: ServiceFamily::Generic,
        default_port: None,
        is_multi_instance: false,
        process_id: Some(tpl("svcA")),
        bundles_dir: tpl("{root}/bundles/svcA"),
        binary: PathBuf::from("bin/svcA"),
        active_root: tpl("{root}/config/svcA/{version_full}"),
        log_file: Some(tpl("{root}/config/svcA/{version_full}/var/log/svcA.log")),
        pid_file: Some(tpl("{root}/config/svcA/{version_full}/var/run/svcA.pid")),
        data_dir: None,
        socket_dir: None,
        templates: vec![TemplateFile::same("tmpl.conf")],
        version_probe: None,
    }
}

/// Every regular file under `dir` with its contents, sorted by path
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, String)> {
    let mut files: Vec<(PathBuf, String)> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let content = std::fs::read_to_string(e.path()).unwrap_or_default();
            (e.path().strip_prefix(dir).unwrap().to_path_buf(), content)
        })
        .collect();
    files.sort();
    files
}

/// Symlinks under `dir` and their targets, sorted by path
pub fn symlinks(dir: &Path) -> Vec<(PathBuf, PathBuf)> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .map(|e| {
            let target = std::fs::read_link(e.path()).unwrap();
            (e.path().strip_prefix(dir).unwrap().to_path_buf(), target)
        })
        .collect()
}
