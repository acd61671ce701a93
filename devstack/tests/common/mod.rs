//! Shared test utilities for devstack controller tests.

#![allow(dead_code)]

use devstack::Controller;
use devstack_core::Settings;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A foreground daemon stand-in
const DAEMON: &str = "#!/bin/sh\nexec sleep 30\n";

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

    pub fn settings(&self) -> Settings {
        Settings {
            root: self.root().to_path_buf(),
            stop_timeout_secs: 5,
            ..Settings::default()
        }
    }

    pub fn controller(&self) -> Controller {
        Controller::new(self.settings()).expect("Failed to create controller")
    }

    pub fn write_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create dir");
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn write_executable(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.write_file(rel, content);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to set permissions");
        path
    }

    pub fn create_nginx_bundle(&self, version: &str) {
        let bundle = format!("bundles/nginx/{}", version);
        self.write_file(
            &format!("{}/nginx.conf", bundle),
            "pid /build/nginx.pid;\nhttp {\n  include ${PREFIX}/conf.d/*.conf;\n}\n",
        );
        self.write_file(&format!("{}/mime.types", bundle), "types {}\n");
        self.write_executable(&format!("{}/sbin/nginx", bundle), DAEMON);
    }

    pub fn create_php_bundle(&self, version: &str) {
        let bundle = format!("bundles/php/{}", version);
        for template in ["cli/php.ini", "fpm/php.ini"] {
            self.write_file(&format!("{}/{}", bundle, template), "memory_limit = 128M\n");
        }
        self.write_file(&format!("{}/fpm/php-fpm.conf", bundle), "[global]\n");
        self.write_file(&format!("{}/fpm/pool.d/www.conf", bundle), "[www]\nuser = ${USER}\n");
        self.write_file(
            &format!("{}/mods-available/opcache.ini", bundle),
            "zend_extension=opcache.so\n",
        );
        for ext in ["opcache.so", "xdebug.so"] {
            self.write_file(&format!("{}/lib/php/extensions/{}", bundle, ext), "");
        }
        self.write_executable(&format!("{}/sbin/php-fpm", bundle), DAEMON);
        self.write_executable(&format!("{}/bin/php", bundle), "#!/bin/sh\n");
    }

    pub fn create_redis_bundle(&self, version: &str) {
        let bundle = format!("bundles/redis/{}", version);
        self.write_file(&format!("{}/redis.conf", bundle), "port 6379\n");
        self.write_executable(&format!("{}/bin/redis-server", bundle), DAEMON);
    }
}
