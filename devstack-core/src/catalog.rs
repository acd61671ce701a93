//! Static service catalog.
//!
//! Every manageable service type is a [`ServiceDefinition`]. Behavior that
//! differs between daemons (stop signal, SAPIs, injected directives, launch
//! command) hangs off [`ServiceFamily`], so adding a service means adding a
//! family variant rather than string-keyed branches.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result, ServiceIdentity};
use crate::paths::{PathSet, resolve_paths, validate_component};
use crate::template::{PathTemplate, Placeholder, TemplateVars};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Runtime,
    WebServer,
    Database,
    Cache,
    ObjectStorage,
}

/// Graceful shutdown signal a daemon expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGQUIT: graceful stop for FPM pools and nginx
    Quit,
    /// SIGINT: PostgreSQL "fast" shutdown
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// A runtime variant with its own ini file and scan directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sapi {
    pub name: &'static str,
    /// Config file relative to the bundle and active roots
    pub config_file: &'static str,
}

impl Sapi {
    /// Scan directory relative to the bundle and active roots.
    pub fn scan_dir(&self) -> PathBuf {
        Path::new(self.name).join("conf.d")
    }
}

const PHP_SAPIS: &[Sapi] = &[
    Sapi {
        name: "cli",
        config_file: "cli/php.ini",
    },
    Sapi {
        name: "fpm",
        config_file: "fpm/php.ini",
    },
];

/// A line that must be present exactly once in an active config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// File relative to the active root
    pub file: PathBuf,
    /// Lines whose first token is this key are replaced
    pub key: String,
    pub line: String,
}

impl Directive {
    fn new(file: &str, key: &str, line: String) -> Self {
        Self {
            file: PathBuf::from(file),
            key: key.to_string(),
            line,
        }
    }
}

/// A directory in the active root that is a symlink into the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedLink {
    /// Relative to the active root
    pub link: &'static str,
    /// Relative to the bundle root
    pub target: &'static str,
}

/// A program to run, with everything the supervisor needs to launch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    fn env(mut self, key: &str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        self.env
            .push((key.to_string(), value.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// argv as a single vector, program first
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFamily {
    Php,
    Nginx,
    Mysql,
    Postgres,
    Redis,
    Minio,
    Node,
    /// No family-specific behavior; templates are still materialized
    Generic,
}

impl ServiceFamily {
    pub fn stop_signal(self) -> StopSignal {
        match self {
            ServiceFamily::Php | ServiceFamily::Nginx => StopSignal::Quit,
            ServiceFamily::Postgres => StopSignal::Interrupt,
            _ => StopSignal::Terminate,
        }
    }

    pub fn sapis(self) -> &'static [Sapi] {
        match self {
            ServiceFamily::Php => PHP_SAPIS,
            _ => &[],
        }
    }

    /// Extra directories created in the active skeleton.
    pub fn runtime_dirs(self) -> &'static [&'static str] {
        match self {
            ServiceFamily::Php => &["var/sessions", "fpm/pool.d"],
            ServiceFamily::Nginx => &["conf.d", "logs", "var/tmp"],
            ServiceFamily::Mysql => &["var/tmp"],
            ServiceFamily::Node => &["etc", "lib/node_modules"],
            _ => &[],
        }
    }

    pub fn shared_links(self) -> &'static [SharedLink] {
        match self {
            ServiceFamily::Php => &[
                SharedLink {
                    link: "extensions",
                    target: "lib/php/extensions",
                },
                SharedLink {
                    link: "lib",
                    target: "lib",
                },
            ],
            ServiceFamily::Mysql => &[SharedLink {
                link: "share",
                target: "share",
            }],
            _ => &[],
        }
    }

    /// Directives that depend on absolute paths and cannot live in a template.
    pub fn directives(self, paths: &PathSet) -> Vec<Directive> {
        let active = paths.active_root.display();
        let pid = paths.pid_file.as_deref().map(|p| p.display().to_string());
        let log = paths.log_file.as_deref().map(|p| p.display().to_string());

        let mut out = Vec::new();
        match self {
            ServiceFamily::Php => {
                for sapi in PHP_SAPIS {
                    out.push(Directive::new(
                        sapi.config_file,
                        "extension_dir",
                        format!("extension_dir = \"{}/extensions\"", active),
                    ));
                }
                if let Some(pid) = pid {
                    out.push(Directive::new(
                        "fpm/php-fpm.conf",
                        "pid",
                        format!("pid = {}", pid),
                    ));
                }
                if let Some(log) = log {
                    out.push(Directive::new(
                        "fpm/php-fpm.conf",
                        "error_log",
                        format!("error_log = {}", log),
                    ));
                }
                // Globals must precede the include: the pool file's section
                // header stays current after it.
                out.push(Directive::new(
                    "fpm/php-fpm.conf",
                    "include",
                    format!("include = {}/fpm/pool.d/*.conf", active),
                ));
            }
            ServiceFamily::Nginx => {
                if let Some(pid) = pid {
                    out.push(Directive::new("nginx.conf", "pid", format!("pid {};", pid)));
                }
            }
            ServiceFamily::Redis => {
                if let Some(pid) = pid {
                    out.push(Directive::new(
                        "redis.conf",
                        "pidfile",
                        format!("pidfile {}", pid),
                    ));
                }
                if let Some(socket_dir) = &paths.socket_dir {
                    out.push(Directive::new(
                        "redis.conf",
                        "unixsocket",
                        format!("unixsocket {}/redis.sock", socket_dir.display()),
                    ));
                }
            }
            ServiceFamily::Postgres => {
                if let Some(socket_dir) = &paths.socket_dir {
                    out.push(Directive::new(
                        "postgresql.conf",
                        "unix_socket_directories",
                        format!("unix_socket_directories = '{}'", socket_dir.display()),
                    ));
                }
                out.push(Directive::new(
                    "postgresql.conf",
                    "hba_file",
                    format!("hba_file = '{}/pg_hba.conf'", active),
                ));
            }
            ServiceFamily::Node => {
                out.push(Directive::new(
                    "etc/npmrc",
                    "prefix",
                    format!("prefix={}", active),
                ));
            }
            ServiceFamily::Mysql | ServiceFamily::Minio | ServiceFamily::Generic => {}
        }
        out
    }

    /// Command that runs the daemon in the foreground, if the family has one.
    pub fn start_command(self, paths: &PathSet, port: Option<u16>) -> Option<LaunchCommand> {
        let bundle = &paths.bundle_root;
        let active = &paths.active_root;
        let data = paths.data_dir.as_deref();

        match self {
            ServiceFamily::Php => {
                let fpm = paths.sapis.iter().find(|s| s.name == "fpm")?;
                Some(
                    LaunchCommand::new(bundle.join("sbin/php-fpm"))
                        .arg("--nodaemonize")
                        .arg("--fpm-config")
                        .arg(active.join("fpm/php-fpm.conf"))
                        .arg("-c")
                        .arg(&fpm.config_file)
                        .env("PHP_INI_SCAN_DIR", &fpm.scan_dir),
                )
            }
            ServiceFamily::Nginx => Some(
                LaunchCommand::new(bundle.join("sbin/nginx"))
                    .arg("-p")
                    .arg(active)
                    .arg("-c")
                    .arg(active.join("nginx.conf"))
                    .arg("-g")
                    .arg("daemon off;"),
            ),
            ServiceFamily::Mysql => {
                let mut cmd = LaunchCommand::new(bundle.join("bin/mysqld"))
                    .arg(format!("--defaults-file={}", active.join("my.cnf").display()))
                    .arg(format!("--basedir={}", bundle.display()))
                    .arg(format!("--datadir={}", data?.display()));
                if let Some(port) = port {
                    cmd = cmd.arg(format!("--port={}", port));
                }
                if let Some(socket_dir) = &paths.socket_dir {
                    cmd = cmd.arg(format!(
                        "--socket={}",
                        socket_dir.join("mysqld.sock").display()
                    ));
                }
                if let Some(pid) = &paths.pid_file {
                    cmd = cmd.arg(format!("--pid-file={}", pid.display()));
                }
                Some(cmd)
            }
            ServiceFamily::Postgres => {
                let mut cmd = LaunchCommand::new(bundle.join("bin/postgres"))
                    .arg("-D")
                    .arg(data?)
                    .arg("-c")
                    .arg(format!(
                        "config_file={}",
                        active.join("postgresql.conf").display()
                    ));
                if let Some(port) = port {
                    cmd = cmd.arg("-p").arg(port.to_string());
                }
                Some(cmd)
            }
            ServiceFamily::Redis => {
                let mut cmd = LaunchCommand::new(bundle.join("bin/redis-server"))
                    .arg(active.join("redis.conf"))
                    .arg("--daemonize")
                    .arg("no")
                    .arg("--dir")
                    .arg(data?);
                if let Some(port) = port {
                    cmd = cmd.arg("--port").arg(port.to_string());
                }
                Some(cmd)
            }
            ServiceFamily::Minio => {
                let port = port.unwrap_or(9000);
                Some(
                    LaunchCommand::new(bundle.join("bin/minio"))
                        .arg("server")
                        .arg(data?)
                        .arg("--address")
                        .arg(format!("127.0.0.1:{}", port))
                        .arg("--console-address")
                        .arg(format!("127.0.0.1:{}", port.saturating_add(1))),
                )
            }
            ServiceFamily::Node | ServiceFamily::Generic => None,
        }
    }

    /// One-shot command that initializes an empty data directory.
    pub fn init_command(self, paths: &PathSet) -> Option<LaunchCommand> {
        let bundle = &paths.bundle_root;
        let data = paths.data_dir.as_deref()?;
        match self {
            ServiceFamily::Postgres => Some(
                LaunchCommand::new(bundle.join("bin/initdb"))
                    .arg("-D")
                    .arg(data)
                    .arg("--username=postgres")
                    .arg("--auth=trust")
                    .arg("--encoding=UTF8"),
            ),
            ServiceFamily::Mysql => Some(
                LaunchCommand::new(bundle.join("bin/mysqld"))
                    .arg("--no-defaults")
                    .arg("--initialize-insecure")
                    .arg(format!("--basedir={}", bundle.display()))
                    .arg(format!("--datadir={}", data.display())),
            ),
            _ => None,
        }
    }
}

/// A bundled template copied into the active root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    /// Relative to the bundle root
    pub source: PathBuf,
    /// Relative to the active root
    pub target: PathBuf,
}

impl TemplateFile {
    /// Template copied to the same relative location.
    pub fn same(path: &str) -> Self {
        Self {
            source: PathBuf::from(path),
            target: PathBuf::from(path),
        }
    }
}

/// How to ask a bundled binary for its version.
#[derive(Debug, Clone)]
pub struct VersionProbe {
    pub args: Vec<String>,
    /// First capture group is the version
    pub pattern: String,
}

impl VersionProbe {
    fn new(args: &[&str], pattern: &str) -> Self {
        Self {
            args: args.iter().map(|a| a.to_string()).collect(),
            pattern: pattern.to_string(),
        }
    }

    pub fn run(&self, binary: &Path, identity: &ServiceIdentity) -> Result<String> {
        let regex = Regex::new(&self.pattern).map_err(|e| Error::VersionProbe {
            identity: identity.clone(),
            reason: format!("invalid pattern '{}': {}", self.pattern, e),
        })?;

        let output = std::process::Command::new(binary)
            .args(&self.args)
            .output()
            .map_err(|e| Error::io(identity, binary, e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        regex
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| Error::VersionProbe {
                identity: identity.clone(),
                reason: format!("no match for '{}' in output of {}", self.pattern, binary.display()),
            })
    }
}

/// One manageable service type.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub type_id: String,
    pub display_name: String,
    pub category: Category,
    pub family: ServiceFamily,
    pub default_port: Option<u16>,
    pub is_multi_instance: bool,
    pub process_id: Option<PathTemplate>,
    /// Directory holding one bundle per version
    pub bundles_dir: PathTemplate,
    /// Binary relative to the bundle root
    pub binary: PathBuf,
    pub active_root: PathTemplate,
    pub log_file: Option<PathTemplate>,
    pub pid_file: Option<PathTemplate>,
    pub data_dir: Option<PathTemplate>,
    pub socket_dir: Option<PathTemplate>,
    pub templates: Vec<TemplateFile>,
    pub version_probe: Option<VersionProbe>,
}

impl ServiceDefinition {
    /// Check the single/multi-instance template invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidDefinition {
            service: self.type_id.clone(),
            reason,
        };

        if self.bundles_dir.uses(Placeholder::VersionFull)
            || self.bundles_dir.uses(Placeholder::InstanceId)
        {
            return Err(invalid(format!(
                "bundles_dir '{}' may only reference {{root}}",
                self.bundles_dir
            )));
        }

        let scoped: [(&str, Option<&PathTemplate>); 5] = [
            ("active_root", Some(&self.active_root)),
            ("data_dir", self.data_dir.as_ref()),
            ("log_file", self.log_file.as_ref()),
            ("pid_file", self.pid_file.as_ref()),
            ("process_id", self.process_id.as_ref()),
        ];

        if self.is_multi_instance {
            for (field, template) in scoped {
                match template {
                    Some(t) if t.uses(Placeholder::InstanceId) => {}
                    Some(t) => {
                        return Err(invalid(format!(
                            "{} '{}' must reference {{instance_id}}",
                            field, t
                        )));
                    }
                    None => return Err(invalid(format!("{} is required", field))),
                }
            }
        } else {
            let all = scoped
                .into_iter()
                .chain([("socket_dir", self.socket_dir.as_ref())]);
            for (field, template) in all {
                if let Some(t) = template
                    && t.uses(Placeholder::InstanceId)
                {
                    return Err(invalid(format!(
                        "{} '{}' references {{instance_id}} on a single-instance service",
                        field, t
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Compare dotted version strings numerically where possible.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Catalog of service definitions rooted at one devstack data directory.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    services: BTreeMap<String, ServiceDefinition>,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>, definitions: Vec<ServiceDefinition>) -> Result<Self> {
        let mut services = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            if services.contains_key(&def.type_id) {
                return Err(Error::InvalidDefinition {
                    service: def.type_id.clone(),
                    reason: "duplicate type id".to_string(),
                });
            }
            services.insert(def.type_id.clone(), def);
        }
        Ok(Self {
            root: root.into(),
            services,
        })
    }

    /// The catalog shipped with devstack.
    pub fn builtin(root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(root, builtin_definitions()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, type_id: &str) -> Result<&ServiceDefinition> {
        self.services
            .get(type_id)
            .ok_or_else(|| Error::UnknownService(type_id.to_string()))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    pub fn resolve(
        &self,
        type_id: &str,
        version: &str,
        instance_id: Option<&str>,
    ) -> Result<PathSet> {
        resolve_paths(self.get(type_id)?, &self.root, version, instance_id)
    }

    /// Versions with a bundle directory on disk, oldest first.
    pub fn installed_versions(&self, type_id: &str) -> Result<Vec<String>> {
        let def = self.get(type_id)?;
        let identity = ServiceIdentity::new(type_id, "*", None);
        let dir = def
            .bundles_dir
            .render_path(&TemplateVars::new().root(&self.root))
            .map_err(|source| Error::Template {
                identity: identity.clone(),
                source,
            })?;

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No bundles directory at {}", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::io(&identity, &dir, e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&identity, &dir, e))?;
            if entry.path().is_dir() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort_by(|a, b| version_cmp(a, b));
        Ok(versions)
    }

    pub fn latest_version(&self, type_id: &str) -> Result<Option<String>> {
        Ok(self.installed_versions(type_id)?.pop())
    }

    /// Run the definition's version probe against an installed bundle.
    pub fn probe_version(&self, type_id: &str, version: &str) -> Result<Option<String>> {
        let def = self.get(type_id)?;
        let Some(probe) = &def.version_probe else {
            return Ok(None);
        };
        validate_component(type_id, "version", version)?;
        let identity = ServiceIdentity::new(type_id, version, None);
        let bundles_dir = def
            .bundles_dir
            .render_path(&TemplateVars::new().root(&self.root))
            .map_err(|source| Error::Template {
                identity: identity.clone(),
                source,
            })?;
        let binary = bundles_dir.join(version).join(&def.binary);
        probe.run(&binary, &identity).map(Some)
    }
}

fn builtin_definitions() -> Result<Vec<ServiceDefinition>> {
    fn tpl(service: &str, raw: &str) -> Result<PathTemplate> {
        PathTemplate::parse(raw).map_err(|e| Error::InvalidDefinition {
            service: service.to_string(),
            reason: e.to_string(),
        })
    }

    fn versioned(
        type_id: &str,
        display_name: &str,
        category: Category,
        family: ServiceFamily,
        binary: &str,
        process: Option<(&str, &str, &str)>,
        templates: &[&str],
    ) -> Result<ServiceDefinition> {
        let active = format!("{{root}}/config/{}/{{version_full}}", type_id);
        let (process_id, pid_file, log_file) = match process {
            Some((id, pid, log)) => (
                Some(tpl(type_id, id)?),
                Some(tpl(type_id, pid)?),
                Some(tpl(type_id, log)?),
            ),
            None => (None, None, None),
        };
        Ok(ServiceDefinition {
            type_id: type_id.to_string(),
            display_name: display_name.to_string(),
            category,
            family,
            default_port: None,
            is_multi_instance: false,
            process_id,
            bundles_dir: tpl(type_id, &format!("{{root}}/bundles/{}", type_id))?,
            binary: PathBuf::from(binary),
            active_root: tpl(type_id, &active)?,
            log_file,
            pid_file,
            data_dir: None,
            socket_dir: Some(tpl(type_id, &format!("{}/var/run", active))?),
            templates: templates.iter().map(|t| TemplateFile::same(t)).collect(),
            version_probe: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn instanced(
        type_id: &str,
        display_name: &str,
        category: Category,
        family: ServiceFamily,
        binary: &str,
        port: u16,
        pid_file: &str,
        templates: &[&str],
    ) -> Result<ServiceDefinition> {
        let active = format!("{{root}}/config/{}/{{instance_id}}", type_id);
        Ok(ServiceDefinition {
            type_id: type_id.to_string(),
            display_name: display_name.to_string(),
            category,
            family,
            default_port: Some(port),
            is_multi_instance: true,
            process_id: Some(tpl(type_id, &format!("{}-{{instance_id}}", type_id))?),
            bundles_dir: tpl(type_id, &format!("{{root}}/bundles/{}", type_id))?,
            binary: PathBuf::from(binary),
            active_root: tpl(type_id, &active)?,
            log_file: Some(tpl(type_id, &format!("{}/var/log/{}.log", active, type_id))?),
            pid_file: Some(tpl(type_id, pid_file)?),
            data_dir: Some(tpl(
                type_id,
                &format!("{{root}}/data/{}/{{instance_id}}", type_id),
            )?),
            socket_dir: Some(tpl(type_id, &format!("{}/var/run", active))?),
            templates: templates.iter().map(|t| TemplateFile::same(t)).collect(),
            version_probe: None,
        })
    }

    let mut php = versioned(
        "php",
        "PHP",
        Category::Runtime,
        ServiceFamily::Php,
        "bin/php",
        Some((
            "php-fpm-{version_full}",
            "{root}/config/php/{version_full}/var/run/php-fpm.pid",
            "{root}/config/php/{version_full}/var/log/php-fpm.log",
        )),
        &[
            "cli/php.ini",
            "fpm/php.ini",
            "fpm/php-fpm.conf",
            "fpm/pool.d/www.conf",
        ],
    )?;
    php.version_probe = Some(VersionProbe::new(
        &["-r", "echo PHP_VERSION;"],
        r"(\d+\.\d+\.\d+)",
    ));

    let mut nginx = versioned(
        "nginx",
        "Nginx",
        Category::WebServer,
        ServiceFamily::Nginx,
        "sbin/nginx",
        Some(("nginx", "{root}/run/nginx.pid", "{root}/logs/nginx.log")),
        &["nginx.conf", "mime.types"],
    )?;
    nginx.default_port = Some(80);
    nginx.version_probe = Some(VersionProbe::new(&["-v"], r"nginx/(\d+\.\d+\.\d+)"));

    let mut node = versioned(
        "node",
        "Node.js",
        Category::Runtime,
        ServiceFamily::Node,
        "bin/node",
        None,
        &["etc/npmrc"],
    )?;
    node.version_probe = Some(VersionProbe::new(&["--version"], r"v(\d+\.\d+\.\d+)"));

    let mut mysql = instanced(
        "mysql",
        "MySQL",
        Category::Database,
        ServiceFamily::Mysql,
        "bin/mysqld",
        3306,
        "{root}/config/mysql/{instance_id}/var/run/mysqld.pid",
        &["my.cnf"],
    )?;
    mysql.version_probe = Some(VersionProbe::new(&["--version"], r"Ver (\d+\.\d+\.\d+)"));

    let mut postgres = instanced(
        "postgres",
        "PostgreSQL",
        Category::Database,
        ServiceFamily::Postgres,
        "bin/postgres",
        5432,
        "{root}/data/postgres/{instance_id}/postmaster.pid",
        &["postgresql.conf", "pg_hba.conf"],
    )?;
    postgres.version_probe = Some(VersionProbe::new(&["--version"], r"(\d+\.\d+)"));

    let mut redis = instanced(
        "redis",
        "Redis",
        Category::Cache,
        ServiceFamily::Redis,
        "bin/redis-server",
        6379,
        "{root}/config/redis/{instance_id}/var/run/redis.pid",
        &["redis.conf"],
    )?;
    redis.version_probe = Some(VersionProbe::new(&["--version"], r"v=(\d+\.\d+\.\d+)"));

    let minio = instanced(
        "minio",
        "MinIO",
        Category::ObjectStorage,
        ServiceFamily::Minio,
        "bin/minio",
        9000,
        "{root}/config/minio/{instance_id}/var/run/minio.pid",
        &[],
    )?;

    Ok(vec![php, nginx, node, mysql, postgres, redis, minio])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        for id in ["php", "nginx", "node", "mysql", "postgres", "redis", "minio"] {
            assert!(catalog.get(id).is_ok(), "missing {}", id);
        }
        assert!(matches!(
            catalog.get("oracle"),
            Err(Error::UnknownService(ref s)) if s == "oracle"
        ));
    }

    #[test]
    fn multi_instance_requires_instance_scoped_templates() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let mut def = catalog.get("redis").unwrap().clone();
        def.log_file = Some(PathTemplate::parse("{root}/logs/redis.log").unwrap());
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("log_file"), "{}", err);
    }

    #[test]
    fn single_instance_rejects_instance_placeholder() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let mut def = catalog.get("nginx").unwrap().clone();
        def.pid_file = Some(PathTemplate::parse("{root}/run/{instance_id}.pid").unwrap());
        assert!(def.validate().is_err());
    }

    #[test]
    fn signal_policy_by_family() {
        assert_eq!(ServiceFamily::Php.stop_signal(), StopSignal::Quit);
        assert_eq!(ServiceFamily::Nginx.stop_signal(), StopSignal::Quit);
        assert_eq!(ServiceFamily::Postgres.stop_signal(), StopSignal::Interrupt);
        assert_eq!(ServiceFamily::Redis.stop_signal(), StopSignal::Terminate);
        assert_eq!(ServiceFamily::Mysql.stop_signal(), StopSignal::Terminate);
    }

    #[test]
    fn installed_versions_are_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for v in ["8.10.0", "8.3.4", "7.4.33"] {
            std::fs::create_dir_all(dir.path().join("bundles/php").join(v)).unwrap();
        }
        let catalog = Catalog::builtin(dir.path()).unwrap();
        assert_eq!(
            catalog.installed_versions("php").unwrap(),
            vec!["7.4.33", "8.3.4", "8.10.0"]
        );
        assert_eq!(
            catalog.latest_version("php").unwrap().as_deref(),
            Some("8.10.0")
        );
        assert!(catalog.installed_versions("redis").unwrap().is_empty());
    }

    #[test]
    fn php_start_command_uses_active_config() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let paths = catalog.resolve("php", "8.3.4", None).unwrap();
        let cmd = ServiceFamily::Php.start_command(&paths, None).unwrap();
        assert_eq!(
            cmd.program,
            PathBuf::from("/srv/devstack/bundles/php/8.3.4/sbin/php-fpm")
        );
        assert!(cmd.args.contains(&"--nodaemonize".to_string()));
        assert_eq!(
            cmd.env,
            vec![(
                "PHP_INI_SCAN_DIR".to_string(),
                "/srv/devstack/config/php/8.3.4/fpm/conf.d".to_string()
            )]
        );
    }

    #[test]
    fn node_has_no_daemon() {
        let catalog = Catalog::builtin("/srv/devstack").unwrap();
        let paths = catalog.resolve("node", "22.1.0", None).unwrap();
        assert!(ServiceFamily::Node.start_command(&paths, None).is_none());
        assert!(paths.process_id.is_none());
    }
}
