//! Builds the mutable active configuration of a bundle version or instance.

use devstack_core::catalog::{Directive, ServiceDefinition};
use devstack_core::{
    Error, PREFIX_PLACEHOLDER, PathSet, Result, ServiceIdentity, USER_PLACEHOLDER, resolve_paths,
};
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Written once the first materialization of a tree completed. Default module
/// activations are only replicated before it exists, so modules disabled by
/// the user stay disabled on later runs.
pub const MARKER_FILE: &str = ".devstack-active";

/// Make sure the active configuration of `version` (and `instance_id` for
/// multi-instance services) exists and is current.
///
/// Every step is idempotent: running it twice leaves byte-identical files.
/// Concurrent callers for the same tree are serialized by a file lock. On
/// error the partially written tree is left in place and the next call
/// continues from where this one stopped.
pub fn ensure_active_config(
    def: &ServiceDefinition,
    root: &Path,
    version: &str,
    instance_id: Option<&str>,
    force_recreate: bool,
) -> Result<PathSet> {
    let paths = resolve_paths(def, root, version, instance_id)?;
    let id = &paths.identity;

    if !paths.bundle_root.is_dir() {
        return Err(Error::BundleNotFound {
            identity: id.clone(),
            path: paths.bundle_root.clone(),
        });
    }

    let lock_path = lock_file(&paths);
    if let Some(parent) = lock_path.parent() {
        create_dir(id, parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| Error::io(id, &lock_path, e))?;
    let mut lock = fd_lock::RwLock::new(file);
    let _guard = lock.write().map_err(|e| Error::io(id, &lock_path, e))?;

    if force_recreate && paths.active_root.exists() {
        info!(
            "Recreating active configuration for {} at {}",
            id,
            paths.active_root.display()
        );
        std::fs::remove_dir_all(&paths.active_root)
            .map_err(|e| Error::io(id, &paths.active_root, e))?;
    }

    create_skeleton(def, &paths)?;
    copy_templates(def, &paths)?;
    inject_directives(&def.family.directives(&paths), &paths)?;
    link_shared_resources(def, &paths)?;
    populate_modules(&paths)?;

    let marker = paths.active_root.join(MARKER_FILE);
    if !marker.exists() {
        replicate_default_activations(&paths)?;
        std::fs::write(&marker, format!("{}\n", id)).map_err(|e| Error::io(id, &marker, e))?;
    }

    debug!("Active configuration for {} is current", id);
    Ok(paths)
}

/// Lock serializing materializations of one active tree. It sits next to
/// the tree so a forced recreate does not delete it.
fn lock_file(paths: &PathSet) -> PathBuf {
    let name = paths
        .active_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    paths.active_root.with_file_name(format!(".{}.lock", name))
}

fn create_dir(id: &ServiceIdentity, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(id, dir, e))
}

fn create_skeleton(def: &ServiceDefinition, paths: &PathSet) -> Result<()> {
    let id = &paths.identity;
    if !paths.active_root.exists() {
        debug!("Creating active skeleton at {}", paths.active_root.display());
    }

    let mut dirs: Vec<PathBuf> = vec![
        paths.active_root.clone(),
        paths.mods_available.clone(),
        paths.run_dir.clone(),
        paths.log_dir.clone(),
    ];
    for sapi in &paths.sapis {
        dirs.push(sapi.scan_dir.clone());
        if let Some(parent) = sapi.config_file.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs.extend(
        def.family
            .runtime_dirs()
            .iter()
            .map(|d| paths.active_root.join(d)),
    );
    for file in [&paths.log_file, &paths.pid_file].into_iter().flatten() {
        if let Some(parent) = file.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs.extend(paths.data_dir.iter().cloned());
    dirs.extend(paths.socket_dir.iter().cloned());

    for dir in &dirs {
        create_dir(id, dir)?;
    }
    Ok(())
}

fn copy_templates(def: &ServiceDefinition, paths: &PathSet) -> Result<()> {
    let id = &paths.identity;
    let user = whoami::username().map_err(|e| Error::io(id, &paths.active_root, e.into()))?;
    let prefix = paths.active_root.display().to_string();

    for template in &def.templates {
        let source = paths.bundle_root.join(&template.source);
        let target = paths.active_root.join(&template.target);

        if !target.exists() {
            if !source.is_file() {
                return Err(Error::TemplateMissing {
                    identity: id.clone(),
                    path: source,
                });
            }
            if let Some(parent) = target.parent() {
                create_dir(id, parent)?;
            }
            std::fs::copy(&source, &target).map_err(|e| Error::io(id, &target, e))?;
            debug!("Copied {} to {}", source.display(), target.display());
        }

        substitute_placeholders(id, &target, &prefix, &user)?;
    }
    Ok(())
}

/// Replace the prefix and user placeholders in `file`, writing only when
/// something changed.
pub fn substitute_placeholders(
    id: &ServiceIdentity,
    file: &Path,
    prefix: &str,
    user: &str,
) -> Result<()> {
    let content = std::fs::read_to_string(file).map_err(|e| Error::io(id, file, e))?;
    if !content.contains(PREFIX_PLACEHOLDER) && !content.contains(USER_PLACEHOLDER) {
        return Ok(());
    }
    let replaced = content
        .replace(PREFIX_PLACEHOLDER, prefix)
        .replace(USER_PLACEHOLDER, user);
    std::fs::write(file, replaced).map_err(|e| Error::io(id, file, e))
}

/// Whether `line` sets `key`, as `key value`, `key=value` or `key = value`.
fn sets_key(line: &str, key: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix(key) else {
        return false;
    };
    rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '=')
}

fn is_section_header(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('[') && line.ends_with(']')
}

/// Remove every line setting one of the directives' keys and write the
/// canonical lines in order at the end of the first `[section]`, or at the
/// end of the file when it has at most one section. Directives for one file
/// must be applied together so that a second run reproduces the same ordering.
pub fn apply_directives(content: &str, directives: &[&Directive]) -> String {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !directives.iter().any(|d| sets_key(line, &d.key)))
        .collect();

    let insert_at = kept
        .iter()
        .position(|line| is_section_header(line))
        .and_then(|first| {
            kept.iter()
                .skip(first + 1)
                .position(|line| is_section_header(line))
                .map(|offset| first + 1 + offset)
        })
        .unwrap_or(kept.len());

    let mut out = String::with_capacity(content.len());
    for line in &kept[..insert_at] {
        out.push_str(line);
        out.push('\n');
    }
    for directive in directives {
        out.push_str(&directive.line);
        out.push('\n');
    }
    for line in &kept[insert_at..] {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn inject_directives(directives: &[Directive], paths: &PathSet) -> Result<()> {
    let id = &paths.identity;
    let mut by_file: Vec<(&Path, Vec<&Directive>)> = Vec::new();
    for directive in directives {
        match by_file
            .iter_mut()
            .find(|(file, _)| *file == directive.file.as_path())
        {
            Some((_, group)) => group.push(directive),
            None => by_file.push((directive.file.as_path(), vec![directive])),
        }
    }

    for (rel, group) in by_file {
        let file = paths.active_root.join(rel);
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::io(id, &file, e)),
        };
        let updated = apply_directives(&content, &group);
        if updated != content {
            if let Some(parent) = file.parent() {
                create_dir(id, parent)?;
            }
            std::fs::write(&file, updated).map_err(|e| Error::io(id, &file, e))?;
        }
    }
    Ok(())
}

/// Point `link` at `target`, replacing a symlink that points elsewhere.
/// Returns false when a regular file or directory is in the way. A link
/// created concurrently by another process is checked again.
pub(crate) fn ensure_symlink(id: &ServiceIdentity, link: &Path, target: &Path) -> Result<bool> {
    const ATTEMPTS: usize = 3;
    for _ in 0..ATTEMPTS {
        match std::fs::symlink_metadata(link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let current = std::fs::read_link(link).map_err(|e| Error::io(id, link, e))?;
                if current == target {
                    return Ok(true);
                }
                match std::fs::remove_file(link) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io(id, link, e)),
                }
            }
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(id, link, e)),
        }
        match symlink(target, link) {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} appeared concurrently, checking it again", link.display());
            }
            Err(e) => return Err(Error::io(id, link, e)),
        }
    }
    Err(Error::io(
        id,
        link,
        io::Error::new(io::ErrorKind::AlreadyExists, "link keeps being replaced"),
    ))
}

fn link_shared_resources(def: &ServiceDefinition, paths: &PathSet) -> Result<()> {
    let id = &paths.identity;
    for shared in def.family.shared_links() {
        let target = paths.bundle_root.join(shared.target);
        if !target.exists() {
            debug!("Bundle has no {}, not linking it", target.display());
            continue;
        }
        let link = paths.active_root.join(shared.link);
        if !ensure_symlink(id, &link, &target)? {
            warn!(
                "{} exists and is not a symlink, leaving it in place",
                link.display()
            );
        }
    }
    Ok(())
}

fn populate_modules(paths: &PathSet) -> Result<()> {
    let id = &paths.identity;
    if !paths.bundle_mods_available.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(&paths.bundle_mods_available)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| paths.bundle_mods_available.clone());
            Error::io(id, path, io::Error::other(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let target = paths.mods_available.join(entry.file_name());
        if !target.exists() {
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io(id, &target, e))?;
        }
    }
    Ok(())
}

fn replicate_default_activations(paths: &PathSet) -> Result<()> {
    let id = &paths.identity;
    for sapi in &paths.sapis {
        if !sapi.bundle_scan_dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&sapi.bundle_scan_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::io(id, &sapi.bundle_scan_dir, io::Error::other(e)))?;
            if !entry.path_is_symlink() {
                continue;
            }
            let bundle_target =
                std::fs::read_link(entry.path()).map_err(|e| Error::io(id, entry.path(), e))?;
            let Some(module_file) = bundle_target.file_name() else {
                continue;
            };

            let active_target = paths.mods_available.join(module_file);
            let link = sapi.scan_dir.join(entry.file_name());
            if ensure_symlink(id, &link, &active_target)? {
                debug!(
                    "Activated {} for {} by default",
                    module_file.to_string_lossy(),
                    sapi.name
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn directive(key: &str, line: &str) -> Directive {
        Directive {
            file: PathBuf::from("php.ini"),
            key: key.to_string(),
            line: line.to_string(),
        }
    }

    #[test]
    fn directive_replaces_previous_values() {
        let d = directive("extension_dir", "extension_dir = \"/active/extensions\"");
        let content = "memory_limit = 128M\nextension_dir = \"/bundle/ext\"\n;extension_dir = x\n";
        assert_eq!(
            apply_directives(content, &[&d]),
            "memory_limit = 128M\n;extension_dir = x\nextension_dir = \"/active/extensions\"\n"
        );
    }

    #[test]
    fn directives_are_stable() {
        let pid = directive("pid", "pid = /run/php-fpm.pid");
        let include = directive("include", "include = /active/pool.d/*.conf");
        let once = apply_directives("[global]\ninclude = /old/*\npid = /old\n", &[&pid, &include]);
        assert_eq!(
            once,
            "[global]\npid = /run/php-fpm.pid\ninclude = /active/pool.d/*.conf\n"
        );
        assert_eq!(apply_directives(&once, &[&pid, &include]), once);
    }

    #[test]
    fn directives_stay_in_first_section() {
        let pid = directive("pid", "pid = /run/php-fpm.pid");
        let include = directive("include", "include = /active/pool.d/*.conf");
        let content = "[global]\nlog_level = notice\n\n[www]\nlisten = 9000\npid = /old\n";
        let once = apply_directives(content, &[&pid, &include]);
        assert_eq!(
            once,
            "[global]\nlog_level = notice\n\npid = /run/php-fpm.pid\ninclude = /active/pool.d/*.conf\n[www]\nlisten = 9000\n"
        );
        assert_eq!(apply_directives(&once, &[&pid, &include]), once);
    }

    #[test]
    fn directives_without_sections_are_appended() {
        let pid = directive("pid", "pid /run/nginx.pid;");
        assert_eq!(
            apply_directives("worker_processes 1;\nevents {}\n", &[&pid]),
            "worker_processes 1;\nevents {}\npid /run/nginx.pid;\n"
        );
    }

    #[test]
    fn directive_key_must_be_whole_token() {
        assert!(sets_key("pid = /x", "pid"));
        assert!(sets_key("  pid /x;", "pid"));
        assert!(sets_key("pid=/x", "pid"));
        assert!(!sets_key("pidfile /x", "pid"));
        assert!(!sets_key("# pid /x", "pid"));
    }
}
