use miette::Diagnostic;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::template::TemplateError;

/// Which service/version/instance an operation concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub service: String,
    pub version: String,
    pub instance_id: Option<String>,
}

impl ServiceIdentity {
    pub fn new(service: &str, version: &str, instance_id: Option<&str>) -> Self {
        Self {
            service: service.to_string(),
            version: version.to_string(),
            instance_id: instance_id.map(str::to_string),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.service, self.version)?;
        if let Some(id) = &self.instance_id {
            write!(f, " (instance {})", id)?;
        }
        Ok(())
    }
}

/// Errors raised while resolving paths and materializing configuration.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("unknown service '{0}'")]
    #[diagnostic(help("run `devstack services` to list the catalog"))]
    UnknownService(String),

    #[error("service '{service}' is multi-instance and requires an instance id")]
    MissingInstanceId { service: String },

    #[error("{identity}: {source}")]
    Template {
        identity: ServiceIdentity,
        #[source]
        source: TemplateError,
    },

    #[error("{service}: invalid {kind} '{value}'")]
    #[diagnostic(help("versions and instance ids are single path components"))]
    InvalidComponent {
        service: String,
        kind: &'static str,
        value: String,
    },

    #[error("invalid catalog entry '{service}': {reason}")]
    InvalidDefinition { service: String, reason: String },

    #[error("{identity}: bundle not found at {}", path.display())]
    #[diagnostic(help("bundles are produced by the bundle build step, install it first"))]
    BundleNotFound {
        identity: ServiceIdentity,
        path: PathBuf,
    },

    #[error("{identity}: bundle is missing template {}", path.display())]
    TemplateMissing {
        identity: ServiceIdentity,
        path: PathBuf,
    },

    #[error("{identity}: active configuration not materialized at {}", path.display())]
    NotMaterialized {
        identity: ServiceIdentity,
        path: PathBuf,
    },

    #[error("{identity}: module '{module}' has no definition in {}", path.display())]
    ModuleNotFound {
        identity: ServiceIdentity,
        module: String,
        path: PathBuf,
    },

    #[error("{identity}: I/O error at {}: {source}", path.display())]
    Io {
        identity: ServiceIdentity,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{identity}: version probe failed: {reason}")]
    VersionProbe {
        identity: ServiceIdentity,
        reason: String,
    },

    #[error("failed to load {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl Error {
    /// Wrap an I/O error with the identity and path it concerned.
    pub fn io(identity: &ServiceIdentity, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            identity: identity.clone(),
            path: path.into(),
            source,
        }
    }

    pub fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display_includes_instance() {
        let id = ServiceIdentity::new("postgres", "16.2", Some("main"));
        assert_eq!(id.to_string(), "postgres 16.2 (instance main)");

        let id = ServiceIdentity::new("php", "8.3.4", None);
        assert_eq!(id.to_string(), "php 8.3.4");
    }

    #[test]
    fn bundle_not_found_names_the_service() {
        let err = Error::BundleNotFound {
            identity: ServiceIdentity::new("php", "7.4.33", None),
            path: PathBuf::from("/srv/bundles/php/7.4.33"),
        };
        assert_eq!(
            err.to_string(),
            "php 7.4.33: bundle not found at /srv/bundles/php/7.4.33"
        );
    }
}
