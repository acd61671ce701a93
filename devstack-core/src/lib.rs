//! Core types for devstack.
//!
//! The service catalog describes every manageable service family, the
//! path resolver turns a catalog entry plus a version (and, for
//! multi-instance services, an instance id) into absolute paths, and the
//! settings/stores modules load the user-facing configuration consumed by
//! the rest of the workspace.

pub mod catalog;
pub mod error;
pub mod paths;
pub mod settings;
pub mod stores;
pub mod template;

pub use catalog::{
    Catalog, Category, LaunchCommand, ServiceDefinition, ServiceFamily, StopSignal, TemplateFile,
    VersionProbe,
};
pub use error::{Error, Result, ServiceIdentity};
pub use paths::{PathSet, SapiPaths, resolve_paths, validate_component};
pub use settings::Settings;
pub use stores::{InstanceStore, ServiceInstance, Site, SiteRegistry};
pub use template::{PathTemplate, Placeholder, TemplateError, TemplateVars};

/// Placeholder replaced with the absolute active configuration root.
pub const PREFIX_PLACEHOLDER: &str = "${PREFIX}";

/// Placeholder replaced with the current OS user name.
pub const USER_PLACEHOLDER: &str = "${USER}";
