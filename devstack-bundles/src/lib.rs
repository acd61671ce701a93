//! Active configuration materialization.
//!
//! Bundles are immutable; everything a running service or an interactive
//! shell reads is materialized from them into `config/<service>/<version or
//! instance>` by [`ensure_active_config`]. Module toggles on top of that tree
//! go through [`ModuleActivation`].

pub mod materialize;
pub mod modules;

pub use materialize::{MARKER_FILE, apply_directives, ensure_active_config};
pub use modules::{ModuleActivation, ModuleState};
