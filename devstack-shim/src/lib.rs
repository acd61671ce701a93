//! Version resolution for interactive runtime commands.
//!
//! `devstack resolve` maps a working directory to the runtime version its
//! site wants and prints the three-line [`Reply`]. The `devstack-shim`
//! binary, installed under the names of the runtime commands, asks for that
//! reply and execs the bundled binary, or the system one when the directory
//! is not part of a site.

pub mod error;
pub mod exec;
pub mod protocol;
pub mod resolve;
pub mod runtime;

pub use error::ShimError;
pub use exec::{ExecPlan, Invocation, run, strip_shim_dirs, system_binary};
pub use protocol::{Reply, Resolution, Resolved};
pub use resolve::resolve;
pub use runtime::{Runtime, library_path_env};
