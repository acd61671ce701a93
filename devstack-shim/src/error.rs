use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ShimError {
    #[error("'{0}' is not a shimmed command")]
    #[diagnostic(help("shims exist for php, php-config, phpize, node, npm, npx and corepack"))]
    UnknownCommand(String),

    #[error("{command}: command not found")]
    NotFound { command: String },

    #[error("failed to execute {}", program.display())]
    Exec {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ShimError {
    /// Exit status a shell would use for the same failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShimError::UnknownCommand(_) | ShimError::NotFound { .. } => 127,
            ShimError::Exec { .. } => 126,
        }
    }
}
