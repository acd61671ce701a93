use devstack_shim::{Invocation, ShimError};
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "DEVSTACK_SHIM_DEBUG";

fn main() {
    // stdout belongs to the wrapped command
    let debug_output = std::env::var_os(DEBUG_ENV).is_some_and(|v| !v.is_empty());
    if debug_output {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_writer(std::io::stderr)
            .without_time()
            .init();
    }

    let error = match Invocation::from_args(std::env::args_os()) {
        Ok(invocation) => match std::env::current_dir() {
            Ok(cwd) => devstack_shim::run(&invocation, &cwd, debug_output),
            Err(source) => ShimError::Exec {
                program: invocation.command.into(),
                source,
            },
        },
        Err(e) => e,
    };

    eprintln!("devstack-shim: {}", error);
    std::process::exit(error.exit_code());
}
