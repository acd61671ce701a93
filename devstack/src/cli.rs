use crate::log::{Level, LogFormat};
use clap::{Args, Parser, Subcommand, crate_version};
use devstack_shim::Runtime;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "devstack",
    color = clap::ColorChoice::Auto,
    about = format!("devstack {}: version-isolated local development services", crate_version!())
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global_options: GlobalOptions,
}

#[derive(Clone, Debug, Args)]
pub struct GlobalOptions {
    #[arg(
        long,
        global = true,
        env = "DEVSTACK_CONFIG",
        help = "Settings file (defaults to devstack/devstack.yaml in the XDG config directory)."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "DEVSTACK_ROOT",
        help = "Data root holding bundles/, config/ and data/."
    )]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable additional debug logs.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Silence all logs"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        help = "Configure the output format of the logs.",
        default_value_t,
        value_enum
    )]
    pub log_format: LogFormat,
}

impl GlobalOptions {
    pub fn level(&self) -> Level {
        if self.verbose {
            Level::Debug
        } else if self.quiet {
            Level::Silent
        } else {
            Level::default()
        }
    }
}

/// A service, optionally pinned to a bundle version and an instance.
#[derive(Clone, Debug, Args)]
pub struct ServiceArgs {
    #[arg(help = "Service type, e.g. php, nginx or postgres.")]
    pub service: String,

    #[arg(help = "Bundle version. Defaults to the newest installed bundle.")]
    pub version: Option<String>,

    #[arg(long, help = "Instance id of a multi-instance service.")]
    pub instance: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    #[command(about = "Materialize the configuration of a service and start it.")]
    Start {
        #[arg(required_unless_present = "autostart")]
        service: Option<String>,

        version: Option<String>,

        #[arg(long)]
        instance: Option<String>,

        #[arg(
            long,
            conflicts_with = "service",
            help = "Start every instance flagged autostart."
        )]
        autostart: bool,
    },

    #[command(about = "Stop a running service.")]
    Stop {
        #[command(flatten)]
        target: ServiceArgs,

        #[arg(long, help = "Seconds to wait before sending SIGKILL.")]
        timeout: Option<u64>,
    },

    #[command(about = "Stop and start a service.")]
    Restart {
        #[command(flatten)]
        target: ServiceArgs,
    },

    #[command(about = "Show whether services are running.")]
    Status {
        #[arg(help = "Only this service; every known process otherwise.")]
        service: Option<String>,

        version: Option<String>,

        #[arg(long)]
        instance: Option<String>,

        #[arg(long, help = "Print JSON instead of a table.")]
        json: bool,
    },

    #[command(about = "Stop every known service.")]
    StopAll {
        #[arg(long, help = "Seconds to wait per service before sending SIGKILL.")]
        timeout: Option<u64>,
    },

    #[command(about = "Create or repair the active configuration of a service.")]
    EnsureConfig {
        #[command(flatten)]
        target: ServiceArgs,

        #[arg(long, help = "Delete the active configuration and rebuild it from the bundle.")]
        force: bool,
    },

    #[command(about = "Enable and disable runtime modules.")]
    Modules {
        #[command(subcommand)]
        command: ModulesCommand,
    },

    #[command(about = "Print the runtime version configured for a directory.")]
    Resolve {
        runtime: Runtime,

        #[arg(long, help = "Directory to resolve; the current one by default.")]
        cwd: Option<PathBuf>,
    },

    #[command(about = "Manage instances of multi-instance services.")]
    Instances {
        #[command(subcommand)]
        command: InstancesCommand,
    },

    #[command(about = "List the service catalog and installed bundles.")]
    Services {
        #[arg(long, help = "Ask each installed bundle for its version.")]
        probe: bool,
    },

    #[command(about = "Print the end of a service's log file.")]
    Logs {
        #[command(flatten)]
        target: ServiceArgs,

        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Subcommand, Clone)]
pub enum ModulesCommand {
    #[command(about = "List available modules and where they are enabled.")]
    List {
        version: Option<String>,

        #[arg(long, default_value = "php")]
        service: String,
    },

    #[command(about = "Enable a module in every SAPI, restarting the service if it runs.")]
    Enable {
        module: String,

        version: Option<String>,

        #[arg(long, default_value = "php")]
        service: String,
    },

    #[command(about = "Disable a module, restarting the service if it runs.")]
    Disable {
        module: String,

        version: Option<String>,

        #[arg(long, default_value = "php")]
        service: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum InstancesCommand {
    #[command(about = "List configured instances.")]
    List {
        #[arg(long, help = "Print JSON instead of a table.")]
        json: bool,
    },

    #[command(about = "Add an instance of a multi-instance service.")]
    Add {
        service: String,

        #[arg(help = "Display name; the instance id is derived from it.")]
        name: String,

        #[arg(long, help = "Port; the service default when omitted.")]
        port: Option<u16>,

        #[arg(long)]
        autostart: bool,

        #[arg(long = "bundle", value_name = "VERSION", help = "Pin a bundle version.")]
        version: Option<String>,
    },

    #[command(about = "Stop an instance and delete its configuration and data.")]
    Remove { instance_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_requires_service_or_autostart() {
        assert!(Cli::try_parse_from(["devstack", "start"]).is_err());
        assert!(Cli::try_parse_from(["devstack", "start", "--autostart"]).is_ok());
        assert!(Cli::try_parse_from(["devstack", "start", "postgres", "--autostart"]).is_err());

        let cli = Cli::try_parse_from(["devstack", "start", "php", "8.3.4", "-v"]).unwrap();
        assert_eq!(cli.global_options.level(), Level::Debug);
        let Commands::Start { service, version, .. } = cli.command else {
            panic!("expected start");
        };
        assert_eq!(service.as_deref(), Some("php"));
        assert_eq!(version.as_deref(), Some("8.3.4"));
    }

    #[test]
    fn resolve_parses_runtime() {
        let cli = Cli::try_parse_from(["devstack", "resolve", "node", "--cwd", "/tmp"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Resolve { runtime: Runtime::Node, .. }
        ));
        assert!(Cli::try_parse_from(["devstack", "resolve", "ruby"]).is_err());
    }
}
