use clap::Parser;
use cli_table::{Table, WithTitle, print_stdout};
use devstack::cli::{Cli, Commands, InstancesCommand, ModulesCommand, ServiceArgs};
use devstack::{Controller, ServiceTarget, log};
use devstack_core::{Catalog, Settings, SiteRegistry};
use devstack_processes::{ProcessStatus, StartOutcome, StopOutcome, log_tail};
use devstack_shim::{Resolution, Runtime};
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Table)]
struct StatusRow {
    #[table(title = "Process")]
    process_id: String,
    #[table(title = "Status")]
    status: &'static str,
    #[table(title = "PID")]
    pid: String,
}

#[derive(Table)]
struct ServiceRow {
    #[table(title = "Service")]
    type_id: String,
    #[table(title = "Name")]
    display_name: String,
    #[table(title = "Category")]
    category: String,
    #[table(title = "Instances")]
    multi_instance: &'static str,
    #[table(title = "Installed")]
    installed: String,
}

#[derive(Table)]
struct InstanceRow {
    #[table(title = "Instance")]
    instance_id: String,
    #[table(title = "Service")]
    service: String,
    #[table(title = "Name")]
    display_name: String,
    #[table(title = "Port")]
    port: u16,
    #[table(title = "Autostart")]
    autostart: bool,
}

#[derive(Table)]
struct ModuleRow {
    #[table(title = "Module")]
    name: String,
    #[table(title = "Enabled in")]
    enabled_in: String,
}

fn status_row(process_id: String, status: ProcessStatus) -> StatusRow {
    match status {
        ProcessStatus::Running(pid) => StatusRow {
            process_id,
            status: "running",
            pid: pid.to_string(),
        },
        ProcessStatus::Stopped => StatusRow {
            process_id,
            status: "stopped",
            pid: "-".to_string(),
        },
    }
}

fn print_table<T: WithTitle>(rows: T) -> Result<()> {
    print_stdout(rows.with_title()).into_diagnostic()
}

fn target(controller: &Controller, args: &ServiceArgs) -> Result<ServiceTarget> {
    controller.target(&args.service, args.version.as_deref(), args.instance.as_deref())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let opts = &cli.global_options;
    Ok(Settings::load(opts.config.as_deref())?.with_root(opts.root.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_tracing(cli.global_options.level(), cli.global_options.log_format);

    let settings = load_settings(&cli)?;
    let mut controller = Controller::new(settings)?;

    match cli.command {
        Commands::Start {
            service,
            version,
            instance,
            autostart,
        } => {
            if autostart {
                let running = controller.start_autostart().await;
                info!("{} autostart instances running", running);
                return Ok(());
            }
            let Some(service) = service else {
                bail!("a service is required unless --autostart is given");
            };
            let target = controller.target(&service, version.as_deref(), instance.as_deref())?;
            match controller.start(&target).await? {
                StartOutcome::Started(pid) => info!("Started {} {} (pid {})", service, target.version, pid),
                StartOutcome::AlreadyRunning(pid) => {
                    info!("{} {} is already running (pid {})", service, target.version, pid)
                }
            }
        }
        Commands::Stop { target: args, timeout } => {
            let target = target(&controller, &args)?;
            match controller.stop(&target, timeout.map(Duration::from_secs)).await? {
                StopOutcome::Stopped { pid, forced: true } => {
                    warn!("{} did not stop gracefully, killed pid {}", args.service, pid)
                }
                StopOutcome::Stopped { pid, forced: false } => {
                    info!("Stopped {} (pid {})", args.service, pid)
                }
                StopOutcome::NotRunning => info!("{} is not running", args.service),
            }
        }
        Commands::Restart { target: args } => {
            let target = target(&controller, &args)?;
            let outcome = controller.restart(&target).await?;
            info!("Restarted {} (pid {})", args.service, outcome.pid());
        }
        Commands::Status {
            service,
            version,
            instance,
            json,
        } => {
            let statuses = match service {
                Some(service) => {
                    let target =
                        controller.target(&service, version.as_deref(), instance.as_deref())?;
                    vec![controller.status(&target).await?]
                }
                None => controller.status_all().await,
            };
            if json {
                let value: Vec<_> = statuses
                    .iter()
                    .map(|(id, status)| {
                        let pid = match status {
                            ProcessStatus::Running(pid) => Some(pid.as_raw()),
                            ProcessStatus::Stopped => None,
                        };
                        serde_json::json!({ "process_id": id, "running": status.is_running(), "pid": pid })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
            } else {
                let rows: Vec<StatusRow> = statuses
                    .into_iter()
                    .map(|(id, status)| status_row(id, status))
                    .collect();
                print_table(&rows)?;
            }
        }
        Commands::StopAll { timeout } => {
            if !controller.stop_all(timeout.map(Duration::from_secs)).await {
                bail!("some services could not be stopped");
            }
            info!("All services stopped");
        }
        Commands::EnsureConfig { target: args, force } => {
            let target = target(&controller, &args)?;
            let paths = controller.ensure_config(&target, force).await?;
            println!("{}", paths.active_root.display());
        }
        Commands::Modules { command } => modules(&controller, command).await?,
        Commands::Instances { command } => instances(&mut controller, command).await?,
        Commands::Services { probe } => {
            let catalog = controller.catalog().clone();
            let rows = tokio::task::spawn_blocking(move || service_rows(&catalog, probe))
                .await
                .into_diagnostic()
                .wrap_err("Service listing task panicked")??;
            print_table(&rows)?;
        }
        Commands::Logs { target: args, lines } => {
            let target = target(&controller, &args)?;
            let paths = controller.paths(&target)?;
            let Some(log_file) = paths.log_file else {
                bail!("{} has no log file", args.service);
            };
            print!("{}", log_tail(&log_file, lines));
        }
        Commands::Resolve { runtime, cwd } => resolve(&controller, runtime, cwd).await?,
    }
    Ok(())
}

/// Catalog rows with installed versions. Probing runs each bundled binary,
/// so this blocks.
fn service_rows(catalog: &Catalog, probe: bool) -> Result<Vec<ServiceRow>> {
    let mut rows = Vec::new();
    for def in catalog.definitions() {
        let mut installed = catalog.installed_versions(&def.type_id)?;
        if probe {
            for version in installed.iter_mut() {
                match catalog.probe_version(&def.type_id, version) {
                    Ok(Some(reported)) if reported != *version => {
                        *version = format!("{} (reports {})", version, reported)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("{}", e),
                }
            }
        }
        rows.push(ServiceRow {
            type_id: def.type_id.clone(),
            display_name: def.display_name.clone(),
            category: format!("{:?}", def.category),
            multi_instance: if def.is_multi_instance { "multiple" } else { "single" },
            installed: installed.join(", "),
        });
    }
    Ok(rows)
}

/// Print the three-line reply for `cwd`, or nothing when the system binary
/// should be used.
async fn resolve(controller: &Controller, runtime: Runtime, cwd: Option<PathBuf>) -> Result<()> {
    let cwd = match cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().into_diagnostic()?,
    };
    let catalog = controller.catalog().clone();
    let sites_file = controller.settings().sites_file();
    let resolution = tokio::task::spawn_blocking(move || -> Result<Resolution> {
        let sites = SiteRegistry::load(&sites_file)?;
        Ok(devstack_shim::resolve(runtime, &cwd, &catalog, &sites)?)
    })
    .await
    .into_diagnostic()
    .wrap_err("Resolution task panicked")??;

    if let Resolution::Resolved(resolved) = resolution {
        resolved
            .reply()
            .write_to(std::io::stdout().lock())
            .into_diagnostic()?;
    }
    Ok(())
}

async fn modules(controller: &Controller, command: ModulesCommand) -> Result<()> {
    match command {
        ModulesCommand::List { version, service } => {
            let target = controller.target(&service, version.as_deref(), None)?;
            let rows: Vec<ModuleRow> = controller
                .list_modules(&target)
                .await?
                .into_iter()
                .map(|state| ModuleRow {
                    enabled_in: if state.is_enabled() {
                        state.enabled_in.join(", ")
                    } else {
                        "-".to_string()
                    },
                    name: state.name,
                })
                .collect();
            print_table(&rows)?;
        }
        ModulesCommand::Enable {
            module,
            version,
            service,
        } => {
            let target = controller.target(&service, version.as_deref(), None)?;
            if controller.set_module(&target, &module, true).await? {
                info!("Enabled {} for {} {}", module, service, target.version);
            } else {
                info!("{} is already enabled", module);
            }
        }
        ModulesCommand::Disable {
            module,
            version,
            service,
        } => {
            let target = controller.target(&service, version.as_deref(), None)?;
            if controller.set_module(&target, &module, false).await? {
                info!("Disabled {} for {} {}", module, service, target.version);
            } else {
                info!("{} is not enabled", module);
            }
        }
    }
    Ok(())
}

async fn instances(controller: &mut Controller, command: InstancesCommand) -> Result<()> {
    match command {
        InstancesCommand::List { json } => {
            let list = controller.instances().list();
            if json {
                println!("{}", serde_json::to_string_pretty(list).into_diagnostic()?);
            } else {
                let rows: Vec<InstanceRow> = list
                    .iter()
                    .map(|i| InstanceRow {
                        instance_id: i.instance_id.clone(),
                        service: i.service_type_id.clone(),
                        display_name: i.display_name.clone(),
                        port: i.port,
                        autostart: i.autostart,
                    })
                    .collect();
                print_table(&rows)?;
            }
        }
        InstancesCommand::Add {
            service,
            name,
            port,
            autostart,
            version,
        } => {
            let instance = controller.add_instance(&service, &name, port, autostart, version)?;
            println!("{}", instance.instance_id);
        }
        InstancesCommand::Remove { instance_id } => {
            let removed = controller
                .remove_instance(&instance_id)
                .await
                .wrap_err_with(|| format!("Failed to remove instance {}", instance_id))?;
            info!("Removed {} ({})", removed.display_name, removed.instance_id);
        }
    }
    Ok(())
}
