//! Chains the catalog, the materializer and the supervisor for the CLI.

use devstack_bundles::{ModuleActivation, ModuleState, ensure_active_config};
use devstack_core::{
    Catalog, Error as CoreError, InstanceStore, PathSet, ServiceDefinition, ServiceInstance,
    Settings, StopSignal,
};
use devstack_processes::{
    LaunchSpec, ProcessRegistry, ProcessStatus, Signal, StartOutcome, StopOutcome, Supervisor,
};
use miette::{IntoDiagnostic, Result, WrapErr, bail, miette};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Signal the supervisor sends for a family's graceful stop.
pub fn signal_for(stop: StopSignal) -> Signal {
    match stop {
        StopSignal::Quit => Signal::SIGQUIT,
        StopSignal::Interrupt => Signal::SIGINT,
        StopSignal::Terminate => Signal::SIGTERM,
    }
}

/// A concrete service version, and instance for multi-instance services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub service: String,
    pub version: String,
    pub instance_id: Option<String>,
    pub port: Option<u16>,
}

pub struct Controller {
    settings: Settings,
    catalog: Catalog,
    instances: InstanceStore,
    supervisor: Supervisor,
}

impl Controller {
    pub fn new(settings: Settings) -> Result<Self> {
        let catalog = Catalog::builtin(&settings.root)?;
        let instances = InstanceStore::load(settings.instances_file())?;
        let registry = build_registry(&catalog, &instances)?;
        debug!(
            "Watching {} known processes under {}",
            registry.ids().count(),
            settings.root.display()
        );
        Ok(Self {
            settings,
            catalog,
            instances,
            supervisor: Supervisor::new(registry),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn newest_version(&self, service: &str) -> Result<String> {
        self.catalog.latest_version(service)?.ok_or_else(|| {
            miette!(
                "no {} bundle is installed under {}",
                service,
                self.catalog.root().join("bundles").display()
            )
        })
    }

    /// Pick the version and instance a command acts on.
    pub fn target(
        &self,
        service: &str,
        version: Option<&str>,
        instance: Option<&str>,
    ) -> Result<ServiceTarget> {
        let def = self.catalog.get(service)?;

        if def.is_multi_instance {
            let Some(instance_id) = instance else {
                return Err(CoreError::MissingInstanceId {
                    service: service.to_string(),
                }
                .into());
            };
            let record = self
                .instances
                .get(instance_id)
                .filter(|i| i.service_type_id == service)
                .ok_or_else(|| miette!("no {} instance '{}'", service, instance_id))?;
            let version = match version.or(record.version.as_deref()) {
                Some(v) => v.to_string(),
                None => self.newest_version(service)?,
            };
            return Ok(ServiceTarget {
                service: service.to_string(),
                version,
                instance_id: Some(record.instance_id.clone()),
                port: Some(record.port),
            });
        }

        if let Some(instance_id) = instance {
            warn!(
                "{} is single-instance, ignoring instance '{}'",
                service, instance_id
            );
        }
        let version = match version {
            Some(v) => v.to_string(),
            None => self.newest_version(service)?,
        };
        Ok(ServiceTarget {
            service: service.to_string(),
            version,
            instance_id: None,
            port: def.default_port,
        })
    }

    pub fn paths(&self, target: &ServiceTarget) -> Result<PathSet> {
        Ok(self.catalog.resolve(
            &target.service,
            &target.version,
            target.instance_id.as_deref(),
        )?)
    }

    fn process_id(&self, target: &ServiceTarget, paths: &PathSet) -> Result<String> {
        paths
            .process_id
            .clone()
            .ok_or_else(|| miette!("{} has no daemon to supervise", target.service))
    }

    /// Materialize on the blocking pool.
    pub async fn ensure_config(&self, target: &ServiceTarget, force: bool) -> Result<PathSet> {
        let def = self.catalog.get(&target.service)?.clone();
        let root = self.catalog.root().to_path_buf();
        let version = target.version.clone();
        let instance_id = target.instance_id.clone();

        let paths = tokio::task::spawn_blocking(move || {
            ensure_active_config(&def, &root, &version, instance_id.as_deref(), force)
        })
        .await
        .into_diagnostic()
        .wrap_err("Materialization task panicked")??;
        Ok(paths)
    }

    fn launch_spec(&self, target: &ServiceTarget, paths: &PathSet) -> Result<LaunchSpec> {
        let def = self.catalog.get(&target.service)?;
        let command = def
            .family
            .start_command(paths, target.port)
            .ok_or_else(|| miette!("{} has no start command", target.service))?;

        let mut spec = LaunchSpec::new(command.program)
            .args(command.args)
            .stop_signal(signal_for(def.family.stop_signal()));
        for (key, value) in command.env {
            spec = spec.env(key, value);
        }
        if let Some(pid_file) = &paths.pid_file {
            spec = spec.pid_file(pid_file);
        }
        if let Some(log_file) = &paths.log_file {
            spec = spec.log_file(log_file);
        }
        spec.cwd = Some(paths.active_root.clone());
        Ok(spec)
    }

    /// Run the family's data-dir initialization when the data dir is empty.
    async fn initialize_data(&self, def: &ServiceDefinition, paths: &PathSet) -> Result<()> {
        let Some(data_dir) = &paths.data_dir else {
            return Ok(());
        };
        let Some(init) = def.family.init_command(paths) else {
            return Ok(());
        };
        if !is_empty_dir(data_dir).await? {
            return Ok(());
        }

        info!("Initializing data directory {}", data_dir.display());
        let output = tokio::process::Command::new(&init.program)
            .args(&init.args)
            .envs(init.env.iter().map(|(k, v)| (k, v)))
            .output()
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to run {}", init.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} failed with {}:\n{}",
                init.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    pub async fn start(&self, target: &ServiceTarget) -> Result<StartOutcome> {
        let def = self.catalog.get(&target.service)?;
        let paths = self.ensure_config(target, false).await?;
        let process_id = self.process_id(target, &paths)?;
        let spec = self.launch_spec(target, &paths)?;

        if !self.supervisor.status(&process_id).await.is_running() {
            self.initialize_data(def, &paths).await?;
        }
        Ok(self.supervisor.start(&process_id, &spec).await?)
    }

    pub async fn stop(&self, target: &ServiceTarget, timeout: Option<Duration>) -> Result<StopOutcome> {
        let paths = self.paths(target)?;
        let process_id = self.process_id(target, &paths)?;
        let timeout = timeout.unwrap_or_else(|| self.settings.stop_timeout());
        Ok(self.supervisor.stop(&process_id, None, timeout).await?)
    }

    pub async fn restart(&self, target: &ServiceTarget) -> Result<StartOutcome> {
        let paths = self.ensure_config(target, false).await?;
        let process_id = self.process_id(target, &paths)?;
        let spec = self.launch_spec(target, &paths)?;
        Ok(self
            .supervisor
            .restart(&process_id, &spec, None, self.settings.stop_timeout())
            .await?)
    }

    pub async fn status(&self, target: &ServiceTarget) -> Result<(String, ProcessStatus)> {
        let paths = self.paths(target)?;
        let process_id = self.process_id(target, &paths)?;
        let status = self.supervisor.status(&process_id).await;
        Ok((process_id, status))
    }

    /// Status of every process the registry knows, sorted by id.
    pub async fn status_all(&self) -> Vec<(String, ProcessStatus)> {
        let mut out = Vec::new();
        for id in self.supervisor.registry().ids() {
            out.push((id.to_string(), self.supervisor.status(id).await));
        }
        out
    }

    pub async fn stop_all(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or_else(|| self.settings.stop_timeout());
        self.supervisor.stop_all(timeout).await
    }

    /// Start every autostart instance; failures are logged and skipped.
    /// Returns how many are running afterwards.
    pub async fn start_autostart(&self) -> usize {
        let wanted: Vec<ServiceInstance> = self.instances.autostart().cloned().collect();
        let mut running = 0;
        for instance in wanted {
            let result = match self.target(
                &instance.service_type_id,
                None,
                Some(&instance.instance_id),
            ) {
                Ok(target) => self.start(&target).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(outcome) => {
                    info!(
                        "{} ({}) running as pid {}",
                        instance.display_name,
                        instance.instance_id,
                        outcome.pid()
                    );
                    running += 1;
                }
                Err(e) => warn!("Autostart of {} failed: {:?}", instance.instance_id, e),
            }
        }
        running
    }

    async fn activation(&self, target: &ServiceTarget) -> Result<ModuleActivation> {
        let paths = self.ensure_config(target, false).await?;
        Ok(ModuleActivation::open(paths)?)
    }

    pub async fn list_modules(&self, target: &ServiceTarget) -> Result<Vec<ModuleState>> {
        let activation = self.activation(target).await?;
        Ok(activation.list()?)
    }

    /// Toggle a module and restart the service when it is running.
    pub async fn set_module(&self, target: &ServiceTarget, module: &str, enable: bool) -> Result<bool> {
        let activation = self.activation(target).await?;
        let changed = if enable {
            activation.enable(module)?
        } else {
            activation.disable(module)?
        };
        if !changed {
            return Ok(false);
        }

        let paths = activation.paths();
        if let Some(process_id) = &paths.process_id
            && self.supervisor.status(process_id).await.is_running()
        {
            info!("Restarting {} to apply module changes", process_id);
            let spec = self.launch_spec(target, paths)?;
            self.supervisor
                .restart(process_id, &spec, None, self.settings.stop_timeout())
                .await?;
        }
        Ok(true)
    }

    pub fn add_instance(
        &mut self,
        service: &str,
        display_name: &str,
        port: Option<u16>,
        autostart: bool,
        version: Option<String>,
    ) -> Result<ServiceInstance> {
        let def = self.catalog.get(service)?;
        if !def.is_multi_instance {
            bail!("{} is single-instance and has no instances", service);
        }
        let port = port
            .or(def.default_port)
            .ok_or_else(|| miette!("{} needs an explicit --port", service))?;

        let instance = ServiceInstance {
            instance_id: self.instances.next_id(display_name),
            service_type_id: service.to_string(),
            display_name: display_name.to_string(),
            port,
            autostart,
            version,
        };
        self.instances.add(instance.clone())?;
        info!("Added {} instance {}", service, instance.instance_id);
        Ok(instance)
    }

    /// Stop the instance, then delete its record, active configuration and
    /// data directory.
    pub async fn remove_instance(&mut self, instance_id: &str) -> Result<ServiceInstance> {
        let instance = self
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| miette!("no instance '{}'", instance_id))?;
        let service = &instance.service_type_id;

        // Only instance-scoped paths are used below, any version renders them.
        let version = match &instance.version {
            Some(v) => v.clone(),
            None => self
                .catalog
                .latest_version(service)?
                .unwrap_or_else(|| UNINSTALLED_VERSION.to_string()),
        };
        let target = ServiceTarget {
            service: service.clone(),
            version,
            instance_id: Some(instance.instance_id.clone()),
            port: Some(instance.port),
        };
        let paths = self.paths(&target)?;

        if let Some(process_id) = &paths.process_id
            && let StopOutcome::Stopped { pid, .. } = self
                .supervisor
                .stop(process_id, None, self.settings.stop_timeout())
                .await?
        {
            info!("Stopped {} (pid {})", process_id, pid);
        }

        self.instances.remove(instance_id)?;
        for dir in [Some(&paths.active_root), paths.data_dir.as_ref()]
            .into_iter()
            .flatten()
        {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => debug!("Removed {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .into_diagnostic()
                        .wrap_err_with(|| format!("Failed to remove {}", dir.display()));
                }
            }
        }
        Ok(instance)
    }
}

/// Stands in for the version of an instance whose service has no bundle
/// installed; only instance-scoped paths are derived from it.
const UNINSTALLED_VERSION: &str = "none";

async fn is_empty_dir(dir: &Path) -> Result<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(e)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", dir.display()));
        }
    };
    Ok(entries.next_entry().await.into_diagnostic()?.is_none())
}

/// PID files of every daemon the catalog and the instance store describe.
pub fn build_registry(catalog: &Catalog, instances: &InstanceStore) -> Result<ProcessRegistry> {
    let mut registry = ProcessRegistry::new();
    for def in catalog.definitions() {
        if def.process_id.is_none() {
            continue;
        }
        let signal = signal_for(def.family.stop_signal());

        let mut path_sets = Vec::new();
        if def.is_multi_instance {
            let latest = catalog.latest_version(&def.type_id)?;
            for instance in instances
                .list()
                .iter()
                .filter(|i| i.service_type_id == def.type_id)
            {
                let Some(version) = instance.version.clone().or_else(|| latest.clone()) else {
                    continue;
                };
                path_sets.push(catalog.resolve(&def.type_id, &version, Some(&instance.instance_id))?);
            }
        } else {
            for version in catalog.installed_versions(&def.type_id)? {
                path_sets.push(catalog.resolve(&def.type_id, &version, None)?);
            }
        }

        for paths in path_sets {
            if let (Some(process_id), Some(pid_file)) = (paths.process_id, paths.pid_file) {
                registry.register(process_id, pid_file, signal);
            }
        }
    }
    Ok(registry)
}
