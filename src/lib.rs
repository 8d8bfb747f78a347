/*!
 # MCP Hub

 A Rust library for supervising locally-installed Model Context Protocol
 (MCP) servers that speak HTTP or SSE transports.

 ## Overview

 MCP Hub provides functionality to:
 - Allocate TCP ports and generate runtime-correct launch command lines
   for node, python, and node-monorepo servers
 - Start, stop, restart, and list MCP server subprocesses
 - Stream server output to per-server log files and the console
 - Probe server health endpoints with bounded retries
 - Persist process records so an operator can inspect what was running
 - Run per-server install/build phases, recorded back into the registry
 - Generate Claude Desktop launcher configuration (`mcpServers` JSON)
 - Monitor servers interactively in a terminal UI

 The MCP wire protocol itself (JSON-RPC framing, tool dispatch) is out of
 scope: the hub manages processes and consumes only their health
 endpoints.

 ## Basic Usage

 ```no_run
 use mcp_hub::{McpHub, StartOptions, Result};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a hub from a registry file
     let hub = McpHub::from_registry_file("registry.json")?;

     // Start a server (port and transport come from the registry)
     let record = hub.start_server("pg-tools", StartOptions::default()).await?;
     println!("pg-tools is up: pid {} on port {}", record.pid, record.port);

     // Probe it
     let healthy = hub.check_health("pg-tools").await?;
     println!("healthy: {healthy}");

     // List everything that runs
     for running in hub.list_running().await {
         println!("{} (up {:?})", running.record.name, running.uptime);
     }

     // Stop everything, collecting per-server results
     for (name, result) in hub.stop_all().await {
         if let Err(e) = result {
             eprintln!("failed to stop {}: {}", name, e);
         }
     }

     Ok(())
 }
 ```

 ## Features

 - **Process Supervision**: Spawn, watch, and tear down server processes
   with graceful-then-forced shutdown
 - **Port Allocation**: First-free scan over a configured range with
   reservation of in-flight starts
 - **Health Probing**: HTTP `GET /health` (and an SSE-friendly query
   convention) with bounded retries
 - **Registry**: JSON server registry with install/build/status flags
   written back in place
 - **Launcher Config**: Claude Desktop `mcpServers` generation with
   platform-correct absolute paths
 - **Async Support**: Full async/await support on tokio

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod error;
pub mod launch;
pub mod monitor;
pub mod registry;
pub mod secrets;
pub mod server;
pub mod setup;

pub use error::{Error, Result};
pub use launch::{LaunchDescriptor, LaunchOptions, Platform};
pub use monitor::{Monitor, MonitorSettings};
pub use registry::{Registry, RegistryStatus, RuntimeKind, ServerDescriptor, TransportKind};
pub use server::{HealthProber, ProbeSettings, ProcessRecord, StopOutcome};
pub use setup::SetupPhase;

use futures::future::join_all;
use launch::desktop;
use server::ports::{self, PortProbe, TcpPortProbe};
use server::process::{ManagedProcess, ProcessExit};
use server::records::RecordStore;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Operational settings for a hub instance.
///
/// The defaults follow the conventional layout: everything lives under
/// `$MCP_HUB_ROOT` (or `~/.mcp-hub`), ports come from 3000-3999, stops
/// get five seconds of grace.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Hub root directory; logs and the record store live under it.
    pub root: PathBuf,
    /// Inclusive port range for allocation.
    pub port_range: (u16, u16),
    /// Pause between spawn and the post-start health probe.
    pub settle_delay: Duration,
    /// Grace period before a stop escalates to a hard kill.
    pub shutdown_grace: Duration,
    /// Pause between stop and start during a restart.
    pub restart_delay: Duration,
    /// Health probe settings.
    pub probe: ProbeSettings,
    /// Optional flat-JSON secrets overlay file.
    pub secrets_file: Option<PathBuf>,
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            root: default_root(),
            port_range: (3000, 3999),
            settle_delay: Duration::from_millis(1500),
            shutdown_grace: Duration::from_secs(5),
            restart_delay: Duration::from_millis(500),
            probe: ProbeSettings::default(),
            secrets_file: None,
        }
    }
}

impl HubSettings {
    /// Default settings with an explicit root directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        HubSettings {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Directory holding per-server log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Path of the process-record store file.
    pub fn records_path(&self) -> PathBuf {
        self.root.join("records.json")
    }

    /// Log file path for one server instance.
    pub fn log_path(&self, name: &str, port: u16) -> PathBuf {
        self.logs_dir().join(format!("{}-{}.log", name, port))
    }
}

/// Default hub root: `$MCP_HUB_ROOT`, else `~/.mcp-hub`, else `./.mcp-hub`.
fn default_root() -> PathBuf {
    if let Ok(root) = std::env::var("MCP_HUB_ROOT") {
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".mcp-hub"))
        .unwrap_or_else(|| PathBuf::from(".mcp-hub"))
}

/// Options for starting one server.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Explicit port. Wins over the descriptor's default port and the
    /// allocator.
    pub port: Option<u16>,
    /// Transport to start; defaults to HTTP.
    pub transport: Option<TransportKind>,
    /// Optional boolean flags to request. Only flags the descriptor
    /// permits are actually passed.
    pub extra_flags: Vec<String>,
}

/// Snapshot of one running server.
#[derive(Debug, Clone)]
pub struct RunningServer {
    /// The live process record.
    pub record: ProcessRecord,
    /// Time since the process started.
    pub uptime: Duration,
}

struct HubInner {
    registry: RwLock<Registry>,
    settings: HubSettings,
    /// Live process map, keyed by server name. Authoritative; the record
    /// store only mirrors it.
    records: Mutex<HashMap<String, ManagedProcess>>,
    /// Per-name locks serializing lifecycle operations for one server.
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Ports handed out to starts still in flight.
    reserved_ports: Mutex<HashSet<u16>>,
    store: RecordStore,
    prober: HealthProber,
    port_probe: Arc<dyn PortProbe>,
}

/// Supervise MCP servers from a registry.
///
/// This struct is the main entry point: it owns the registry, the live
/// process map, and the record store, and exposes the lifecycle
/// operations. Handles are cheap clones over shared state, so one hub can
/// serve the monitor UI and programmatic callers at the same time.
/// All public methods are instrumented with `tracing` spans.
///
/// Lifecycle operations for the *same* server name are serialized through
/// a per-name lock: concurrent starts/stops/restarts of one server cannot
/// interleave, while different servers proceed in parallel.
#[derive(Clone)]
pub struct McpHub {
    inner: Arc<HubInner>,
}

impl McpHub {
    /// Create a new hub from a registry file path, with default settings.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(path), fields(registry_path = ?path.as_ref()))]
    pub fn from_registry_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading registry from file");
        let registry = Registry::from_file(path)?;
        Self::new(registry, HubSettings::default())
    }

    /// Create a new hub from a registry and settings.
    ///
    /// Validates the registry and ensures the hub directories exist.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(registry, settings), fields(num_servers = registry.servers.len()))]
    pub fn new(registry: Registry, settings: HubSettings) -> Result<Self> {
        Self::with_port_probe(registry, settings, Arc::new(TcpPortProbe::default()))
    }

    /// Create a new hub with a custom port probe.
    ///
    /// The default connect-based probe is right for production; tests use
    /// this to script port occupancy.
    pub fn with_port_probe(
        registry: Registry,
        settings: HubSettings,
        port_probe: Arc<dyn PortProbe>,
    ) -> Result<Self> {
        tracing::info!("Creating new McpHub");
        registry::validate_registry(&registry)?;
        std::fs::create_dir_all(settings.logs_dir())
            .map_err(|e| Error::Other(format!("Failed to create hub directories: {}", e)))?;

        let store = RecordStore::new(settings.records_path());
        let prober = HealthProber::new(settings.probe.clone());

        Ok(McpHub {
            inner: Arc::new(HubInner {
                registry: RwLock::new(registry),
                settings,
                records: Mutex::new(HashMap::new()),
                name_locks: Mutex::new(HashMap::new()),
                reserved_ports: Mutex::new(HashSet::new()),
                store,
                prober,
                port_probe,
            }),
        })
    }

    /// The hub's settings.
    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    /// The hub's health prober.
    pub fn prober(&self) -> &HealthProber {
        &self.inner.prober
    }

    /// Names of every registered server.
    pub async fn server_names(&self) -> Vec<String> {
        self.inner.registry.read().await.server_names()
    }

    /// Start a server from its registry descriptor.
    ///
    /// Resolves secrets, picks a port (explicit option, then the
    /// descriptor default, then the allocator), generates the launch
    /// descriptor, spawns the process, records it, and probes health once
    /// after a settle delay. An unhealthy probe logs a warning but does
    /// not fail the start; an immediate crash is cleaned up by the exit
    /// handler and shows in the server's log.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] when a live record exists,
    /// [`Error::ServerNotFound`], [`Error::MissingSecrets`],
    /// [`Error::PortRangeExhausted`], [`Error::Launch`], and
    /// [`Error::Spawn`] for the respective phases.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, options), fields(server_name = %name))]
    pub async fn start_server(&self, name: &str, options: StartOptions) -> Result<ProcessRecord> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;
        self.start_locked(name, options).await
    }

    /// Stop a running server gracefully, escalating to a hard kill after
    /// the grace period.
    ///
    /// The returned outcome reports whether escalation happened. On
    /// Windows the graceful path already is a hard kill, since there is
    /// no TERM equivalent.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn stop_server(&self, name: &str) -> Result<StopOutcome> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;
        self.stop_locked(name).await
    }

    /// Restart a running server, preserving its port and transport unless
    /// the options override them.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, options), fields(server_name = %name))]
    pub async fn restart_server(&self, name: &str, options: StartOptions) -> Result<ProcessRecord> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        let previous = {
            let records = self.inner.records.lock().await;
            records.get(name).map(|m| m.record().clone())
        };
        let Some(previous) = previous else {
            tracing::warn!("Attempted to restart a server that is not running");
            return Err(Error::NotRunning(name.to_string()));
        };

        let merged = StartOptions {
            port: options.port.or(Some(previous.port)),
            transport: options.transport.or(Some(previous.transport)),
            extra_flags: options.extra_flags,
        };

        tracing::info!(port = previous.port, "Restarting server");
        self.stop_locked(name).await?;
        tokio::time::sleep(self.inner.settings.restart_delay).await;
        self.start_locked(name, merged).await
    }

    /// Snapshot of every live server, sorted by name.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn list_running(&self) -> Vec<RunningServer> {
        let records = self.inner.records.lock().await;
        let mut running: Vec<RunningServer> = records
            .values()
            .filter(|m| m.is_live())
            .map(|m| RunningServer {
                record: m.record().clone(),
                uptime: m.record().uptime(),
            })
            .collect();
        running.sort_by(|a, b| a.record.name.cmp(&b.record.name));
        running
    }

    /// Stop every running server concurrently.
    ///
    /// Returns one result per server; failures are collected, never
    /// thrown, so one stuck server cannot hide the others' outcomes.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn stop_all(&self) -> Vec<(String, Result<StopOutcome>)> {
        tracing::info!("Stopping all running servers");
        let names: Vec<String> = {
            let records = self.inner.records.lock().await;
            records.keys().cloned().collect()
        };

        let stops = names.into_iter().map(|name| {
            let hub = self.clone();
            async move {
                let outcome = hub.stop_server(&name).await;
                (name, outcome)
            }
        });
        let results = join_all(stops).await;

        let failures = results.iter().filter(|(_, r)| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(failures, "Some servers failed to stop");
        } else {
            tracing::info!(stopped = results.len(), "All servers stopped");
        }
        results
    }

    /// Probe a running server's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] when the server has no live record;
    /// an unhealthy-but-running server is `Ok(false)`.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn check_health(&self, name: &str) -> Result<bool> {
        let record = {
            let records = self.inner.records.lock().await;
            records
                .get(name)
                .filter(|m| m.is_live())
                .map(|m| m.record().clone())
        };
        let Some(record) = record else {
            return Err(Error::NotRunning(name.to_string()));
        };
        Ok(self
            .inner
            .prober
            .check(name, record.port, record.transport)
            .await)
    }

    /// Run a server's install phase and record success in the registry.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn install_server(&self, name: &str) -> Result<()> {
        let descriptor = self.descriptor(name).await?;
        setup::run_phase(name, &descriptor, SetupPhase::Install).await?;

        let mut registry = self.inner.registry.write().await;
        if let Err(e) = registry.write_back(name, |d| d.installed = true) {
            tracing::warn!(error = %e, "Failed to record install in registry");
        }
        Ok(())
    }

    /// Run a server's build phase and record success in the registry.
    ///
    /// A server without a build command is a successful no-op.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn build_server(&self, name: &str) -> Result<()> {
        let descriptor = self.descriptor(name).await?;
        setup::run_phase(name, &descriptor, SetupPhase::Build).await?;

        let mut registry = self.inner.registry.write().await;
        if let Err(e) = registry.write_back(name, |d| d.built = true) {
            tracing::warn!(error = %e, "Failed to record build in registry");
        }
        Ok(())
    }

    /// Resolve a server's declared secrets from the environment and the
    /// configured overlay file.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn resolve_server_secrets(&self, name: &str) -> Result<HashMap<String, String>> {
        let descriptor = self.descriptor(name).await?;
        secrets::resolve(name, &descriptor, self.inner.settings.secrets_file.as_deref())
    }

    /// Write Claude Desktop configuration for the selected servers (all
    /// registered servers when `names` is `None`) to the platform's
    /// well-known location, merging with any existing file.
    ///
    /// Returns the path written.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, names))]
    pub async fn write_desktop_config(&self, names: Option<&[&str]>) -> Result<PathBuf> {
        let path = desktop::desktop_config_path()?;
        self.write_desktop_config_to(&path, names).await?;
        Ok(path)
    }

    /// Like [`McpHub::write_desktop_config`] with an explicit target path.
    pub async fn write_desktop_config_to(&self, path: &Path, names: Option<&[&str]>) -> Result<()> {
        let selected: Vec<(String, ServerDescriptor)> = {
            let registry = self.inner.registry.read().await;
            match names {
                Some(names) => names
                    .iter()
                    .map(|n| {
                        registry
                            .get(n)
                            .cloned()
                            .map(|d| (n.to_string(), d))
                            .ok_or_else(|| Error::ServerNotFound(n.to_string()))
                    })
                    .collect::<Result<_>>()?,
                None => registry
                    .servers
                    .iter()
                    .map(|(n, d)| (n.clone(), d.clone()))
                    .collect(),
            }
        };

        let mut entries = BTreeMap::new();
        let mut used_ports: HashSet<u16> = selected
            .iter()
            .filter_map(|(_, d)| d.default_port())
            .collect();

        for (name, descriptor) in &selected {
            let secrets =
                secrets::resolve(name, descriptor, self.inner.settings.secrets_file.as_deref())?;

            let port = match descriptor.default_port() {
                Some(port) => port,
                None => {
                    // No pinned port; allocate one so the entry is usable.
                    let (start, end) = self.inner.settings.port_range;
                    let port = ports::find_available_port(
                        start,
                        end,
                        &used_ports,
                        self.inner.port_probe.as_ref(),
                    )
                    .await?;
                    used_ports.insert(port);
                    port
                }
            };

            let transport = if descriptor.commands.start_for(TransportKind::Http).is_some() {
                TransportKind::Http
            } else {
                TransportKind::Sse
            };

            let entry = desktop::build_entry(
                name,
                descriptor,
                &secrets,
                port,
                transport,
                Platform::host(),
            )?;
            entries.insert(name.clone(), entry);
        }

        desktop::merge_into_file(path, &entries).await
    }

    /// Records from the previous session's store file.
    ///
    /// Purely informational: live handles are never rehydrated from disk,
    /// so a new hub session starts with an empty live map regardless of
    /// what the file says.
    pub async fn last_session_records(&self) -> HashMap<String, ProcessRecord> {
        self.inner.store.load().await
    }

    // ----- internals -----

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.name_locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn descriptor(&self, name: &str) -> Result<ServerDescriptor> {
        let registry = self.inner.registry.read().await;
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))
    }

    async fn start_locked(&self, name: &str, options: StartOptions) -> Result<ProcessRecord> {
        tracing::info!("Attempting to start server");
        let inner = &self.inner;

        // Conflict check. A stale entry (exit published, handler not yet
        // run) is swept so a crash can be followed by an immediate start.
        let swept = {
            let mut records = inner.records.lock().await;
            match records.get(name) {
                Some(existing) if existing.is_live() => {
                    tracing::debug!("Server already running");
                    return Err(Error::AlreadyRunning(name.to_string()));
                }
                Some(_) => records
                    .remove(name)
                    .map(|stale| (stale, snapshot_records(&records))),
                None => None,
            }
        };
        if let Some((stale, snapshot)) = swept {
            tracing::debug!("Swept stale record before start");
            inner.store.persist(&snapshot).await;
            // Record the swept process's end now; if the start below fails
            // the registry must not keep claiming the old process runs.
            self.write_registry_status(name, exit_status(&stale)).await;
        }

        let descriptor = self.descriptor(name).await?;
        let secrets = secrets::resolve(name, &descriptor, inner.settings.secrets_file.as_deref())?;
        let transport = options.transport.unwrap_or_default();

        // Port: explicit option, then descriptor default, then allocator.
        let (port, reserved) = match options.port.or(descriptor.default_port()) {
            Some(port) => (port, false),
            None => (self.allocate_port().await?, true),
        };

        let launch_options = LaunchOptions {
            port,
            transport,
            requested_flags: options.extra_flags,
        };
        let launch = match launch::generate(
            name,
            &descriptor,
            &secrets,
            &launch_options,
            Platform::host(),
        ) {
            Ok(launch) => launch,
            Err(e) => {
                if reserved {
                    self.release_port(port).await;
                }
                return Err(e);
            }
        };

        let log_path = inner.settings.log_path(name, port);
        let managed = match ManagedProcess::spawn(
            name,
            descriptor.runtime,
            &launch,
            transport,
            port,
            &log_path,
        )
        .await
        {
            Ok(managed) => managed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn server process");
                if reserved {
                    self.release_port(port).await;
                }
                return Err(e);
            }
        };
        let record = managed.record().clone();

        let snapshot = {
            let mut records = inner.records.lock().await;
            records.insert(name.to_string(), managed.clone());
            snapshot_records(&records)
        };
        inner.store.persist(&snapshot).await;
        if reserved {
            // The port is now visible through the record itself.
            self.release_port(port).await;
        }

        self.write_registry_status(name, RegistryStatus::Running).await;

        // Exit handler: cleanup when the process ends for any reason.
        let hub = self.clone();
        let handler_process = managed.clone();
        let handler_name = name.to_string();
        tokio::spawn(async move {
            let exit = handler_process.exited().await;
            hub.handle_exit(&handler_name, &handler_process, exit).await;
        });

        // Settle, then one post-start probe. Unhealthy is a warning, not a
        // failure: slow starters are normal.
        tokio::time::sleep(inner.settings.settle_delay).await;
        if managed.is_live() {
            if inner.prober.check(name, port, transport).await {
                tracing::info!(port, "Server is up and answering health probes");
            } else {
                tracing::warn!(port, "Server started but is not answering health probes yet");
            }
        } else {
            tracing::warn!("Server exited during startup; check its log");
        }

        Ok(record)
    }

    async fn stop_locked(&self, name: &str) -> Result<StopOutcome> {
        tracing::info!("Attempting to stop server");
        let managed = {
            let records = self.inner.records.lock().await;
            records.get(name).cloned()
        };
        let Some(managed) = managed else {
            tracing::warn!("Attempted to stop a server that is not running");
            return Err(Error::NotRunning(name.to_string()));
        };
        if !managed.is_live() {
            // The lagging exit handler writes nothing once the entry is
            // gone, so whoever removes it records the final status.
            if self.remove_record(name, &managed).await {
                self.write_registry_status(name, exit_status(&managed)).await;
            }
            return Err(Error::NotRunning(name.to_string()));
        }

        let outcome = managed.stop(self.inner.settings.shutdown_grace).await?;

        // The exit handler also cleans up; doing it here as well means the
        // map is clean before the per-name lock releases.
        self.remove_record(name, &managed).await;
        self.write_registry_status(name, RegistryStatus::Stopped).await;
        tracing::info!(forced = outcome.forced, "Server stopped");
        Ok(outcome)
    }

    async fn allocate_port(&self) -> Result<u16> {
        let inner = &self.inner;
        let (start, end) = inner.settings.port_range;

        let mut exclude: HashSet<u16> = {
            let records = inner.records.lock().await;
            records.values().map(|m| m.record().port).collect()
        };

        // Holding the reservation lock across the scan serializes
        // concurrent allocations, so two in-flight starts cannot pick the
        // same port.
        let mut reserved = inner.reserved_ports.lock().await;
        exclude.extend(reserved.iter().copied());
        let port =
            ports::find_available_port(start, end, &exclude, inner.port_probe.as_ref()).await?;
        reserved.insert(port);
        Ok(port)
    }

    async fn release_port(&self, port: u16) {
        self.inner.reserved_ports.lock().await.remove(&port);
    }

    /// Removes the map entry when it still belongs to `process`, then
    /// persists. A restart may already have replaced the entry, in which
    /// case nothing happens.
    async fn remove_record(&self, name: &str, process: &ManagedProcess) -> bool {
        let snapshot = {
            let mut records = self.inner.records.lock().await;
            let matches = records
                .get(name)
                .map(|current| current.record() == process.record())
                .unwrap_or(false);
            if matches {
                records.remove(name);
                Some(snapshot_records(&records))
            } else {
                None
            }
        };
        match snapshot {
            Some(snapshot) => {
                self.inner.store.persist(&snapshot).await;
                true
            }
            None => false,
        }
    }

    async fn handle_exit(&self, name: &str, process: &ManagedProcess, exit: ProcessExit) {
        tracing::debug!(server = %name, "Handling process exit ({})", exit.describe());

        // Only the handler that actually removed the entry writes status;
        // otherwise a lagging handler could overwrite a newer start.
        if !self.remove_record(name, process).await {
            return;
        }

        let status = exit_status(process);
        if status == RegistryStatus::Crashed {
            tracing::warn!(server = %name, "Server crashed ({})", exit.describe());
        }
        self.write_registry_status(name, status).await;
    }

    async fn write_registry_status(&self, name: &str, status: RegistryStatus) {
        let mut registry = self.inner.registry.write().await;
        if let Err(e) = registry.write_back(name, |d| d.status = Some(status)) {
            tracing::warn!(server = %name, error = %e, "Failed to write status back to registry");
        }
    }
}

fn snapshot_records(records: &HashMap<String, ManagedProcess>) -> HashMap<String, ProcessRecord> {
    records
        .iter()
        .map(|(name, managed)| (name.clone(), managed.record().clone()))
        .collect()
}

/// Final registry status for a process whose exit has been published.
fn exit_status(process: &ManagedProcess) -> RegistryStatus {
    if process.stop_was_requested() {
        RegistryStatus::Stopped
    } else {
        RegistryStatus::Crashed
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Spawns a short-lived shell child and waits until its exit has been
    /// published, yielding a record in the same shape an unhandled crash
    /// leaves behind.
    async fn exited_process(name: &str, dir: &Path) -> ManagedProcess {
        let launch = LaunchDescriptor {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "exit 7".to_string()],
            cwd: dir.to_path_buf(),
            env: BTreeMap::new(),
        };
        let managed = ManagedProcess::spawn(
            name,
            RuntimeKind::Node,
            &launch,
            TransportKind::Http,
            3987,
            &dir.join(format!("{}.log", name)),
        )
        .await
        .unwrap();
        managed.exited().await;
        managed
    }

    fn hub_with_registry(dir: &Path, registry_json: &str) -> (McpHub, PathBuf) {
        let registry_path = dir.join("registry.json");
        std::fs::write(&registry_path, registry_json).unwrap();
        let registry = Registry::from_file(&registry_path).unwrap();
        let hub = McpHub::new(registry, HubSettings::with_root(dir.join("hub"))).unwrap();
        (hub, registry_path)
    }

    const PLAIN_REGISTRY: &str = r#"{
  "servers": {
    "svc": {
      "type": "node",
      "path": "/tmp",
      "commands": { "start": "node server.js" }
    }
  }
}"#;

    const SECRET_REGISTRY: &str = r#"{
  "servers": {
    "svc": {
      "type": "node",
      "path": "/tmp",
      "commands": { "start": "node server.js" },
      "secrets": { "MCP_HUB_TEST_UNSET_SECRET": { "required": true } }
    }
  }
}"#;

    #[tokio::test]
    async fn test_stop_on_exited_record_writes_crashed_status() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, registry_path) = hub_with_registry(dir.path(), PLAIN_REGISTRY);

        let managed = exited_process("svc", dir.path()).await;
        {
            let mut records = hub.inner.records.lock().await;
            records.insert("svc".to_string(), managed);
        }

        let result = hub.stop_server("svc").await;
        assert!(matches!(result, Err(Error::NotRunning(_))));
        assert!(hub.list_running().await.is_empty());

        let content = std::fs::read_to_string(&registry_path).unwrap();
        assert!(
            content.contains(r#""status": "crashed""#),
            "registry keeps a stale status: {}",
            content
        );
    }

    #[tokio::test]
    async fn test_failed_start_after_sweep_writes_crashed_status() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, registry_path) = hub_with_registry(dir.path(), SECRET_REGISTRY);

        let managed = exited_process("svc", dir.path()).await;
        {
            let mut records = hub.inner.records.lock().await;
            records.insert("svc".to_string(), managed);
        }

        let result = hub.start_server("svc", StartOptions::default()).await;
        assert!(matches!(result, Err(Error::MissingSecrets { .. })));

        let content = std::fs::read_to_string(&registry_path).unwrap();
        assert!(
            content.contains(r#""status": "crashed""#),
            "registry keeps a stale status: {}",
            content
        );
    }
}
