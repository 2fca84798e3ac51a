//! Server orchestration
//!
//! The [`Orchestrator`] owns one run of the two servers: it allocates their
//! ports, launches them in dependency order and tears both process trees
//! down again.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle → PortsAllocated → Starting → Running → Stopping → Stopped
//! ```
//!
//! Every failure lands in `Stopped`, which is terminal. Startup is
//! all-or-nothing: if the web frontend cannot be launched, the API server
//! is terminated before the error is returned.
//!
//! ## Components
//!
//! - [`ProcessAdapter`]: Trait for abstracting process spawning
//! - [`ManagedProcess`]: A launched server as seen by the orchestrator
//! - [`env`]: The environment each server is launched with

use crate::config::OrchestratorConfig;
use crate::health::{wait_until_ready, HealthError, TcpProbe};
use crate::logging::{forward_output, lock_ring, LogEntry, LogRing, SharedLogRing};
use crate::port::{PortAllocator, PortPair, PortSource};
use crate::process::{ProcessControl, SystemProcessControl, Terminator};
use crate::{CoreError, Result};
use schema::{LogStream, OrchestratorState, ServerRole};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

pub mod adapters;
pub mod env;


pub use adapters::*;
pub use env::{api_environment, localhost_url, web_environment, Secrets, ServerContext};

/// Time output pumps get to drain once their server is gone
const PUMP_DRAIN: Duration = Duration::from_millis(500);

/// Connect timeout of a single readiness attempt
const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// PIDs of both launched servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPids {
    /// API server
    pub api: u32,
    /// Web frontend server
    pub web: u32,
}

impl ServerPids {
    /// PID for a role
    pub fn for_role(&self, role: ServerRole) -> u32 {
        match role {
            ServerRole::Api => self.api,
            ServerRole::Web => self.web,
        }
    }
}

/// Result of a successful [`Orchestrator::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedServers {
    /// Ports the servers were told to listen on
    pub ports: PortPair,
    /// The launched processes
    pub pids: ServerPids,
}

/// Supervisor of the API and web frontend servers
pub struct Orchestrator {
    config: OrchestratorConfig,
    port_source: Arc<dyn PortSource>,
    adapter: Arc<dyn ProcessAdapter>,
    terminator: Terminator,
    state_tx: watch::Sender<OrchestratorState>,
    ports: Option<PortPair>,
    api: Option<Box<dyn ManagedProcess>>,
    web: Option<Box<dyn ManagedProcess>>,
    api_output: SharedLogRing,
    web_output: SharedLogRing,
    pumps: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("ports", &self.ports)
            .field("api", &self.api.as_ref().map(|p| p.pid()))
            .field("web", &self.web.as_ref().map(|p| p.pid()))
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator from its collaborators
    pub fn new(
        config: OrchestratorConfig,
        port_source: Arc<dyn PortSource>,
        adapter: Arc<dyn ProcessAdapter>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        let terminator = Terminator::new(
            control,
            config.shutdown.grace_period(),
            config.shutdown.kill_wait(),
        );
        let (state_tx, _) = watch::channel(OrchestratorState::Idle);
        Self {
            config,
            port_source,
            adapter,
            terminator,
            state_tx,
            ports: None,
            api: None,
            web: None,
            api_output: Arc::new(Mutex::new(LogRing::default())),
            web_output: Arc::new(Mutex::new(LogRing::default())),
            pumps: Vec::new(),
        }
    }

    /// Create an orchestrator that binds real ports and spawns real processes
    pub fn system(config: OrchestratorConfig) -> Self {
        Self::new(
            config,
            Arc::new(PortAllocator::new()),
            Arc::new(SystemProcessAdapter::new()),
            Arc::new(SystemProcessControl::new()),
        )
    }

    /// Configuration of this run
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> OrchestratorState {
        *self.state_tx.borrow()
    }

    /// Subscribe to lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state_tx.subscribe()
    }

    /// Ports of this run, once allocated
    pub fn ports(&self) -> Option<PortPair> {
        self.ports
    }

    /// PIDs of both servers while they are held
    pub fn pids(&self) -> Option<ServerPids> {
        match (&self.api, &self.web) {
            (Some(api), Some(web)) => Some(ServerPids {
                api: api.pid(),
                web: web.pid(),
            }),
            _ => None,
        }
    }

    /// Output lines retained for a server (packaged mode only)
    pub fn recent_output(&self, role: ServerRole) -> Vec<LogEntry> {
        lock_ring(self.output(role)).snapshot()
    }

    fn output(&self, role: ServerRole) -> &SharedLogRing {
        match role {
            ServerRole::Api => &self.api_output,
            ServerRole::Web => &self.web_output,
        }
    }

    fn transition(&self, to: OrchestratorState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            info!("Orchestrator {} -> {}", from, to);
        }
    }

    /// Record a startup failure: the run is over
    fn fail(&self, err: CoreError) -> CoreError {
        error!("Server startup failed [{}]: {}", err.code(), err);
        self.transition(OrchestratorState::Stopped);
        err
    }

    fn invalid_state(&self, operation: &str) -> CoreError {
        CoreError::InvalidState {
            state: self.state().to_string(),
            operation: operation.to_string(),
        }
    }

    /// Allocate the two ports of this run
    ///
    /// Preferred ports from the configuration are tried first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] unless the orchestrator is idle, or
    /// the allocation error, after which the orchestrator is `Stopped`.
    pub fn allocate_ports(&mut self) -> Result<PortPair> {
        if self.state() != OrchestratorState::Idle {
            return Err(self.invalid_state("allocate ports"));
        }

        let preferred = [self.config.api.preferred_port, self.config.web.preferred_port];
        let allocated = self
            .port_source
            .allocate(&preferred)
            .and_then(|ports| match ports.as_slice() {
                [api, web] => PortPair::new(*api, *web),
                other => Err(CoreError::ValidationError(format!(
                    "expected 2 ports, got {}",
                    other.len()
                ))),
            });

        match allocated {
            Ok(pair) => {
                info!("Allocated ports {}", pair);
                self.ports = Some(pair);
                self.transition(OrchestratorState::PortsAllocated);
                Ok(pair)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Launch the API server, then the web frontend wired to it
    ///
    /// Returns as soon as both processes exist; see [`Orchestrator::wait_ready`]
    /// for waiting until they accept connections.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if servers were already started or
    /// the orchestrator is stopped. A spawn failure is returned after anything
    /// already launched has been terminated; the orchestrator is then `Stopped`.
    pub async fn start_servers(&mut self, ports: PortPair) -> Result<ServerPids> {
        if !self.state().can_start() {
            return Err(self.invalid_state("start servers"));
        }
        self.ports = Some(ports);
        self.transition(OrchestratorState::Starting);

        let mode = self.config.context.mode;
        let api_env = api_environment(&self.config.context, ports.api());
        let api_spec = self.config.api.to_spec(mode, ports.api(), api_env);
        let api = match self.launch(ServerRole::Api, &api_spec, ports.api()).await {
            Ok(process) => process,
            Err(e) => return Err(self.fail(e)),
        };
        let api_pid = api.pid();
        self.api = Some(api);

        let web_env = web_environment(&self.config.context, ports);
        let web_spec = self.config.web.to_spec(mode, ports.web(), web_env);
        let web = match self.launch(ServerRole::Web, &web_spec, ports.web()).await {
            Ok(process) => process,
            Err(e) => {
                warn!("Web server failed to launch, terminating the API server");
                self.rollback().await;
                return Err(self.fail(e));
            }
        };
        let web_pid = web.pid();
        self.web = Some(web);

        self.transition(OrchestratorState::Running);
        Ok(ServerPids {
            api: api_pid,
            web: web_pid,
        })
    }

    /// Allocate ports and launch both servers
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::allocate_ports`] and [`Orchestrator::start_servers`].
    pub async fn start(&mut self) -> Result<StartedServers> {
        let ports = self.allocate_ports()?;
        let pids = self.start_servers(ports).await?;
        Ok(StartedServers { ports, pids })
    }

    async fn launch(
        &mut self,
        role: ServerRole,
        spec: &crate::process::LaunchSpec,
        port: u16,
    ) -> Result<Box<dyn ManagedProcess>> {
        let mut process = self.adapter.spawn(spec).await?;
        info!(
            "Launched {} server (pid {}) on port {}",
            role,
            process.pid(),
            port
        );

        let ring = self.output(role).clone();
        if let Some(stdout) = process.take_stdout() {
            self.pumps
                .push(forward_output(role, LogStream::Stdout, stdout, ring.clone()));
        }
        if let Some(stderr) = process.take_stderr() {
            self.pumps
                .push(forward_output(role, LogStream::Stderr, stderr, ring));
        }
        Ok(process)
    }

    async fn rollback(&mut self) {
        let api = self.api.take();
        if api.is_some() {
            self.transition(OrchestratorState::Stopping);
            terminate_role(&self.terminator, ServerRole::Api, api).await;
        }
        self.drain_pumps().await;
    }

    /// Wait until both servers accept TCP connections, API first
    ///
    /// `deadline` bounds the wait for both servers together.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] unless the servers are running, or
    /// [`CoreError::ReadinessTimeout`] naming the first server that was not
    /// reachable in time. The servers keep running either way.
    pub async fn wait_ready(&self, deadline: Duration) -> Result<()> {
        let ports = match (self.state(), self.ports) {
            (OrchestratorState::Running, Some(ports)) => ports,
            _ => return Err(self.invalid_state("wait for readiness")),
        };

        let started = Instant::now();
        for role in ServerRole::ALL {
            let port = ports.for_role(role);
            let probe = TcpProbe::localhost(port, PROBE_ATTEMPT_TIMEOUT);
            let remaining = deadline.saturating_sub(started.elapsed());
            wait_until_ready(&probe, remaining, self.config.readiness.interval())
                .await
                .map_err(|e| match e {
                    HealthError::Timeout(_) => CoreError::ReadinessTimeout {
                        role: role.to_string(),
                        timeout: deadline,
                    },
                    other => CoreError::Other(other.to_string()),
                })?;
            info!("{} server is accepting connections on port {}", role, port);
        }
        Ok(())
    }

    /// Terminate both servers and everything they spawned
    ///
    /// Both trees are torn down concurrently. Failures are logged, never
    /// returned; the orchestrator always ends up `Stopped`. Safe to call in
    /// any state and more than once.
    pub async fn stop_servers(&mut self) {
        let api = self.api.take();
        let web = self.web.take();

        if api.is_some() || web.is_some() {
            self.transition(OrchestratorState::Stopping);
            tokio::join!(
                terminate_role(&self.terminator, ServerRole::Api, api),
                terminate_role(&self.terminator, ServerRole::Web, web),
            );
        }
        self.drain_pumps().await;
        self.transition(OrchestratorState::Stopped);
    }

    async fn drain_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            let abort = pump.abort_handle();
            if timeout(PUMP_DRAIN, pump).await.is_err() {
                abort.abort();
            }
        }
    }
}

async fn terminate_role(
    terminator: &Terminator,
    role: ServerRole,
    process: Option<Box<dyn ManagedProcess>>,
) {
    let Some(mut process) = process else {
        return;
    };
    match terminator.terminate(process.as_mut()).await {
        Ok(report) if report.forced => {
            warn!("{} server (pid {}) had to be killed forcefully", role, report.pid)
        }
        Ok(report) => info!("{} server (pid {}) stopped", role, report.pid),
        Err(e) => error!(
            "Failed to stop {} server (pid {}) [{}]: {}",
            role,
            process.pid(),
            e.code(),
            e
        ),
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let held = [(ServerRole::Api, &mut self.api), (ServerRole::Web, &mut self.web)];
        for (role, process) in held {
            if let Some(mut process) = process.take() {
                if process.has_exited() {
                    continue;
                }
                warn!(
                    "Orchestrator dropped while {} server (pid {}) was running, killing it",
                    role,
                    process.pid()
                );
                self.terminator.kill_tree_now(process.pid());
            }
        }
    }
}
