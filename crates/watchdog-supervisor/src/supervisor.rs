//! Supervisor context and the watchdog loop
//!
//! `SupervisorContext` owns the request channel, the program registry and
//! the terminate flag, so independent supervisors can coexist in one
//! process. Only one of them should reap at a time: reaping waits on any
//! child of the process.
//!
//! Lifecycle: `Idle -> Running -> Terminating -> Stopped`.

use crate::hook::ChannelReady;
use crate::restart::{RestartDecision, RestartStrategy};
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use watchdog_core::launcher::launch_descriptor;
use watchdog_core::reap::{self, TerminationRecord};
use watchdog_core::{ChannelError, Pid, Registry, RequestChannel, SupervisorConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Terminating,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A watched program that was started again after terminating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relaunch {
    pub index: usize,
    pub path: PathBuf,
    pub previous: Pid,
    pub current: Pid,
}

/// What one loop iteration observed and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Records drained from the request channel
    pub requests: Vec<Pid>,
    pub reaped: Vec<TerminationRecord>,
    pub relaunched: Vec<Relaunch>,
}

impl IterationReport {
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.reaped.is_empty() && self.relaunched.is_empty()
    }
}

/// A relaunch waiting for its backoff delay to pass
#[derive(Debug, Clone, Copy)]
struct PendingRelaunch {
    due: Instant,
    previous: Pid,
}

pub struct SupervisorContext {
    config: SupervisorConfig,
    state: SupervisorState,
    registry: Registry,
    channel: Option<Arc<RequestChannel>>,
    terminate: CancellationToken,
    restart: RestartStrategy,
    pending: Vec<Option<PendingRelaunch>>,
    foreign: BTreeSet<Pid>,
    hook: Option<Box<dyn ChannelReady>>,
}

impl SupervisorContext {
    pub fn new(config: SupervisorConfig) -> Self {
        let restart = RestartStrategy::new(config.restart.clone());
        Self {
            config,
            state: SupervisorState::Idle,
            registry: Registry::new(),
            channel: None,
            terminate: CancellationToken::new(),
            restart,
            pending: Vec::new(),
            foreign: BTreeSet::new(),
            hook: None,
        }
    }

    /// Install the callback run after the request channel is created
    #[must_use]
    pub fn with_hook(mut self, hook: impl ChannelReady + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn programs(&self) -> &Registry {
        &self.registry
    }

    pub fn programs_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn channel(&self) -> Option<&Arc<RequestChannel>> {
        self.channel.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.channel.is_some()
    }

    /// Identifiers registered through the channel that the registry does not own
    pub fn foreign_pids(&self) -> &BTreeSet<Pid> {
        &self.foreign
    }

    /// Token that requests termination when cancelled
    pub fn terminate_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    pub fn request_terminate(&self) {
        self.terminate.cancel();
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Create the request channel and run the channel-ready hook
    pub fn init_pipe(&mut self) -> Result<(), ChannelError> {
        if self.channel.is_some() {
            return Err(ChannelError::AlreadyInitialized);
        }

        let channel = Arc::new(RequestChannel::open()?);
        if let Some(hook) = &self.hook {
            hook.on_channel_ready(&channel);
        }
        self.channel = Some(channel);
        Ok(())
    }

    /// Repopulate the registry from configuration, every pid unset
    pub fn prepare_programs(&mut self) {
        let programs = self.config.effective_programs();
        self.registry.prepare(&programs);
        self.restart.reset(self.registry.len());
        self.pending = vec![None; self.registry.len()];
        self.foreign.clear();
    }

    /// Send one pid record into the request channel
    pub fn send_request(&self, pid: Pid) -> Result<(), ChannelError> {
        self.channel
            .as_ref()
            .ok_or(ChannelError::NotInitialized)?
            .send(pid)
    }

    /// Close both channel endpoints and reset the lifecycle flags
    pub fn destroy(&mut self) -> Result<(), ChannelError> {
        let channel = self.channel.take().ok_or(ChannelError::NotInitialized)?;
        channel.destroy()?;
        self.terminate = CancellationToken::new();
        Ok(())
    }

    /// `Idle -> Running`: open the channel, populate the registry and launch
    /// every entry. A program that fails to launch stays unset.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SupervisorState::Idle {
            bail!("cannot start supervisor in state {}", self.state);
        }

        self.init_pipe().context("failed to initialize request channel")?;
        self.prepare_programs();

        for index in 0..self.registry.len() {
            let Some(program) = self.registry.get_mut(index) else {
                continue;
            };
            match launch_descriptor(program) {
                Ok(pid) => {
                    program.pid = Some(pid);
                    tracing::info!(
                        path = %program.path.display(),
                        %pid,
                        watched = program.watched,
                        "started program"
                    );
                    self.announce(pid);
                }
                Err(e) => {
                    tracing::error!(path = %program.path.display(), error = %e, "failed to start program");
                }
            }
        }

        self.state = SupervisorState::Running;
        Ok(())
    }

    /// One pass of the running loop: drain channel records, reap every
    /// terminated child, relaunch watched programs that are due.
    pub fn poll_once(&mut self) -> Result<IterationReport> {
        if self.state != SupervisorState::Running {
            bail!("cannot poll supervisor in state {}", self.state);
        }

        let mut report = IterationReport::default();
        self.drain_requests(&mut report)?;

        while let Some(record) = reap::find_terminated()? {
            report.reaped.push(record);
            self.correlate(record, &mut report);
        }

        self.relaunch_due(Instant::now(), &mut report);
        Ok(report)
    }

    /// Drive the loop until termination is requested, then shut down.
    /// Starts the supervisor first if it is still idle.
    pub async fn run(&mut self) -> Result<Vec<TerminationRecord>> {
        if self.state == SupervisorState::Idle {
            self.start()?;
        }

        let terminate = self.terminate.clone();
        let interval = self.config.poll_interval();
        let mut failure = None;

        while !terminate.is_cancelled() {
            match self.poll_once() {
                Ok(report) if !report.is_idle() => tracing::trace!(?report, "iteration"),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "watchdog loop failed; shutting down");
                    failure = Some(e);
                    break;
                }
            }
            tokio::select! {
                () = terminate.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        let reaped = self.shutdown().await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(reaped),
        }
    }

    /// `Running -> Terminating -> Stopped`: kill watched programs, reap every
    /// child, then release the request channel. The registry stays readable.
    pub async fn shutdown(&mut self) -> Result<Vec<TerminationRecord>> {
        match self.state {
            SupervisorState::Running => {}
            SupervisorState::Idle => {
                self.state = SupervisorState::Stopped;
                return Ok(Vec::new());
            }
            state => bail!("cannot shut down supervisor in state {state}"),
        }

        self.state = SupervisorState::Terminating;
        tracing::info!("terminating supervised programs");
        self.pending.iter_mut().for_each(|p| *p = None);

        for program in self.registry.iter().filter(|p| p.watched && p.is_running()) {
            let Some(pid) = program.pid else { continue };
            if let Err(e) = reap::terminate(pid) {
                tracing::warn!(path = %program.path.display(), error = %e, "kill failed");
            }
        }

        // Unblock any context parked in a blocking read
        if let Some(channel) = &self.channel {
            channel.close_writer();
        }

        let interval = self.config.poll_interval();
        let waited = tokio::task::spawn_blocking(move || reap::wait_exit_all(interval))
            .await
            .context("final reap task panicked")?;

        if let Ok(reaped) = &waited {
            for record in reaped {
                self.forget(record.pid);
                tracing::info!(pid = %record.pid, exit = %record.exit, "reaped during shutdown");
            }
        }

        if let Err(e) = self.destroy() {
            tracing::warn!(error = %e, "request channel was not open at shutdown");
        }
        self.state = SupervisorState::Stopped;
        tracing::info!("supervisor stopped");

        waited.context("failed to reap children during shutdown")
    }

    fn drain_requests(&mut self, report: &mut IterationReport) -> Result<()> {
        let Some(channel) = &self.channel else {
            return Ok(());
        };
        while let Some(pid) = channel.try_recv().context("failed to read request channel")? {
            report.requests.push(pid);
            if self.registry.position_of(pid).is_none() {
                tracing::debug!(%pid, "registered foreign pid");
                self.foreign.insert(pid);
            } else {
                tracing::trace!(%pid, "request for supervised pid");
            }
        }
        Ok(())
    }

    fn correlate(&mut self, record: TerminationRecord, report: &mut IterationReport) {
        let Some(index) = self.registry.position_of(record.pid) else {
            if self.foreign.remove(&record.pid) {
                tracing::info!(pid = %record.pid, exit = %record.exit, "foreign process terminated");
            } else {
                tracing::debug!(pid = %record.pid, exit = %record.exit, "reaped untracked child");
            }
            return;
        };

        let Some(program) = self.registry.get_mut(index) else {
            return;
        };
        program.pid = None;
        tracing::info!(
            path = %program.path.display(),
            pid = %record.pid,
            exit = %record.exit,
            "program terminated"
        );

        if !program.watched {
            return;
        }

        match self.restart.decide(index, program.restarts) {
            RestartDecision::Immediate => self.relaunch(index, record.pid, report),
            RestartDecision::Delayed(delay) => {
                tracing::info!(path = %program.path.display(), ?delay, "relaunch scheduled");
                self.pending[index] = Some(PendingRelaunch {
                    due: Instant::now() + delay,
                    previous: record.pid,
                });
            }
            RestartDecision::Exhausted => {
                tracing::warn!(
                    path = %program.path.display(),
                    restarts = program.restarts,
                    "restart limit reached; leaving program stopped"
                );
            }
        }
    }

    fn relaunch_due(&mut self, now: Instant, report: &mut IterationReport) {
        for index in 0..self.pending.len() {
            match self.pending[index] {
                Some(pending) if pending.due <= now => {
                    self.pending[index] = None;
                    self.relaunch(index, pending.previous, report);
                }
                _ => {}
            }
        }
    }

    fn relaunch(&mut self, index: usize, previous: Pid, report: &mut IterationReport) {
        let Some(program) = self.registry.get_mut(index) else {
            return;
        };

        match launch_descriptor(program) {
            Ok(pid) => {
                program.pid = Some(pid);
                program.restarts += 1;
                tracing::info!(
                    path = %program.path.display(),
                    %previous,
                    %pid,
                    restarts = program.restarts,
                    "relaunched watched program"
                );
                report.relaunched.push(Relaunch {
                    index,
                    path: program.path.clone(),
                    previous,
                    current: pid,
                });
                self.announce(pid);
            }
            Err(e) => {
                tracing::error!(path = %program.path.display(), error = %e, "relaunch failed");
            }
        }
    }

    /// Push a freshly spawned pid through the channel for secondary watchers
    fn announce(&self, pid: Pid) {
        if let Err(e) = self.send_request(pid) {
            tracing::warn!(%pid, error = %e, "failed to announce pid");
        }
    }

    fn forget(&mut self, pid: Pid) {
        if let Some(program) = self
            .registry
            .position_of(pid)
            .and_then(|index| self.registry.get_mut(index))
        {
            program.pid = None;
        }
        self.foreign.remove(&pid);
    }
}

impl fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorContext")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("channel", &self.channel)
            .field("terminate_requested", &self.terminate.is_cancelled())
            .field("foreign", &self.foreign)
            .finish_non_exhaustive()
    }
}
