//! Lifecycle of one supervised role.

use roadcast_types::Role;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{LiveWorker, SpawnRequest, Spawner, WorkerEvent, WorkerSpec};
use crate::error::StartError;

/// Where a role is in its restart cycle.
///
/// ```text
/// Starting ─▶ Running ─▶ Exited ─▶ Restarting ─▶ Starting ...
///                                       │
///                    (shutdown) ────────┴──────▶ Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Exited,
    Restarting,
    /// Absorbing; entered only through shutdown.
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Exited => "exited",
            WorkerState::Restarting => "restarting",
            WorkerState::Terminated => "terminated",
        }
    }
}

/// Owns at most one live instance of a role.
///
/// Every instance gets a new generation number. Events tagged with an older
/// generation belong to an instance that is already gone and are ignored.
#[derive(Debug)]
pub struct WorkerHandle {
    spec: WorkerSpec,
    state: WorkerState,
    live: Option<LiveWorker>,
    generation: u64,
    last_exit_reason: Option<String>,
    starts: u64,
}

impl WorkerHandle {
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            state: WorkerState::Starting,
            live: None,
            generation: 0,
            last_exit_reason: None,
            starts: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.spec.role
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_exit_reason(&self) -> Option<&str> {
        self.last_exit_reason.as_deref()
    }

    /// Number of instances successfully spawned so far.
    pub fn starts(&self) -> u64 {
        self.starts
    }

    pub fn pid(&self) -> Option<u32> {
        self.live.as_ref().and_then(LiveWorker::pid)
    }

    pub fn is_alive(&self) -> bool {
        self.live.is_some()
    }

    /// Whether events of `generation` come from the live instance.
    pub fn is_current(&self, generation: u64) -> bool {
        self.live.is_some() && generation == self.generation
    }

    /// Spawn a new instance.
    ///
    /// A spawn failure leaves the role in [`WorkerState::Exited`] with the
    /// error as exit reason, so the caller can treat it like a crash.
    pub fn start(
        &mut self,
        spawner: &dyn Spawner,
        launch_args: &[String],
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<u64, StartError> {
        if self.state == WorkerState::Terminated {
            return Err(StartError::Terminated);
        }
        if self.live.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        self.state = WorkerState::Starting;
        self.generation += 1;
        info!(role = %self.spec.role, program = %self.spec.program, "launching worker");

        let request = SpawnRequest {
            spec: &self.spec,
            launch_args,
            generation: self.generation,
            events,
        };
        match spawner.spawn(request) {
            Ok(live) => {
                debug!(
                    role = %self.spec.role,
                    pid = ?live.pid(),
                    generation = self.generation,
                    "worker running"
                );
                self.live = Some(live);
                self.state = WorkerState::Running;
                self.starts += 1;
                Ok(self.generation)
            }
            Err(e) => {
                self.state = WorkerState::Exited;
                self.last_exit_reason = Some(e.to_string());
                Err(StartError::Spawn(e))
            }
        }
    }

    /// Forward a payload if the role is alive. Returns false when dropped.
    pub fn send(&self, payload: Value) -> bool {
        match &self.live {
            Some(live) => live.send(payload),
            None => false,
        }
    }

    /// Request termination of the live instance. No-op when already dead.
    ///
    /// The instance stays the live one until its exit is observed, so a
    /// replacement can never overlap with it.
    pub fn kill(&mut self) -> bool {
        match self.live.as_mut() {
            Some(live) => live.kill(),
            None => false,
        }
    }

    /// Record an exit notification.
    ///
    /// Returns false for stale notifications, which leave the handle as is.
    pub fn on_exit(&mut self, generation: u64, reason: Option<String>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.live = None;
        self.last_exit_reason = reason;
        if self.state != WorkerState::Terminated {
            self.state = WorkerState::Exited;
        }
        true
    }

    /// The restart timer for this role is armed.
    pub fn mark_restarting(&mut self) {
        if self.state != WorkerState::Terminated {
            self.state = WorkerState::Restarting;
        }
    }

    /// Enter the absorbing state, killing the live instance if any.
    ///
    /// Returns whether a kill request was delivered.
    pub fn terminate(&mut self) -> bool {
        self.state = WorkerState::Terminated;
        self.kill()
    }
}
