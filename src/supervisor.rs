//! Restart supervision.
//!
//! The [`Supervisor`] owns one [`WorkerHandle`] per role and is the only
//! place where workers are started. When a worker exits it arms a timer of
//! the role's fixed delay; the timer only posts the role back to the
//! orchestrator loop, which then calls [`Supervisor::on_restart_due`]. That
//! method consults the [`ShutdownGuard`] before spawning anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use roadcast_types::Role;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StartError;
use crate::shutdown::ShutdownGuard;
use crate::worker::{Spawner, WorkerEvent, WorkerHandle, WorkerSpec, WorkerState};

/// Capacity of the channel carrying worker events to the orchestrator.
pub const EVENT_CAPACITY: usize = 256;

/// Owns the process table and the restart policy.
pub struct Supervisor {
    handles: BTreeMap<Role, WorkerHandle>,
    spawner: Arc<dyn Spawner>,
    launch_args: Vec<String>,
    guard: ShutdownGuard,
    events: mpsc::Sender<WorkerEvent>,
    restarts: mpsc::UnboundedSender<Role>,
    timers: HashMap<Role, JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor for the given roles.
    ///
    /// Returns the receiving end of the restart timers; the orchestrator
    /// feeds each role it yields into [`on_restart_due`](Self::on_restart_due).
    pub fn new(
        specs: impl IntoIterator<Item = WorkerSpec>,
        spawner: Arc<dyn Spawner>,
        launch_args: Vec<String>,
        guard: ShutdownGuard,
        events: mpsc::Sender<WorkerEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<Role>) {
        let (restarts, restart_rx) = mpsc::unbounded_channel();
        let handles = specs
            .into_iter()
            .map(|spec| (spec.role, WorkerHandle::new(spec)))
            .collect();

        let supervisor = Self {
            handles,
            spawner,
            launch_args,
            guard,
            events,
            restarts,
            timers: HashMap::new(),
        };
        (supervisor, restart_rx)
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.handles.keys().copied()
    }

    pub fn handle(&self, role: Role) -> Option<&WorkerHandle> {
        self.handles.get(&role)
    }

    pub fn state(&self, role: Role) -> Option<WorkerState> {
        self.handles.get(&role).map(WorkerHandle::state)
    }

    pub fn is_alive(&self, role: Role) -> bool {
        self.handles.get(&role).is_some_and(WorkerHandle::is_alive)
    }

    /// Whether an event of `generation` comes from the live instance of `role`.
    pub fn is_current(&self, role: Role, generation: u64) -> bool {
        self.handles
            .get(&role)
            .is_some_and(|handle| handle.is_current(generation))
    }

    /// Best-effort delivery to a live worker. Returns false when dropped.
    pub fn send(&self, role: Role, payload: Value) -> bool {
        self.handles
            .get(&role)
            .is_some_and(|handle| handle.send(payload))
    }

    /// Kill the live instance of `role`. Its exit then follows the normal
    /// restart path.
    pub fn kill(&mut self, role: Role) -> bool {
        self.handles
            .get_mut(&role)
            .is_some_and(WorkerHandle::kill)
    }

    /// Launch every role.
    pub fn start_all(&mut self) {
        let roles: Vec<Role> = self.roles().collect();
        for role in roles {
            self.launch(role);
        }
    }

    /// Record an exit and schedule the restart.
    ///
    /// Notifications from an instance that is no longer the live one are
    /// ignored.
    pub fn on_exit(&mut self, role: Role, generation: u64, reason: Option<String>) {
        let Some(handle) = self.handles.get_mut(&role) else {
            return;
        };
        if !handle.on_exit(generation, reason) {
            debug!(role = %role, generation, "ignoring stale exit");
            return;
        }

        match handle.last_exit_reason() {
            Some(reason) => warn!(role = %role, reason = %reason, "worker exited"),
            None => warn!(role = %role, "worker exited"),
        }
        self.schedule_restart(role);
    }

    /// The restart delay of `role` elapsed.
    ///
    /// Returns whether a new instance was started.
    pub fn on_restart_due(&mut self, role: Role) -> bool {
        self.timers.remove(&role);
        let Some(handle) = self.handles.get_mut(&role) else {
            return false;
        };

        if self.guard.is_set() {
            handle.terminate();
            debug!(role = %role, "restart suppressed by shutdown");
            return false;
        }
        if handle.state() != WorkerState::Restarting {
            return false;
        }
        self.launch(role)
    }

    /// Stop all restart activity and kill every live worker.
    ///
    /// Returns the number of kill requests delivered.
    pub fn terminate_all(&mut self) -> usize {
        for (role, timer) in self.timers.drain() {
            debug!(role = %role, "cancelling restart timer");
            timer.abort();
        }

        let mut killed = 0;
        for (role, handle) in self.handles.iter_mut() {
            if handle.terminate() {
                info!(role = %role, pid = ?handle.pid(), "killed worker");
                killed += 1;
            }
        }
        killed
    }

    fn launch(&mut self, role: Role) -> bool {
        let Some(handle) = self.handles.get_mut(&role) else {
            return false;
        };
        if self.guard.is_set() {
            handle.terminate();
            return false;
        }

        match handle.start(self.spawner.as_ref(), &self.launch_args, self.events.clone()) {
            Ok(_) => true,
            Err(StartError::Spawn(e)) => {
                warn!(role = %role, error = %e, "failed to launch worker");
                self.schedule_restart(role);
                false
            }
            Err(e) => {
                debug!(role = %role, error = %e, "launch skipped");
                false
            }
        }
    }

    fn schedule_restart(&mut self, role: Role) {
        let Some(handle) = self.handles.get_mut(&role) else {
            return;
        };
        if self.guard.is_set() {
            handle.terminate();
            return;
        }

        handle.mark_restarting();
        let delay = handle.spec().restart_delay;
        let restarts = self.restarts.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = restarts.send(role);
        });
        if let Some(previous) = self.timers.insert(role, timer) {
            previous.abort();
        }
        debug!(role = %role, delay_ms = delay.as_millis() as u64, "restart scheduled");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::testing::FakeSpawner;
    use std::time::Duration;

    const DELAY: Duration = Duration::from_millis(1000);

    fn supervisor(
        spawner: &FakeSpawner,
        guard: ShutdownGuard,
    ) -> (
        Supervisor,
        mpsc::Receiver<WorkerEvent>,
        mpsc::UnboundedReceiver<Role>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let specs = Role::ALL
            .into_iter()
            .map(|role| WorkerSpec::new(role, role.as_str()).with_restart_delay(DELAY));
        let (supervisor, restarts) = Supervisor::new(
            specs,
            Arc::new(spawner.clone()),
            vec!["--flag".to_string()],
            guard,
            events_tx,
        );
        (supervisor, events_rx, restarts)
    }

    async fn next_exit(events: &mut mpsc::Receiver<WorkerEvent>) -> (Role, u64, Option<String>) {
        loop {
            match events.recv().await {
                Some(WorkerEvent::Exited {
                    role,
                    generation,
                    reason,
                }) => return (role, generation, reason),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_start_all_launches_each_role_once() {
        let spawner = FakeSpawner::new();
        let (mut supervisor, _events, _restarts) = supervisor(&spawner, ShutdownGuard::new());

        supervisor.start_all();

        for role in Role::ALL {
            assert_eq!(spawner.spawned(role), 1);
            assert_eq!(supervisor.state(role), Some(WorkerState::Running));
            assert!(supervisor.is_alive(role));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_crashes_restart_after_fixed_delay() {
        let spawner = FakeSpawner::new();
        let (mut supervisor, mut events, mut restarts) = supervisor(&spawner, ShutdownGuard::new());
        supervisor.start_all();

        for n in 1..=5 {
            assert!(spawner.crash(Role::Modem, Some("exit status: 1")));
            let (role, generation, reason) = next_exit(&mut events).await;
            supervisor.on_exit(role, generation, reason);
            assert_eq!(supervisor.state(Role::Modem), Some(WorkerState::Restarting));
            assert!(!supervisor.is_alive(Role::Modem));

            let exited_at = tokio::time::Instant::now();
            let due = restarts.recv().await.unwrap();
            assert_eq!(due, Role::Modem);
            let waited = exited_at.elapsed();
            assert!(waited >= DELAY && waited < DELAY + Duration::from_millis(5));

            assert!(supervisor.on_restart_due(due));
            assert_eq!(spawner.spawned(Role::Modem), n + 1);
            assert_eq!(spawner.live(Role::Modem), 1);
        }

        assert_eq!(spawner.overlaps(), 0);
        assert_eq!(spawner.spawned(Role::Sensor), 1);
        assert_eq!(spawner.spawned(Role::Broadcast), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_exit_does_not_restart() {
        let spawner = FakeSpawner::new();
        let (mut supervisor, _events, mut restarts) = supervisor(&spawner, ShutdownGuard::new());
        supervisor.start_all();

        let generation = supervisor.handle(Role::Sensor).unwrap().generation();
        supervisor.on_exit(Role::Sensor, generation + 7, None);

        assert_eq!(supervisor.state(Role::Sensor), Some(WorkerState::Running));
        tokio::time::sleep(DELAY * 2).await;
        assert!(restarts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_after_shutdown_does_not_spawn() {
        let spawner = FakeSpawner::new();
        let (handle, _shutdown_rx) = shutdown::channel();
        let (mut supervisor, mut events, mut restarts) =
            supervisor(&spawner, handle.guard().clone());
        supervisor.start_all();

        spawner.crash(Role::Broadcast, None);
        let (role, generation, reason) = next_exit(&mut events).await;
        supervisor.on_exit(role, generation, reason);

        // Shutdown begins while the restart timer is pending.
        handle.trigger(shutdown::ShutdownCause::Signal("SIGINT"));
        tokio::time::sleep(DELAY / 2).await;

        // A timer that already fired still must not spawn.
        assert!(!supervisor.on_restart_due(Role::Broadcast));
        assert_eq!(supervisor.state(Role::Broadcast), Some(WorkerState::Terminated));
        assert_eq!(spawner.spawned(Role::Broadcast), 1);

        tokio::time::sleep(DELAY).await;
        if let Ok(role) = restarts.try_recv() {
            assert!(!supervisor.on_restart_due(role));
        }
        assert_eq!(spawner.spawned(Role::Broadcast), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_during_shutdown_is_terminal() {
        let spawner = FakeSpawner::new();
        let (handle, _shutdown_rx) = shutdown::channel();
        let (mut supervisor, mut events, mut restarts) =
            supervisor(&spawner, handle.guard().clone());
        supervisor.start_all();

        handle.trigger(shutdown::ShutdownCause::Exit);
        spawner.crash(Role::Sensor, None);
        let (role, generation, reason) = next_exit(&mut events).await;
        supervisor.on_exit(role, generation, reason);

        assert_eq!(supervisor.state(Role::Sensor), Some(WorkerState::Terminated));
        tokio::time::sleep(DELAY * 2).await;
        assert!(restarts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_leads_to_single_restart() {
        let spawner = FakeSpawner::new();
        let (mut supervisor, mut events, mut restarts) = supervisor(&spawner, ShutdownGuard::new());
        supervisor.start_all();

        assert!(supervisor.kill(Role::Broadcast));
        // Still the live instance until its exit is observed.
        assert!(supervisor.is_alive(Role::Broadcast));
        assert!(!supervisor.kill(Role::Broadcast));

        let (role, generation, reason) = next_exit(&mut events).await;
        assert_eq!(role, Role::Broadcast);
        supervisor.on_exit(role, generation, reason);

        let due = restarts.recv().await.unwrap();
        assert!(supervisor.on_restart_due(due));
        assert_eq!(spawner.spawned(Role::Broadcast), 2);
        assert_eq!(spawner.kills(Role::Broadcast), 1);

        tokio::time::sleep(DELAY * 3).await;
        assert!(restarts.try_recv().is_err());
        assert_eq!(spawner.spawned(Role::Broadcast), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_is_retried() {
        let spawner = FakeSpawner::new();
        spawner.set_failing(Role::Sensor, true);
        let (mut supervisor, _events, mut restarts) = supervisor(&spawner, ShutdownGuard::new());
        supervisor.start_all();

        assert_eq!(supervisor.state(Role::Sensor), Some(WorkerState::Restarting));
        assert_eq!(
            supervisor.handle(Role::Sensor).unwrap().last_exit_reason(),
            Some("no such program")
        );

        spawner.set_failing(Role::Sensor, false);
        let due = restarts.recv().await.unwrap();
        assert!(supervisor.on_restart_due(due));
        assert!(supervisor.is_alive(Role::Sensor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_all_kills_and_cancels_timers() {
        let spawner = FakeSpawner::new();
        let (handle, _shutdown_rx) = shutdown::channel();
        let (mut supervisor, mut events, mut restarts) =
            supervisor(&spawner, handle.guard().clone());
        supervisor.start_all();

        spawner.crash(Role::Modem, None);
        let (role, generation, reason) = next_exit(&mut events).await;
        supervisor.on_exit(role, generation, reason);

        handle.trigger(shutdown::ShutdownCause::Signal("SIGTERM"));
        assert_eq!(supervisor.terminate_all(), 2);

        tokio::time::sleep(DELAY * 2).await;
        assert!(restarts.try_recv().is_err());
        for role in Role::ALL {
            assert_eq!(supervisor.state(role), Some(WorkerState::Terminated));
        }
        assert_eq!(spawner.total_kills(), 2);
        assert_eq!(supervisor.terminate_all(), 0);
    }

    #[tokio::test]
    async fn test_send_only_reaches_live_worker() {
        let spawner = FakeSpawner::new();
        let (mut supervisor, _events, _restarts) = supervisor(&spawner, ShutdownGuard::new());

        assert!(!supervisor.send(Role::Broadcast, serde_json::json!({"signal": 80})));

        supervisor.start_all();
        let mut inbox = spawner.take_inbox(Role::Broadcast).unwrap();
        assert!(supervisor.send(Role::Broadcast, serde_json::json!({"signal": 80})));
        assert_eq!(inbox.recv().await.unwrap(), serde_json::json!({"signal": 80}));
    }
}
