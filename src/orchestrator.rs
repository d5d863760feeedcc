//! The orchestration loop.
//!
//! A single task owns the [`Supervisor`], the [`Router`] and the
//! [`Aggregator`] and reacts to four kinds of input:
//!
//! - worker output and exits,
//! - restart timers,
//! - the poll tick and the results of status polls,
//! - the shutdown trigger.
//!
//! Status polls run on the blocking pool; at most one fetch-and-publish cycle
//! is in flight, and a stalled poll never delays worker or shutdown handling.

use std::sync::Arc;
use std::time::Duration;

use roadcast_types::Role;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::Settings;
use crate::error::{FetchError, RoomError};
use crate::router::Router;
use crate::session::SessionRelease;
use crate::shutdown::{self, ShutdownCause, ShutdownHandle};
use crate::supervisor::{Supervisor, EVENT_CAPACITY};
use crate::telemetry::{
    fetch_report, Aggregator, MetadataPublisher, StatusProvider, StatusReport,
};
use crate::worker::{Spawner, WorkerEvent, WorkerSpec};

/// How long cleanup waits for killed workers to report their exit.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// External collaborators of the loop.
pub struct Collaborators {
    pub spawner: Arc<dyn Spawner>,
    pub status: Arc<dyn StatusProvider>,
    pub publisher: Arc<dyn MetadataPublisher>,
    pub session: Arc<dyn SessionRelease>,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cause: ShutdownCause,
    /// Kill requests delivered to live workers.
    pub killed: usize,
    /// Whether the broadcast session was released.
    pub released: bool,
}

enum PollEvent {
    Fetched(Result<StatusReport, FetchError>),
    Published(Result<(), RoomError>),
}

pub struct Orchestrator {
    supervisor: Supervisor,
    router: Router,
    aggregator: Aggregator,
    status: Arc<dyn StatusProvider>,
    publisher: Arc<dyn MetadataPublisher>,
    session: Arc<dyn SessionRelease>,
    shutdown: ShutdownHandle,
    shutdown_rx: mpsc::UnboundedReceiver<ShutdownCause>,
    events: mpsc::Receiver<WorkerEvent>,
    restarts: mpsc::UnboundedReceiver<Role>,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        specs: Vec<WorkerSpec>,
        launch_args: Vec<String>,
        poll_interval: Duration,
        aggregator: Aggregator,
        collaborators: Collaborators,
    ) -> Self {
        let (shutdown, shutdown_rx) = shutdown::channel();
        let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);
        let (supervisor, restarts) = Supervisor::new(
            specs,
            collaborators.spawner,
            launch_args,
            shutdown.guard().clone(),
            events_tx,
        );

        Self {
            supervisor,
            router: Router::new(),
            aggregator,
            status: collaborators.status,
            publisher: collaborators.publisher,
            session: collaborators.session,
            shutdown,
            shutdown_rx,
            events,
            restarts,
            poll_interval,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        launch_args: Vec<String>,
        collaborators: Collaborators,
    ) -> Self {
        let specs = Role::ALL
            .into_iter()
            .map(|role| WorkerSpec::from_settings(role, settings))
            .collect();
        Self::new(
            specs,
            launch_args,
            settings.telemetry.poll_interval,
            Aggregator::from_settings(&settings.telemetry),
            collaborators,
        )
    }

    /// Handle used by signal listeners and the panic hook.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Start every worker and run until shutdown, then clean up.
    pub async fn run(mut self) -> ShutdownReport {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "starting workers");
        self.supervisor.start_all();

        let mut poll = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (poll_tx, mut poll_rx) = mpsc::channel::<PollEvent>(4);
        let mut polling = false;

        let cause = loop {
            tokio::select! {
                biased;

                Some(cause) = self.shutdown_rx.recv() => break cause,

                event = self.events.recv() => match event {
                    Some(event) => self.on_worker_event(event),
                    None => {
                        self.shutdown.trigger(ShutdownCause::Exit);
                    }
                },

                Some(role) = self.restarts.recv() => {
                    self.supervisor.on_restart_due(role);
                }

                Some(event) = poll_rx.recv() => match event {
                    PollEvent::Fetched(result) => {
                        polling = self.on_poll_result(result, &poll_tx);
                    }
                    PollEvent::Published(result) => {
                        polling = false;
                        if let Err(e) = result {
                            warn!(error = %e, "failed to publish telemetry");
                        }
                    }
                },

                _ = poll.tick() => {
                    if self.shutdown.guard().is_set() {
                        continue;
                    }
                    if polling {
                        debug!("previous status poll still running, skipping tick");
                        continue;
                    }
                    polling = true;
                    self.spawn_fetch(poll_tx.clone());
                }
            }
        };

        self.cleanup(cause).await
    }

    /// [`run`](Self::run) on its own task. If the loop panics, the GPS is
    /// still turned off and the broadcast session still released; workers
    /// die with their dropped handles.
    pub async fn run_guarded(self) -> ShutdownReport {
        let status = Arc::clone(&self.status);
        let session = Arc::clone(&self.session);
        let shutdown = self.shutdown.clone();

        match tokio::spawn(self.run()).await {
            Ok(report) => report,
            Err(e) => {
                let cause = ShutdownCause::Panic(e.to_string());
                shutdown.trigger(cause.clone());
                error!(error = %e, "orchestrator loop failed, releasing resources");
                disable_gps(status).await;
                ShutdownReport {
                    cause,
                    killed: 0,
                    released: release_session(session.as_ref()).await,
                }
            }
        }
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Message {
                role,
                generation,
                message,
            } => {
                if !self.supervisor.is_current(role, generation) {
                    trace!(role = %role, generation, "dropping output of a previous instance");
                    return;
                }
                if role == Role::Sensor {
                    if let Some(sample) = message.temperature() {
                        self.aggregator.record_temperature(sample);
                    }
                }
                self.router.route(&mut self.supervisor, role, message);
            }
            WorkerEvent::Exited {
                role,
                generation,
                reason,
            } => self.supervisor.on_exit(role, generation, reason),
        }
    }

    fn spawn_fetch(&self, tx: mpsc::Sender<PollEvent>) {
        let status = Arc::clone(&self.status);
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || fetch_report(status.as_ref()))
                .await
                .unwrap_or_else(|e| {
                    Err(FetchError::Command(format!("status poll aborted: {}", e)))
                });
            let _ = tx.send(PollEvent::Fetched(result)).await;
        });
    }

    /// Returns whether the poll cycle is still in flight.
    fn on_poll_result(
        &mut self,
        result: Result<StatusReport, FetchError>,
        tx: &mpsc::Sender<PollEvent>,
    ) -> bool {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "status poll failed, keeping previous snapshot");
                return false;
            }
        };

        let Some(snapshot) = self.aggregator.observe(report) else {
            trace!("telemetry unchanged");
            return false;
        };
        info!("telemetry changed, updating room metadata");
        debug!(?snapshot, "new snapshot");

        let publisher = Arc::clone(&self.publisher);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = publisher.publish(&snapshot).await;
            let _ = tx.send(PollEvent::Published(result)).await;
        });
        true
    }

    async fn cleanup(mut self, cause: ShutdownCause) -> ShutdownReport {
        info!(%cause, "cleaning up");
        let killed = self.supervisor.terminate_all();
        self.await_exits().await;
        disable_gps(Arc::clone(&self.status)).await;

        ShutdownReport {
            cause,
            killed,
            released: release_session(self.session.as_ref()).await,
        }
    }

    /// Collect exit notifications of killed workers, bounded by [`EXIT_GRACE`].
    async fn await_exits(&mut self) {
        let deadline = Instant::now() + EXIT_GRACE;
        while self.supervisor.roles().any(|role| self.supervisor.is_alive(role)) {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(WorkerEvent::Exited {
                    role,
                    generation,
                    reason,
                })) => self.supervisor.on_exit(role, generation, reason),
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!("workers still running after kill");
                    break;
                }
            }
        }
    }
}

/// Best effort, bounded by [`EXIT_GRACE`].
async fn disable_gps(status: Arc<dyn StatusProvider>) {
    let task = tokio::task::spawn_blocking(move || status.disable_gps());
    match tokio::time::timeout(EXIT_GRACE, task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "failed to disable GPS"),
        Ok(Err(e)) => warn!(error = %e, "GPS disable aborted"),
        Err(_) => warn!("GPS disable timed out"),
    }
}

async fn release_session(session: &dyn SessionRelease) -> bool {
    match session.release().await {
        Ok(()) => {
            info!("broadcast session released");
            true
        }
        Err(e) => {
            error!(error = %e, "failed to release broadcast session");
            false
        }
    }
}
