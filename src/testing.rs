//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use roadcast_types::{Role, TelemetrySnapshot, UpsState};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{FetchError, RoomError};
use crate::session::SessionRelease;
use crate::telemetry::{MetadataPublisher, StatusProvider};
use crate::worker::{LiveWorker, SpawnRequest, Spawner, WorkerEvent, WorkerMessage};

/// Reason reported for instances killed through their handle.
pub(crate) const KILLED: &str = "signal: 9 (SIGKILL)";

struct Instance {
    role: Role,
    generation: u64,
    events: mpsc::Sender<WorkerEvent>,
    exited: Arc<AtomicBool>,
    inbox: Option<mpsc::Receiver<Value>>,
}

#[derive(Default)]
struct State {
    instances: Vec<Instance>,
    live: HashMap<Role, usize>,
    kills: HashMap<Role, usize>,
    failing: HashSet<Role>,
    overlaps: usize,
}

/// In-memory spawner.
///
/// Killed instances report an exit right away; `crash` simulates an
/// unexpected exit. Spawning a role that still has a live instance is
/// counted as an overlap.
#[derive(Clone, Default)]
pub(crate) struct FakeSpawner {
    state: Arc<Mutex<State>>,
}

impl FakeSpawner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawned(&self, role: Role) -> usize {
        self.state
            .lock()
            .instances
            .iter()
            .filter(|i| i.role == role)
            .count()
    }

    pub(crate) fn live(&self, role: Role) -> usize {
        self.state.lock().live.get(&role).copied().unwrap_or(0)
    }

    pub(crate) fn kills(&self, role: Role) -> usize {
        self.state.lock().kills.get(&role).copied().unwrap_or(0)
    }

    pub(crate) fn total_kills(&self) -> usize {
        self.state.lock().kills.values().sum()
    }

    pub(crate) fn overlaps(&self) -> usize {
        self.state.lock().overlaps
    }

    /// Make the next spawns of `role` fail.
    pub(crate) fn set_failing(&self, role: Role, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(role);
        } else {
            state.failing.remove(&role);
        }
    }

    /// Report an unexpected exit of the latest instance of `role`.
    pub(crate) fn crash(&self, role: Role, reason: Option<&str>) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(instance) = state
            .instances
            .iter()
            .rev()
            .find(|i| i.role == role && !i.exited.load(Ordering::SeqCst))
        else {
            return false;
        };
        instance.exited.store(true, Ordering::SeqCst);
        let sent = instance
            .events
            .try_send(WorkerEvent::Exited {
                role,
                generation: instance.generation,
                reason: reason.map(str::to_string),
            })
            .is_ok();
        if let Some(live) = state.live.get_mut(&role) {
            *live = live.saturating_sub(1);
        }
        sent
    }

    /// Emit a line of output from the latest instance of `role`.
    pub(crate) fn emit(&self, role: Role, message: WorkerMessage) -> bool {
        let state = self.state.lock();
        match state.instances.iter().rev().find(|i| i.role == role) {
            Some(instance) => instance
                .events
                .try_send(WorkerEvent::Message {
                    role,
                    generation: instance.generation,
                    message,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Take the stdin side of the latest instance of `role`.
    pub(crate) fn take_inbox(&self, role: Role) -> Option<mpsc::Receiver<Value>> {
        let mut state = self.state.lock();
        state
            .instances
            .iter_mut()
            .rev()
            .find(|i| i.role == role)
            .and_then(|i| i.inbox.take())
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, request: SpawnRequest<'_>) -> io::Result<LiveWorker> {
        let role = request.spec.role;
        let generation = request.generation;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.failing.contains(&role) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }

        let live = state.live.entry(role).or_insert(0);
        if *live > 0 {
            state.overlaps += 1;
        }
        *live += 1;

        let (inbox_tx, inbox_rx) = mpsc::channel(16);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let exited = Arc::new(AtomicBool::new(false));

        let watcher_state = Arc::clone(&self.state);
        let watcher_exited = Arc::clone(&exited);
        let events = request.events.clone();
        tokio::spawn(async move {
            if kill_rx.await.is_err() {
                return;
            }
            {
                let mut state = watcher_state.lock();
                *state.kills.entry(role).or_insert(0) += 1;
                if watcher_exited.swap(true, Ordering::SeqCst) {
                    return;
                }
                if let Some(live) = state.live.get_mut(&role) {
                    *live = live.saturating_sub(1);
                }
            }
            let _ = events
                .send(WorkerEvent::Exited {
                    role,
                    generation,
                    reason: Some(KILLED.to_string()),
                })
                .await;
        });

        state.instances.push(Instance {
            role,
            generation,
            events: request.events,
            exited,
            inbox: Some(inbox_rx),
        });
        Ok(LiveWorker::new(Some(1000 + generation as u32), inbox_tx, kill_tx))
    }
}

/// Status provider replaying canned `(modem, location)` outputs.
///
/// The last entry repeats once the script is exhausted.
pub(crate) struct ScriptedStatus {
    script: Mutex<VecDeque<Result<(String, String), String>>>,
    last: Mutex<Option<Result<(String, String), String>>>,
    ups: Mutex<UpsState>,
    calls: AtomicUsize,
    gps_disables: AtomicUsize,
}

impl ScriptedStatus {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            ups: Mutex::new(UpsState::default()),
            calls: AtomicUsize::new(0),
            gps_disables: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_ups(self, ups: UpsState) -> Self {
        self.set_ups(ups);
        self
    }

    /// Reported by every following poll.
    pub(crate) fn set_ups(&self, ups: UpsState) {
        *self.ups.lock() = ups;
    }

    pub(crate) fn gps_disables(&self) -> usize {
        self.gps_disables.load(Ordering::SeqCst)
    }

    pub(crate) fn then_ok(self, modem: &str, location: &str) -> Self {
        self.script
            .lock()
            .push_back(Ok((modem.to_string(), location.to_string())));
        self
    }

    pub(crate) fn then_err(self, error: &str) -> Self {
        self.script.lock().push_back(Err(error.to_string()));
        self
    }

    /// Number of completed polls.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<(String, String), String> {
        let mut script = self.script.lock();
        let mut last = self.last.lock();
        if let Some(entry) = script.pop_front() {
            *last = Some(entry);
        }
        last.clone().unwrap_or_else(|| Err("no script".to_string()))
    }
}

impl StatusProvider for ScriptedStatus {
    fn modem_status(&self) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next()
            .map(|(modem, _)| modem)
            .map_err(FetchError::Command)
    }

    fn location_status(&self) -> Result<String, FetchError> {
        let last = self.last.lock();
        match last.as_ref() {
            Some(Ok((_, location))) => Ok(location.clone()),
            Some(Err(error)) => Err(FetchError::Command(error.clone())),
            None => Err(FetchError::Empty),
        }
    }

    fn ups_status(&self) -> UpsState {
        *self.ups.lock()
    }

    fn disable_gps(&self) -> Result<(), FetchError> {
        self.gps_disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Status provider whose modem query blocks until the paired sender is
/// dropped. Later queries return right away.
pub(crate) struct BlockingStatus {
    unblock: Mutex<std_mpsc::Receiver<()>>,
    modem: String,
    location: String,
    calls: AtomicUsize,
}

impl BlockingStatus {
    pub(crate) fn new(modem: &str, location: &str) -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        let status = Self {
            unblock: Mutex::new(rx),
            modem: modem.to_string(),
            location: location.to_string(),
            calls: AtomicUsize::new(0),
        };
        (status, tx)
    }

    /// Number of started polls.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatusProvider for BlockingStatus {
    fn modem_status(&self) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.unblock.lock().recv();
        Ok(self.modem.clone())
    }

    fn location_status(&self) -> Result<String, FetchError> {
        Ok(self.location.clone())
    }
}

/// Publisher recording every snapshot it is given.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    published: Mutex<Vec<TelemetrySnapshot>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::SeqCst);
        publisher
    }

    pub(crate) fn published(&self) -> Vec<TelemetrySnapshot> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl MetadataPublisher for RecordingPublisher {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), RoomError> {
        self.published.lock().push(snapshot.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(RoomError::Timeout);
        }
        Ok(())
    }
}

/// Session counting release calls.
#[derive(Default)]
pub(crate) struct CountingSession {
    releases: AtomicUsize,
}

impl CountingSession {
    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionRelease for CountingSession {
    async fn release(&self) -> Result<(), RoomError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
