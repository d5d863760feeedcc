//! Supervised workers.
//!
//! A worker is an external process playing one [`Role`]. The orchestrator
//! talks to it through newline-delimited JSON: payloads for the worker are
//! written to its stdin, and every line it prints on stdout comes back as a
//! [`WorkerEvent::Message`]. When the process ends, exactly one
//! [`WorkerEvent::Exited`] follows its last message.
//!
//! ```text
//!             stdin (NDJSON)              stdout (NDJSON)
//!  WorkerHandle ──────────────▶ process ──────────────▶ WorkerEvent::Message
//!       │                          │
//!       └──── kill ───────────────▶└─── exit ─────────▶ WorkerEvent::Exited
//! ```

mod handle;
mod message;
mod spawner;

pub use handle::{WorkerHandle, WorkerState};
pub use message::{is_sentinel, WorkerMessage, SENTINEL};
pub use spawner::{LiveWorker, ProcessSpawner, SpawnRequest, Spawner, INBOX_CAPACITY};

use std::time::Duration;

use roadcast_types::Role;

use crate::config::Settings;

/// Fixed restart delay used when none is configured.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// How to launch the worker for one role. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub role: Role,
    pub program: String,
    pub args: Vec<String>,
    pub restart_delay: Duration,
}

impl WorkerSpec {
    pub fn new(role: Role, program: impl Into<String>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Spec for a role as configured.
    pub fn from_settings(role: Role, settings: &Settings) -> Self {
        let command = settings.workers.command(role);
        Self::new(role, command.program.clone())
            .with_args(command.args.iter().cloned())
            .with_restart_delay(settings.restart_delay)
    }
}

/// Notification from a running worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// One decoded line of worker output.
    Message {
        role: Role,
        generation: u64,
        message: WorkerMessage,
    },
    /// The worker process is gone. `reason` is `None` for a clean exit.
    Exited {
        role: Role,
        generation: u64,
        reason: Option<String>,
    },
}

impl WorkerEvent {
    pub fn role(&self) -> Role {
        match self {
            WorkerEvent::Message { role, .. } | WorkerEvent::Exited { role, .. } => *role,
        }
    }
}
