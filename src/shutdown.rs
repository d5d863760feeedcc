//! Shutdown coordination.
//!
//! Every way the process can end (termination signals, a panic in any task,
//! the orchestrator loop running out of events) goes through
//! [`ShutdownHandle::trigger`]. The first call flips the [`ShutdownGuard`]
//! and wakes the orchestrator, which then runs the cleanup exactly once:
//!
//! 1. the guard is set, so no restart timer can spawn a process any more,
//! 2. every live worker is killed,
//! 3. the broadcast session is released (best effort),
//! 4. the orchestrator returns and the process exits.
//!
//! Later calls return `false` and do nothing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// True once cleanup has begun. Cheap to clone; all clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGuard(Arc<AtomicBool>);

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag. Returns true only for the caller that flipped it.
    fn begin(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// What started the shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A termination signal, by name.
    Signal(&'static str),
    /// A task panicked.
    Panic(String),
    /// The orchestrator ran out of work.
    Exit,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal(name) => write!(f, "received {}", name),
            ShutdownCause::Panic(message) => write!(f, "panic: {}", message),
            ShutdownCause::Exit => write!(f, "normal exit"),
        }
    }
}

/// Entry point shared by all shutdown triggers.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    guard: ShutdownGuard,
    tx: mpsc::UnboundedSender<ShutdownCause>,
}

impl ShutdownHandle {
    /// Begin shutdown. Only the first call, across all clones and threads,
    /// has an effect.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        if !self.guard.begin() {
            debug!(%cause, "shutdown already in progress");
            return false;
        }
        warn!(%cause, "shutting down");
        // Receiver gone means the orchestrator already returned.
        let _ = self.tx.send(cause);
        true
    }

    pub fn guard(&self) -> &ShutdownGuard {
        &self.guard
    }
}

/// Create the guard, its trigger, and the receiving end for the orchestrator.
pub fn channel() -> (ShutdownHandle, mpsc::UnboundedReceiver<ShutdownCause>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ShutdownHandle {
        guard: ShutdownGuard::new(),
        tx,
    };
    (handle, rx)
}

/// Route termination signals to the handle.
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn listen_for_signals(handle: ShutdownHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::quit(), "SIGQUIT"),
        (SignalKind::user_defined1(), "SIGUSR1"),
        (SignalKind::user_defined2(), "SIGUSR2"),
    ];

    for (kind, name) in kinds {
        let mut stream = signal(kind)?;
        let handle = handle.clone();
        tokio::spawn(async move {
            if stream.recv().await.is_some() {
                handle.trigger(ShutdownCause::Signal(name));
            }
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn listen_for_signals(handle: ShutdownHandle) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.trigger(ShutdownCause::Signal("ctrl-c"));
        }
    });
    Ok(())
}

/// Turn a panic anywhere in the process into a shutdown.
///
/// The previously installed hook still runs afterwards.
pub fn install_panic_hook(handle: ShutdownHandle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = panic_message(info);
        error!(panic = %message, "uncaught panic");
        handle.trigger(ShutdownCause::Panic(message));
        previous(info);
    }));
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    let text = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown".to_string());
    match info.location() {
        Some(location) => format!("{} at {}:{}", text, location.file(), location.line()),
        None => text,
    }
}
