//! Launching worker processes.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use roadcast_types::Role;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{WorkerEvent, WorkerMessage, WorkerSpec};

/// Payloads queued for a worker's stdin before new ones are dropped.
pub const INBOX_CAPACITY: usize = 64;

/// How long to keep draining stdout after the process exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Everything needed to launch one worker instance.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    pub spec: &'a WorkerSpec,
    /// The orchestrator's own command-line arguments, appended unchanged.
    pub launch_args: &'a [String],
    /// Tags every event of this instance so stale ones can be told apart.
    pub generation: u64,
    pub events: mpsc::Sender<WorkerEvent>,
}

/// Starts worker instances.
///
/// Implementations must eventually send exactly one
/// [`WorkerEvent::Exited`] for every worker they successfully start.
pub trait Spawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest<'_>) -> io::Result<LiveWorker>;
}

/// Connection to one running worker instance.
#[derive(Debug)]
pub struct LiveWorker {
    pid: Option<u32>,
    inbox: mpsc::Sender<Value>,
    kill: Option<oneshot::Sender<()>>,
}

impl LiveWorker {
    pub fn new(pid: Option<u32>, inbox: mpsc::Sender<Value>, kill: oneshot::Sender<()>) -> Self {
        Self {
            pid,
            inbox,
            kill: Some(kill),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a payload without waiting. Returns false if it was dropped.
    pub fn send(&self, payload: Value) -> bool {
        self.inbox.try_send(payload).is_ok()
    }

    /// Request termination. Only the first call does anything.
    pub fn kill(&mut self) -> bool {
        match self.kill.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Spawns real OS processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, request: SpawnRequest<'_>) -> io::Result<LiveWorker> {
        let SpawnRequest {
            spec,
            launch_args,
            generation,
            events,
        } = request;

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .args(launch_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let role = spec.role;
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_inbox(stdin, inbox_rx, role));
        }
        let reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_messages(stdout, role, generation, events.clone())));

        tokio::spawn(async move {
            let reason = wait_or_kill(&mut child, kill_rx).await;
            if let Some(reader) = reader {
                // Deliver buffered output before the exit notification.
                let _ = tokio::time::timeout(DRAIN_TIMEOUT, reader).await;
            }
            let _ = events
                .send(WorkerEvent::Exited {
                    role,
                    generation,
                    reason,
                })
                .await;
        });

        Ok(LiveWorker::new(pid, inbox_tx, kill_tx))
    }
}

/// Wait for the child, killing it first if asked to (or if the handle is gone).
async fn wait_or_kill(child: &mut Child, kill_rx: oneshot::Receiver<()>) -> Option<String> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "kill request on exited worker");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => describe_exit(status),
        Err(e) => Some(format!("wait failed: {}", e)),
    }
}

/// `None` for a clean exit, otherwise a short description.
pub(crate) fn describe_exit(status: ExitStatus) -> Option<String> {
    if status.success() {
        None
    } else {
        Some(status.to_string())
    }
}

/// Forward each stdout line as a decoded message until EOF.
pub(crate) async fn read_messages<R>(
    reader: R,
    role: Role,
    generation: u64,
    events: mpsc::Sender<WorkerEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let event = WorkerEvent::Message {
                    role,
                    generation,
                    message: WorkerMessage::decode(trimmed),
                };
                if events.send(event).await.is_err() {
                    // Orchestrator gone
                    break;
                }
            }
            Err(e) => {
                warn!(role = %role, error = %e, "worker output unreadable");
                break;
            }
        }
    }
}

/// Write queued payloads as JSON lines until the handle goes away.
pub(crate) async fn write_inbox<W>(mut writer: W, mut inbox: mpsc::Receiver<Value>, role: Role)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(payload) = inbox.recv().await {
        let mut line = match serde_json::to_vec(&payload) {
            Ok(line) => line,
            Err(e) => {
                warn!(role = %role, error = %e, "payload not serializable");
                continue;
            }
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() || writer.flush().await.is_err() {
            // Worker closed its stdin or exited
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_messages_decodes_each_line() {
        let data = "23.4\n\nConnected\n{\"name\":\"DOMException\"}\n";
        let (tx, mut rx) = mpsc::channel(16);

        read_messages(Cursor::new(data), Role::Broadcast, 7, tx).await;

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkerEvent::Message {
                    role,
                    generation,
                    message,
                } => {
                    assert_eq!(role, Role::Broadcast);
                    assert_eq!(generation, 7);
                    messages.push(message);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(
            messages,
            vec![
                WorkerMessage::Temperature(23.4),
                WorkerMessage::Log("Connected".to_string()),
                WorkerMessage::Sentinel,
            ]
        );
    }

    #[tokio::test]
    async fn test_read_messages_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        // Must return instead of spinning on a closed channel.
        read_messages(Cursor::new("1\n2\n3\n"), Role::Sensor, 1, tx).await;
    }

    #[tokio::test]
    async fn test_write_inbox_emits_json_lines() {
        let (tx, rx) = mpsc::channel(4);
        let (client, mut server) = tokio::io::duplex(1024);

        let writer = tokio::spawn(write_inbox(client, rx, Role::Broadcast));
        tx.send(json!({"signal": 80})).await.unwrap();
        tx.send(json!(23.4)).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, "{\"signal\":80}\n23.4\n");
    }

    #[test]
    fn test_live_worker_kill_is_idempotent() {
        let (inbox, _inbox_rx) = mpsc::channel(1);
        let (kill, mut kill_rx) = oneshot::channel();
        let mut worker = LiveWorker::new(Some(42), inbox, kill);

        assert!(worker.kill());
        assert!(!worker.kill());
        assert!(kill_rx.try_recv().is_ok());
    }

    #[test]
    fn test_live_worker_send_drops_when_full() {
        let (inbox, _inbox_rx) = mpsc::channel(1);
        let (kill, _kill_rx) = oneshot::channel();
        let worker = LiveWorker::new(None, inbox, kill);

        assert!(worker.send(json!(1)));
        assert!(!worker.send(json!(2)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_spawner_round_trip() {
        let spec = WorkerSpec::new(Role::Modem, "sh")
            .with_args(["-c", "read line; echo \"$line\"; exit 3"]);
        let (tx, mut rx) = mpsc::channel(16);
        let worker = ProcessSpawner
            .spawn(SpawnRequest {
                spec: &spec,
                launch_args: &[],
                generation: 1,
                events: tx,
            })
            .unwrap();
        assert!(worker.pid().is_some());
        assert!(worker.send(json!({"ping": true})));

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            WorkerEvent::Message {
                role: Role::Modem,
                generation: 1,
                message: WorkerMessage::Reading(json!({"ping": true})),
            }
        );

        match rx.recv().await.unwrap() {
            WorkerEvent::Exited { role, reason, .. } => {
                assert_eq!(role, Role::Modem);
                assert!(reason.unwrap().contains('3'));
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_spawner_forwards_launch_args() {
        let spec = WorkerSpec::new(Role::Sensor, "sh")
            .with_args(["-c", "echo \"\\\"$0 $1\\\"\"", "sh"]);
        let (tx, mut rx) = mpsc::channel(16);
        let launch_args = vec!["--verbose".to_string()];
        let _worker = ProcessSpawner
            .spawn(SpawnRequest {
                spec: &spec,
                launch_args: &launch_args,
                generation: 1,
                events: tx,
            })
            .unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::Message { message, .. } => {
                assert_eq!(message, WorkerMessage::Log("sh --verbose".to_string()));
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_spawner_kill_reports_exit() {
        let spec = WorkerSpec::new(Role::Broadcast, "sleep").with_args(["30"]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut worker = ProcessSpawner
            .spawn(SpawnRequest {
                spec: &spec,
                launch_args: &[],
                generation: 4,
                events: tx,
            })
            .unwrap();

        assert!(worker.kill());
        match rx.recv().await.unwrap() {
            WorkerEvent::Exited {
                generation, reason, ..
            } => {
                assert_eq!(generation, 4);
                assert!(reason.is_some());
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }
}
