//! Message relay between workers.
//!
//! Modem and Sensor output is forwarded verbatim to the broadcaster, at most
//! once and only while it is alive. Nothing is queued or retried. Broadcast
//! output is never relayed: it is checked for the sentinel and otherwise
//! logged.

use roadcast_types::Role;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::supervisor::Supervisor;
use crate::worker::WorkerMessage;

/// Where routed messages go.
pub trait Outbox {
    fn is_alive(&self, role: Role) -> bool;

    /// Best-effort delivery; false when the payload was dropped.
    fn send(&mut self, role: Role, payload: Value) -> bool;

    fn kill(&mut self, role: Role) -> bool;
}

impl Outbox for Supervisor {
    fn is_alive(&self, role: Role) -> bool {
        Supervisor::is_alive(self, role)
    }

    fn send(&mut self, role: Role, payload: Value) -> bool {
        Supervisor::send(self, role, payload)
    }

    fn kill(&mut self, role: Role) -> bool {
        Supervisor::kill(self, role)
    }
}

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the broadcaster.
    Forwarded,
    /// The broadcaster is not alive or its inbox is full.
    Dropped,
    /// Broadcast output, logged only.
    Logged,
    /// The broadcaster reported a fatal in-page failure and was killed.
    Killed,
}

/// Relay counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub sentinels: u64,
}

#[derive(Debug, Default)]
pub struct Router {
    stats: RouterStats,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Route one decoded message from `from`.
    pub fn route(
        &mut self,
        outbox: &mut dyn Outbox,
        from: Role,
        message: WorkerMessage,
    ) -> Delivery {
        if !from.is_relayed() {
            return self.inspect_broadcast(outbox, message);
        }

        if let WorkerMessage::Log(text) = &message {
            info!(role = %from, "{}", text);
        }

        if !outbox.is_alive(Role::Broadcast) {
            trace!(role = %from, "broadcaster down, dropping message");
            self.stats.dropped += 1;
            return Delivery::Dropped;
        }
        if outbox.send(Role::Broadcast, message.to_value()) {
            self.stats.forwarded += 1;
            Delivery::Forwarded
        } else {
            debug!(role = %from, "broadcaster inbox full, dropping message");
            self.stats.dropped += 1;
            Delivery::Dropped
        }
    }

    fn inspect_broadcast(&mut self, outbox: &mut dyn Outbox, message: WorkerMessage) -> Delivery {
        match message {
            WorkerMessage::Sentinel => {
                warn!("broadcaster reported a fatal page error, killing it");
                self.stats.sentinels += 1;
                outbox.kill(Role::Broadcast);
                Delivery::Killed
            }
            WorkerMessage::Log(text) => {
                info!(role = %Role::Broadcast, "{}", text);
                Delivery::Logged
            }
            other => {
                debug!(role = %Role::Broadcast, payload = %other.to_value(), "broadcast output");
                Delivery::Logged
            }
        }
    }
}
