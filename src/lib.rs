//! # roadcast
//!
//! Unattended control plane for a vehicle-mounted telemetry and livestream
//! appliance.
//!
//! The orchestrator keeps three long-lived workers running (modem monitor,
//! sensor reader and broadcaster), relays what the first two print to the
//! broadcaster, and publishes a deduplicated telemetry snapshot as LiveKit
//! room metadata.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │                                                                  │
//! │  ┌────────┐  NDJSON   ┌──────────┐  relay   ┌───────────┐        │
//! │  │ modem  │──────────▶│          │─────────▶│ broadcast │        │
//! │  │ sensor │──────────▶│  router  │◀─────────│  (stdin)  │        │
//! │  └───┬────┘           └────┬─────┘ sentinel └─────▲─────┘        │
//! │      │ exit                │ temperature          │ restart      │
//! │      ▼                     ▼                      │              │
//! │  ┌────────────┐      ┌────────────┐        ┌──────┴─────┐        │
//! │  │ supervisor │      │ aggregator │◀─poll──│ mmcli/host │        │
//! │  └────────────┘      └─────┬──────┘        └────────────┘        │
//! │                            │ changed snapshot                    │
//! │                            ▼                                     │
//! │                      LiveKit room metadata                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`supervisor`]**: one [`WorkerHandle`](worker::WorkerHandle) per role,
//!   restarts after a fixed delay, never while shutting down
//! - **[`router`]**: forwards Modem/Sensor output to the broadcaster and
//!   watches the broadcaster for its fatal-error sentinel
//! - **[`telemetry`]**: status polling, parsing and change-gated publishing
//! - **[`shutdown`]**: idempotent cleanup triggered by signals or panics
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use roadcast::{
//!     ApplianceStatus, Collaborators, HostStatus, MmcliStatus, Orchestrator, ProcessSpawner,
//!     RoomClient, Settings,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::load("roadcast.toml".as_ref(), false)?;
//! let room = Arc::new(RoomClient::from_settings(&settings.livekit)?);
//! let status = ApplianceStatus {
//!     modem: MmcliStatus::from_settings(&settings.telemetry)?,
//!     host: HostStatus::from_settings(&settings.telemetry.host),
//! };
//!
//! let orchestrator = Orchestrator::from_settings(
//!     &settings,
//!     vec![],
//!     Collaborators {
//!         spawner: Arc::new(ProcessSpawner),
//!         status: Arc::new(status),
//!         publisher: room.clone(),
//!         session: room,
//!     },
//! );
//! let report = orchestrator.run_guarded().await;
//! println!("{}", report.cause);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod livekit;
pub mod logging;
pub mod orchestrator;
pub mod privilege;
pub mod router;
pub mod session;
pub mod shutdown;
pub mod smoothing;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use error::{FetchError, RoomError, StartError, StartupError};
pub use livekit::RoomClient;
pub use orchestrator::{Collaborators, Orchestrator, ShutdownReport};
pub use router::{Delivery, Router};
pub use shutdown::{ShutdownCause, ShutdownHandle};
pub use smoothing::SmoothingFilter;
pub use supervisor::Supervisor;
pub use telemetry::{
    Aggregator, ApplianceStatus, HostStatus, MetadataPublisher, MmcliStatus, StatusProvider,
};
pub use worker::{ProcessSpawner, WorkerMessage, WorkerSpec};

pub use roadcast_types::{Role, TelemetrySnapshot};
