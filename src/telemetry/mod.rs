//! Change-gated telemetry pipeline.
//!
//! ```text
//!  StatusProvider ─(blocking)─▶ StatusReport ─┐
//!                                             ├─▶ Aggregator ─▶ MetadataPublisher
//!  Sensor samples ─▶ SmoothingFilter ─────────┘   (only on change)
//! ```
//!
//! The status commands block, so [`fetch_report`] is meant to run on
//! tokio's blocking pool. Its result is handed back to the orchestrator loop,
//! which owns the [`Aggregator`].

mod aggregator;
mod host;
mod modem;
mod parse;
mod publish;

pub use aggregator::Aggregator;
pub use host::{
    parse_cpu_load, parse_cpu_temperature, parse_power, ups_capacity, ups_voltage, HostStatus,
};
pub use modem::{discover_modem, parse_modem_list, MmcliStatus};
pub use parse::{
    nmea_field, number, parse_location_status, parse_modem_status, parse_number, LocationStatus,
    ModemStatus,
};
pub use publish::{MetadataPublisher, RoomMetadata};

use roadcast_types::{SystemState, TelemetrySnapshot, UpsState};

use crate::error::FetchError;

/// Source of modem, location and host status.
///
/// Every call may block; they are only ever made from the blocking pool.
pub trait StatusProvider: Send + Sync {
    /// Raw output of the modem status query.
    fn modem_status(&self) -> Result<String, FetchError>;

    /// Raw output of the location status query.
    fn location_status(&self) -> Result<String, FetchError>;

    /// Host board readings. Unknown fields stay `None`.
    fn system_status(&self) -> SystemState {
        SystemState::default()
    }

    fn ups_status(&self) -> UpsState {
        UpsState::default()
    }

    /// Turn the GPS receiver off again. Called once during cleanup.
    fn disable_gps(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// The production provider: the modem via mmcli plus the host board.
#[derive(Debug, Clone)]
pub struct ApplianceStatus {
    pub modem: MmcliStatus,
    pub host: HostStatus,
}

impl StatusProvider for ApplianceStatus {
    fn modem_status(&self) -> Result<String, FetchError> {
        self.modem.modem_status()
    }

    fn location_status(&self) -> Result<String, FetchError> {
        self.modem.location_status()
    }

    fn system_status(&self) -> SystemState {
        self.host.system()
    }

    fn ups_status(&self) -> UpsState {
        self.host.ups()
    }

    fn disable_gps(&self) -> Result<(), FetchError> {
        self.modem.disable_gps()
    }
}

/// Parsed result of one status poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub modem: ModemStatus,
    pub location: LocationStatus,
    pub system: SystemState,
    pub ups: UpsState,
}

impl StatusReport {
    /// Merge with the current smoothed temperature.
    pub fn into_snapshot(self, temperature: Option<f64>) -> TelemetrySnapshot {
        let StatusReport {
            modem,
            location,
            system,
            ups,
        } = self;
        TelemetrySnapshot {
            tech: modem.tech,
            signal: modem.signal,
            longitude: location.longitude,
            latitude: location.latitude,
            altitude: location.altitude,
            speed: location.speed,
            satellites: location.satellites,
            hdop: location.hdop,
            temperature,
            system,
            ups,
        }
    }
}

/// Query and parse both statuses, then read the host. A modem or location
/// failure fails the whole poll; host readings never do.
pub fn fetch_report(provider: &dyn StatusProvider) -> Result<StatusReport, FetchError> {
    let modem = parse_modem_status(&provider.modem_status()?)?;
    let location = parse_location_status(&provider.location_status()?)?;
    Ok(StatusReport {
        modem,
        location,
        system: provider.system_status(),
        ups: provider.ups_status(),
    })
}
