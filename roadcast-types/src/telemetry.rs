//! TelemetrySnapshot - a point-in-time view of the appliance.

use alloc::string::String;

/// Host board readings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SystemState {
    /// Total power draw in watts.
    pub watts: Option<f64>,

    /// CPU temperature in degrees Celsius.
    pub temperature: Option<f64>,

    /// Cooling fan speed in RPM.
    pub fan: Option<f64>,

    /// CPU load in percent.
    pub load: Option<f64>,
}

/// Battery pack readings from the UPS fuel gauge.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct UpsState {
    /// Cell voltage in volts.
    pub voltage: Option<f64>,

    /// State of charge in percent.
    pub capacity: Option<f64>,
}

/// One merged telemetry reading: modem, location and temperature.
///
/// Every numeric field is optional because the underlying sources are
/// unreliable; a field the modem could not report is `None`, never zero.
/// Snapshots are compared structurally (`PartialEq`) to decide whether a new
/// reading is worth publishing.
///
/// # Example
///
/// ```rust
/// use roadcast_types::TelemetrySnapshot;
///
/// let a = TelemetrySnapshot::builder().tech("lte").signal(80.0).build();
/// let b = TelemetrySnapshot::builder().tech("lte").signal(80.0).build();
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySnapshot {
    /// Access technology reported by the modem (e.g. "lte", "5gnr").
    pub tech: Option<String>,

    /// Signal quality in percent.
    pub signal: Option<f64>,

    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,

    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,

    /// Altitude in meters.
    pub altitude: Option<f64>,

    /// Ground speed in km/h.
    pub speed: Option<f64>,

    /// Number of satellites in use.
    #[cfg_attr(feature = "serde", serde(default))]
    pub satellites: Option<f64>,

    /// Horizontal dilution of precision.
    #[cfg_attr(feature = "serde", serde(default))]
    pub hdop: Option<f64>,

    /// Smoothed board temperature in degrees Celsius.
    pub temperature: Option<f64>,

    /// Host power, CPU temperature, fan and load.
    #[cfg_attr(feature = "serde", serde(default))]
    pub system: SystemState,

    /// UPS voltage and charge.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ups: UpsState,
}

impl TelemetrySnapshot {
    /// Create an empty snapshot with every field unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing snapshots.
    pub fn builder() -> TelemetrySnapshotBuilder {
        TelemetrySnapshotBuilder::new()
    }

    /// Check if nothing at all is known.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Check if the snapshot carries a position fix.
    pub fn has_fix(&self) -> bool {
        self.longitude.is_some() && self.latitude.is_some()
    }

    /// Return a copy with the temperature replaced.
    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Return a copy with the host readings replaced.
    pub fn with_system(mut self, system: SystemState) -> Self {
        self.system = system;
        self
    }

    /// Return a copy with the UPS readings replaced.
    pub fn with_ups(mut self, ups: UpsState) -> Self {
        self.ups = ups;
        self
    }
}

/// Builder for constructing `TelemetrySnapshot` instances.
#[derive(Debug, Default)]
pub struct TelemetrySnapshotBuilder {
    snapshot: TelemetrySnapshot,
}

impl TelemetrySnapshotBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the access technology.
    pub fn tech(mut self, tech: impl Into<String>) -> Self {
        self.snapshot.tech = Some(tech.into());
        self
    }

    /// Set the signal quality.
    pub fn signal(mut self, signal: f64) -> Self {
        self.snapshot.signal = Some(signal);
        self
    }

    /// Set longitude, latitude and altitude at once.
    pub fn position(mut self, longitude: f64, latitude: f64, altitude: f64) -> Self {
        self.snapshot.longitude = Some(longitude);
        self.snapshot.latitude = Some(latitude);
        self.snapshot.altitude = Some(altitude);
        self
    }

    /// Set the ground speed.
    pub fn speed(mut self, speed: f64) -> Self {
        self.snapshot.speed = Some(speed);
        self
    }

    /// Set satellite count and hdop.
    pub fn precision(mut self, satellites: f64, hdop: f64) -> Self {
        self.snapshot.satellites = Some(satellites);
        self.snapshot.hdop = Some(hdop);
        self
    }

    /// Set the temperature.
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.snapshot.temperature = Some(temperature);
        self
    }

    /// Set the host readings.
    pub fn system(mut self, system: SystemState) -> Self {
        self.snapshot.system = system;
        self
    }

    /// Set the UPS readings.
    pub fn ups(mut self, ups: UpsState) -> Self {
        self.snapshot.ups = ups;
        self
    }

    /// Build the snapshot.
    pub fn build(self) -> TelemetrySnapshot {
        self.snapshot
    }
}
