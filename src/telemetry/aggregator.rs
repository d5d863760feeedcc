use roadcast_types::TelemetrySnapshot;
use tracing::debug;

use super::StatusReport;
use crate::config::TelemetrySettings;
use crate::smoothing::SmoothingFilter;

/// Merges status polls with the smoothed temperature and decides what gets
/// published.
///
/// A snapshot is handed out for publishing only when it differs from the
/// last one handed out, not merely from the previous poll.
///
/// Temperature samples arrive raw from the Sensor worker; the averaging
/// happens here, so a single outlier rarely moves the published value.
#[derive(Debug, Default)]
pub struct Aggregator {
    previous: Option<TelemetrySnapshot>,
    temperature: SmoothingFilter,
}

impl Aggregator {
    pub fn new(temperature: SmoothingFilter) -> Self {
        Self {
            previous: None,
            temperature,
        }
    }

    pub fn from_settings(settings: &TelemetrySettings) -> Self {
        Self::new(SmoothingFilter::new(
            settings.smoothing_window,
            settings.precision,
        ))
    }

    /// Feed a raw temperature sample. Returns the smoothed value if it changed.
    pub fn record_temperature(&mut self, sample: f64) -> Option<f64> {
        let smoothed = self.temperature.push(sample);
        if let Some(value) = smoothed {
            debug!(temperature = value, "smoothed temperature changed");
        }
        smoothed
    }

    /// Latest smoothed temperature.
    pub fn temperature(&self) -> Option<f64> {
        self.temperature.current()
    }

    /// Last snapshot handed out for publishing.
    pub fn previous(&self) -> Option<&TelemetrySnapshot> {
        self.previous.as_ref()
    }

    /// Merge a successful poll and return the snapshot to publish, if any.
    ///
    /// The cache is updated before the snapshot is returned, so a publish
    /// failure is not retried on the next tick unless something changes.
    pub fn observe(&mut self, report: StatusReport) -> Option<TelemetrySnapshot> {
        let snapshot = report.into_snapshot(self.temperature());
        if self.previous.as_ref() == Some(&snapshot) {
            return None;
        }
        self.previous = Some(snapshot.clone());
        Some(snapshot)
    }
}
