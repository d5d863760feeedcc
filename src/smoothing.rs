//! Moving-average smoothing for noisy scalar samples.

use std::collections::VecDeque;

/// Window size on the aggregated telemetry path.
pub const AGGREGATED_WINDOW: usize = 30;

/// Decimal places kept on the aggregated telemetry path.
pub const AGGREGATED_PRECISION: u32 = 1;

/// Window size used by the standalone sensor reader.
pub const STANDALONE_WINDOW: usize = 25;

/// Decimal places kept by the standalone sensor reader.
pub const STANDALONE_PRECISION: u32 = 2;

/// Bounded, ordered buffer of the most recent samples.
///
/// Once more than `capacity` samples were pushed, the oldest is evicted.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SmoothingWindow {
    /// Create an empty window. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Push a sample, evicting the oldest one beyond capacity.
    pub fn push(&mut self, sample: f64) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the buffered samples.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f64)
    }
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Windowed mean with rounding and change detection.
///
/// [`push`](Self::push) only yields a value when the rounded mean differs
/// from the last value it yielded.
#[derive(Debug, Clone)]
pub struct SmoothingFilter {
    window: SmoothingWindow,
    precision: u32,
    last_emitted: Option<f64>,
}

impl SmoothingFilter {
    pub fn new(capacity: usize, precision: u32) -> Self {
        Self {
            window: SmoothingWindow::new(capacity),
            precision,
            last_emitted: None,
        }
    }

    /// Configuration used when feeding the telemetry aggregator.
    pub fn aggregated() -> Self {
        Self::new(AGGREGATED_WINDOW, AGGREGATED_PRECISION)
    }

    /// Configuration used by the standalone sensor reader.
    pub fn standalone() -> Self {
        Self::new(STANDALONE_WINDOW, STANDALONE_PRECISION)
    }

    /// Feed one raw sample.
    ///
    /// Returns the new smoothed value if it changed. Non-finite samples are
    /// dropped.
    pub fn push(&mut self, sample: f64) -> Option<f64> {
        if !sample.is_finite() {
            return None;
        }
        self.window.push(sample);

        let smoothed = round_to(self.window.mean()?, self.precision);
        if self.last_emitted == Some(smoothed) {
            return None;
        }
        self.last_emitted = Some(smoothed);
        Some(smoothed)
    }

    /// The last value emitted, if any.
    pub fn current(&self) -> Option<f64> {
        self.last_emitted
    }

    pub fn window(&self) -> &SmoothingWindow {
        &self.window
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::aggregated()
    }
}
