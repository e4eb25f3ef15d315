//! Bounded sample window with incremental aggregates

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::trace;

use super::{quality, TelemetryPoint};
use crate::oplog::{export_file_name, ExportFormat, ExportedFile};

/// Bounded FIFO of [`TelemetryPoint`]s.
///
/// `sum`, `sum_sq`, `min` and `max` always describe exactly the retained
/// points. Evicting a point that held the minimum or maximum triggers an
/// O(N) rescan; everything else is O(1).
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    name: String,
    capacity: usize,
    points: VecDeque<TelemetryPoint>,
    sum: f64,
    sum_sq: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl TelemetryBuffer {
    /// New buffer named `name` holding at most `capacity` (>= 1) points
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            points: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
            min: None,
            max: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a sample, returning the evicted point when the buffer was
    /// full. Non-finite values are dropped.
    pub fn push(&mut self, t: DateTime<Utc>, v: f64) -> Option<TelemetryPoint> {
        if !v.is_finite() {
            trace!(buffer = %self.name, "dropping non-finite sample");
            return None;
        }

        let evicted = if self.points.len() >= self.capacity {
            self.points.pop_front()
        } else {
            None
        };

        if let Some(old) = &evicted {
            self.sum -= old.v;
            self.sum_sq -= old.v * old.v;
            if Some(old.v) == self.min || Some(old.v) == self.max {
                self.recompute_extremes();
            }
        }

        self.points.push_back(TelemetryPoint { t, v });
        self.sum += v;
        self.sum_sq += v * v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));

        evicted
    }

    fn recompute_extremes(&mut self) {
        self.min = self.points.iter().map(|p| p.v).reduce(f64::min);
        self.max = self.points.iter().map(|p| p.v).reduce(f64::max);
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.min = None;
        self.max = None;
    }

    pub fn points(&self) -> impl Iterator<Item = &TelemetryPoint> {
        self.points.iter()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.v).collect()
    }

    /// The most recent `k` values, oldest first
    pub fn last_values(&self, k: usize) -> Vec<f64> {
        let skip = self.points.len().saturating_sub(k);
        self.points.iter().skip(skip).map(|p| p.v).collect()
    }

    pub fn first(&self) -> Option<&TelemetryPoint> {
        self.points.front()
    }

    pub fn last(&self) -> Option<&TelemetryPoint> {
        self.points.back()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            None
        } else {
            Some(self.sum / self.points.len() as f64)
        }
    }

    /// Population variance, clamped at zero
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.points.len() as f64;
        Some((self.sum_sq / n - mean * mean).max(0.0))
    }

    pub fn stdev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// `t_last - t_first`
    pub fn duration(&self) -> Option<Duration> {
        Some(self.last()?.t - self.first()?.t)
    }

    /// Stability score over the last `window` points
    pub fn stability(&self, window: usize) -> Option<f64> {
        quality::stability_score(&self.last_values(window))
    }

    /// Signal quality from the whole window's standard deviation
    pub fn signal_quality(&self) -> Option<f64> {
        self.stdev().map(quality::signal_quality)
    }

    /// Snapshot of the aggregates
    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            count: self.len(),
            min: self.min,
            max: self.max,
            mean: self.mean(),
            stdev: self.stdev(),
        }
    }

    /// `timestamp,<name>` CSV
    pub fn export_csv(&self) -> String {
        let mut out = format!("timestamp,{}\n", self.name);
        for p in &self.points {
            out.push_str(&format!("{},{}\n", p.t.to_rfc3339(), p.v));
        }
        out
    }

    pub fn export(&self, panel: &str, now: DateTime<Utc>) -> ExportedFile {
        ExportedFile::new(
            export_file_name(panel, now, ExportFormat::Csv),
            ExportFormat::Csv,
            self.export_csv(),
        )
    }
}

/// Aggregates of one buffer at one instant
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
}
