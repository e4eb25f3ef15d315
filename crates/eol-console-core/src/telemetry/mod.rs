//! Telemetry buffers
//!
//! Per-signal bounded windows (force, voltage, position, ...) with
//! incremental statistics, used by the panels for charts and readouts.

mod buffer;
pub mod quality;

pub use buffer::{TelemetryBuffer, TelemetryStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mirror::ComponentKind;

/// One sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub t: DateTime<Utc>,
    pub v: f64,
}

/// Measured signals carried by status traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Robot axis position (µm)
    Position,
    Voltage,
    Current,
    Power,
    /// Load cell force (kgf)
    Force,
    /// MCU temperature (°C)
    Temperature,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Position => "position",
            Signal::Voltage => "voltage",
            Signal::Current => "current",
            Signal::Power => "power",
            Signal::Force => "force",
            Signal::Temperature => "temperature",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Signal::Position => "µm",
            Signal::Voltage => "V",
            Signal::Current => "A",
            Signal::Power => "W",
            Signal::Force => "kgf",
            Signal::Temperature => "°C",
        }
    }

    /// Component that reports this signal
    pub fn component(self) -> ComponentKind {
        match self {
            Signal::Position => ComponentKind::Robot,
            Signal::Voltage | Signal::Current | Signal::Power => ComponentKind::Power,
            Signal::Force => ComponentKind::Loadcell,
            Signal::Temperature => ComponentKind::Mcu,
        }
    }
}
