//! Session configuration
//!
//! Loaded from JSON text or a file; every field has a default so a partial
//! document (or `{}`) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::mirror::ComponentKind;
use crate::oplog::{MAX_LOG_CAPACITY, MIN_LOG_CAPACITY};
use crate::poller::{PollRates, PollTarget};
use crate::safety::SafetyThresholds;

/// Default API base path
pub const DEFAULT_API_BASE: &str = "/api";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Idle and active poll intervals in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateConfig {
    pub idle_ms: u64,
    pub active_ms: u64,
}

impl RateConfig {
    pub const fn new(idle_ms: u64, active_ms: u64) -> Self {
        Self { idle_ms, active_ms }
    }

    pub fn rates(&self) -> PollRates {
        PollRates::from_millis(self.idle_ms, self.active_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub robot: RateConfig,
    pub power: RateConfig,
    pub loadcell: RateConfig,
    pub mcu: RateConfig,
    pub digital_io: RateConfig,
    pub dashboard: RateConfig,
    pub active_timeout_ms: u64,
    /// Consecutive failed ticks before a component is treated as
    /// disconnected
    pub failure_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            robot: RateConfig::new(1000, 250),
            power: RateConfig::new(2000, 500),
            loadcell: RateConfig::new(2000, 100),
            mcu: RateConfig::new(2000, 1000),
            digital_io: RateConfig::new(1000, 250),
            dashboard: RateConfig::new(5000, 5000),
            active_timeout_ms: 30_000,
            failure_threshold: 3,
        }
    }
}

impl PollingConfig {
    pub fn rates_for(&self, target: PollTarget) -> PollRates {
        let rate = match target {
            PollTarget::Component(ComponentKind::Robot) => self.robot,
            PollTarget::Component(ComponentKind::Power) => self.power,
            PollTarget::Component(ComponentKind::Loadcell) => self.loadcell,
            PollTarget::Component(ComponentKind::Mcu) => self.mcu,
            PollTarget::Component(ComponentKind::DigitalIo) => self.digital_io,
            PollTarget::SystemStatus => self.dashboard,
        };
        rate.rates()
    }

    pub fn active_timeout(&self) -> Duration {
        Duration::from_millis(self.active_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Per-panel chart window
    pub panel_capacity: usize,
    /// Load cell force window
    pub force_capacity: usize,
    /// Each EOL test signal
    pub test_capacity: usize,
    /// Points used for the stability score
    pub stability_window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            panel_capacity: 50,
            force_capacity: 500,
            test_capacity: 500,
            stability_window: 10,
        }
    }
}

/// Values pre-filled in the robot motion form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotDefaults {
    pub axis_id: u32,
    pub velocity: f64,
    pub acceleration: f64,
    pub deceleration: f64,
}

impl Default for RobotDefaults {
    fn default() -> Self {
        Self {
            axis_id: 0,
            velocity: 10_000.0,
            acceleration: 10_000.0,
            deceleration: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_base: String,
    /// Per-panel operation log capacity
    pub log_capacity: usize,
    /// Dashboard (system) log capacity
    pub system_log_capacity: usize,
    pub require_confirmations: bool,
    pub thresholds: SafetyThresholds,
    pub polling: PollingConfig,
    pub telemetry: TelemetryConfig,
    pub robot_defaults: RobotDefaults,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            log_capacity: 500,
            system_log_capacity: MAX_LOG_CAPACITY,
            require_confirmations: true,
            thresholds: SafetyThresholds::default(),
            polling: PollingConfig::default(),
            telemetry: TelemetryConfig::default(),
            robot_defaults: RobotDefaults::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Reject values the session cannot run with. Log capacities are
    /// clamped, not rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let polling = &self.polling;
        for (field, rate) in [
            ("polling.robot", polling.robot),
            ("polling.power", polling.power),
            ("polling.loadcell", polling.loadcell),
            ("polling.mcu", polling.mcu),
            ("polling.digital_io", polling.digital_io),
            ("polling.dashboard", polling.dashboard),
        ] {
            if rate.idle_ms == 0 || rate.active_ms == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "poll intervals must be positive".into(),
                });
            }
            if rate.active_ms > rate.idle_ms {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!(
                        "active interval {} ms is slower than idle interval {} ms",
                        rate.active_ms, rate.idle_ms
                    ),
                });
            }
        }
        if polling.active_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "polling.active_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        let telemetry = &self.telemetry;
        if telemetry.panel_capacity == 0
            || telemetry.force_capacity == 0
            || telemetry.test_capacity == 0
        {
            return Err(ConfigError::Invalid {
                field: "telemetry",
                reason: "buffer capacities must be positive".into(),
            });
        }
        let t = &self.thresholds;
        if t.min_velocity > t.max_velocity || t.min_acceleration > t.max_acceleration {
            return Err(ConfigError::Invalid {
                field: "thresholds",
                reason: "minimum exceeds maximum".into(),
            });
        }
        Ok(())
    }

    pub fn log_capacity(&self) -> usize {
        self.log_capacity.clamp(MIN_LOG_CAPACITY, MAX_LOG_CAPACITY)
    }

    pub fn system_log_capacity(&self) -> usize {
        self.system_log_capacity
            .clamp(MIN_LOG_CAPACITY, MAX_LOG_CAPACITY)
    }
}
