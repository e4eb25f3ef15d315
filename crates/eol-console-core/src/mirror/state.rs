//! Component state types
//!
//! One [`ComponentState`] per hardware component, with the kind-specific
//! part held in [`ComponentDetail`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of digital input and output channels
pub const DIO_CHANNELS: usize = 32;

/// Hardware subsystems exposed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Robot,
    Power,
    Loadcell,
    Mcu,
    DigitalIo,
}

impl ComponentKind {
    /// Every component, in display order
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::Robot,
        ComponentKind::Power,
        ComponentKind::Loadcell,
        ComponentKind::Mcu,
        ComponentKind::DigitalIo,
    ];

    /// Name used in realtime topics and message `component` fields
    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Robot => "robot",
            ComponentKind::Power => "power",
            ComponentKind::Loadcell => "loadcell",
            ComponentKind::Mcu => "mcu",
            ComponentKind::DigitalIo => "digital_io",
        }
    }

    /// Segment used in REST paths (`/hardware/<segment>/...`)
    pub fn path_segment(self) -> &'static str {
        match self {
            ComponentKind::DigitalIo => "digital-io",
            other => other.name(),
        }
    }

    /// Human readable label
    pub fn label(self) -> &'static str {
        match self {
            ComponentKind::Robot => "Robot",
            ComponentKind::Power => "Power Supply",
            ComponentKind::Loadcell => "Load Cell",
            ComponentKind::Mcu => "MCU",
            ComponentKind::DigitalIo => "Digital I/O",
        }
    }

    /// Parse any of the spellings the server and topics use
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "robot" => Some(ComponentKind::Robot),
            "power" | "power_supply" | "power-supply" => Some(ComponentKind::Power),
            "loadcell" | "load_cell" | "load-cell" => Some(ComponentKind::Loadcell),
            "mcu" => Some(ComponentKind::Mcu),
            "digital_io" | "digital-io" | "digitalio" | "dio" => Some(ComponentKind::DigitalIo),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Robot motion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionStatus {
    #[default]
    Idle,
    Moving,
    Homing,
    Stopping,
    EmergencyStopped,
}

impl MotionStatus {
    /// States during which the poller runs at its active rate
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            MotionStatus::Moving | MotionStatus::Homing | MotionStatus::Stopping
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            MotionStatus::Idle => "Idle",
            MotionStatus::Moving => "Moving",
            MotionStatus::Homing => "Homing",
            MotionStatus::Stopping => "Stopping",
            MotionStatus::EmergencyStopped => "Emergency Stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotState {
    pub servo_enabled: bool,
    pub motion: MotionStatus,
    pub axis_id: u32,
    /// Position in micrometers
    pub position_um: Option<f64>,
    pub is_homed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerState {
    pub output_enabled: bool,
    pub setpoint_v: f64,
    pub setpoint_a: f64,
    pub current_limit_a: f64,
    pub measured_v: f64,
    pub measured_a: f64,
    pub measured_w: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadcellState {
    /// Last force reading in `unit` (kgf by default)
    pub last_force: Option<f64>,
    pub unit: String,
    pub last_calibration: Option<DateTime<Utc>>,
    pub zero_offset: f64,
}

impl Default for LoadcellState {
    fn default() -> Self {
        Self {
            last_force: None,
            unit: "kgf".to_string(),
            last_calibration: None,
            zero_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct McuState {
    /// Celsius
    pub temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub fan_speed: Option<u8>,
    pub test_mode: Option<u8>,
    pub boot_complete: bool,
}

/// Digital I/O channel levels.
///
/// The emergency flag is not stored here: it is the single system-level
/// bit on [`super::StateMirror`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DigitalIoState {
    pub inputs: [bool; DIO_CHANNELS],
    pub outputs: [bool; DIO_CHANNELS],
}

/// Kind-specific part of a component state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentDetail {
    Robot(RobotState),
    Power(PowerState),
    Loadcell(LoadcellState),
    Mcu(McuState),
    DigitalIo(DigitalIoState),
}

impl ComponentDetail {
    /// Default detail for `kind`
    pub fn new(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Robot => ComponentDetail::Robot(RobotState::default()),
            ComponentKind::Power => ComponentDetail::Power(PowerState::default()),
            ComponentKind::Loadcell => ComponentDetail::Loadcell(LoadcellState::default()),
            ComponentKind::Mcu => ComponentDetail::Mcu(McuState::default()),
            ComponentKind::DigitalIo => ComponentDetail::DigitalIo(DigitalIoState::default()),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentDetail::Robot(_) => ComponentKind::Robot,
            ComponentDetail::Power(_) => ComponentKind::Power,
            ComponentDetail::Loadcell(_) => ComponentKind::Loadcell,
            ComponentDetail::Mcu(_) => ComponentKind::Mcu,
            ComponentDetail::DigitalIo(_) => ComponentKind::DigitalIo,
        }
    }
}

/// Client copy of one component's observable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub kind: ComponentKind,
    pub connected: bool,
    pub device_identity: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub detail: ComponentDetail,
}

impl ComponentState {
    /// Fresh, disconnected state for `kind`
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            connected: false,
            device_identity: None,
            last_updated: None,
            detail: ComponentDetail::new(kind),
        }
    }

    /// Compare everything except the update timestamp
    pub fn same_observables(&self, other: &ComponentState) -> bool {
        self.kind == other.kind
            && self.connected == other.connected
            && self.device_identity == other.device_identity
            && self.detail == other.detail
    }

    pub fn robot(&self) -> Option<&RobotState> {
        match &self.detail {
            ComponentDetail::Robot(r) => Some(r),
            _ => None,
        }
    }

    pub fn robot_mut(&mut self) -> Option<&mut RobotState> {
        match &mut self.detail {
            ComponentDetail::Robot(r) => Some(r),
            _ => None,
        }
    }

    pub fn power(&self) -> Option<&PowerState> {
        match &self.detail {
            ComponentDetail::Power(p) => Some(p),
            _ => None,
        }
    }

    pub fn power_mut(&mut self) -> Option<&mut PowerState> {
        match &mut self.detail {
            ComponentDetail::Power(p) => Some(p),
            _ => None,
        }
    }

    pub fn loadcell(&self) -> Option<&LoadcellState> {
        match &self.detail {
            ComponentDetail::Loadcell(l) => Some(l),
            _ => None,
        }
    }

    pub fn loadcell_mut(&mut self) -> Option<&mut LoadcellState> {
        match &mut self.detail {
            ComponentDetail::Loadcell(l) => Some(l),
            _ => None,
        }
    }

    pub fn mcu(&self) -> Option<&McuState> {
        match &self.detail {
            ComponentDetail::Mcu(m) => Some(m),
            _ => None,
        }
    }

    pub fn mcu_mut(&mut self) -> Option<&mut McuState> {
        match &mut self.detail {
            ComponentDetail::Mcu(m) => Some(m),
            _ => None,
        }
    }

    pub fn digital_io(&self) -> Option<&DigitalIoState> {
        match &self.detail {
            ComponentDetail::DigitalIo(d) => Some(d),
            _ => None,
        }
    }

    pub fn digital_io_mut(&mut self) -> Option<&mut DigitalIoState> {
        match &mut self.detail {
            ComponentDetail::DigitalIo(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_names_round_trip() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_name(kind.name()), Some(kind));
            assert_eq!(ComponentKind::from_name(kind.path_segment()), Some(kind));
        }
        assert_eq!(ComponentKind::from_name("digitalIO"), Some(ComponentKind::DigitalIo));
        assert_eq!(ComponentKind::from_name("camera"), None);
    }

    #[test]
    fn test_transient_motion() {
        assert!(MotionStatus::Moving.is_transient());
        assert!(MotionStatus::Homing.is_transient());
        assert!(MotionStatus::Stopping.is_transient());
        assert!(!MotionStatus::Idle.is_transient());
        assert!(!MotionStatus::EmergencyStopped.is_transient());
    }

    #[test]
    fn test_same_observables_ignores_timestamp() {
        let a = ComponentState::new(ComponentKind::Power);
        let mut b = a.clone();
        b.last_updated = Some(Utc::now());
        assert!(a.same_observables(&b));
        b.connected = true;
        assert!(!a.same_observables(&b));
    }
}
