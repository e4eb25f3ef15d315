//! Partial updates to component state
//!
//! Transport shapes, realtime frames and command successes all produce
//! patches; only [`super::StateMirror`] applies them. `None` means "field
//! not present in the message", so unknown or missing fields never clobber
//! what the mirror already knows.

use chrono::{DateTime, Utc};

use super::state::{ComponentDetail, ComponentKind, ComponentState, MotionStatus, DIO_CHANNELS};
use crate::telemetry::Signal;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotPatch {
    pub servo_enabled: Option<bool>,
    /// Explicit motion state (command successes)
    pub motion: Option<MotionStatus>,
    /// Server `is_moving` flag, folded into the motion state machine
    pub is_moving: Option<bool>,
    pub axis_id: Option<u32>,
    pub position_um: Option<f64>,
    pub is_homed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerPatch {
    pub output_enabled: Option<bool>,
    pub setpoint_v: Option<f64>,
    pub setpoint_a: Option<f64>,
    pub current_limit_a: Option<f64>,
    pub measured_v: Option<f64>,
    pub measured_a: Option<f64>,
    pub measured_w: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadcellPatch {
    pub last_force: Option<f64>,
    pub unit: Option<String>,
    pub last_calibration: Option<DateTime<Utc>>,
    pub zero_offset: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct McuPatch {
    pub temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub fan_speed: Option<u8>,
    pub test_mode: Option<u8>,
    pub boot_complete: Option<bool>,
}

/// Sparse channel update; indexes outside `0..32` are dropped on apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigitalIoPatch {
    pub inputs: Vec<(usize, bool)>,
    pub outputs: Vec<(usize, bool)>,
    /// System-level emergency bit, only ever carried by digital I/O traffic
    pub emergency_active: Option<bool>,
}

impl DigitalIoPatch {
    /// Patch setting every output to `level`
    pub fn all_outputs(level: bool) -> Self {
        Self {
            outputs: (0..DIO_CHANNELS).map(|ch| (ch, level)).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailPatch {
    Robot(RobotPatch),
    Power(PowerPatch),
    Loadcell(LoadcellPatch),
    Mcu(McuPatch),
    DigitalIo(DigitalIoPatch),
}

impl DetailPatch {
    /// Patch that touches nothing kind-specific
    pub fn empty(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Robot => DetailPatch::Robot(RobotPatch::default()),
            ComponentKind::Power => DetailPatch::Power(PowerPatch::default()),
            ComponentKind::Loadcell => DetailPatch::Loadcell(LoadcellPatch::default()),
            ComponentKind::Mcu => DetailPatch::Mcu(McuPatch::default()),
            ComponentKind::DigitalIo => DetailPatch::DigitalIo(DigitalIoPatch::default()),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            DetailPatch::Robot(_) => ComponentKind::Robot,
            DetailPatch::Power(_) => ComponentKind::Power,
            DetailPatch::Loadcell(_) => ComponentKind::Loadcell,
            DetailPatch::Mcu(_) => ComponentKind::Mcu,
            DetailPatch::DigitalIo(_) => ComponentKind::DigitalIo,
        }
    }
}

/// Update for one component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentPatch {
    pub connected: Option<bool>,
    pub device_identity: Option<String>,
    pub detail: DetailPatch,
}

impl ComponentPatch {
    pub fn new(detail: DetailPatch) -> Self {
        Self {
            connected: None,
            device_identity: None,
            detail,
        }
    }

    /// Patch that only sets the connected flag
    pub fn connected(kind: ComponentKind, connected: bool) -> Self {
        Self {
            connected: Some(connected),
            device_identity: None,
            detail: DetailPatch::empty(kind),
        }
    }

    pub fn robot(patch: RobotPatch) -> Self {
        Self::new(DetailPatch::Robot(patch))
    }

    pub fn power(patch: PowerPatch) -> Self {
        Self::new(DetailPatch::Power(patch))
    }

    pub fn loadcell(patch: LoadcellPatch) -> Self {
        Self::new(DetailPatch::Loadcell(patch))
    }

    pub fn mcu(patch: McuPatch) -> Self {
        Self::new(DetailPatch::Mcu(patch))
    }

    pub fn digital_io(patch: DigitalIoPatch) -> Self {
        Self::new(DetailPatch::DigitalIo(patch))
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = Some(connected);
        self
    }

    pub fn kind(&self) -> ComponentKind {
        self.detail.kind()
    }

    /// Emergency bit carried by this patch, if any
    pub fn emergency_active(&self) -> Option<bool> {
        match &self.detail {
            DetailPatch::DigitalIo(d) => d.emergency_active,
            _ => None,
        }
    }

    /// Measurements carried by this patch, for telemetry
    pub fn samples(&self) -> Vec<(Signal, f64)> {
        let present = |signal: Signal, value: Option<f64>| value.map(|v| (signal, v));
        match &self.detail {
            DetailPatch::Robot(p) => present(Signal::Position, p.position_um).into_iter().collect(),
            DetailPatch::Power(p) => [
                present(Signal::Voltage, p.measured_v),
                present(Signal::Current, p.measured_a),
                present(Signal::Power, p.measured_w),
            ]
            .into_iter()
            .flatten()
            .collect(),
            DetailPatch::Loadcell(p) => present(Signal::Force, p.last_force).into_iter().collect(),
            DetailPatch::Mcu(p) => present(Signal::Temperature, p.temperature)
                .into_iter()
                .collect(),
            DetailPatch::DigitalIo(_) => Vec::new(),
        }
    }

    /// Merge present fields into `state`. Kind mismatches are ignored.
    pub fn apply_to(&self, state: &mut ComponentState) {
        if state.kind != self.kind() {
            return;
        }
        if let Some(connected) = self.connected {
            state.connected = connected;
        }
        if let Some(identity) = &self.device_identity {
            state.device_identity = Some(identity.clone());
        }

        match (&self.detail, &mut state.detail) {
            (DetailPatch::Robot(p), ComponentDetail::Robot(s)) => {
                set(&mut s.servo_enabled, p.servo_enabled);
                set(&mut s.axis_id, p.axis_id);
                if p.position_um.is_some() {
                    s.position_um = p.position_um;
                }
                if p.is_homed.is_some() {
                    s.is_homed = p.is_homed;
                }
                if let Some(motion) = p.motion {
                    // Leaving an emergency stop takes an explicit reset to idle
                    if s.motion != MotionStatus::EmergencyStopped || motion == MotionStatus::Idle {
                        s.motion = motion;
                    }
                } else if let Some(moving) = p.is_moving {
                    s.motion = fold_is_moving(s.motion, moving);
                }
            }
            (DetailPatch::Power(p), ComponentDetail::Power(s)) => {
                set(&mut s.output_enabled, p.output_enabled);
                set(&mut s.setpoint_v, p.setpoint_v);
                set(&mut s.setpoint_a, p.setpoint_a);
                set(&mut s.current_limit_a, p.current_limit_a);
                set(&mut s.measured_v, p.measured_v);
                set(&mut s.measured_a, p.measured_a);
                set(&mut s.measured_w, p.measured_w);
            }
            (DetailPatch::Loadcell(p), ComponentDetail::Loadcell(s)) => {
                if p.last_force.is_some() {
                    s.last_force = p.last_force;
                }
                if let Some(unit) = &p.unit {
                    s.unit = unit.clone();
                }
                if p.last_calibration.is_some() {
                    s.last_calibration = p.last_calibration;
                }
                set(&mut s.zero_offset, p.zero_offset);
            }
            (DetailPatch::Mcu(p), ComponentDetail::Mcu(s)) => {
                if p.temperature.is_some() {
                    s.temperature = p.temperature;
                }
                if p.target_temperature.is_some() {
                    s.target_temperature = p.target_temperature;
                }
                if p.fan_speed.is_some() {
                    s.fan_speed = p.fan_speed;
                }
                if p.test_mode.is_some() {
                    s.test_mode = p.test_mode;
                }
                set(&mut s.boot_complete, p.boot_complete);
            }
            (DetailPatch::DigitalIo(p), ComponentDetail::DigitalIo(s)) => {
                for &(ch, level) in &p.inputs {
                    if let Some(slot) = s.inputs.get_mut(ch) {
                        *slot = level;
                    }
                }
                for &(ch, level) in &p.outputs {
                    if let Some(slot) = s.outputs.get_mut(ch) {
                        *slot = level;
                    }
                }
            }
            _ => {}
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Fold the server's `is_moving` flag into the motion state machine.
///
/// `EmergencyStopped` only leaves through an explicit reset, never through
/// a status report.
fn fold_is_moving(current: MotionStatus, moving: bool) -> MotionStatus {
    match (current, moving) {
        (MotionStatus::EmergencyStopped, _) => MotionStatus::EmergencyStopped,
        (status, true) if status.is_transient() => status,
        (_, true) => MotionStatus::Moving,
        (_, false) => MotionStatus::Idle,
    }
}
