//! Safety Gate
//!
//! Policy layer deciding, from a read-only [`SafetyContext`], whether a
//! command proceeds, needs operator confirmation, or is refused. The gate
//! performs no I/O and never mutates anything.
//!
//! Check order for every verb:
//! 1. Interlocks: actuating verbs are refused while the system emergency
//!    bit is set, then component preconditions (connected, servo on, ...).
//! 2. Parameter validation against [`SafetyThresholds`].
//! 3. Confirmation requirement.

mod rules;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::command::Verb;
use crate::mirror::{ComponentKind, ComponentState};

/// Limits used by the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    /// Measured voltage above which enabling output escalates (V)
    pub high_voltage: f64,
    /// Measured current above which enabling output escalates (A)
    pub high_current: f64,
    pub max_voltage: f64,
    pub max_current: f64,
    /// Upper bound for absolute positions and relative distances (µm)
    pub max_position_um: f64,
    pub min_velocity: f64,
    pub max_velocity: f64,
    /// Bounds for acceleration and deceleration (µm/s²)
    pub min_acceleration: f64,
    pub max_acceleration: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub max_fan_speed: u8,
    pub max_test_mode: u8,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            high_voltage: 12.0,
            high_current: 5.0,
            max_voltage: 50.0,
            max_current: 50.0,
            max_position_um: 500_000.0,
            min_velocity: 1.0,
            max_velocity: 60_000.0,
            min_acceleration: 100.0,
            max_acceleration: 60_000.0,
            min_temperature: 0.0,
            max_temperature: 150.0,
            max_fan_speed: 10,
            max_test_mode: 3,
        }
    }
}

/// Read-only snapshot handed to the gate
#[derive(Debug, Clone, Copy)]
pub struct SafetyContext<'a> {
    /// State of the command's own component, if it is mirrored
    pub component: Option<&'a ComponentState>,
    /// Connected flag of every component
    pub connections: &'a BTreeMap<ComponentKind, bool>,
    pub thresholds: &'a SafetyThresholds,
    pub require_confirmations: bool,
    pub emergency_active: bool,
}

impl SafetyContext<'_> {
    fn is_connected(&self, kind: ComponentKind) -> bool {
        self.connections.get(&kind).copied().unwrap_or(false)
    }
}

/// Severity of a confirmation dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmLevel {
    Warning,
    /// Strong warning; needs an explicit "I understand" acknowledgement
    Error,
}

/// A confirmation the operator must give before the command proceeds
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub title: String,
    pub reason: String,
    pub level: ConfirmLevel,
    /// Per-command `skip_confirmation` may waive this one
    pub suppressible: bool,
}

impl Confirmation {
    pub(crate) fn warning(title: &str, reason: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            reason: reason.into(),
            level: ConfirmLevel::Warning,
            suppressible: false,
        }
    }

    pub(crate) fn escalated(title: &str, reason: impl Into<String>) -> Self {
        Self {
            level: ConfirmLevel::Error,
            ..Self::warning(title, reason)
        }
    }

    pub(crate) fn suppressible(mut self) -> Self {
        self.suppressible = true;
        self
    }

    pub fn requires_acknowledgement(&self) -> bool {
        self.level == ConfirmLevel::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalKind {
    /// Parameter out of range
    Validation,
    /// Interlock or precondition
    Interlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refusal {
    pub kind: RefusalKind,
    pub reason: String,
}

impl Refusal {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self {
            kind: RefusalKind::Validation,
            reason: reason.into(),
        }
    }

    pub(crate) fn interlock(reason: impl Into<String>) -> Self {
        Self {
            kind: RefusalKind::Interlock,
            reason: reason.into(),
        }
    }
}

/// Gate decision
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Admit,
    AdmitWithConfirmation(Confirmation),
    Refuse(Refusal),
}

impl GateOutcome {
    pub fn is_refused(&self) -> bool {
        matches!(self, GateOutcome::Refuse(_))
    }
}

/// Components that must be connected before an EOL force test starts
pub const PRE_TEST_COMPONENTS: [ComponentKind; 4] = [
    ComponentKind::Robot,
    ComponentKind::Loadcell,
    ComponentKind::Mcu,
    ComponentKind::Power,
];

/// Channels of the tower lamp (red, yellow, green)
pub const TOWER_LAMP_CHANNELS: [usize; 3] = [4, 5, 6];

pub struct SafetyGate;

impl SafetyGate {
    /// Decide on `verb` given `ctx`
    pub fn evaluate(verb: &Verb, ctx: &SafetyContext<'_>) -> GateOutcome {
        if ctx.emergency_active && verb.actuates() {
            return GateOutcome::Refuse(Refusal::interlock(format!(
                "{} is blocked while the emergency stop is active",
                verb.name()
            )));
        }
        match rules::check(verb, ctx) {
            Err(refusal) => GateOutcome::Refuse(refusal),
            Ok(Some(confirmation)) => GateOutcome::AdmitWithConfirmation(confirmation),
            Ok(None) => GateOutcome::Admit,
        }
    }
}
