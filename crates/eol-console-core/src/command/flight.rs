//! Single-flight slots
//!
//! At most one command of a mutually exclusive class is in transit at any
//! time. A slot is held by a [`FlightGuard`] and released when the guard
//! drops, so an abandoned command future never leaves a slot occupied.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;

use crate::mirror::ComponentKind;

/// Mutually exclusive command class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlightClass {
    /// `connect` / `disconnect` of one component
    Connection(ComponentKind),
    RobotServo,
    /// Homing, moves and stop
    RobotMotion,
    PowerOutput,
    PowerSetpoint,
    LoadcellControl,
    McuControl,
    /// One digital output channel
    DioOutput(usize),
    /// All-on / all-off; excludes every per-channel write
    DioBulk,
    DioEmergency,
    TestLifecycle,
}

impl FlightClass {
    /// Whether this class may not run while `other` is in flight
    pub fn conflicts_with(self, other: FlightClass) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (FlightClass::DioBulk, FlightClass::DioOutput(_))
            | (FlightClass::DioOutput(_), FlightClass::DioBulk) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FlightClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightClass::Connection(kind) => write!(f, "{kind} connection"),
            FlightClass::RobotServo => f.write_str("robot servo"),
            FlightClass::RobotMotion => f.write_str("robot motion"),
            FlightClass::PowerOutput => f.write_str("power output"),
            FlightClass::PowerSetpoint => f.write_str("power setpoint"),
            FlightClass::LoadcellControl => f.write_str("load cell control"),
            FlightClass::McuControl => f.write_str("MCU control"),
            FlightClass::DioOutput(ch) => write!(f, "output {ch}"),
            FlightClass::DioBulk => f.write_str("bulk output"),
            FlightClass::DioEmergency => f.write_str("emergency control"),
            FlightClass::TestLifecycle => f.write_str("test lifecycle"),
        }
    }
}

/// Set of occupied classes
#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: RefCell<BTreeSet<FlightClass>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `class` could be acquired right now
    pub fn is_free(&self, class: FlightClass) -> bool {
        !self
            .in_flight
            .borrow()
            .iter()
            .any(|held| class.conflicts_with(*held))
    }

    /// Occupy `class`, or `None` when a conflicting class is in flight
    pub fn try_acquire(&self, class: FlightClass) -> Option<FlightGuard<'_>> {
        if !self.is_free(class) {
            return None;
        }
        self.in_flight.borrow_mut().insert(class);
        Some(FlightGuard { owner: self, class })
    }

    pub fn is_held(&self, class: FlightClass) -> bool {
        self.in_flight.borrow().contains(&class)
    }

    /// Number of occupied classes
    pub fn len(&self) -> usize {
        self.in_flight.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.borrow().is_empty()
    }
}

/// Held slot; released on drop
#[derive(Debug)]
pub struct FlightGuard<'a> {
    owner: &'a SingleFlight,
    class: FlightClass,
}

impl FlightGuard<'_> {
    pub fn class(&self) -> FlightClass {
        self.class
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.borrow_mut().remove(&self.class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_class_is_exclusive() {
        let flight = SingleFlight::new();
        let guard = flight.try_acquire(FlightClass::RobotMotion).unwrap();
        assert!(flight.try_acquire(FlightClass::RobotMotion).is_none());
        assert!(flight.try_acquire(FlightClass::RobotServo).is_some());
        drop(guard);
        assert!(flight.try_acquire(FlightClass::RobotMotion).is_some());
        assert!(flight.is_empty());
    }

    #[test]
    fn test_channels_are_independent() {
        let flight = SingleFlight::new();
        let _a = flight.try_acquire(FlightClass::DioOutput(1)).unwrap();
        let _b = flight.try_acquire(FlightClass::DioOutput(2)).unwrap();
        assert!(flight.try_acquire(FlightClass::DioOutput(1)).is_none());
        assert_eq!(flight.len(), 2);
    }

    #[test]
    fn test_bulk_excludes_channels() {
        let flight = SingleFlight::new();
        let ch = flight.try_acquire(FlightClass::DioOutput(7)).unwrap();
        assert!(flight.try_acquire(FlightClass::DioBulk).is_none());
        drop(ch);
        let _bulk = flight.try_acquire(FlightClass::DioBulk).unwrap();
        assert!(flight.try_acquire(FlightClass::DioOutput(0)).is_none());
    }

    #[test]
    fn test_connection_classes_are_per_component() {
        let flight = SingleFlight::new();
        let _r = flight
            .try_acquire(FlightClass::Connection(ComponentKind::Robot))
            .unwrap();
        assert!(flight
            .try_acquire(FlightClass::Connection(ComponentKind::Power))
            .is_some());
    }
}
