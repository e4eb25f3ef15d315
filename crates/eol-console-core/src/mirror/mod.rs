//! State Mirror
//!
//! Authoritative client copy of every active component's observable state,
//! plus the system-level aggregates (`connected_count`, `system_health`,
//! `emergency_active`).
//!
//! The mirror only changes through [`StateMirror::apply`],
//! [`StateMirror::replace`], [`StateMirror::set_emergency`] and
//! [`StateMirror::mark_disconnected`]. Each write returns the
//! [`MirrorEvent`]s it produced, carrying the prior and new value so panel
//! coordinators can diff; writes that change nothing return no events.

mod patch;
mod state;

pub use patch::{
    ComponentPatch, DetailPatch, DigitalIoPatch, LoadcellPatch, McuPatch, PowerPatch, RobotPatch,
};
pub use state::{
    ComponentDetail, ComponentKind, ComponentState, DigitalIoState, LoadcellState, McuState,
    MotionStatus, PowerState, RobotState, DIO_CHANNELS,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a mirror write came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// A command resolved successfully
    Command,
    /// A poller tick response
    Poll,
    /// A realtime bus message or bus connection change
    Realtime,
    /// Full status refresh (activation or reconnect)
    Refresh,
}

/// Overall hardware health derived from the connected count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Good,
    Warning,
    Critical,
    Unknown,
}

impl SystemHealth {
    pub fn label(self) -> &'static str {
        match self {
            SystemHealth::Good => "Good",
            SystemHealth::Warning => "Warning",
            SystemHealth::Critical => "Critical",
            SystemHealth::Unknown => "Unknown",
        }
    }
}

/// One component's prior and new state
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorChange {
    pub kind: ComponentKind,
    pub origin: UpdateOrigin,
    pub before: ComponentState,
    pub after: ComponentState,
}

impl MirrorChange {
    pub fn connected_changed(&self) -> bool {
        self.before.connected != self.after.connected
    }
}

/// Notification produced by a mirror write
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Component(MirrorChange),
    Emergency {
        before: bool,
        after: bool,
        origin: UpdateOrigin,
    },
}

impl MirrorEvent {
    /// Component this event concerns (`None` for the system emergency bit)
    pub fn kind(&self) -> Option<ComponentKind> {
        match self {
            MirrorEvent::Component(change) => Some(change.kind),
            MirrorEvent::Emergency { .. } => None,
        }
    }
}

/// The mirror itself
#[derive(Debug, Default)]
pub struct StateMirror {
    states: BTreeMap<ComponentKind, ComponentState>,
    /// Active panel references per component
    retained: BTreeMap<ComponentKind, usize>,
    emergency_active: bool,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (if needed) and reference a component's state
    pub fn retain(&mut self, kind: ComponentKind) {
        *self.retained.entry(kind).or_insert(0) += 1;
        self.states
            .entry(kind)
            .or_insert_with(|| ComponentState::new(kind));
    }

    /// Drop a reference; the state is destroyed with the last one
    pub fn release(&mut self, kind: ComponentKind) {
        if let Some(count) = self.retained.get_mut(&kind) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.retained.remove(&kind);
                self.states.remove(&kind);
            }
        }
    }

    pub fn is_retained(&self, kind: ComponentKind) -> bool {
        self.states.contains_key(&kind)
    }

    /// Components currently held by at least one active panel
    pub fn retained_kinds(&self) -> Vec<ComponentKind> {
        self.states.keys().copied().collect()
    }

    pub fn get(&self, kind: ComponentKind) -> Option<&ComponentState> {
        self.states.get(&kind)
    }

    pub fn is_connected(&self, kind: ComponentKind) -> bool {
        self.states.get(&kind).map(|s| s.connected).unwrap_or(false)
    }

    /// Connected flag for every component (absent states count as disconnected)
    pub fn connection_map(&self) -> BTreeMap<ComponentKind, bool> {
        ComponentKind::ALL
            .iter()
            .map(|kind| (*kind, self.is_connected(*kind)))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.states.values().filter(|s| s.connected).count()
    }

    /// `0 → critical`, `1..N-1 → warning`, `N → good`; `unknown` until any
    /// component has reported
    pub fn system_health(&self) -> SystemHealth {
        if self.states.values().all(|s| s.last_updated.is_none()) {
            return SystemHealth::Unknown;
        }
        let total = ComponentKind::ALL.len();
        match self.connected_count() {
            0 => SystemHealth::Critical,
            n if n >= total => SystemHealth::Good,
            _ => SystemHealth::Warning,
        }
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency_active
    }

    /// Merge `patch` into the component's state
    pub fn apply(
        &mut self,
        patch: &ComponentPatch,
        origin: UpdateOrigin,
        now: DateTime<Utc>,
    ) -> Vec<MirrorEvent> {
        let mut events = Vec::new();
        let kind = patch.kind();

        if let Some(state) = self.states.get_mut(&kind) {
            let before = state.clone();
            patch.apply_to(state);
            state.last_updated = Some(now);
            if !before.same_observables(state) {
                debug!(component = %kind, ?origin, "mirror updated");
                events.push(MirrorEvent::Component(MirrorChange {
                    kind,
                    origin,
                    before,
                    after: state.clone(),
                }));
            }
        }

        if let Some(active) = patch.emergency_active() {
            events.extend(self.set_emergency(active, origin));
        }
        events
    }

    /// Replace the component's state atomically with `patch` applied to a
    /// fresh default
    pub fn replace(
        &mut self,
        patch: &ComponentPatch,
        origin: UpdateOrigin,
        now: DateTime<Utc>,
    ) -> Vec<MirrorEvent> {
        let mut events = Vec::new();
        let kind = patch.kind();

        if let Some(state) = self.states.get_mut(&kind) {
            let mut fresh = ComponentState::new(kind);
            // Emergency-stopped robots stay stopped until an explicit reset
            if let (Some(old), Some(new)) = (state.robot(), fresh.robot_mut()) {
                if old.motion == MotionStatus::EmergencyStopped {
                    new.motion = MotionStatus::EmergencyStopped;
                }
            }
            patch.apply_to(&mut fresh);
            fresh.last_updated = Some(now);
            let before = std::mem::replace(state, fresh);
            if !before.same_observables(state) {
                events.push(MirrorEvent::Component(MirrorChange {
                    kind,
                    origin,
                    before,
                    after: state.clone(),
                }));
            }
        }

        if let Some(active) = patch.emergency_active() {
            events.extend(self.set_emergency(active, origin));
        }
        events
    }

    /// Set the system emergency bit
    pub fn set_emergency(&mut self, active: bool, origin: UpdateOrigin) -> Option<MirrorEvent> {
        if self.emergency_active == active {
            return None;
        }
        let before = self.emergency_active;
        self.emergency_active = active;
        debug!(active, ?origin, "emergency state changed");
        Some(MirrorEvent::Emergency {
            before,
            after: active,
            origin,
        })
    }

    /// Mark every retained component disconnected (bus loss)
    pub fn mark_disconnected(&mut self, origin: UpdateOrigin, now: DateTime<Utc>) -> Vec<MirrorEvent> {
        let kinds: Vec<ComponentKind> = self.states.keys().copied().collect();
        kinds
            .into_iter()
            .flat_map(|kind| self.apply(&ComponentPatch::connected(kind, false), origin, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mirror_with_all() -> StateMirror {
        let mut mirror = StateMirror::new();
        for kind in ComponentKind::ALL {
            mirror.retain(kind);
        }
        mirror
    }

    #[test]
    fn test_retain_release_lifecycle() {
        let mut mirror = StateMirror::new();
        mirror.retain(ComponentKind::Robot);
        mirror.retain(ComponentKind::Robot);
        mirror.release(ComponentKind::Robot);
        assert!(mirror.is_retained(ComponentKind::Robot));
        mirror.release(ComponentKind::Robot);
        assert!(!mirror.is_retained(ComponentKind::Robot));
    }

    #[test]
    fn test_connected_count_and_health() {
        let mut mirror = mirror_with_all();
        let now = Utc::now();
        assert_eq!(mirror.system_health(), SystemHealth::Unknown);

        for kind in [ComponentKind::Robot, ComponentKind::Power] {
            mirror.apply(&ComponentPatch::connected(kind, false), UpdateOrigin::Poll, now);
        }
        assert_eq!(mirror.system_health(), SystemHealth::Critical);

        mirror.apply(
            &ComponentPatch::connected(ComponentKind::Robot, true),
            UpdateOrigin::Poll,
            now,
        );
        assert_eq!(mirror.connected_count(), 1);
        assert_eq!(mirror.system_health(), SystemHealth::Warning);

        for kind in ComponentKind::ALL {
            mirror.apply(&ComponentPatch::connected(kind, true), UpdateOrigin::Poll, now);
        }
        assert_eq!(mirror.connected_count(), 5);
        assert_eq!(mirror.system_health(), SystemHealth::Good);
    }

    #[test]
    fn test_identical_update_is_silent() {
        let mut mirror = mirror_with_all();
        let patch = ComponentPatch::power(PowerPatch {
            measured_v: Some(12.0),
            ..Default::default()
        });
        let first = mirror.apply(&patch, UpdateOrigin::Realtime, Utc::now());
        assert_eq!(first.len(), 1);
        let second = mirror.apply(&patch, UpdateOrigin::Realtime, Utc::now());
        assert!(second.is_empty());
    }

    #[test]
    fn test_change_carries_before_and_after() {
        let mut mirror = mirror_with_all();
        let events = mirror.apply(
            &ComponentPatch::connected(ComponentKind::Mcu, true),
            UpdateOrigin::Command,
            Utc::now(),
        );
        match &events[0] {
            MirrorEvent::Component(change) => {
                assert!(!change.before.connected);
                assert!(change.after.connected);
                assert!(change.connected_changed());
                assert_eq!(change.origin, UpdateOrigin::Command);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unretained_component_is_ignored_but_emergency_applies() {
        let mut mirror = StateMirror::new();
        let events = mirror.apply(
            &ComponentPatch::digital_io(DigitalIoPatch {
                emergency_active: Some(true),
                outputs: vec![(1, true)],
                ..Default::default()
            }),
            UpdateOrigin::Realtime,
            Utc::now(),
        );
        assert_eq!(events.len(), 1);
        assert!(mirror.emergency_active());
        assert!(mirror.get(ComponentKind::DigitalIo).is_none());
    }

    #[test]
    fn test_replace_is_atomic() {
        let mut mirror = mirror_with_all();
        let now = Utc::now();
        mirror.apply(
            &ComponentPatch::power(PowerPatch {
                output_enabled: Some(true),
                setpoint_v: Some(24.0),
                ..Default::default()
            })
            .with_connected(true),
            UpdateOrigin::Poll,
            now,
        );

        mirror.replace(
            &ComponentPatch::power(PowerPatch {
                measured_v: Some(0.5),
                ..Default::default()
            })
            .with_connected(true),
            UpdateOrigin::Refresh,
            now,
        );
        let power = mirror.get(ComponentKind::Power).unwrap().power().unwrap().clone();
        assert_eq!(
            power,
            PowerState {
                measured_v: 0.5,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_replace_keeps_emergency_stop_latched() {
        let mut mirror = mirror_with_all();
        let now = Utc::now();
        mirror.apply(
            &ComponentPatch::robot(RobotPatch {
                motion: Some(MotionStatus::EmergencyStopped),
                ..Default::default()
            }),
            UpdateOrigin::Command,
            now,
        );
        mirror.replace(
            &ComponentPatch::robot(RobotPatch {
                is_moving: Some(false),
                ..Default::default()
            })
            .with_connected(true),
            UpdateOrigin::Refresh,
            now,
        );
        assert_eq!(
            mirror.get(ComponentKind::Robot).unwrap().robot().unwrap().motion,
            MotionStatus::EmergencyStopped
        );
    }

    #[test]
    fn test_mark_disconnected() {
        let mut mirror = mirror_with_all();
        let now = Utc::now();
        for kind in ComponentKind::ALL {
            mirror.apply(&ComponentPatch::connected(kind, true), UpdateOrigin::Poll, now);
        }
        let events = mirror.mark_disconnected(UpdateOrigin::Realtime, now);
        assert_eq!(events.len(), 5);
        assert_eq!(mirror.connected_count(), 0);
    }
}
