//! One poll schedule

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::mirror::ComponentKind;
use crate::panels::PanelId;

/// What a schedule reads on each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "target", content = "component")]
pub enum PollTarget {
    /// `GET /hardware/<c>/status` plus the component's live reading
    Component(ComponentKind),
    /// Dashboard overview (`GET /hardware/status`)
    SystemStatus,
}

impl fmt::Display for PollTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTarget::Component(kind) => write!(f, "{kind}"),
            PollTarget::SystemStatus => f.write_str("system"),
        }
    }
}

/// The two declared intervals of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRates {
    pub idle: Duration,
    pub active: Duration,
}

impl PollRates {
    pub fn from_millis(idle_ms: u64, active_ms: u64) -> Self {
        Self {
            idle: Duration::from_millis(idle_ms.max(1)),
            active: Duration::from_millis(active_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollRate {
    #[default]
    Idle,
    Active,
}

/// Schedule state for one [`PollTarget`]
#[derive(Debug, Clone)]
pub struct PollSchedule {
    pub(crate) target: PollTarget,
    pub(crate) owner: PanelId,
    pub(crate) rates: PollRates,
    pub(crate) rate: PollRate,
    pub(crate) next_due: Instant,
    pub(crate) active_since: Option<Instant>,
    /// Held active by an explicit request (live monitoring)
    pub(crate) held: bool,
    /// Set by the active timeout; cleared when the mirror settles or a
    /// command re-activates the schedule
    pub(crate) timed_out: bool,
    pub(crate) in_flight: bool,
    pub(crate) consecutive_failures: u32,
}

impl PollSchedule {
    pub(crate) fn new(target: PollTarget, owner: PanelId, rates: PollRates, now: Instant) -> Self {
        Self {
            target,
            owner,
            rates,
            rate: PollRate::Idle,
            next_due: now,
            active_since: None,
            held: false,
            timed_out: false,
            in_flight: false,
            consecutive_failures: 0,
        }
    }

    pub fn target(&self) -> PollTarget {
        self.target
    }

    pub fn owner(&self) -> PanelId {
        self.owner
    }

    pub fn rates(&self) -> PollRates {
        self.rates
    }

    pub fn rate(&self) -> PollRate {
        self.rate
    }

    /// Current interval; always one of `rates.idle` / `rates.active`
    pub fn interval(&self) -> Duration {
        match self.rate {
            PollRate::Idle => self.rates.idle,
            PollRate::Active => self.rates.active,
        }
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn go_active(&mut self, now: Instant) {
        if self.rate != PollRate::Active {
            self.rate = PollRate::Active;
            self.active_since = Some(now);
            // Pull the next tick in rather than waiting out the idle interval
            self.next_due = self.next_due.min(now + self.rates.active);
        }
    }

    pub(crate) fn go_idle(&mut self) {
        self.rate = PollRate::Idle;
        self.active_since = None;
        self.held = false;
    }

    /// Instant at which the active timeout fires
    pub(crate) fn timeout_at(&self, timeout: Duration) -> Option<Instant> {
        self.active_since.map(|since| since + timeout)
    }
}
