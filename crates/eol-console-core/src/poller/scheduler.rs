//! Scheduler owning every poll schedule
//!
//! The scheduler never sleeps and never performs I/O. The session asks it
//! which targets are due, performs the reads, and reports back; the run
//! loop sleeps until [`Scheduler::next_deadline`].

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::schedule::{PollRate, PollRates, PollSchedule, PollTarget};
use crate::panels::PanelId;

/// Result of reporting a finished tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ok,
    /// Failed, still below the failure threshold
    Failed { consecutive: u32 },
    /// This failure reached the threshold; reported once per streak
    Degraded { consecutive: u32 },
}

#[derive(Debug)]
pub struct Scheduler {
    schedules: BTreeMap<PollTarget, PollSchedule>,
    active_view: Option<PanelId>,
    document_visible: bool,
    active_timeout: Duration,
    failure_threshold: u32,
}

impl Scheduler {
    pub fn new(active_timeout: Duration, failure_threshold: u32) -> Self {
        Self {
            schedules: BTreeMap::new(),
            active_view: None,
            document_visible: true,
            active_timeout,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Register (or re-register) the schedule for `target`; the first tick
    /// is due immediately
    pub fn register(&mut self, target: PollTarget, owner: PanelId, rates: PollRates, now: Instant) {
        debug!(%target, ?owner, "poll schedule registered");
        self.schedules
            .insert(target, PollSchedule::new(target, owner, rates, now));
    }

    pub fn unregister(&mut self, target: PollTarget) {
        if self.schedules.remove(&target).is_some() {
            debug!(%target, "poll schedule removed");
        }
    }

    /// Tear down every schedule owned by `owner`
    pub fn unregister_owner(&mut self, owner: PanelId) {
        self.schedules.retain(|_, s| s.owner != owner);
    }

    pub fn get(&self, target: PollTarget) -> Option<&PollSchedule> {
        self.schedules.get(&target)
    }

    pub fn rate(&self, target: PollTarget) -> Option<PollRate> {
        self.schedules.get(&target).map(|s| s.rate)
    }

    pub fn interval(&self, target: PollTarget) -> Option<Duration> {
        self.schedules.get(&target).map(|s| s.interval())
    }

    pub fn schedules(&self) -> impl Iterator<Item = &PollSchedule> {
        self.schedules.values()
    }

    pub fn set_active_view(&mut self, view: Option<PanelId>) {
        self.active_view = view;
    }

    pub fn active_view(&self) -> Option<PanelId> {
        self.active_view
    }

    pub fn set_document_visible(&mut self, visible: bool) {
        self.document_visible = visible;
    }

    pub fn is_document_visible(&self) -> bool {
        self.document_visible
    }

    /// Whether a tick for `target` would be suppressed right now
    pub fn is_suppressed(&self, target: PollTarget, connected: bool) -> bool {
        let Some(schedule) = self.schedules.get(&target) else {
            return true;
        };
        !self.document_visible || self.active_view != Some(schedule.owner) || !connected
    }

    /// A long-running command was admitted for `target`
    pub fn activate(&mut self, target: PollTarget, now: Instant) {
        if let Some(s) = self.schedules.get_mut(&target) {
            s.timed_out = false;
            s.go_active(now);
            debug!(%target, "poller active");
        }
    }

    /// Hold `target` at its active rate until released (live monitoring)
    pub fn hold(&mut self, target: PollTarget, held: bool, now: Instant) {
        if let Some(s) = self.schedules.get_mut(&target) {
            if held {
                s.timed_out = false;
                s.go_active(now);
                s.held = true;
            } else {
                s.held = false;
                s.go_idle();
            }
        }
    }

    /// Feed the mirror's view of `target`: transient states accelerate the
    /// schedule, a settled state returns it to idle
    pub fn observe(&mut self, target: PollTarget, transient: bool, now: Instant) {
        let Some(s) = self.schedules.get_mut(&target) else {
            return;
        };
        if transient {
            if !s.timed_out {
                s.go_active(now);
            }
        } else {
            s.timed_out = false;
            if s.rate == PollRate::Active && !s.held {
                s.go_idle();
                debug!(%target, "poller idle");
            }
        }
    }

    /// Force every schedule that has been active for longer than the
    /// timeout back to idle; returns the affected targets
    pub fn expire(&mut self, now: Instant) -> Vec<PollTarget> {
        let timeout = self.active_timeout;
        let mut expired = Vec::new();
        for s in self.schedules.values_mut() {
            if s.timeout_at(timeout).is_some_and(|at| at <= now) {
                s.go_idle();
                s.timed_out = true;
                warn!(target = %s.target, "active polling timed out");
                expired.push(s.target);
            }
        }
        expired
    }

    /// Targets whose tick starts now. Each returned target is marked in
    /// flight until [`Scheduler::finish`]; a due tick that finds the
    /// previous one still pending is skipped, and suppressed ticks are
    /// skipped too.
    pub fn begin_due<F>(&mut self, now: Instant, connected: F) -> Vec<PollTarget>
    where
        F: Fn(PollTarget) -> bool,
    {
        let visible = self.document_visible;
        let view = self.active_view;
        let mut started = Vec::new();

        for s in self.schedules.values_mut() {
            if s.next_due > now {
                continue;
            }
            s.next_due = now + s.interval();
            if s.in_flight {
                continue;
            }
            if !visible || view != Some(s.owner) || !connected(s.target) {
                continue;
            }
            s.in_flight = true;
            started.push(s.target);
        }
        started
    }

    /// Report a finished tick
    pub fn finish(&mut self, target: PollTarget, success: bool) -> TickOutcome {
        let threshold = self.failure_threshold;
        let Some(s) = self.schedules.get_mut(&target) else {
            return TickOutcome::Ok;
        };
        s.in_flight = false;
        if success {
            s.consecutive_failures = 0;
            return TickOutcome::Ok;
        }
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        if s.consecutive_failures == threshold {
            TickOutcome::Degraded {
                consecutive: s.consecutive_failures,
            }
        } else {
            TickOutcome::Failed {
                consecutive: s.consecutive_failures,
            }
        }
    }

    /// Earliest instant at which a tick or an active timeout is due
    pub fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.active_timeout;
        self.schedules
            .values()
            .flat_map(|s| [Some(s.next_due), s.timeout_at(timeout)])
            .flatten()
            .min()
    }
}
