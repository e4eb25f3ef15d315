//! Adaptive poller
//!
//! Periodic status reads per component, at one of two declared rates.
//! Rates switch on activity: long-running commands and transient mirror
//! states select the active rate, a settled mirror or the active timeout
//! returns to idle. Ticks are suppressed while the owning panel is not the
//! active view, while the document is hidden, and while the component is
//! disconnected.

mod schedule;
mod scheduler;

pub use schedule::{PollRate, PollRates, PollSchedule, PollTarget};
pub use scheduler::{Scheduler, TickOutcome};
