//! Host seams
//!
//! The presentation layer is external. Panels talk to it through
//! [`ViewBinder`] (field setters and gesture listeners) and
//! [`ModalHost`] (confirmation dialogs and toast notifications).

use serde::{Deserialize, Serialize};

use crate::oplog::{LogEntry, LogLevel};
use crate::safety::{ConfirmLevel, Confirmation};
use crate::telemetry::TelemetryPoint;

/// Status dot classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Connected,
    Disconnected,
    Active,
    Warning,
    Error,
}

impl StatusClass {
    pub fn for_connected(connected: bool) -> Self {
        if connected {
            StatusClass::Connected
        } else {
            StatusClass::Disconnected
        }
    }
}

/// Local alert sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTone {
    Emergency,
    Warning,
}

/// Handle for one registered gesture listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub u64);

/// View element setters.
///
/// Element ids are opaque strings owned by the presentation layer; the
/// core only promises to use the same id for the same field.
pub trait ViewBinder {
    fn set_text(&self, element: &str, text: &str);

    fn set_status(&self, element: &str, status: StatusClass);

    /// Width of a progress bar, 0..=100
    fn set_progress(&self, element: &str, percent: f64);

    fn set_enabled(&self, element: &str, enabled: bool);

    fn append_chart(&self, chart: &str, point: TelemetryPoint);

    fn clear_chart(&self, chart: &str);

    /// Show a new operator log line in `panel`'s log view
    fn append_log(&self, panel: &str, entry: &LogEntry);

    /// Start delivering `gesture` events from `element` to the host's
    /// gesture router
    fn listen(&self, element: &str, gesture: &str) -> ListenerToken;

    fn release(&self, token: ListenerToken);

    /// Best effort; never blocks
    fn play_alert(&self, tone: AlertTone);
}

/// Listener tokens of one panel, disposed together on deactivation
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    tokens: Vec<ListenerToken>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&mut self, binder: &dyn ViewBinder, element: &str, gesture: &str) {
        let token = binder.listen(element, gesture);
        self.tokens.push(token);
    }

    /// Release every token; returns how many were released
    pub fn dispose(&mut self, binder: &dyn ViewBinder) -> usize {
        let count = self.tokens.len();
        for token in self.tokens.drain(..) {
            binder.release(token);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A confirmation dialog
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub title: String,
    pub message: String,
    pub level: ConfirmLevel,
    /// Show the "I understand" checkbox; confirming without it counts as
    /// declining
    pub require_acknowledgement: bool,
}

impl From<&Confirmation> for ConfirmationRequest {
    fn from(c: &Confirmation) -> Self {
        Self {
            title: c.title.clone(),
            message: c.reason.clone(),
            level: c.level,
            require_acknowledgement: c.requires_acknowledgement(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResponse {
    Confirmed { acknowledged: bool },
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl From<LogLevel> for NotificationLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Success => NotificationLevel::Success,
            LogLevel::Warning | LogLevel::Safety => NotificationLevel::Warning,
            LogLevel::Error => NotificationLevel::Error,
            LogLevel::Info | LogLevel::Input | LogLevel::Output => NotificationLevel::Info,
        }
    }
}

/// Non-blocking toast
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Dialogs and notifications
#[allow(async_fn_in_trait)]
pub trait ModalHost {
    /// Ask the operator; resolves when the dialog closes
    async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse;

    fn notify(&self, notification: Notification);
}

impl<T: ModalHost> ModalHost for &T {
    async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse {
        (**self).confirm(request).await
    }

    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

impl<T: ModalHost> ModalHost for std::rc::Rc<T> {
    async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse {
        (**self).confirm(request).await
    }

    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct CountingBinder {
        next: Cell<u64>,
        released: RefCell<Vec<ListenerToken>>,
    }

    impl ViewBinder for CountingBinder {
        fn set_text(&self, _: &str, _: &str) {}
        fn set_status(&self, _: &str, _: StatusClass) {}
        fn set_progress(&self, _: &str, _: f64) {}
        fn set_enabled(&self, _: &str, _: bool) {}
        fn append_chart(&self, _: &str, _: TelemetryPoint) {}
        fn clear_chart(&self, _: &str) {}
        fn append_log(&self, _: &str, _: &LogEntry) {}
        fn listen(&self, _: &str, _: &str) -> ListenerToken {
            let id = self.next.get();
            self.next.set(id + 1);
            ListenerToken(id)
        }
        fn release(&self, token: ListenerToken) {
            self.released.borrow_mut().push(token);
        }
        fn play_alert(&self, _: AlertTone) {}
    }

    #[test]
    fn test_listener_registry_disposes_everything() {
        let binder = CountingBinder::default();
        let mut registry = ListenerRegistry::new();
        registry.listen(&binder, "servo-on", "click");
        registry.listen(&binder, "servo-off", "click");
        assert_eq!(registry.dispose(&binder), 2);
        assert!(registry.is_empty());
        assert_eq!(
            *binder.released.borrow(),
            vec![ListenerToken(0), ListenerToken(1)]
        );
        assert_eq!(registry.dispose(&binder), 0);
    }

    #[test]
    fn test_escalated_confirmation_requires_acknowledgement() {
        let c = Confirmation::escalated("HIGH POWER", "18 V");
        let request = ConfirmationRequest::from(&c);
        assert!(request.require_acknowledgement);
        assert_eq!(request.level, ConfirmLevel::Error);
    }
}
