//! Shared fixtures: recording host fakes around a demo-backed session

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use eol_console_core::config::SessionConfig;
use eol_console_core::demo::DemoHardware;
use eol_console_core::host::{
    AlertTone, ConfirmationRequest, ConfirmationResponse, ListenerToken, ModalHost, Notification,
    StatusClass, ViewBinder,
};
use eol_console_core::oplog::{LogEntry, LogLevel};
use eol_console_core::panels::PanelId;
use eol_console_core::session::HardwareSession;
use eol_console_core::telemetry::TelemetryPoint;
use eol_console_core::transport::{
    BusConnectionState, RealtimeBus, SubscriptionToken, Topic, TransportError,
};

/// View that remembers what was shown
#[derive(Default)]
pub struct View {
    pub text: RefCell<BTreeMap<String, String>>,
    pub status: RefCell<BTreeMap<String, StatusClass>>,
    pub enabled: RefCell<BTreeMap<String, bool>>,
    pub charts: RefCell<BTreeMap<String, usize>>,
    pub alerts: RefCell<Vec<AlertTone>>,
    next_listener: Cell<u64>,
    pub live_listeners: Cell<usize>,
}

impl ViewBinder for View {
    fn set_text(&self, element: &str, text: &str) {
        self.text.borrow_mut().insert(element.into(), text.into());
    }

    fn set_status(&self, element: &str, status: StatusClass) {
        self.status.borrow_mut().insert(element.into(), status);
    }

    fn set_progress(&self, _element: &str, _percent: f64) {}

    fn set_enabled(&self, element: &str, enabled: bool) {
        self.enabled.borrow_mut().insert(element.into(), enabled);
    }

    fn append_chart(&self, chart: &str, _point: TelemetryPoint) {
        *self.charts.borrow_mut().entry(chart.into()).or_default() += 1;
    }

    fn clear_chart(&self, chart: &str) {
        self.charts.borrow_mut().remove(chart);
    }

    fn append_log(&self, _panel: &str, _entry: &LogEntry) {}

    fn listen(&self, _element: &str, _gesture: &str) -> ListenerToken {
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        self.live_listeners.set(self.live_listeners.get() + 1);
        ListenerToken(id)
    }

    fn release(&self, _token: ListenerToken) {
        self.live_listeners.set(self.live_listeners.get() - 1);
    }

    fn play_alert(&self, tone: AlertTone) {
        self.alerts.borrow_mut().push(tone);
    }
}

/// Bus that refuses subscriptions while disconnected
pub struct Bus {
    state: Cell<BusConnectionState>,
    next: Cell<u64>,
    pub active: RefCell<Vec<(SubscriptionToken, Topic)>>,
    pub subscribe_calls: RefCell<Vec<Topic>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            state: Cell::new(BusConnectionState::Connected),
            next: Cell::new(1),
            active: RefCell::new(Vec::new()),
            subscribe_calls: RefCell::new(Vec::new()),
        }
    }
}

impl Bus {
    pub fn set_state(&self, state: BusConnectionState) {
        self.state.set(state);
        if state == BusConnectionState::Disconnected {
            // The server forgets everything on a dropped socket
            self.active.borrow_mut().clear();
        }
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.active.borrow().iter().map(|(_, t)| *t).collect();
        topics.sort();
        topics
    }
}

impl RealtimeBus for Bus {
    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionToken, TransportError> {
        self.subscribe_calls.borrow_mut().push(*topic);
        if self.state.get() != BusConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let token = SubscriptionToken(self.next.get());
        self.next.set(token.0 + 1);
        self.active.borrow_mut().push((token, *topic));
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.active.borrow_mut().retain(|(t, _)| *t != token);
    }

    fn connection_state(&self) -> BusConnectionState {
        self.state.get()
    }
}

/// Dialogs answered from a script; confirms with acknowledgement when the
/// script runs out
#[derive(Default)]
pub struct Modal {
    pub answers: RefCell<Vec<ConfirmationResponse>>,
    pub asked: RefCell<Vec<ConfirmationRequest>>,
    pub notifications: RefCell<Vec<Notification>>,
}

impl Modal {
    pub fn answer(&self, response: ConfirmationResponse) {
        self.answers.borrow_mut().push(response);
    }
}

impl ModalHost for Modal {
    async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse {
        self.asked.borrow_mut().push(request);
        let mut answers = self.answers.borrow_mut();
        if answers.is_empty() {
            ConfirmationResponse::Confirmed { acknowledged: true }
        } else {
            answers.remove(0)
        }
    }

    fn notify(&self, notification: Notification) {
        self.notifications.borrow_mut().push(notification);
    }
}

pub type Session = HardwareSession<DemoHardware, Bus, Modal, View>;

/// Route `tracing` output through the test harness (`RUST_LOG` filters it)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn session_with(demo: DemoHardware) -> Session {
    init_tracing();
    HardwareSession::new(
        SessionConfig::default(),
        demo,
        Bus::default(),
        Modal::default(),
        View::default(),
    )
    .expect("default config is valid")
}

/// Noise-free demo hardware with everything connected
pub fn rig() -> Session {
    session_with(DemoHardware::seeded(7).without_noise().all_connected())
}

pub fn entries_at(session: &Session, panel: PanelId, level: LogLevel) -> Vec<String> {
    session
        .log_entries(panel)
        .into_iter()
        .filter(|e| e.level == level)
        .map(|e| e.message)
        .collect()
}
