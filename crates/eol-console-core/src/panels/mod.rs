//! Panel Coordinators
//!
//! One coordinator per operator panel. A coordinator binds the mirror and
//! the command pipeline to the view:
//!
//! - on activation it registers its gesture listeners and renders every
//!   field it owns;
//! - on mirror events it diffs the fields it renders and calls the
//!   binder's setters;
//! - operator intents (`home()`, `enable_output()`, ...) build a
//!   [`Command`] for the session to execute;
//! - on deactivation it releases its listeners.
//!
//! Subscriptions, poll schedules and mirror retention are owned by the
//! session; a coordinator only declares what it needs.

pub mod configuration;
pub mod dashboard;
pub mod digital_io;
pub mod loadcell;
pub mod mcu;
pub mod power;
pub mod robot;

pub use configuration::ConfigurationPanel;
pub use dashboard::DashboardPanel;
pub use digital_io::DigitalIoPanel;
pub use eol_test::EolTestPanel;
pub use loadcell::LoadcellPanel;
pub use mcu::McuPanel;
pub use power::PowerPanel;
pub use robot::RobotPanel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::command::{Command, CommandError, CommandRecord, Verb};
use crate::config::SessionConfig;
use crate::host::{ListenerRegistry, StatusClass, ViewBinder};
use crate::mirror::{ComponentKind, MirrorEvent, StateMirror};
use crate::oplog::{LogLevel, OperationLog};
use crate::poller::PollTarget;
use crate::telemetry::{Signal, TelemetryPoint};
use crate::transport::Topic;

/// Operator panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelId {
    Robot,
    Power,
    Loadcell,
    Mcu,
    DigitalIo,
    Dashboard,
    EolTest,
    Configuration,
}

impl PanelId {
    pub const ALL: [PanelId; 8] = [
        PanelId::Robot,
        PanelId::Power,
        PanelId::Loadcell,
        PanelId::Mcu,
        PanelId::DigitalIo,
        PanelId::Dashboard,
        PanelId::EolTest,
        PanelId::Configuration,
    ];

    /// Log source and element prefix. The dashboard's log is the system
    /// log.
    pub fn name(self) -> &'static str {
        match self {
            PanelId::Robot => "robot",
            PanelId::Power => "power",
            PanelId::Loadcell => "loadcell",
            PanelId::Mcu => "mcu",
            PanelId::DigitalIo => "digital_io",
            PanelId::Dashboard => "system",
            PanelId::EolTest => "eol_test",
            PanelId::Configuration => "configuration",
        }
    }

    /// Panel dedicated to one component
    pub fn for_component(kind: ComponentKind) -> PanelId {
        match kind {
            ComponentKind::Robot => PanelId::Robot,
            ComponentKind::Power => PanelId::Power,
            ComponentKind::Loadcell => PanelId::Loadcell,
            ComponentKind::Mcu => PanelId::Mcu,
            ComponentKind::DigitalIo => PanelId::DigitalIo,
        }
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element id `<panel>-<field>`
pub fn element(panel: PanelId, field: &str) -> String {
    format!("{}-{}", panel.name(), field)
}

/// What a coordinator gets while handling one event
pub struct PanelContext<'a> {
    pub view: &'a dyn ViewBinder,
    pub mirror: &'a StateMirror,
    /// This panel's operator log
    pub oplog: &'a mut OperationLog,
    pub now: DateTime<Utc>,
}

impl PanelContext<'_> {
    /// Append to the panel log and show the line
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.oplog.append(level, message, self.now);
        if let Some(entry) = self.oplog.last() {
            self.view.append_log(self.oplog.source(), entry);
        }
    }
}

/// Common behavior of every panel
pub trait PanelCoordinator {
    fn id(&self) -> PanelId;

    /// Components whose state the panel needs mirrored
    fn components(&self) -> &'static [ComponentKind];

    fn topics(&self) -> Vec<Topic>;

    fn poll_targets(&self) -> Vec<PollTarget>;

    /// `(element, gesture)` pairs the panel listens to
    fn gestures(&self) -> &'static [(&'static str, &'static str)];

    fn listeners(&mut self) -> &mut ListenerRegistry;

    /// Render every field from the mirror
    fn render(&mut self, ctx: &mut PanelContext<'_>);

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent);

    fn on_sample(&mut self, _ctx: &mut PanelContext<'_>, _signal: Signal, _point: TelemetryPoint) {}

    /// Realtime frames that do not go through the mirror
    fn on_message(&mut self, _ctx: &mut PanelContext<'_>, _topic: Topic, _payload: &Value) {}

    /// Busy state of the button that issued the command
    fn on_record(&mut self, ctx: &mut PanelContext<'_>, record: &CommandRecord) {
        let button = element(self.id(), &format!("{}-btn", record.verb));
        ctx.view.set_enabled(&button, record.status.is_resolved());
    }

    /// Follow-up once a command issued by this panel resolved
    fn on_resolved(
        &mut self,
        _ctx: &mut PanelContext<'_>,
        _verb: &Verb,
        _result: Result<Option<&Value>, &CommandError>,
    ) {
    }

    fn activate(&mut self, ctx: &mut PanelContext<'_>) {
        for (el, gesture) in self.gestures() {
            let id = element(self.id(), el);
            self.listeners().listen(ctx.view, &id, gesture);
        }
        self.render(ctx);
    }

    /// Release every listener; returns how many were released
    fn deactivate(&mut self, view: &dyn ViewBinder) -> usize {
        self.listeners().dispose(view)
    }
}

/// Render a connected status dot and label
pub(crate) fn render_connection(view: &dyn ViewBinder, panel: PanelId, connected: bool) {
    view.set_status(&element(panel, "status"), StatusClass::for_connected(connected));
    view.set_text(
        &element(panel, "status-text"),
        if connected { "Connected" } else { "Disconnected" },
    );
}

/// Optional value with a fixed number of decimals, `--` when unknown
pub(crate) fn fmt_opt(value: Option<f64>, decimals: usize, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.decimals$} {unit}"),
        None => "--".to_string(),
    }
}

/// Every coordinator plus the set of mounted panels
pub struct Panels {
    pub robot: RobotPanel,
    pub power: PowerPanel,
    pub loadcell: LoadcellPanel,
    pub mcu: McuPanel,
    pub digital_io: DigitalIoPanel,
    pub dashboard: DashboardPanel,
    pub eol_test: EolTestPanel,
    pub configuration: ConfigurationPanel,
    mounted: BTreeSet<PanelId>,
}

impl Panels {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            robot: RobotPanel::new(config),
            power: PowerPanel::new(config),
            loadcell: LoadcellPanel::new(config),
            mcu: McuPanel::new(config),
            digital_io: DigitalIoPanel::new(),
            dashboard: DashboardPanel::new(),
            eol_test: EolTestPanel::new(config),
            configuration: ConfigurationPanel::new(),
            mounted: BTreeSet::new(),
        }
    }

    pub fn get(&self, id: PanelId) -> &dyn PanelCoordinator {
        match id {
            PanelId::Robot => &self.robot,
            PanelId::Power => &self.power,
            PanelId::Loadcell => &self.loadcell,
            PanelId::Mcu => &self.mcu,
            PanelId::DigitalIo => &self.digital_io,
            PanelId::Dashboard => &self.dashboard,
            PanelId::EolTest => &self.eol_test,
            PanelId::Configuration => &self.configuration,
        }
    }

    pub fn get_mut(&mut self, id: PanelId) -> &mut dyn PanelCoordinator {
        match id {
            PanelId::Robot => &mut self.robot,
            PanelId::Power => &mut self.power,
            PanelId::Loadcell => &mut self.loadcell,
            PanelId::Mcu => &mut self.mcu,
            PanelId::DigitalIo => &mut self.digital_io,
            PanelId::Dashboard => &mut self.dashboard,
            PanelId::EolTest => &mut self.eol_test,
            PanelId::Configuration => &mut self.configuration,
        }
    }

    /// Returns false when the panel was already mounted
    pub fn mount(&mut self, id: PanelId) -> bool {
        self.mounted.insert(id)
    }

    pub fn unmount(&mut self, id: PanelId) -> bool {
        self.mounted.remove(&id)
    }

    pub fn is_mounted(&self, id: PanelId) -> bool {
        self.mounted.contains(&id)
    }

    pub fn mounted(&self) -> Vec<PanelId> {
        self.mounted.iter().copied().collect()
    }
}

/// Build a command from this panel
pub(crate) fn command(panel: PanelId, verb: Verb) -> Command {
    Command::new(panel, verb)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording view shared by the panel tests

    use super::*;
    use crate::host::{AlertTone, ListenerToken};
    use crate::oplog::LogEntry;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct RecordingView {
        pub text: RefCell<BTreeMap<String, String>>,
        pub status: RefCell<BTreeMap<String, StatusClass>>,
        pub progress: RefCell<BTreeMap<String, f64>>,
        pub enabled: RefCell<BTreeMap<String, bool>>,
        pub charts: RefCell<BTreeMap<String, Vec<TelemetryPoint>>>,
        pub alerts: RefCell<Vec<AlertTone>>,
        pub logs: RefCell<Vec<(String, LogEntry)>>,
        next: Cell<u64>,
        pub released: Cell<usize>,
    }

    impl RecordingView {
        pub fn text(&self, element: &str) -> Option<String> {
            self.text.borrow().get(element).cloned()
        }

        pub fn status(&self, element: &str) -> Option<StatusClass> {
            self.status.borrow().get(element).copied()
        }

        pub fn enabled(&self, element: &str) -> Option<bool> {
            self.enabled.borrow().get(element).copied()
        }

        pub fn chart_len(&self, chart: &str) -> usize {
            self.charts.borrow().get(chart).map(Vec::len).unwrap_or(0)
        }
    }

    impl ViewBinder for RecordingView {
        fn set_text(&self, element: &str, text: &str) {
            self.text.borrow_mut().insert(element.into(), text.into());
        }
        fn set_status(&self, element: &str, status: StatusClass) {
            self.status.borrow_mut().insert(element.into(), status);
        }
        fn set_progress(&self, element: &str, percent: f64) {
            self.progress.borrow_mut().insert(element.into(), percent);
        }
        fn set_enabled(&self, element: &str, enabled: bool) {
            self.enabled.borrow_mut().insert(element.into(), enabled);
        }
        fn append_chart(&self, chart: &str, point: TelemetryPoint) {
            self.charts.borrow_mut().entry(chart.into()).or_default().push(point);
        }
        fn clear_chart(&self, chart: &str) {
            self.charts.borrow_mut().remove(chart);
        }
        fn append_log(&self, panel: &str, entry: &LogEntry) {
            self.logs.borrow_mut().push((panel.into(), entry.clone()));
        }
        fn listen(&self, _: &str, _: &str) -> ListenerToken {
            let id = self.next.get();
            self.next.set(id + 1);
            ListenerToken(id)
        }
        fn release(&self, _: ListenerToken) {
            self.released.set(self.released.get() + 1);
        }
        fn play_alert(&self, tone: AlertTone) {
            self.alerts.borrow_mut().push(tone);
        }
    }

    /// Mirror retaining every component
    pub fn full_mirror() -> StateMirror {
        let mut mirror = StateMirror::new();
        for kind in ComponentKind::ALL {
            mirror.retain(kind);
        }
        mirror
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panel_names() {
        assert_eq!(PanelId::Dashboard.name(), "system");
        assert_eq!(element(PanelId::Robot, "position"), "robot-position");
        assert_eq!(PanelId::for_component(ComponentKind::DigitalIo), PanelId::DigitalIo);
    }

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(Some(1.234), 2, "V"), "1.23 V");
        assert_eq!(fmt_opt(None, 2, "V"), "--");
    }

    #[test]
    fn test_mounting() {
        let mut panels = Panels::new(&SessionConfig::default());
        assert!(panels.mount(PanelId::Robot));
        assert!(!panels.mount(PanelId::Robot));
        assert_eq!(panels.mounted(), vec![PanelId::Robot]);
        assert_eq!(panels.get(PanelId::Robot).id(), PanelId::Robot);
        assert!(panels.unmount(PanelId::Robot));
        assert!(!panels.is_mounted(PanelId::Robot));
    }
}
