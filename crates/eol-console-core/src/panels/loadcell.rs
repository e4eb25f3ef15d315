//! Load cell panel
//!
//! Live force readout with running statistics, zero calibration, the
//! instrument hold, and a local "live monitoring" mode that keeps the
//! poller at its active rate.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{command, element, fmt_opt, render_connection, PanelContext, PanelCoordinator, PanelId};
use crate::command::{Command, CommandError, CommandRecord, LoadcellVerb, Verb};
use crate::config::SessionConfig;
use crate::host::{ListenerRegistry, StatusClass, ViewBinder};
use crate::mirror::{ComponentKind, LoadcellState, MirrorEvent};
use crate::oplog::{ExportedFile, LogLevel};
use crate::poller::PollTarget;
use crate::telemetry::{Signal, TelemetryBuffer, TelemetryPoint};
use crate::transport::Topic;

const PANEL: PanelId = PanelId::Loadcell;

const GESTURES: &[(&str, &str)] = &[
    ("connect-btn", "click"),
    ("disconnect-btn", "click"),
    ("readForce-btn", "click"),
    ("zeroCalibrate-btn", "click"),
    ("hold-btn", "click"),
    ("releaseHold-btn", "click"),
    ("startMonitoring-btn", "click"),
    ("stopMonitoring-btn", "click"),
    ("export-btn", "click"),
    ("clear-btn", "click"),
];

pub struct LoadcellPanel {
    listeners: ListenerRegistry,
    force: TelemetryBuffer,
    stability_window: usize,
    monitoring: bool,
    held: bool,
}

impl LoadcellPanel {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            force: TelemetryBuffer::new("force", config.telemetry.force_capacity),
            stability_window: config.telemetry.stability_window,
            monitoring: false,
            held: false,
        }
    }

    pub fn force_history(&self) -> &TelemetryBuffer {
        &self.force
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn connect(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::Connect))
    }

    pub fn disconnect(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::Disconnect))
    }

    pub fn read_force(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::ReadForce))
    }

    pub fn zero_calibrate(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::ZeroCalibrate))
    }

    pub fn hold(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::Hold))
    }

    pub fn release_hold(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::ReleaseHold))
    }

    pub fn start_monitoring(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::StartMonitoring))
    }

    pub fn stop_monitoring(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::StopMonitoring))
    }

    pub fn read_status(&self) -> Command {
        command(PANEL, Verb::Loadcell(LoadcellVerb::ReadStatus))
    }

    /// The poller dropped back to idle without an explicit stop
    pub fn monitoring_expired(&mut self, ctx: &mut PanelContext<'_>) {
        if self.monitoring {
            self.monitoring = false;
            ctx.log(LogLevel::Warning, "Live monitoring timed out");
            self.render_controls(ctx);
        }
    }

    /// Force samples as CSV
    pub fn export_force(&self, now: DateTime<Utc>) -> ExportedFile {
        self.force.export(PANEL.name(), now)
    }

    pub fn clear_history(&mut self, view: &dyn ViewBinder) {
        self.force.clear();
        view.clear_chart(&element(PANEL, "force-chart"));
        self.render_stats(view);
    }

    fn render_state(&self, ctx: &PanelContext<'_>, state: &LoadcellState) {
        let view = ctx.view;
        view.set_text(&element(PANEL, "force"), &fmt_opt(state.last_force, 3, &state.unit));
        view.set_text(
            &element(PANEL, "zero-offset"),
            &fmt_opt(Some(state.zero_offset), 3, &state.unit),
        );
        let calibrated = state
            .last_calibration
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Never".to_string());
        view.set_text(&element(PANEL, "last-calibration"), &calibrated);
    }

    fn render_stats(&self, view: &dyn ViewBinder) {
        let stats = self.force.stats();
        let text = |field: &str, value: String| view.set_text(&element(PANEL, field), &value);
        text("count", stats.count.to_string());
        text("min", fmt_opt(stats.min, 3, "kgf"));
        text("max", fmt_opt(stats.max, 3, "kgf"));
        text("mean", fmt_opt(stats.mean, 3, "kgf"));
        text("stdev", fmt_opt(stats.stdev, 4, "kgf"));
        text("stability", fmt_opt(self.force.stability(self.stability_window), 1, "%"));
        text("quality", fmt_opt(self.force.signal_quality(), 1, "%"));
    }

    fn render_controls(&self, ctx: &PanelContext<'_>) {
        let connected = ctx.mirror.is_connected(ComponentKind::Loadcell);
        let view = ctx.view;
        let set = |verb: &str, enabled: bool| view.set_enabled(&element(PANEL, &format!("{verb}-btn")), enabled);
        set("connect", !connected);
        set("disconnect", connected);
        set("readForce", connected);
        set("zeroCalibrate", connected);
        set("hold", connected && !self.held);
        set("releaseHold", connected && self.held);
        set("startMonitoring", connected && !self.monitoring);
        set("stopMonitoring", self.monitoring);
        view.set_status(
            &element(PANEL, "monitoring"),
            if self.monitoring {
                StatusClass::Active
            } else {
                StatusClass::Disconnected
            },
        );
    }
}

impl PanelCoordinator for LoadcellPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &[ComponentKind::Loadcell]
    }

    fn topics(&self) -> Vec<Topic> {
        vec![
            Topic::Status(ComponentKind::Loadcell),
            Topic::Error(ComponentKind::Loadcell),
            Topic::LoadcellForce,
        ]
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        vec![PollTarget::Component(ComponentKind::Loadcell)]
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        if let Some(state) = ctx.mirror.get(ComponentKind::Loadcell) {
            render_connection(ctx.view, PANEL, state.connected);
            if let Some(loadcell) = state.loadcell() {
                self.render_state(ctx, loadcell);
            }
        }
        self.render_stats(ctx.view);
        self.render_controls(ctx);
    }

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent) {
        let MirrorEvent::Component(change) = event else {
            return;
        };
        if change.kind != ComponentKind::Loadcell {
            return;
        }
        if change.connected_changed() {
            render_connection(ctx.view, PANEL, change.after.connected);
            if !change.after.connected && self.monitoring {
                self.monitoring = false;
                ctx.log(LogLevel::Warning, "Live monitoring stopped: load cell disconnected");
            }
            self.render_controls(ctx);
        }
        if let Some(after) = change.after.loadcell() {
            if change.before.loadcell() != Some(after) {
                self.render_state(ctx, after);
            }
        }
    }

    fn on_sample(&mut self, ctx: &mut PanelContext<'_>, signal: Signal, point: TelemetryPoint) {
        if signal != Signal::Force {
            return;
        }
        if self.force.push(point.t, point.v).is_some() {
            tracing::trace!("force window full, oldest sample evicted");
        }
        ctx.view.append_chart(&element(PANEL, "force-chart"), point);
        self.render_stats(ctx.view);
    }

    fn on_record(&mut self, ctx: &mut PanelContext<'_>, record: &CommandRecord) {
        if record.status.is_resolved() {
            self.render_controls(ctx);
        } else {
            ctx.view
                .set_enabled(&element(PANEL, &format!("{}-btn", record.verb)), false);
        }
    }

    fn on_resolved(
        &mut self,
        ctx: &mut PanelContext<'_>,
        verb: &Verb,
        result: Result<Option<&Value>, &CommandError>,
    ) {
        if result.is_err() {
            return;
        }
        match verb {
            Verb::Loadcell(LoadcellVerb::StartMonitoring) => self.monitoring = true,
            Verb::Loadcell(LoadcellVerb::StopMonitoring) => self.monitoring = false,
            Verb::Loadcell(LoadcellVerb::Hold) => self.held = true,
            Verb::Loadcell(LoadcellVerb::ReleaseHold) => self.held = false,
            _ => return,
        }
        self.render_controls(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{full_mirror, RecordingView};
    use super::*;
    use crate::oplog::OperationLog;
    use chrono::Duration;

    #[test]
    fn test_force_stats_render() {
        let view = RecordingView::default();
        let mirror = full_mirror();
        let mut panel = LoadcellPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("loadcell", 100);
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        let t0 = Utc::now();
        for (i, v) in [10.0, 10.0, 10.0, 10.0].into_iter().enumerate() {
            let point = TelemetryPoint {
                t: t0 + Duration::milliseconds(i as i64 * 100),
                v,
            };
            panel.on_sample(&mut ctx, Signal::Force, point);
        }
        assert_eq!(view.text("loadcell-count").as_deref(), Some("4"));
        assert_eq!(view.text("loadcell-mean").as_deref(), Some("10.000 kgf"));
        assert_eq!(view.text("loadcell-stability").as_deref(), Some("100.0 %"));
        assert_eq!(view.text("loadcell-quality").as_deref(), Some("100.0 %"));

        panel.clear_history(&view);
        assert!(panel.force_history().is_empty());
        assert_eq!(view.chart_len("loadcell-force-chart"), 0);
        assert_eq!(view.text("loadcell-mean").as_deref(), Some("--"));
    }

    #[test]
    fn test_monitoring_follows_resolution_and_expiry() {
        let view = RecordingView::default();
        let mirror = full_mirror();
        let mut panel = LoadcellPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("loadcell", 100);
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        let start = panel.start_monitoring().verb;
        panel.on_resolved(&mut ctx, &start, Ok(None));
        assert!(panel.is_monitoring());
        assert_eq!(view.enabled("loadcell-stopMonitoring-btn"), Some(true));

        panel.monitoring_expired(&mut ctx);
        panel.monitoring_expired(&mut ctx);
        assert!(!panel.is_monitoring());
        assert_eq!(log.count_at(LogLevel::Warning), 1);
    }

    #[test]
    fn test_failed_hold_keeps_state() {
        let view = RecordingView::default();
        let mirror = full_mirror();
        let mut panel = LoadcellPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("loadcell", 100);
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        let hold = panel.hold().verb;
        panel.on_resolved(&mut ctx, &hold, Err(&CommandError::Cancelled));
        assert!(!panel.is_held());
        panel.on_resolved(&mut ctx, &hold, Ok(None));
        assert!(panel.is_held());
    }

    #[test]
    fn test_export_force() {
        let mut panel = LoadcellPanel::new(&SessionConfig::default());
        panel.force.push(Utc::now(), 1.25);
        let file = panel.export_force(Utc::now());
        assert!(file.file_name.starts_with("loadcell-"));
        assert!(file.contents.starts_with("timestamp,force\n"));
    }
}
