//! System dashboard
//!
//! Connection overview for every component, derived health, the
//! emergency banner and server resource usage. Its log is the system log.

use serde_json::Value;

use super::{element, fmt_opt, PanelContext, PanelCoordinator, PanelId};
use crate::host::{ListenerRegistry, StatusClass};
use crate::mirror::{ComponentKind, MirrorEvent, SystemHealth};
use crate::oplog::LogLevel;
use crate::poller::PollTarget;
use crate::transport::{shapes, Topic};

const PANEL: PanelId = PanelId::Dashboard;

const GESTURES: &[(&str, &str)] = &[("refresh-btn", "click"), ("clear-log-btn", "click")];

fn health_class(health: SystemHealth) -> StatusClass {
    match health {
        SystemHealth::Good => StatusClass::Connected,
        SystemHealth::Warning => StatusClass::Warning,
        SystemHealth::Critical => StatusClass::Error,
        SystemHealth::Unknown => StatusClass::Disconnected,
    }
}

#[derive(Default)]
pub struct DashboardPanel {
    listeners: ListenerRegistry,
    server_health: Option<shapes::SystemHealthReport>,
}

impl DashboardPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last server-reported resource usage
    pub fn server_health(&self) -> Option<&shapes::SystemHealthReport> {
        self.server_health.as_ref()
    }

    fn render_component(&self, ctx: &PanelContext<'_>, kind: ComponentKind, connected: bool) {
        ctx.view.set_status(
            &element(PANEL, &format!("{}-status", kind.name())),
            StatusClass::for_connected(connected),
        );
    }

    fn render_summary(&self, ctx: &PanelContext<'_>) {
        let mirror = ctx.mirror;
        let view = ctx.view;
        view.set_text(
            &element(PANEL, "connected-count"),
            &format!("{}/{}", mirror.connected_count(), ComponentKind::ALL.len()),
        );
        let health = mirror.system_health();
        view.set_text(&element(PANEL, "health"), health.label());
        view.set_status(&element(PANEL, "health"), health_class(health));
        let emergency = mirror.emergency_active();
        view.set_status(
            &element(PANEL, "emergency"),
            if emergency {
                StatusClass::Error
            } else {
                StatusClass::Connected
            },
        );
        view.set_text(
            &element(PANEL, "emergency"),
            if emergency { "EMERGENCY STOP ACTIVE" } else { "Normal" },
        );
    }

    fn render_server_health(&self, ctx: &PanelContext<'_>, report: &shapes::SystemHealthReport) {
        let view = ctx.view;
        for (field, value) in [
            ("cpu", report.cpu_percent),
            ("memory", report.memory_percent),
            ("disk", report.disk_percent),
        ] {
            view.set_text(&element(PANEL, field), &fmt_opt(value, 1, "%"));
            if let Some(v) = value {
                view.set_progress(&element(PANEL, &format!("{field}-bar")), v.clamp(0.0, 100.0));
            }
        }
        if let Some(status) = &report.status {
            view.set_text(&element(PANEL, "server-status"), status);
        }
    }
}

impl PanelCoordinator for DashboardPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &ComponentKind::ALL
    }

    fn topics(&self) -> Vec<Topic> {
        vec![
            Topic::HardwareStatus,
            Topic::SystemHealth,
            Topic::EmergencyStatus,
        ]
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        vec![PollTarget::SystemStatus]
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        for kind in ComponentKind::ALL {
            self.render_component(ctx, kind, ctx.mirror.is_connected(kind));
        }
        self.render_summary(ctx);
        if let Some(report) = &self.server_health {
            self.render_server_health(ctx, report);
        }
    }

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent) {
        match event {
            MirrorEvent::Component(change) => {
                if !change.connected_changed() {
                    return;
                }
                self.render_component(ctx, change.kind, change.after.connected);
                if change.after.connected {
                    ctx.log(LogLevel::Info, format!("{} connected", change.kind.label()));
                } else {
                    ctx.log(LogLevel::Warning, format!("{} disconnected", change.kind.label()));
                }
            }
            MirrorEvent::Emergency { after, .. } => {
                let message = if *after {
                    "Emergency stop activated"
                } else {
                    "Emergency stop cleared"
                };
                ctx.log(LogLevel::Safety, message);
            }
        }
        self.render_summary(ctx);
    }

    fn on_message(&mut self, ctx: &mut PanelContext<'_>, topic: Topic, payload: &Value) {
        if topic != Topic::SystemHealth {
            return;
        }
        match shapes::parse_system_health(payload) {
            Ok(report) => {
                self.render_server_health(ctx, &report);
                self.server_health = Some(report);
            }
            Err(e) => tracing::debug!("ignoring system-health frame: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{full_mirror, RecordingView};
    use super::*;
    use crate::mirror::{ComponentPatch, UpdateOrigin};
    use crate::oplog::OperationLog;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_summary_follows_connections() {
        let view = RecordingView::default();
        let mut mirror = full_mirror();
        let mut panel = DashboardPanel::new();
        let mut log = OperationLog::new("system", 1000);
        {
            let mut ctx = PanelContext {
                view: &view,
                mirror: &mirror,
                oplog: &mut log,
                now: Utc::now(),
            };
            panel.render(&mut ctx);
        }
        assert_eq!(view.text("system-connected-count").as_deref(), Some("0/5"));
        assert_eq!(view.text("system-health").as_deref(), Some("Unknown"));

        let mut events = Vec::new();
        for kind in [ComponentKind::Robot, ComponentKind::Power] {
            events.extend(mirror.apply(
                &ComponentPatch::connected(kind, true),
                UpdateOrigin::Poll,
                Utc::now(),
            ));
        }
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        for event in &events {
            panel.on_mirror(&mut ctx, event);
        }
        assert_eq!(view.text("system-connected-count").as_deref(), Some("2/5"));
        assert_eq!(view.status("system-health"), Some(StatusClass::Warning));
        assert_eq!(view.status("system-robot-status"), Some(StatusClass::Connected));
        assert_eq!(log.count_at(LogLevel::Info), 2);
    }

    #[test]
    fn test_system_health_frame() {
        let view = RecordingView::default();
        let mirror = full_mirror();
        let mut panel = DashboardPanel::new();
        let mut log = OperationLog::new("system", 1000);
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        panel.on_message(
            &mut ctx,
            Topic::SystemHealth,
            &json!({"status": "healthy", "cpu_percent": 12.5, "memory_percent": 40.0}),
        );
        assert_eq!(view.text("system-cpu").as_deref(), Some("12.5 %"));
        assert_eq!(view.text("system-disk").as_deref(), Some("--"));
        assert_eq!(view.progress.borrow().get("system-memory-bar"), Some(&40.0));
        assert_eq!(
            panel.server_health().and_then(|r| r.status.as_deref()),
            Some("healthy")
        );
        panel.on_message(&mut ctx, Topic::SystemHealth, &json!("garbage"));
        assert!(panel.server_health().is_some());
    }
}
