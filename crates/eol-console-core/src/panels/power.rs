//! Power supply panel

use super::{command, element, fmt_opt, render_connection, PanelContext, PanelCoordinator, PanelId};
use crate::command::{Command, CommandRecord, PowerVerb, Verb};
use crate::config::SessionConfig;
use crate::host::{ListenerRegistry, StatusClass};
use crate::mirror::{ComponentKind, MirrorEvent, PowerState};
use crate::oplog::LogLevel;
use crate::poller::PollTarget;
use crate::telemetry::{Signal, TelemetryBuffer, TelemetryPoint};
use crate::transport::Topic;

const PANEL: PanelId = PanelId::Power;

const GESTURES: &[(&str, &str)] = &[
    ("connect-btn", "click"),
    ("disconnect-btn", "click"),
    ("enableOutput-btn", "click"),
    ("disableOutput-btn", "click"),
    ("setVoltage-btn", "click"),
    ("setCurrent-btn", "click"),
    ("setCurrentLimit-btn", "click"),
    ("readReadings-btn", "click"),
];

pub struct PowerPanel {
    listeners: ListenerRegistry,
    high_voltage: f64,
    high_current: f64,
    voltage: TelemetryBuffer,
    current: TelemetryBuffer,
    power: TelemetryBuffer,
}

impl PowerPanel {
    pub fn new(config: &SessionConfig) -> Self {
        let capacity = config.telemetry.panel_capacity;
        Self {
            listeners: ListenerRegistry::new(),
            high_voltage: config.thresholds.high_voltage,
            high_current: config.thresholds.high_current,
            voltage: TelemetryBuffer::new("voltage", capacity),
            current: TelemetryBuffer::new("current", capacity),
            power: TelemetryBuffer::new("power", capacity),
        }
    }

    pub fn history(&self, signal: Signal) -> Option<&TelemetryBuffer> {
        match signal {
            Signal::Voltage => Some(&self.voltage),
            Signal::Current => Some(&self.current),
            Signal::Power => Some(&self.power),
            _ => None,
        }
    }

    /// Output energized above the high-power thresholds
    pub fn is_high_power(&self, state: &PowerState) -> bool {
        state.output_enabled
            && (state.measured_v > self.high_voltage || state.measured_a > self.high_current)
    }

    pub fn connect(&self) -> Command {
        command(PANEL, Verb::Power(PowerVerb::Connect))
    }

    pub fn disconnect(&self) -> Command {
        command(PANEL, Verb::Power(PowerVerb::Disconnect))
    }

    pub fn enable_output(&self) -> Command {
        command(PANEL, Verb::Power(PowerVerb::EnableOutput))
    }

    pub fn disable_output(&self) -> Command {
        command(PANEL, Verb::Power(PowerVerb::DisableOutput))
    }

    pub fn set_voltage(&self, volts: f64) -> Command {
        command(PANEL, Verb::Power(PowerVerb::SetVoltage { volts }))
    }

    pub fn set_current(&self, amps: f64) -> Command {
        command(PANEL, Verb::Power(PowerVerb::SetCurrent { amps }))
    }

    pub fn set_current_limit(&self, amps: f64) -> Command {
        command(PANEL, Verb::Power(PowerVerb::SetCurrentLimit { amps }))
    }

    pub fn read_readings(&self) -> Command {
        command(PANEL, Verb::Power(PowerVerb::ReadReadings))
    }

    pub fn read_status(&self) -> Command {
        command(PANEL, Verb::Power(PowerVerb::ReadStatus))
    }

    fn render_values(&self, ctx: &PanelContext<'_>, power: &PowerState) {
        let view = ctx.view;
        let text = |field: &str, value: String| view.set_text(&element(PANEL, field), &value);
        text("output", if power.output_enabled { "ON" } else { "OFF" }.to_string());
        text("setpoint-voltage", fmt_opt(Some(power.setpoint_v), 2, "V"));
        text("setpoint-current", fmt_opt(Some(power.setpoint_a), 3, "A"));
        text("current-limit", fmt_opt(Some(power.current_limit_a), 3, "A"));
        text("voltage", fmt_opt(Some(power.measured_v), 3, "V"));
        text("current", fmt_opt(Some(power.measured_a), 3, "A"));
        text("power", fmt_opt(Some(power.measured_w), 2, "W"));
        view.set_status(
            &element(PANEL, "output"),
            if power.output_enabled {
                StatusClass::Active
            } else {
                StatusClass::Disconnected
            },
        );
        view.set_status(
            &element(PANEL, "high-power"),
            if self.is_high_power(power) {
                StatusClass::Warning
            } else {
                StatusClass::Connected
            },
        );
    }

    fn render_controls(&self, ctx: &PanelContext<'_>) {
        let state = ctx.mirror.get(ComponentKind::Power);
        let connected = state.is_some_and(|s| s.connected);
        let output = state.and_then(|s| s.power()).is_some_and(|p| p.output_enabled);
        let emergency = ctx.mirror.emergency_active();
        let view = ctx.view;
        let set = |verb: &str, enabled: bool| view.set_enabled(&element(PANEL, &format!("{verb}-btn")), enabled);
        set("connect", !connected);
        set("disconnect", connected);
        set("enableOutput", connected && !output && !emergency);
        set("disableOutput", connected && output);
        for verb in ["setVoltage", "setCurrent", "setCurrentLimit", "readReadings"] {
            set(verb, connected);
        }
    }
}

impl PanelCoordinator for PowerPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &[ComponentKind::Power]
    }

    fn topics(&self) -> Vec<Topic> {
        vec![
            Topic::Status(ComponentKind::Power),
            Topic::Error(ComponentKind::Power),
            Topic::PowerReadings,
        ]
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        vec![PollTarget::Component(ComponentKind::Power)]
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        if let Some(state) = ctx.mirror.get(ComponentKind::Power) {
            render_connection(ctx.view, PANEL, state.connected);
            if let Some(power) = state.power() {
                self.render_values(ctx, power);
            }
        }
        self.render_controls(ctx);
    }

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent) {
        match event {
            MirrorEvent::Component(change) if change.kind == ComponentKind::Power => {
                let (Some(before), Some(after)) = (change.before.power(), change.after.power())
                else {
                    return;
                };
                if change.connected_changed() {
                    render_connection(ctx.view, PANEL, change.after.connected);
                }
                if before != after {
                    self.render_values(ctx, after);
                }
                if !self.is_high_power(before) && self.is_high_power(after) {
                    ctx.log(
                        LogLevel::Warning,
                        format!(
                            "High power output: {:.2} V, {:.3} A",
                            after.measured_v, after.measured_a
                        ),
                    );
                }
                self.render_controls(ctx);
            }
            MirrorEvent::Emergency { .. } => self.render_controls(ctx),
            MirrorEvent::Component(_) => {}
        }
    }

    fn on_sample(&mut self, ctx: &mut PanelContext<'_>, signal: Signal, point: TelemetryPoint) {
        let buffer = match signal {
            Signal::Voltage => &mut self.voltage,
            Signal::Current => &mut self.current,
            Signal::Power => &mut self.power,
            _ => return,
        };
        buffer.push(point.t, point.v);
        ctx.view
            .append_chart(&element(PANEL, &format!("{}-chart", signal.name())), point);
    }

    fn on_record(&mut self, ctx: &mut PanelContext<'_>, record: &CommandRecord) {
        if record.status.is_resolved() {
            self.render_controls(ctx);
        } else {
            ctx.view
                .set_enabled(&element(PANEL, &format!("{}-btn", record.verb)), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{full_mirror, RecordingView};
    use super::*;
    use crate::mirror::{ComponentPatch, PowerPatch, UpdateOrigin};
    use crate::oplog::OperationLog;
    use chrono::Utc;

    #[test]
    fn test_high_power_indicator_and_single_warning() {
        let view = RecordingView::default();
        let mut mirror = full_mirror();
        let mut panel = PowerPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("power", 100);

        let steps = [
            PowerPatch {
                output_enabled: Some(true),
                measured_v: Some(5.0),
                ..Default::default()
            },
            PowerPatch {
                measured_v: Some(24.0),
                ..Default::default()
            },
            PowerPatch {
                measured_v: Some(24.5),
                ..Default::default()
            },
        ];
        for step in steps {
            let events = mirror.apply(
                &ComponentPatch::power(step).with_connected(true),
                UpdateOrigin::Poll,
                Utc::now(),
            );
            let mut ctx = PanelContext {
                view: &view,
                mirror: &mirror,
                oplog: &mut log,
                now: Utc::now(),
            };
            for event in &events {
                panel.on_mirror(&mut ctx, event);
            }
        }
        assert_eq!(view.status("power-high-power"), Some(StatusClass::Warning));
        assert_eq!(log.count_at(LogLevel::Warning), 1);
        assert_eq!(view.text("power-voltage").as_deref(), Some("24.500 V"));
        assert_eq!(view.enabled("power-enableOutput-btn"), Some(false));
        assert_eq!(view.enabled("power-disableOutput-btn"), Some(true));
    }

    #[test]
    fn test_samples_route_to_their_buffer() {
        let view = RecordingView::default();
        let mirror = full_mirror();
        let mut panel = PowerPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("power", 100);
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        let t = Utc::now();
        panel.on_sample(&mut ctx, Signal::Voltage, TelemetryPoint { t, v: 12.0 });
        panel.on_sample(&mut ctx, Signal::Current, TelemetryPoint { t, v: 1.5 });
        panel.on_sample(&mut ctx, Signal::Temperature, TelemetryPoint { t, v: 40.0 });
        assert_eq!(panel.history(Signal::Voltage).map(|b| b.len()), Some(1));
        assert_eq!(panel.history(Signal::Power).map(|b| b.len()), Some(0));
        assert_eq!(view.chart_len("power-voltage-chart"), 1);
        assert_eq!(view.chart_len("power-current-chart"), 1);
    }

    #[test]
    fn test_intents() {
        let panel = PowerPanel::new(&SessionConfig::default());
        assert_eq!(
            panel.set_voltage(12.5).verb,
            Verb::Power(PowerVerb::SetVoltage { volts: 12.5 })
        );
        assert_eq!(panel.enable_output().origin, PanelId::Power);
    }
}
