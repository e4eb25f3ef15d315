//! MCU panel: temperature control, fan, test mode and standby cycles

use super::{command, element, fmt_opt, render_connection, PanelContext, PanelCoordinator, PanelId};
use crate::command::{Command, CommandRecord, McuVerb, Verb};
use crate::config::SessionConfig;
use crate::host::{ListenerRegistry, StatusClass};
use crate::mirror::{ComponentKind, McuState, MirrorEvent};
use crate::poller::PollTarget;
use crate::telemetry::{Signal, TelemetryBuffer, TelemetryPoint};
use crate::transport::Topic;

const PANEL: PanelId = PanelId::Mcu;

const GESTURES: &[(&str, &str)] = &[
    ("connect-btn", "click"),
    ("disconnect-btn", "click"),
    ("readTemperature-btn", "click"),
    ("setTemperature-btn", "click"),
    ("setUpperTemperature-btn", "click"),
    ("setFanSpeed-btn", "click"),
    ("setTestMode-btn", "click"),
    ("waitBootComplete-btn", "click"),
    ("startStandbyHeating-btn", "click"),
    ("startStandbyCooling-btn", "click"),
];

/// Buttons usable whenever the MCU is connected
const CONTROL_VERBS: [&str; 6] = [
    "readTemperature",
    "setFanSpeed",
    "setTestMode",
    "waitBootComplete",
    "startStandbyCooling",
    "setUpperTemperature",
];

pub struct McuPanel {
    listeners: ListenerRegistry,
    temperature: TelemetryBuffer,
}

impl McuPanel {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            temperature: TelemetryBuffer::new("temperature", config.telemetry.panel_capacity),
        }
    }

    pub fn temperature_history(&self) -> &TelemetryBuffer {
        &self.temperature
    }

    pub fn connect(&self) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::Connect))
    }

    pub fn disconnect(&self) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::Disconnect))
    }

    pub fn read_status(&self) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::ReadStatus))
    }

    pub fn read_temperature(&self) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::ReadTemperature))
    }

    pub fn set_temperature(&self, celsius: f64) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::SetTemperature { celsius }))
    }

    pub fn set_upper_temperature(&self, celsius: f64) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::SetUpperTemperature { celsius }))
    }

    pub fn set_fan_speed(&self, level: u8) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::SetFanSpeed { level }))
    }

    pub fn set_test_mode(&self, mode: u8) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::SetTestMode { mode }))
    }

    pub fn wait_boot_complete(&self) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::WaitBootComplete))
    }

    pub fn start_standby_heating(
        &self,
        operating_celsius: f64,
        standby_celsius: f64,
        hold_time_ms: u64,
    ) -> Command {
        command(
            PANEL,
            Verb::Mcu(McuVerb::StartStandbyHeating {
                operating_celsius,
                standby_celsius,
                hold_time_ms,
            }),
        )
    }

    pub fn start_standby_cooling(&self) -> Command {
        command(PANEL, Verb::Mcu(McuVerb::StartStandbyCooling))
    }

    fn render_state(&self, ctx: &PanelContext<'_>, mcu: &McuState) {
        let view = ctx.view;
        view.set_text(&element(PANEL, "temperature"), &fmt_opt(mcu.temperature, 1, "°C"));
        view.set_text(
            &element(PANEL, "target-temperature"),
            &fmt_opt(mcu.target_temperature, 1, "°C"),
        );
        view.set_text(
            &element(PANEL, "fan-speed"),
            &mcu.fan_speed.map_or_else(|| "--".to_string(), |l| l.to_string()),
        );
        view.set_text(
            &element(PANEL, "test-mode"),
            &mcu.test_mode
                .map_or_else(|| "--".to_string(), |m| format!("MODE_{m}")),
        );
        view.set_text(
            &element(PANEL, "boot"),
            if mcu.boot_complete { "Ready" } else { "Booting" },
        );
        view.set_status(
            &element(PANEL, "boot"),
            if mcu.boot_complete {
                StatusClass::Connected
            } else {
                StatusClass::Warning
            },
        );
    }

    fn render_controls(&self, ctx: &PanelContext<'_>) {
        let connected = ctx.mirror.is_connected(ComponentKind::Mcu);
        let emergency = ctx.mirror.emergency_active();
        let view = ctx.view;
        let set = |verb: &str, enabled: bool| view.set_enabled(&element(PANEL, &format!("{verb}-btn")), enabled);
        set("connect", !connected);
        set("disconnect", connected);
        for verb in CONTROL_VERBS {
            set(verb, connected);
        }
        set("setTemperature", connected && !emergency);
        set("startStandbyHeating", connected && !emergency);
    }
}

impl PanelCoordinator for McuPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &[ComponentKind::Mcu]
    }

    fn topics(&self) -> Vec<Topic> {
        vec![
            Topic::Status(ComponentKind::Mcu),
            Topic::Error(ComponentKind::Mcu),
            Topic::McuTemperature,
        ]
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        vec![PollTarget::Component(ComponentKind::Mcu)]
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        if let Some(state) = ctx.mirror.get(ComponentKind::Mcu) {
            render_connection(ctx.view, PANEL, state.connected);
            if let Some(mcu) = state.mcu() {
                self.render_state(ctx, mcu);
            }
        }
        self.render_controls(ctx);
    }

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent) {
        match event {
            MirrorEvent::Component(change) if change.kind == ComponentKind::Mcu => {
                if change.connected_changed() {
                    render_connection(ctx.view, PANEL, change.after.connected);
                    self.render_controls(ctx);
                }
                if let Some(after) = change.after.mcu() {
                    if change.before.mcu() != Some(after) {
                        self.render_state(ctx, after);
                    }
                }
            }
            MirrorEvent::Emergency { .. } => self.render_controls(ctx),
            MirrorEvent::Component(_) => {}
        }
    }

    fn on_sample(&mut self, ctx: &mut PanelContext<'_>, signal: Signal, point: TelemetryPoint) {
        if signal == Signal::Temperature {
            self.temperature.push(point.t, point.v);
            ctx.view
                .append_chart(&element(PANEL, "temperature-chart"), point);
        }
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
