//! Digital I/O panel
//!
//! 32 inputs and 32 outputs with operator labels, per-channel activity
//! counters, the tower lamp stack (outputs 4-6) and the emergency stop
//! controls.

use super::{command, element, render_connection, PanelContext, PanelCoordinator, PanelId};
use crate::command::{Command, CommandRecord, CommandStatus, DigitalIoVerb, Verb};
use crate::host::{AlertTone, ListenerRegistry, StatusClass};
use crate::mirror::{ComponentKind, DigitalIoState, MirrorEvent, UpdateOrigin, DIO_CHANNELS};
use crate::oplog::LogLevel;
use crate::poller::PollTarget;
use crate::safety::TOWER_LAMP_CHANNELS;
use crate::transport::Topic;

const PANEL: PanelId = PanelId::DigitalIo;

const GESTURES: &[(&str, &str)] = &[
    ("connect-btn", "click"),
    ("disconnect-btn", "click"),
    ("outputs", "click"),
    ("allOn-btn", "click"),
    ("allOff-btn", "click"),
    ("activateEmergency-btn", "click"),
    ("resetEmergency-btn", "click"),
    ("statistics", "toggle"),
    ("labels", "change"),
];

/// Channel with the highest count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelActivity {
    pub channel: usize,
    pub count: u64,
}

/// Aggregates shown in the statistics view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DioStatistics {
    pub most_active_input: Option<ChannelActivity>,
    pub most_used_output: Option<ChannelActivity>,
    pub total_input_changes: u64,
    pub total_output_operations: u64,
}

fn busiest(counts: &[u64; DIO_CHANNELS]) -> Option<ChannelActivity> {
    counts
        .iter()
        .enumerate()
        // lowest channel wins a tie
        .fold(None, |best: Option<ChannelActivity>, (channel, &count)| match best {
            Some(b) if b.count >= count => Some(b),
            _ if count > 0 => Some(ChannelActivity { channel, count }),
            other => other,
        })
}

fn default_output_label(channel: usize) -> String {
    match channel {
        4 => "Tower Lamp Red".to_string(),
        5 => "Tower Lamp Yellow".to_string(),
        6 => "Tower Lamp Green".to_string(),
        ch => format!("OUT{ch:02}"),
    }
}

pub struct DigitalIoPanel {
    listeners: ListenerRegistry,
    input_labels: Vec<String>,
    output_labels: Vec<String>,
    /// Level transitions seen per input
    changes: [u64; DIO_CHANNELS],
    /// Level transitions seen per output
    operations: [u64; DIO_CHANNELS],
    statistics: Option<DioStatistics>,
}

impl Default for DigitalIoPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalIoPanel {
    pub fn new() -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            input_labels: (0..DIO_CHANNELS).map(|ch| format!("IN{ch:02}")).collect(),
            output_labels: (0..DIO_CHANNELS).map(default_output_label).collect(),
            changes: [0; DIO_CHANNELS],
            operations: [0; DIO_CHANNELS],
            statistics: None,
        }
    }

    pub fn input_label(&self, channel: usize) -> Option<&str> {
        self.input_labels.get(channel).map(String::as_str)
    }

    pub fn output_label(&self, channel: usize) -> Option<&str> {
        self.output_labels.get(channel).map(String::as_str)
    }

    /// Rename an input; returns false for channels outside 0..32
    pub fn set_input_label(&mut self, channel: usize, label: impl Into<String>) -> bool {
        match self.input_labels.get_mut(channel) {
            Some(slot) => {
                *slot = label.into();
                true
            }
            None => false,
        }
    }

    pub fn set_output_label(&mut self, channel: usize, label: impl Into<String>) -> bool {
        match self.output_labels.get_mut(channel) {
            Some(slot) => {
                *slot = label.into();
                true
            }
            None => false,
        }
    }

    pub fn input_changes(&self, channel: usize) -> u64 {
        self.changes.get(channel).copied().unwrap_or(0)
    }

    pub fn output_operations(&self, channel: usize) -> u64 {
        self.operations.get(channel).copied().unwrap_or(0)
    }

    /// Statistics for the statistics view, computed on first request after
    /// a counter changed
    pub fn statistics(&mut self) -> DioStatistics {
        if let Some(stats) = self.statistics {
            return stats;
        }
        let stats = DioStatistics {
            most_active_input: busiest(&self.changes),
            most_used_output: busiest(&self.operations),
            total_input_changes: self.changes.iter().sum(),
            total_output_operations: self.operations.iter().sum(),
        };
        self.statistics = Some(stats);
        stats
    }

    pub fn reset_counters(&mut self) {
        self.changes = [0; DIO_CHANNELS];
        self.operations = [0; DIO_CHANNELS];
        self.statistics = None;
    }

    pub fn connect(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::Connect))
    }

    pub fn disconnect(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::Disconnect))
    }

    pub fn read_status(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::ReadStatus))
    }

    pub fn write_output(&self, channel: usize, on: bool) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::WriteOutput { channel, on }))
    }

    /// Flip an output relative to the mirrored level
    pub fn toggle_output(&self, ctx: &PanelContext<'_>, channel: usize) -> Command {
        let current = ctx
            .mirror
            .get(ComponentKind::DigitalIo)
            .and_then(|s| s.digital_io())
            .and_then(|d| d.outputs.get(channel).copied())
            .unwrap_or(false);
        self.write_output(channel, !current)
    }

    pub fn all_on(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::AllOn))
    }

    pub fn all_off(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::AllOff))
    }

    pub fn activate_emergency(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::ActivateEmergency))
    }

    pub fn reset_emergency(&self) -> Command {
        command(PANEL, Verb::DigitalIo(DigitalIoVerb::ResetEmergency))
    }

    fn render_channels(&self, ctx: &PanelContext<'_>, state: &DigitalIoState) {
        for ch in 0..DIO_CHANNELS {
            self.render_input(ctx, ch, state.inputs[ch]);
            self.render_output(ctx, ch, state.outputs[ch]);
        }
    }

    fn render_input(&self, ctx: &PanelContext<'_>, channel: usize, level: bool) {
        let id = element(PANEL, &format!("input-{channel}"));
        ctx.view.set_status(&id, level_class(level));
        ctx.view.set_text(&id, &self.input_labels[channel]);
    }

    fn render_output(&self, ctx: &PanelContext<'_>, channel: usize, level: bool) {
        let id = element(PANEL, &format!("output-{channel}"));
        ctx.view.set_status(&id, level_class(level));
        ctx.view.set_text(&id, &self.output_labels[channel]);
    }

    fn render_emergency(&self, ctx: &PanelContext<'_>) {
        let active = ctx.mirror.emergency_active();
        let view = ctx.view;
        view.set_status(
            &element(PANEL, "emergency"),
            if active {
                StatusClass::Error
            } else {
                StatusClass::Connected
            },
        );
        view.set_text(
            &element(PANEL, "emergency"),
            if active { "EMERGENCY STOP ACTIVE" } else { "Normal" },
        );
    }

    fn render_controls(&self, ctx: &PanelContext<'_>) {
        let connected = ctx.mirror.is_connected(ComponentKind::DigitalIo);
        let emergency = ctx.mirror.emergency_active();
        let view = ctx.view;
        let set = |verb: &str, enabled: bool| view.set_enabled(&element(PANEL, &format!("{verb}-btn")), enabled);
        set("connect", !connected);
        set("disconnect", connected);
        set("allOn", connected && !emergency);
        set("allOff", connected);
        set("activateEmergency", !emergency);
        set("resetEmergency", emergency);
        for ch in 0..DIO_CHANNELS {
            view.set_enabled(&element(PANEL, &format!("output-{ch}-btn")), connected);
        }
    }

    fn record_transitions(&mut self, ctx: &mut PanelContext<'_>, before: &DigitalIoState, after: &DigitalIoState, origin: UpdateOrigin) {
        for ch in 0..DIO_CHANNELS {
            if before.inputs[ch] != after.inputs[ch] {
                self.changes[ch] += 1;
                self.statistics = None;
                self.render_input(ctx, ch, after.inputs[ch]);
                let message = format!("{} {}", self.input_labels[ch], level_word(after.inputs[ch]));
                ctx.log(LogLevel::Input, message);
            }
            if before.outputs[ch] != after.outputs[ch] {
                self.operations[ch] += 1;
                self.statistics = None;
                self.render_output(ctx, ch, after.outputs[ch]);
                // Command successes are already logged by the pipeline
                if origin != UpdateOrigin::Command {
                    let message =
                        format!("{} {}", self.output_labels[ch], level_word(after.outputs[ch]));
                    ctx.log(LogLevel::Output, message);
                }
            }
        }
    }
}

fn level_class(level: bool) -> StatusClass {
    if level {
        StatusClass::Active
    } else {
        StatusClass::Disconnected
    }
}

fn level_word(level: bool) -> &'static str {
    if level {
        "ON"
    } else {
        "OFF"
    }
}

impl PanelCoordinator for DigitalIoPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &[ComponentKind::DigitalIo]
    }

    fn topics(&self) -> Vec<Topic> {
        vec![
            Topic::Status(ComponentKind::DigitalIo),
            Topic::Error(ComponentKind::DigitalIo),
            Topic::DigitalIo,
            Topic::EmergencyStatus,
        ]
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        vec![PollTarget::Component(ComponentKind::DigitalIo)]
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        if let Some(state) = ctx.mirror.get(ComponentKind::DigitalIo) {
            render_connection(ctx.view, PANEL, state.connected);
            if let Some(dio) = state.digital_io() {
                self.render_channels(ctx, dio);
            }
        }
        self.render_emergency(ctx);
        self.render_controls(ctx);
    }

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent) {
        match event {
            MirrorEvent::Component(change) if change.kind == ComponentKind::DigitalIo => {
                if change.connected_changed() {
                    render_connection(ctx.view, PANEL, change.after.connected);
                    self.render_controls(ctx);
                }
                if let (Some(before), Some(after)) =
                    (change.before.digital_io(), change.after.digital_io())
                {
                    self.record_transitions(ctx, before, after, change.origin);
                }
            }
            MirrorEvent::Emergency { after, origin, .. } => {
                self.render_emergency(ctx);
                self.render_controls(ctx);
                if *origin != UpdateOrigin::Command {
                    let message = if *after {
                        "Emergency stop activated"
                    } else {
                        "Emergency stop cleared"
                    };
                    ctx.log(LogLevel::Safety, message);
                }
            }
            MirrorEvent::Component(_) => {}
        }
    }

    fn on_record(&mut self, ctx: &mut PanelContext<'_>, record: &CommandRecord) {
        if record.verb == "activateEmergency" && record.status == CommandStatus::Inflight {
            ctx.view.play_alert(AlertTone::Emergency);
        }
        let button = match (record.verb, &record.payload) {
            ("writeOutput", Some(payload)) => payload
                .get("channel")
                .and_then(|c| c.as_u64())
                .map(|ch| element(PANEL, &format!("output-{ch}-btn"))),
            _ => None,
        }
        .unwrap_or_else(|| element(PANEL, &format!("{}-btn", record.verb)));
        if record.status.is_resolved() {
            self.render_controls(ctx);
        } else {
            ctx.view.set_enabled(&button, false);
        }
    }
}

/// Whether `channel` drives a tower lamp
pub fn is_tower_lamp(channel: usize) -> bool {
    TOWER_LAMP_CHANNELS.contains(&channel)
}
