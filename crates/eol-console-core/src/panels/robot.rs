//! Robot panel
//!
//! Servo, homing and motion controls for one axis, the live position
//! readout and the motion state machine display.

use super::{command, element, fmt_opt, render_connection, PanelContext, PanelCoordinator, PanelId};
use crate::command::{Command, CommandOptions, CommandRecord, MotionProfile, RobotVerb, Verb};
use crate::config::{RobotDefaults, SessionConfig};
use crate::host::{ListenerRegistry, StatusClass};
use crate::mirror::{ComponentKind, ComponentState, MirrorEvent, MotionStatus, RobotState};
use crate::poller::PollTarget;
use crate::telemetry::{Signal, TelemetryBuffer, TelemetryPoint};
use crate::transport::Topic;

const PANEL: PanelId = PanelId::Robot;

const GESTURES: &[(&str, &str)] = &[
    ("connect-btn", "click"),
    ("disconnect-btn", "click"),
    ("servoOn-btn", "click"),
    ("servoOff-btn", "click"),
    ("home-btn", "click"),
    ("moveAbsolute-btn", "click"),
    ("moveRelative-btn", "click"),
    ("stopMotion-btn", "click"),
    ("emergencyStop-btn", "click"),
    ("skip-confirmation", "change"),
];

pub struct RobotPanel {
    listeners: ListenerRegistry,
    pub axis_id: u32,
    pub velocity: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    /// Operator's "don't ask again" toggle for motion confirmations
    pub skip_motion_confirmation: bool,
    travel_um: f64,
    position: TelemetryBuffer,
}

impl RobotPanel {
    pub fn new(config: &SessionConfig) -> Self {
        let RobotDefaults {
            axis_id,
            velocity,
            acceleration,
            deceleration,
        } = config.robot_defaults.clone();
        Self {
            listeners: ListenerRegistry::new(),
            axis_id,
            velocity,
            acceleration,
            deceleration,
            skip_motion_confirmation: false,
            travel_um: config.thresholds.max_position_um,
            position: TelemetryBuffer::new("position", config.telemetry.panel_capacity),
        }
    }

    pub fn position_history(&self) -> &TelemetryBuffer {
        &self.position
    }

    fn profile(&self, amount: f64) -> MotionProfile {
        MotionProfile {
            axis_id: self.axis_id,
            amount,
            velocity: self.velocity,
            acceleration: self.acceleration,
            deceleration: self.deceleration,
        }
    }

    fn motion_command(&self, verb: RobotVerb) -> Command {
        Command {
            origin: PANEL,
            verb: Verb::Robot(verb),
            options: CommandOptions {
                skip_confirmation: self.skip_motion_confirmation,
            },
        }
    }

    pub fn connect(&self) -> Command {
        command(PANEL, Verb::Robot(RobotVerb::Connect))
    }

    pub fn disconnect(&self) -> Command {
        command(PANEL, Verb::Robot(RobotVerb::Disconnect))
    }

    pub fn servo_on(&self) -> Command {
        command(PANEL, Verb::Robot(RobotVerb::ServoOn { axis_id: self.axis_id }))
    }

    pub fn servo_off(&self) -> Command {
        command(PANEL, Verb::Robot(RobotVerb::ServoOff { axis_id: self.axis_id }))
    }

    pub fn home(&self) -> Command {
        self.motion_command(RobotVerb::Home { axis_id: self.axis_id })
    }

    /// Move to `position` µm with the form's motion profile
    pub fn move_absolute(&self, position: f64) -> Command {
        self.motion_command(RobotVerb::MoveAbsolute(self.profile(position)))
    }

    /// Move by `distance` µm with the form's motion profile
    pub fn move_relative(&self, distance: f64) -> Command {
        self.motion_command(RobotVerb::MoveRelative(self.profile(distance)))
    }

    pub fn stop(&self) -> Command {
        command(PANEL, Verb::Robot(RobotVerb::StopMotion { axis_id: self.axis_id }))
    }

    pub fn emergency_stop(&self) -> Command {
        command(
            PANEL,
            Verb::Robot(RobotVerb::EmergencyStop { axis_id: self.axis_id }),
        )
    }

    pub fn read_position(&self) -> Command {
        command(
            PANEL,
            Verb::Robot(RobotVerb::ReadPosition { axis_id: self.axis_id }),
        )
    }

    pub fn read_status(&self) -> Command {
        command(PANEL, Verb::Robot(RobotVerb::ReadStatus))
    }

    fn render_state(&self, ctx: &PanelContext<'_>, state: &ComponentState, robot: &RobotState) {
        let view = ctx.view;
        render_connection(view, PANEL, state.connected);
        view.set_text(
            &element(PANEL, "servo"),
            if robot.servo_enabled { "ON" } else { "OFF" },
        );
        view.set_status(
            &element(PANEL, "servo"),
            if robot.servo_enabled {
                StatusClass::Active
            } else {
                StatusClass::Disconnected
            },
        );
        view.set_text(&element(PANEL, "motion"), robot.motion.label());
        view.set_status(&element(PANEL, "motion"), motion_class(robot.motion));
        self.render_position(ctx, robot.position_um);
        if let Some(homed) = robot.is_homed {
            view.set_text(&element(PANEL, "homed"), if homed { "Homed" } else { "Not homed" });
        }
    }

    fn render_position(&self, ctx: &PanelContext<'_>, position: Option<f64>) {
        ctx.view
            .set_text(&element(PANEL, "position"), &fmt_opt(position, 1, "µm"));
        if let Some(p) = position {
            let percent = if self.travel_um > 0.0 {
                (p / self.travel_um * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };
            ctx.view.set_progress(&element(PANEL, "position-bar"), percent);
        }
    }

    fn render_controls(&self, ctx: &PanelContext<'_>) {
        let emergency = ctx.mirror.emergency_active();
        let state = ctx.mirror.get(ComponentKind::Robot);
        let connected = state.is_some_and(|s| s.connected);
        let robot = state.and_then(|s| s.robot());
        let servo = robot.is_some_and(|r| r.servo_enabled);
        let motion = robot.map(|r| r.motion).unwrap_or_default();
        let can_move = connected
            && servo
            && !emergency
            && motion == MotionStatus::Idle;

        let view = ctx.view;
        let set = |verb: &str, enabled: bool| view.set_enabled(&element(PANEL, &format!("{verb}-btn")), enabled);
        set("connect", !connected);
        set("disconnect", connected);
        set("servoOn", connected && !servo && !emergency);
        set("servoOff", connected && servo);
        set("home", can_move);
        set("moveAbsolute", can_move);
        set("moveRelative", can_move);
        set("stopMotion", connected && motion.is_transient());
        set("emergencyStop", true);
        view.set_status(
            &element(PANEL, "emergency"),
            if emergency {
                StatusClass::Error
            } else {
                StatusClass::Connected
            },
        );
    }
}

fn motion_class(motion: MotionStatus) -> StatusClass {
    match motion {
        MotionStatus::Idle => StatusClass::Connected,
        MotionStatus::Moving | MotionStatus::Homing | MotionStatus::Stopping => StatusClass::Active,
        MotionStatus::EmergencyStopped => StatusClass::Error,
    }
}

impl PanelCoordinator for RobotPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &[ComponentKind::Robot]
    }

    fn topics(&self) -> Vec<Topic> {
        vec![
            Topic::Status(ComponentKind::Robot),
            Topic::Error(ComponentKind::Robot),
            Topic::RobotPosition,
            Topic::EmergencyStatus,
        ]
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        vec![PollTarget::Component(ComponentKind::Robot)]
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        if let Some(state) = ctx.mirror.get(ComponentKind::Robot) {
            if let Some(robot) = state.robot() {
                self.render_state(ctx, state, robot);
            }
        }
        self.render_controls(ctx);
        ctx.view.set_text(&element(PANEL, "axis"), &self.axis_id.to_string());
    }

    fn on_mirror(&mut self, ctx: &mut PanelContext<'_>, event: &MirrorEvent) {
        match event {
            MirrorEvent::Component(change) if change.kind == ComponentKind::Robot => {
                let (Some(before), Some(after)) = (change.before.robot(), change.after.robot())
                else {
                    return;
                };
                if change.connected_changed() {
                    render_connection(ctx.view, PANEL, change.after.connected);
                }
                if before.servo_enabled != after.servo_enabled
                    || before.motion != after.motion
                    || before.is_homed != after.is_homed
                {
                    self.render_state(ctx, &change.after, after);
                } else if before.position_um != after.position_um {
                    self.render_position(ctx, after.position_um);
                }
                if before.motion != after.motion
                    && after.motion == MotionStatus::EmergencyStopped
                {
                    ctx.log(crate::oplog::LogLevel::Safety, "Robot is emergency stopped");
                }
                self.render_controls(ctx);
            }
            MirrorEvent::Emergency { .. } => self.render_controls(ctx),
            MirrorEvent::Component(_) => {}
        }
    }

    fn on_sample(&mut self, ctx: &mut PanelContext<'_>, signal: Signal, point: TelemetryPoint) {
        if signal == Signal::Position {
            self.position.push(point.t, point.v);
            ctx.view.append_chart(&element(PANEL, "position-chart"), point);
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

#[cfg(test)]
mod tests {
    use super::super::testing::{full_mirror, RecordingView};
    use super::*;
    use crate::mirror::{ComponentPatch, RobotPatch, UpdateOrigin};
    use crate::oplog::OperationLog;
    use chrono::Utc;

    fn patch_robot(mirror: &mut crate::mirror::StateMirror, patch: RobotPatch) -> Vec<MirrorEvent> {
        mirror.apply(&ComponentPatch::robot(patch), UpdateOrigin::Poll, Utc::now())
    }

    #[test]
    fn test_motion_buttons_follow_servo() {
        let view = RecordingView::default();
        let mut mirror = full_mirror();
        mirror.apply(
            &ComponentPatch::connected(ComponentKind::Robot, true),
            UpdateOrigin::Refresh,
            Utc::now(),
        );
        let mut panel = RobotPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("robot", 100);
        {
            let mut ctx = PanelContext {
                view: &view,
                mirror: &mirror,
                oplog: &mut log,
                now: Utc::now(),
            };
            panel.activate(&mut ctx);
        }
        assert_eq!(view.enabled("robot-home-btn"), Some(false));
        assert_eq!(view.text("robot-status-text").as_deref(), Some("Connected"));

        let events = patch_robot(
            &mut mirror,
            RobotPatch {
                servo_enabled: Some(true),
                position_um: Some(250_000.0),
                ..Default::default()
            },
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
        assert_eq!(view.enabled("robot-home-btn"), Some(true));
        assert_eq!(view.text("robot-servo").as_deref(), Some("ON"));
        assert_eq!(view.text("robot-position").as_deref(), Some("250000.0 µm"));
        assert_eq!(view.progress.borrow().get("robot-position-bar"), Some(&50.0));
    }

    #[test]
    fn test_emergency_stop_is_logged_once() {
        let view = RecordingView::default();
        let mut mirror = full_mirror();
        let mut panel = RobotPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("robot", 100);
        let events = patch_robot(
            &mut mirror,
            RobotPatch {
                motion: Some(MotionStatus::EmergencyStopped),
                ..Default::default()
            },
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
        assert_eq!(log.count_at(crate::oplog::LogLevel::Safety), 1);
        assert_eq!(view.text("robot-motion").as_deref(), Some("Emergency Stopped"));
        assert_eq!(view.enabled("robot-emergencyStop-btn"), Some(true));
    }

    #[test]
    fn test_motion_commands_carry_skip_toggle() {
        let mut panel = RobotPanel::new(&SessionConfig::default());
        assert!(!panel.home().options.skip_confirmation);
        panel.skip_motion_confirmation = true;
        assert!(panel.move_relative(5.0).options.skip_confirmation);
        assert!(!panel.servo_on().options.skip_confirmation);
        match panel.move_absolute(100.0).verb {
            Verb::Robot(RobotVerb::MoveAbsolute(p)) => {
                assert_eq!(p.amount, 100.0);
                assert_eq!(p.velocity, 10_000.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_position_samples_feed_chart() {
        let view = RecordingView::default();
        let mirror = full_mirror();
        let mut panel = RobotPanel::new(&SessionConfig::default());
        let mut log = OperationLog::new("robot", 100);
        let mut ctx = PanelContext {
            view: &view,
            mirror: &mirror,
            oplog: &mut log,
            now: Utc::now(),
        };
        for i in 0..60 {
            let point = TelemetryPoint {
                t: Utc::now(),
                v: i as f64,
            };
            panel.on_sample(&mut ctx, Signal::Position, point);
        }
        panel.on_sample(
            &mut ctx,
            Signal::Force,
            TelemetryPoint { t: Utc::now(), v: 1.0 },
        );
        assert_eq!(panel.position_history().len(), 50);
        assert_eq!(view.chart_len("robot-position-chart"), 60);
    }
}
