//! Command pipeline
//!
//! Serializes operator-issued commands: safety gate, optional operator
//! confirmation, single-flight slot, transport, then the verb's declared
//! mirror mutation. Every resolution updates the command's
//! [`CommandRecord`], which is what panels use to clear busy state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::CommandError;
use super::flight::SingleFlight;
use super::verbs::{CommandTarget, Verb};
use crate::host::{ConfirmationRequest, ConfirmationResponse, ModalHost, Notification};
use crate::mirror::{MirrorEvent, StateMirror, UpdateOrigin};
use crate::oplog::LogLevel;
use crate::panels::PanelId;
use crate::safety::{
    GateOutcome, Refusal, RefusalKind, SafetyContext, SafetyGate, SafetyThresholds,
};
use crate::transport::{ApiClient, HttpClient};

/// Number of resolved and pending records kept
pub const COMMAND_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Skip suppressible confirmations (robot motion with the "don't ask"
    /// toggle set)
    pub skip_confirmation: bool,
}

/// An operator-issued command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Panel that issued it; receives the log entries
    pub origin: PanelId,
    pub verb: Verb,
    pub options: CommandOptions,
}

impl Command {
    pub fn new(origin: PanelId, verb: Verb) -> Self {
        Self {
            origin,
            verb,
            options: CommandOptions::default(),
        }
    }

    pub fn skip_confirmation(mut self) -> Self {
        self.options.skip_confirmation = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Inflight,
    Succeeded,
    Failed,
    Cancelled,
}

impl CommandStatus {
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            CommandStatus::Succeeded | CommandStatus::Failed | CommandStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub id: Uuid,
    pub origin: PanelId,
    pub target: CommandTarget,
    pub verb: &'static str,
    /// Request body, when the verb has one
    pub payload: Option<Value>,
    pub issued_at: DateTime<Utc>,
    pub status: CommandStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Callbacks into the session.
///
/// All methods are synchronous and run between suspension points.
pub trait PipelineHooks {
    /// A record was created or changed status
    fn record_changed(&self, _record: &CommandRecord) {}

    /// The command passed the gate, the confirmation and the single-flight
    /// check and is about to reach the transport
    fn command_admitted(&self, _command: &Command) {}

    /// The verb's success mutation changed the mirror
    fn mirror_changed(&self, _events: &[MirrorEvent]) {}

    /// Operator log entry for the issuing panel
    fn log(&self, _origin: PanelId, _level: LogLevel, _message: &str) {}
}

impl PipelineHooks for () {}

/// Everything one execution needs from the session
pub struct PipelineContext<'a, H, M> {
    pub api: &'a ApiClient<H>,
    pub modal: &'a M,
    pub mirror: &'a RefCell<StateMirror>,
    pub thresholds: &'a SafetyThresholds,
    pub require_confirmations: bool,
    pub hooks: &'a dyn PipelineHooks,
}

#[derive(Debug, Default)]
pub struct CommandPipeline {
    flight: SingleFlight,
    history: RefCell<VecDeque<CommandRecord>>,
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flight(&self) -> &SingleFlight {
        &self.flight
    }

    /// Snapshot of the history, oldest first
    pub fn history(&self) -> Vec<CommandRecord> {
        self.history.borrow().iter().cloned().collect()
    }

    pub fn record(&self, id: Uuid) -> Option<CommandRecord> {
        self.history.borrow().iter().find(|r| r.id == id).cloned()
    }

    /// Records addressed to `target`, oldest first
    pub fn records_for(&self, target: CommandTarget) -> Vec<CommandRecord> {
        self.history
            .borrow()
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect()
    }

    /// Whether any command for `target` is still unresolved
    pub fn is_busy(&self, target: CommandTarget) -> bool {
        self.history
            .borrow()
            .iter()
            .any(|r| r.target == target && !r.status.is_resolved())
    }

    fn open(&self, command: &Command, hooks: &dyn PipelineHooks) -> Uuid {
        let record = CommandRecord {
            id: Uuid::new_v4(),
            origin: command.origin,
            target: command.verb.target(),
            verb: command.verb.name(),
            payload: command.verb.request().and_then(|r| r.body),
            issued_at: Utc::now(),
            status: CommandStatus::Pending,
            resolved_at: None,
            error: None,
        };
        let id = record.id;
        hooks.record_changed(&record);
        let mut history = self.history.borrow_mut();
        if history.len() == COMMAND_HISTORY {
            // Drop the oldest resolved record; unresolved ones stay visible
            let idx = history
                .iter()
                .position(|r| r.status.is_resolved())
                .unwrap_or(0);
            history.remove(idx);
        }
        history.push_back(record);
        id
    }

    fn transition(
        &self,
        id: Uuid,
        status: CommandStatus,
        error: Option<String>,
        hooks: &dyn PipelineHooks,
    ) {
        let updated = {
            let mut history = self.history.borrow_mut();
            history.iter_mut().find(|r| r.id == id).map(|record| {
                record.status = status;
                if status.is_resolved() {
                    record.resolved_at = Some(Utc::now());
                }
                record.error = error;
                record.clone()
            })
        };
        if let Some(record) = updated {
            hooks.record_changed(&record);
        }
    }

    /// Run `command` to resolution.
    ///
    /// Returns the response value on success. Every failure produces
    /// exactly one log entry through the hooks and, for failures the
    /// operator must see, one notification.
    pub async fn execute<H, M>(
        &self,
        ctx: &PipelineContext<'_, H, M>,
        command: Command,
    ) -> Result<Option<Value>, CommandError>
    where
        H: HttpClient,
        M: ModalHost,
    {
        let id = self.open(&command, ctx.hooks);
        let result = self.run(ctx, &command, id).await;

        match &result {
            Ok(_) => {
                ctx.hooks.log(
                    command.origin,
                    command.verb.success_level(),
                    &command.verb.success_message(),
                );
                self.transition(id, CommandStatus::Succeeded, None, ctx.hooks);
            }
            Err(err) => {
                let level = err.log_level();
                let message = failure_message(&command, err);
                match err {
                    CommandError::Busy { .. } | CommandError::Cancelled => {
                        debug!(verb = command.verb.name(), %err, "command not run")
                    }
                    _ => warn!(verb = command.verb.name(), %err, "command failed"),
                }
                ctx.hooks.log(command.origin, level, &message);
                if err.notifies() {
                    ctx.modal.notify(Notification::new(
                        level.into(),
                        command.verb.target().to_string(),
                        message,
                    ));
                }
                let status = if matches!(err, CommandError::Cancelled) {
                    CommandStatus::Cancelled
                } else {
                    CommandStatus::Failed
                };
                self.transition(id, status, Some(err.to_string()), ctx.hooks);
            }
        }
        result
    }

    async fn run<H, M>(
        &self,
        ctx: &PipelineContext<'_, H, M>,
        command: &Command,
        id: Uuid,
    ) -> Result<Option<Value>, CommandError>
    where
        H: HttpClient,
        M: ModalHost,
    {
        let verb = &command.verb;

        let confirmation = match gate(ctx, verb) {
            GateOutcome::Refuse(refusal) => return Err(refused(refusal)),
            GateOutcome::AdmitWithConfirmation(c) => Some(c),
            GateOutcome::Admit => None,
        };

        let class = verb.flight_class();
        // Don't ask the operator about a command that cannot run anyway
        if let Some(class) = class {
            if !self.flight.is_free(class) {
                return Err(CommandError::Busy { class });
            }
        }

        if let Some(confirmation) = confirmation {
            let waived = confirmation.suppressible && command.options.skip_confirmation;
            if ctx.require_confirmations && !waived {
                let request = ConfirmationRequest::from(&confirmation);
                let needs_ack = request.require_acknowledgement;
                match ctx.modal.confirm(request).await {
                    ConfirmationResponse::Confirmed { acknowledged } if acknowledged || !needs_ack => {}
                    _ => return Err(CommandError::Cancelled),
                }
                // The mirror may have moved while the dialog was open
                if let GateOutcome::Refuse(refusal) = gate(ctx, verb) {
                    debug!(verb = verb.name(), reason = %refusal.reason, "refused after confirmation");
                    return Err(refused(refusal));
                }
            }
        }

        let _guard = match class {
            Some(class) => Some(
                self.flight
                    .try_acquire(class)
                    .ok_or(CommandError::Busy { class })?,
            ),
            None => None,
        };

        self.transition(id, CommandStatus::Inflight, None, ctx.hooks);
        ctx.hooks.command_admitted(command);

        let value = match verb.request() {
            Some(request) => {
                info!(target_component = %verb.target(), verb = verb.name(), "sending command");
                let envelope = ctx.api.call(&request).await?;
                envelope
                    .into_result()
                    .map_err(|reason| CommandError::Remote { reason })?
            }
            None => None,
        };

        let now = Utc::now();
        let patches = verb.success_patches(value.as_ref(), &ctx.mirror.borrow(), now)?;
        if !patches.is_empty() {
            let events: Vec<MirrorEvent> = {
                let mut mirror = ctx.mirror.borrow_mut();
                patches
                    .iter()
                    .flat_map(|patch| mirror.apply(patch, UpdateOrigin::Command, now))
                    .collect()
            };
            if !events.is_empty() {
                ctx.hooks.mirror_changed(&events);
            }
        }
        Ok(value)
    }
}

/// Evaluate the safety gate against the mirror as it is now
fn gate<H, M>(ctx: &PipelineContext<'_, H, M>, verb: &Verb) -> GateOutcome {
    let mirror = ctx.mirror.borrow();
    let connections = mirror.connection_map();
    let safety = SafetyContext {
        component: verb.target().component().and_then(|kind| mirror.get(kind)),
        connections: &connections,
        thresholds: ctx.thresholds,
        require_confirmations: ctx.require_confirmations,
        emergency_active: mirror.emergency_active(),
    };
    SafetyGate::evaluate(verb, &safety)
}

fn refused(refusal: Refusal) -> CommandError {
    match refusal.kind {
        RefusalKind::Validation => CommandError::Validation {
            reason: refusal.reason,
        },
        RefusalKind::Interlock => CommandError::SafetyRefusal {
            reason: refusal.reason,
        },
    }
}

fn failure_message(command: &Command, err: &CommandError) -> String {
    match err {
        CommandError::Cancelled => format!("{} cancelled by operator", command.verb.name()),
        CommandError::Busy { .. } | CommandError::SafetyRefusal { .. } => err.to_string(),
        _ => format!("{} failed: {err}", command.verb.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{DigitalIoVerb, MotionProfile, PowerVerb, RobotVerb};
    use crate::mirror::{ComponentKind, ComponentPatch, DigitalIoPatch, PowerPatch, RobotPatch};
    use crate::transport::{HttpMethod, HttpResponse, TransportError};
    use serde_json::json;
    use std::cell::Cell;

    /// Answers every request with `{ok: true}` after yielding once
    #[derive(Default)]
    struct YieldingHttp {
        calls: RefCell<Vec<(HttpMethod, String)>>,
        fail_with: RefCell<Option<HttpResponse>>,
    }

    impl HttpClient for YieldingHttp {
        async fn request(
            &self,
            method: HttpMethod,
            path: &str,
            _body: Option<&Value>,
        ) -> Result<HttpResponse, TransportError> {
            self.calls.borrow_mut().push((method, path.to_string()));
            tokio::task::yield_now().await;
            let failure = self.fail_with.borrow().clone();
            Ok(failure.unwrap_or_else(|| HttpResponse::new(200, json!({"ok": true}))))
        }
    }

    struct ScriptedModal {
        answer: ConfirmationResponse,
        asked: RefCell<Vec<ConfirmationRequest>>,
        notified: RefCell<Vec<Notification>>,
    }

    impl ScriptedModal {
        fn answering(answer: ConfirmationResponse) -> Self {
            Self {
                answer,
                asked: RefCell::new(Vec::new()),
                notified: RefCell::new(Vec::new()),
            }
        }
    }

    impl ModalHost for ScriptedModal {
        async fn confirm(&self, request: ConfirmationRequest) -> ConfirmationResponse {
            self.asked.borrow_mut().push(request);
            self.answer
        }

        fn notify(&self, notification: Notification) {
            self.notified.borrow_mut().push(notification);
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        logs: RefCell<Vec<(LogLevel, String)>>,
        statuses: RefCell<Vec<CommandStatus>>,
        admitted: Cell<usize>,
        max_inflight: Cell<usize>,
        inflight: Cell<usize>,
    }

    impl PipelineHooks for RecordingHooks {
        fn record_changed(&self, record: &CommandRecord) {
            self.statuses.borrow_mut().push(record.status);
            match record.status {
                CommandStatus::Inflight => {
                    self.inflight.set(self.inflight.get() + 1);
                    self.max_inflight
                        .set(self.max_inflight.get().max(self.inflight.get()));
                }
                CommandStatus::Succeeded | CommandStatus::Failed => {
                    if self.inflight.get() > 0 {
                        self.inflight.set(self.inflight.get() - 1);
                    }
                }
                _ => {}
            }
        }

        fn command_admitted(&self, _command: &Command) {
            self.admitted.set(self.admitted.get() + 1);
        }

        fn log(&self, _origin: PanelId, level: LogLevel, message: &str) {
            self.logs.borrow_mut().push((level, message.to_string()));
        }
    }

    struct Rig {
        api: ApiClient<YieldingHttp>,
        modal: ScriptedModal,
        mirror: RefCell<StateMirror>,
        thresholds: SafetyThresholds,
        hooks: RecordingHooks,
    }

    impl Rig {
        fn new(answer: ConfirmationResponse) -> Self {
            let mut mirror = StateMirror::new();
            for kind in ComponentKind::ALL {
                mirror.retain(kind);
                mirror.apply(
                    &ComponentPatch::connected(kind, true),
                    UpdateOrigin::Refresh,
                    Utc::now(),
                );
            }
            Self {
                api: ApiClient::new(YieldingHttp::default(), "/api"),
                modal: ScriptedModal::answering(answer),
                mirror: RefCell::new(mirror),
                thresholds: SafetyThresholds::default(),
                hooks: RecordingHooks::default(),
            }
        }

        fn ctx(&self) -> PipelineContext<'_, YieldingHttp, ScriptedModal> {
            PipelineContext {
                api: &self.api,
                modal: &self.modal,
                mirror: &self.mirror,
                thresholds: &self.thresholds,
                require_confirmations: true,
                hooks: &self.hooks,
            }
        }

        fn patch(&self, patch: ComponentPatch) {
            self.mirror
                .borrow_mut()
                .apply(&patch, UpdateOrigin::Poll, Utc::now());
        }

        fn posts(&self) -> Vec<String> {
            self.api
                .http()
                .calls
                .borrow()
                .iter()
                .filter(|(m, _)| *m == HttpMethod::Post)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    fn profile(amount: f64) -> MotionProfile {
        MotionProfile {
            axis_id: 0,
            amount,
            velocity: 10_000.0,
            acceleration: 10_000.0,
            deceleration: 10_000.0,
        }
    }

    fn confirmed() -> ConfirmationResponse {
        ConfirmationResponse::Confirmed { acknowledged: false }
    }

    #[tokio::test]
    async fn test_high_voltage_enable_needs_acknowledgement() {
        let rig = Rig::new(ConfirmationResponse::Confirmed { acknowledged: true });
        rig.patch(ComponentPatch::power(PowerPatch {
            measured_v: Some(18.0),
            measured_a: Some(0.2),
            ..Default::default()
        }));
        let pipeline = CommandPipeline::new();
        let command = Command::new(PanelId::Power, Verb::Power(PowerVerb::EnableOutput));
        pipeline.execute(&rig.ctx(), command).await.unwrap();

        let asked = rig.modal.asked.borrow();
        assert_eq!(asked.len(), 1);
        assert!(asked[0].require_acknowledgement);
        assert_eq!(rig.posts(), vec!["/api/hardware/power/enable-output".to_string()]);
        let mirror = rig.mirror.borrow();
        assert!(mirror.get(ComponentKind::Power).unwrap().power().unwrap().output_enabled);
        assert_eq!(
            rig.hooks.logs.borrow().last().map(|(l, _)| *l),
            Some(LogLevel::Warning)
        );
    }

    #[tokio::test]
    async fn test_confirm_without_acknowledgement_cancels() {
        let rig = Rig::new(confirmed());
        rig.patch(ComponentPatch::power(PowerPatch {
            measured_v: Some(18.0),
            ..Default::default()
        }));
        let pipeline = CommandPipeline::new();
        let command = Command::new(PanelId::Power, Verb::Power(PowerVerb::EnableOutput));
        let err = pipeline.execute(&rig.ctx(), command).await.unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
        assert!(rig.posts().is_empty());
        assert_eq!(pipeline.history()[0].status, CommandStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_all_on_under_emergency_is_refused() {
        let rig = Rig::new(confirmed());
        rig.patch(ComponentPatch::digital_io(DigitalIoPatch {
            emergency_active: Some(true),
            ..Default::default()
        }));
        let before = rig.mirror.borrow().get(ComponentKind::DigitalIo).cloned();
        let pipeline = CommandPipeline::new();
        let command = Command::new(PanelId::DigitalIo, Verb::DigitalIo(DigitalIoVerb::AllOn));

        let err = pipeline.execute(&rig.ctx(), command).await.unwrap_err();
        assert!(matches!(err, CommandError::SafetyRefusal { .. }));
        assert!(rig.api.http().calls.borrow().is_empty());
        let logs = rig.hooks.logs.borrow();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].0, LogLevel::Safety);
        assert_eq!(rig.mirror.borrow().get(ComponentKind::DigitalIo).cloned(), before);
        assert_eq!(rig.modal.notified.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_second_motion_command_is_busy() {
        let rig = Rig::new(confirmed());
        rig.patch(ComponentPatch::robot(RobotPatch {
            servo_enabled: Some(true),
            ..Default::default()
        }));
        let pipeline = CommandPipeline::new();
        let ctx = rig.ctx();
        let first = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::MoveAbsolute(profile(100.0))))
            .skip_confirmation();
        let second = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::MoveRelative(profile(5.0))))
            .skip_confirmation();

        let (a, b) = tokio::join!(pipeline.execute(&ctx, first), pipeline.execute(&ctx, second));
        assert!(a.is_ok());
        assert!(matches!(b, Err(CommandError::Busy { .. })));
        assert_eq!(rig.posts(), vec!["/api/hardware/robot/move-absolute".to_string()]);
        assert!(rig.modal.notified.borrow().is_empty());
        assert_eq!(rig.hooks.max_inflight.get(), 1);
        assert!(pipeline.flight().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_stop_bypasses_motion_slot() {
        let rig = Rig::new(confirmed());
        rig.patch(ComponentPatch::robot(RobotPatch {
            servo_enabled: Some(true),
            ..Default::default()
        }));
        let pipeline = CommandPipeline::new();
        let ctx = rig.ctx();
        let moving = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::MoveAbsolute(profile(10.0))))
            .skip_confirmation();
        let stop = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::EmergencyStop { axis_id: 0 }));

        let (a, b) = tokio::join!(pipeline.execute(&ctx, moving), pipeline.execute(&ctx, stop));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(rig.posts().len(), 2);
        // The move resolved first but the stop wins the motion state
        let mirror = rig.mirror.borrow();
        let robot = mirror.get(ComponentKind::Robot).unwrap().robot().unwrap();
        assert_eq!(robot.motion, crate::mirror::MotionStatus::EmergencyStopped);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_mirror_untouched() {
        let rig = Rig::new(confirmed());
        *rig.api.http().fail_with.borrow_mut() =
            Some(HttpResponse::new(200, json!({"ok": false, "error": "servo fault"})));
        let pipeline = CommandPipeline::new();
        let command = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::ServoOn { axis_id: 0 }));

        let err = pipeline.execute(&rig.ctx(), command).await.unwrap_err();
        assert_eq!(err.to_string(), "servo fault");
        let mirror = rig.mirror.borrow();
        assert!(!mirror.get(ComponentKind::Robot).unwrap().robot().unwrap().servo_enabled);
        let logs = rig.hooks.logs.borrow();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0], (LogLevel::Error, "servoOn failed: servo fault".to_string()));
        assert_eq!(
            *rig.hooks.statuses.borrow(),
            vec![CommandStatus::Pending, CommandStatus::Inflight, CommandStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_validation_error_never_reaches_transport() {
        let rig = Rig::new(confirmed());
        let pipeline = CommandPipeline::new();
        let command = Command::new(PanelId::Power, Verb::Power(PowerVerb::SetVoltage { volts: 51.0 }));
        let err = pipeline.execute(&rig.ctx(), command).await.unwrap_err();
        assert!(matches!(err, CommandError::Validation { .. }));
        assert_eq!(rig.hooks.logs.borrow()[0].0, LogLevel::Info);
        assert!(rig.api.http().calls.borrow().is_empty());
        assert_eq!(rig.hooks.admitted.get(), 0);
    }

    #[tokio::test]
    async fn test_confirmations_disabled_skips_modal() {
        let rig = Rig::new(ConfirmationResponse::Declined);
        let pipeline = CommandPipeline::new();
        let mut ctx = rig.ctx();
        ctx.require_confirmations = false;
        let command = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::ServoOn { axis_id: 0 }));
        pipeline.execute(&ctx, command).await.unwrap();
        assert!(rig.modal.asked.borrow().is_empty());
    }

    /// Confirms, but an emergency frame lands while the dialog is open
    struct EmergencyDuringDialog<'a> {
        mirror: &'a RefCell<StateMirror>,
    }

    impl ModalHost for EmergencyDuringDialog<'_> {
        async fn confirm(&self, _request: ConfirmationRequest) -> ConfirmationResponse {
            self.mirror
                .borrow_mut()
                .set_emergency(true, UpdateOrigin::Realtime);
            tokio::task::yield_now().await;
            ConfirmationResponse::Confirmed { acknowledged: true }
        }

        fn notify(&self, _notification: Notification) {}
    }

    #[tokio::test]
    async fn test_emergency_raised_during_confirmation_refuses_motion() {
        let rig = Rig::new(confirmed());
        rig.patch(ComponentPatch::robot(RobotPatch {
            servo_enabled: Some(true),
            ..Default::default()
        }));
        let modal = EmergencyDuringDialog { mirror: &rig.mirror };
        let ctx = PipelineContext {
            api: &rig.api,
            modal: &modal,
            mirror: &rig.mirror,
            thresholds: &rig.thresholds,
            require_confirmations: true,
            hooks: &rig.hooks,
        };
        let pipeline = CommandPipeline::new();
        let command = Command::new(PanelId::Robot, Verb::Robot(RobotVerb::Home { axis_id: 0 }));

        let err = pipeline.execute(&ctx, command).await.unwrap_err();
        assert!(matches!(err, CommandError::SafetyRefusal { .. }));
        assert!(rig.mirror.borrow().emergency_active());
        assert!(rig.posts().is_empty());
        assert_eq!(rig.hooks.admitted.get(), 0);
        assert_eq!(rig.hooks.logs.borrow()[0].0, LogLevel::Safety);
        assert!(pipeline.flight().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let rig = Rig::new(confirmed());
        let pipeline = CommandPipeline::new();
        for _ in 0..(COMMAND_HISTORY + 5) {
            let command = Command::new(PanelId::Power, Verb::Power(PowerVerb::DisableOutput));
            pipeline.execute(&rig.ctx(), command).await.unwrap();
        }
        assert_eq!(pipeline.history().len(), COMMAND_HISTORY);
        assert!(!pipeline.is_busy(CommandTarget::Component(ComponentKind::Power)));
    }
}
