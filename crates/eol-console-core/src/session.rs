//! Hardware Session
//!
//! [`HardwareSession`] owns one instance of every core service (mirror,
//! pipeline, scheduler, subscriptions, operation logs, panels) and routes
//! traffic between them:
//!
//! - operator commands go through [`HardwareSession::execute`];
//! - realtime traffic arrives through [`HardwareSession::handle_bus_event`];
//! - poll ticks run in [`HardwareSession::run_due_ticks`];
//! - [`HardwareSession::run`] drives both from one task.
//!
//! Everything runs in a single execution context. State sits in `RefCell`s
//! and no borrow is held across an await, so mutations between suspension
//! points are atomic.

use chrono::Utc;
use serde_json::Value;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::command::{
    Command, CommandError, CommandPipeline, CommandRecord, LoadcellVerb, PipelineContext,
    PipelineHooks, Verb,
};
use crate::config::{ConfigError, SessionConfig};
use crate::host::{ModalHost, Notification, ViewBinder};
use crate::mirror::{
    ComponentKind, ComponentPatch, MirrorChange, MirrorEvent, StateMirror, UpdateOrigin,
    DIO_CHANNELS,
};
use crate::oplog::{ExportFormat, ExportedFile, LogEntry, LogLevel, OperationLog};
use crate::panels::configuration::ConfigRequest;
use crate::panels::{ConfigurationPanel, DigitalIoPanel, PanelContext, PanelCoordinator, PanelId, Panels};
use crate::poller::{PollTarget, Scheduler, TickOutcome};
use crate::preferences::{LogFilter, OperatorPreferences, PreferenceError, PreferenceStore};
use crate::telemetry::{Signal, TelemetryPoint};
use crate::transport::{
    shapes, ApiClient, BusConnectionState, BusEvent, BusMessage, HttpClient, RealtimeBus,
    SubscriptionRegistry, Topic, TransportError,
};

/// One operator console session
pub struct HardwareSession<H, B, M, V> {
    config: SessionConfig,
    api: ApiClient<H>,
    bus: B,
    modal: M,
    view: V,
    mirror: RefCell<StateMirror>,
    pipeline: CommandPipeline,
    scheduler: RefCell<Scheduler>,
    panels: RefCell<Panels>,
    logs: RefCell<BTreeMap<PanelId, OperationLog>>,
    subscriptions: RefCell<SubscriptionRegistry<PanelId>>,
    preferences: RefCell<OperatorPreferences>,
    bus_state: Cell<BusConnectionState>,
}

/// Pipeline callbacks routed back into the session
struct SessionHooks<'s, H, B, M, V> {
    session: &'s HardwareSession<H, B, M, V>,
}

impl<H, B, M, V> PipelineHooks for SessionHooks<'_, H, B, M, V>
where
    H: HttpClient,
    B: RealtimeBus,
    M: ModalHost,
    V: ViewBinder,
{
    fn record_changed(&self, record: &CommandRecord) {
        self.session
            .with_panel(record.origin, |panel, ctx| panel.on_record(ctx, record));
    }

    fn command_admitted(&self, command: &Command) {
        let now = Instant::now();
        let mut scheduler = self.session.scheduler.borrow_mut();
        let loadcell = PollTarget::Component(ComponentKind::Loadcell);
        match &command.verb {
            Verb::Loadcell(LoadcellVerb::StartMonitoring) => scheduler.hold(loadcell, true, now),
            Verb::Loadcell(LoadcellVerb::StopMonitoring) => scheduler.hold(loadcell, false, now),
            verb if verb.is_long_running() => {
                if let Some(kind) = verb.target().component() {
                    scheduler.activate(PollTarget::Component(kind), now);
                }
            }
            _ => {}
        }
    }

    fn mirror_changed(&self, events: &[MirrorEvent]) {
        self.session.dispatch_events(events);
        let samples: Vec<(Signal, f64)> = events
            .iter()
            .filter_map(|event| match event {
                MirrorEvent::Component(change) => Some(change_samples(change)),
                MirrorEvent::Emergency { .. } => None,
            })
            .flatten()
            .collect();
        self.session.dispatch_samples(&samples);
    }

    fn log(&self, origin: PanelId, level: LogLevel, message: &str) {
        self.session.log(origin, level, message);
    }
}

/// Measurements that changed between the two sides of a command-driven
/// mirror write
fn change_samples(change: &MirrorChange) -> Vec<(Signal, f64)> {
    let (before, after) = (&change.before, &change.after);
    let changed = |signal: Signal, old: Option<f64>, new: Option<f64>| match new {
        Some(v) if old != Some(v) => Some((signal, v)),
        _ => None,
    };
    let mut samples = Vec::new();
    match change.kind {
        ComponentKind::Robot => {
            let old = before.robot().and_then(|r| r.position_um);
            let new = after.robot().and_then(|r| r.position_um);
            samples.extend(changed(Signal::Position, old, new));
        }
        ComponentKind::Power => {
            if let (Some(old), Some(new)) = (before.power(), after.power()) {
                samples.extend(changed(Signal::Voltage, Some(old.measured_v), Some(new.measured_v)));
                samples.extend(changed(Signal::Current, Some(old.measured_a), Some(new.measured_a)));
                samples.extend(changed(Signal::Power, Some(old.measured_w), Some(new.measured_w)));
            }
        }
        ComponentKind::Loadcell => {
            let old = before.loadcell().and_then(|l| l.last_force);
            let new = after.loadcell().and_then(|l| l.last_force);
            samples.extend(changed(Signal::Force, old, new));
        }
        ComponentKind::Mcu => {
            let old = before.mcu().and_then(|m| m.temperature);
            let new = after.mcu().and_then(|m| m.temperature);
            samples.extend(changed(Signal::Temperature, old, new));
        }
        ComponentKind::DigitalIo => {}
    }
    samples
}

/// An error frame identical to the previous one within this window is a
/// redelivery, not a new fault
fn error_repeat_window() -> chrono::Duration {
    chrono::Duration::seconds(2)
}

fn new_log(config: &SessionConfig, panel: PanelId) -> OperationLog {
    let capacity = match panel {
        PanelId::Dashboard => config.system_log_capacity(),
        _ => config.log_capacity(),
    };
    OperationLog::new(panel.name(), capacity)
}

impl<H, B, M, V> HardwareSession<H, B, M, V>
where
    H: HttpClient,
    B: RealtimeBus,
    M: ModalHost,
    V: ViewBinder,
{
    /// Build a session; the configuration is validated first
    pub fn new(config: SessionConfig, http: H, bus: B, modal: M, view: V) -> Result<Self, ConfigError> {
        config.validate()?;
        let api = ApiClient::new(http, config.api_base.clone());
        let scheduler = Scheduler::new(
            config.polling.active_timeout(),
            config.polling.failure_threshold,
        );
        let logs = PanelId::ALL
            .iter()
            .map(|id| (*id, new_log(&config, *id)))
            .collect();
        let panels = Panels::new(&config);
        let bus_state = Cell::new(bus.connection_state());
        Ok(Self {
            api,
            bus,
            modal,
            view,
            mirror: RefCell::new(StateMirror::new()),
            pipeline: CommandPipeline::new(),
            scheduler: RefCell::new(scheduler),
            panels: RefCell::new(panels),
            logs: RefCell::new(logs),
            subscriptions: RefCell::new(SubscriptionRegistry::new()),
            preferences: RefCell::new(OperatorPreferences::default()),
            bus_state,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient<H> {
        &self.api
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn modal(&self) -> &M {
        &self.modal
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn pipeline(&self) -> &CommandPipeline {
        &self.pipeline
    }

    /// Do not hold the returned borrow across an await
    pub fn mirror(&self) -> Ref<'_, StateMirror> {
        self.mirror.borrow()
    }

    pub fn scheduler(&self) -> Ref<'_, Scheduler> {
        self.scheduler.borrow()
    }

    pub fn panels(&self) -> Ref<'_, Panels> {
        self.panels.borrow()
    }

    /// Direct panel access for operator intents and accessors
    pub fn panels_mut(&self) -> RefMut<'_, Panels> {
        self.panels.borrow_mut()
    }

    pub fn subscriptions(&self) -> Ref<'_, SubscriptionRegistry<PanelId>> {
        self.subscriptions.borrow()
    }

    pub fn bus_state(&self) -> BusConnectionState {
        self.bus_state.get()
    }

    /// Run `f` against the whole panel set with `panel`'s context
    fn with_context<R>(
        &self,
        panel: PanelId,
        f: impl FnOnce(&mut Panels, &mut PanelContext<'_>) -> R,
    ) -> R {
        let mirror = self.mirror.borrow();
        let mut panels = self.panels.borrow_mut();
        let mut logs = self.logs.borrow_mut();
        let oplog = logs
            .entry(panel)
            .or_insert_with(|| new_log(&self.config, panel));
        let mut ctx = PanelContext {
            view: &self.view,
            mirror: &*mirror,
            oplog,
            now: Utc::now(),
        };
        f(&mut *panels, &mut ctx)
    }

    fn with_panel<R>(
        &self,
        panel: PanelId,
        f: impl FnOnce(&mut dyn PanelCoordinator, &mut PanelContext<'_>) -> R,
    ) -> R {
        self.with_context(panel, |panels, ctx| f(panels.get_mut(panel), ctx))
    }

    /// Append to `panel`'s operation log and show the line
    pub fn log(&self, panel: PanelId, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.with_context(panel, |_, ctx| ctx.log(level, message));
    }

    // ------------------------------------------------------------------
    // Panel lifecycle
    // ------------------------------------------------------------------

    /// Mount `panel`: retain its components, subscribe its topics, register
    /// its poll schedules, bind listeners, render, then refresh its
    /// components from their status endpoints. Returns false when the
    /// panel was already active.
    pub async fn activate_panel(&self, panel: PanelId) -> bool {
        if !self.panels.borrow_mut().mount(panel) {
            return false;
        }
        let (components, topics, targets) = {
            let panels = self.panels.borrow();
            let coordinator = panels.get(panel);
            (
                coordinator.components(),
                coordinator.topics(),
                coordinator.poll_targets(),
            )
        };

        {
            let mut mirror = self.mirror.borrow_mut();
            for kind in components {
                mirror.retain(*kind);
            }
        }
        {
            let mut subscriptions = self.subscriptions.borrow_mut();
            for topic in topics {
                subscriptions.subscribe(&self.bus, panel, topic);
            }
        }
        {
            let now = Instant::now();
            let mut scheduler = self.scheduler.borrow_mut();
            for target in targets {
                scheduler.register(target, panel, self.config.polling.rates_for(target), now);
            }
        }

        self.with_panel(panel, |coordinator, ctx| coordinator.activate(ctx));
        info!(%panel, "panel activated");

        self.refresh_components(components).await;
        true
    }

    /// Unmount `panel` and release everything it held. Returns false when
    /// the panel was not active.
    pub fn deactivate_panel(&self, panel: PanelId) -> bool {
        let components = {
            let mut panels = self.panels.borrow_mut();
            if !panels.unmount(panel) {
                return false;
            }
            let coordinator = panels.get_mut(panel);
            let released = coordinator.deactivate(&self.view);
            trace!(%panel, released, "listeners released");
            coordinator.components()
        };

        self.subscriptions
            .borrow_mut()
            .release_owner(&self.bus, panel);
        self.scheduler.borrow_mut().unregister_owner(panel);
        {
            let mut mirror = self.mirror.borrow_mut();
            for kind in components {
                mirror.release(*kind);
            }
        }
        info!(%panel, "panel deactivated");
        true
    }

    pub fn is_active(&self, panel: PanelId) -> bool {
        self.panels.borrow().is_mounted(panel)
    }

    /// Panel currently in front; only its schedules tick
    pub fn set_active_view(&self, panel: Option<PanelId>) {
        self.scheduler.borrow_mut().set_active_view(panel);
    }

    pub fn set_document_visible(&self, visible: bool) {
        debug!(visible, "document visibility changed");
        self.scheduler.borrow_mut().set_document_visible(visible);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Run an operator command to resolution, then let the issuing panel
    /// follow up on the result
    pub async fn execute(&self, command: Command) -> Result<Option<Value>, CommandError> {
        let hooks = SessionHooks { session: self };
        let ctx = PipelineContext {
            api: &self.api,
            modal: &self.modal,
            mirror: &self.mirror,
            thresholds: &self.config.thresholds,
            require_confirmations: self.config.require_confirmations,
            hooks: &hooks,
        };
        let origin = command.origin;
        let verb = command.verb.clone();
        let result = self.pipeline.execute(&ctx, command).await;

        let outcome = result.as_ref().map(Option::as_ref);
        self.with_panel(origin, |panel, ctx| panel.on_resolved(ctx, &verb, outcome));
        result
    }

    /// Configuration requests skip the safety gate and single-flight; the
    /// result is absorbed by the configuration panel
    pub async fn configure(&self, request: ConfigRequest) -> Result<Option<Value>, CommandError> {
        let result = ConfigurationPanel::fetch(&self.api, &request).await;
        let outcome = result.as_ref().map(Option::as_ref);
        self.with_context(PanelId::Configuration, |panels, ctx| {
            panels.configuration.on_config_result(ctx, &request, outcome)
        });
        if let Err(err) = &result {
            warn!(request = request.name(), %err, "configuration request failed");
            if err.notifies() {
                self.modal.notify(Notification::new(
                    err.log_level().into(),
                    "configuration",
                    err.to_string(),
                ));
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Mirror traffic
    // ------------------------------------------------------------------

    /// Apply (or atomically replace) patches and fan the result out
    fn apply_patches(&self, patches: &[ComponentPatch], origin: UpdateOrigin, replace: bool) {
        let now = Utc::now();
        let (events, samples) = {
            let mut mirror = self.mirror.borrow_mut();
            let mut events = Vec::new();
            let mut samples = Vec::new();
            for patch in patches {
                if mirror.is_retained(patch.kind()) {
                    samples.extend(patch.samples());
                }
                if replace {
                    events.extend(mirror.replace(patch, origin, now));
                } else {
                    events.extend(mirror.apply(patch, origin, now));
                }
            }
            (events, samples)
        };
        self.dispatch_events(&events);
        self.dispatch_samples(&samples);
    }

    /// Notify mounted panels and keep the poller in step with the mirror
    fn dispatch_events(&self, events: &[MirrorEvent]) {
        if events.is_empty() {
            return;
        }
        let mounted = self.panels.borrow().mounted();
        for panel in mounted {
            self.with_panel(panel, |coordinator, ctx| {
                for event in events {
                    coordinator.on_mirror(ctx, event);
                }
            });
        }

        let now = Instant::now();
        let mut scheduler = self.scheduler.borrow_mut();
        for event in events {
            let MirrorEvent::Component(change) = event else {
                continue;
            };
            match change.kind {
                ComponentKind::Robot => {
                    let transient = change
                        .after
                        .robot()
                        .is_some_and(|r| r.motion.is_transient());
                    scheduler.observe(PollTarget::Component(ComponentKind::Robot), transient, now);
                }
                ComponentKind::Loadcell if change.connected_changed() && !change.after.connected => {
                    scheduler.hold(PollTarget::Component(ComponentKind::Loadcell), false, now);
                }
                _ => {}
            }
        }
    }

    fn dispatch_samples(&self, samples: &[(Signal, f64)]) {
        if samples.is_empty() {
            return;
        }
        let t = Utc::now();
        let mounted = self.panels.borrow().mounted();
        for panel in mounted {
            self.with_panel(panel, |coordinator, ctx| {
                for (signal, v) in samples {
                    coordinator.on_sample(ctx, *signal, TelemetryPoint { t, v: *v });
                }
            });
        }
    }

    /// `GET /hardware/<kind>/status`, parsed
    async fn read_status(&self, kind: ComponentKind) -> Result<ComponentPatch, CommandError> {
        let path = format!("/hardware/{}/status", kind.path_segment());
        let value = self
            .api
            .get(&path)
            .await?
            .into_result()
            .map_err(|reason| CommandError::Remote { reason })?
            .unwrap_or(Value::Null);
        Ok(shapes::parse_component_status(kind, &value)?)
    }

    /// `GET /hardware/status`, parsed
    async fn read_hardware_status(&self) -> Result<Vec<ComponentPatch>, CommandError> {
        let value = self
            .api
            .get("/hardware/status")
            .await?
            .into_result()
            .map_err(|reason| CommandError::Remote { reason })?
            .unwrap_or(Value::Null);
        Ok(shapes::parse_hardware_status(&value)?)
    }

    /// Re-read every retained component and replace its state atomically.
    /// Returns how many components were refreshed.
    pub async fn refresh(&self) -> usize {
        let kinds = self.mirror.borrow().retained_kinds();
        self.refresh_components(&kinds).await
    }

    async fn refresh_components(&self, kinds: &[ComponentKind]) -> usize {
        let mut refreshed = 0;
        for kind in kinds {
            match self.read_status(*kind).await {
                Ok(patch) => {
                    self.apply_patches(&[patch], UpdateOrigin::Refresh, true);
                    refreshed += 1;
                }
                Err(e) => debug!(component = %kind, error = %e, "status refresh failed"),
            }
        }
        refreshed
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Run every due poll tick (and expire overdue active schedules).
    /// Returns how many ticks ran.
    pub async fn run_due_ticks(&self) -> usize {
        let now = Instant::now();
        let expired = self.scheduler.borrow_mut().expire(now);
        for target in expired {
            self.on_active_timeout(target);
        }

        let due = {
            let mirror = self.mirror.borrow();
            self.scheduler.borrow_mut().begin_due(now, |target| match target {
                PollTarget::Component(kind) => mirror.is_connected(kind),
                PollTarget::SystemStatus => true,
            })
        };
        for target in &due {
            self.poll(*target).await;
        }
        due.len()
    }

    async fn poll(&self, target: PollTarget) {
        let result = match target {
            PollTarget::Component(kind) => self.read_status(kind).await.map(|patch| vec![patch]),
            PollTarget::SystemStatus => self.read_hardware_status().await,
        };
        let outcome = self.scheduler.borrow_mut().finish(target, result.is_ok());
        match result {
            Ok(patches) => self.apply_patches(&patches, UpdateOrigin::Poll, false),
            Err(e) => {
                debug!(%target, error = %e, "poll failed");
                if let TickOutcome::Degraded { consecutive } = outcome {
                    self.degrade(target, consecutive);
                }
            }
        }
    }

    /// Too many failed ticks in a row: treat the component as gone until a
    /// status answer says otherwise
    fn degrade(&self, target: PollTarget, consecutive: u32) {
        warn!(%target, consecutive, "poll target degraded");
        match target {
            PollTarget::Component(kind) => {
                self.log(
                    PanelId::for_component(kind),
                    LogLevel::Warning,
                    format!("{} not responding after {consecutive} attempts", kind.label()),
                );
                self.apply_patches(
                    &[ComponentPatch::connected(kind, false)],
                    UpdateOrigin::Poll,
                    false,
                );
            }
            PollTarget::SystemStatus => self.log(
                PanelId::Dashboard,
                LogLevel::Warning,
                format!("Hardware status unavailable after {consecutive} attempts"),
            ),
        }
    }

    fn on_active_timeout(&self, target: PollTarget) {
        let PollTarget::Component(kind) = target else {
            return;
        };
        if kind == ComponentKind::Loadcell {
            self.with_context(PanelId::Loadcell, |panels, ctx| {
                panels.loadcell.monitoring_expired(ctx)
            });
            return;
        }
        self.log(
            PanelId::for_component(kind),
            LogLevel::Warning,
            format!("{}: {}", kind.label(), CommandError::Timeout),
        );
    }

    // ------------------------------------------------------------------
    // Realtime bus
    // ------------------------------------------------------------------

    pub async fn handle_bus_event(&self, event: BusEvent) {
        match event {
            BusEvent::Message(message) => self.handle_message(&message),
            BusEvent::Connection(state) => self.on_bus_state(state).await,
        }
    }

    /// Route one inbound frame. Malformed frames are dropped.
    pub fn handle_message(&self, message: &BusMessage) {
        let topic: Topic = match message.topic.parse() {
            Ok(topic) => topic,
            Err(e) => {
                debug!(topic = %message.topic, error = %e, "ignoring frame");
                return;
            }
        };
        if !self.subscriptions.borrow().is_subscribed(topic) {
            trace!(%topic, "frame for a topic nobody holds");
            return;
        }
        let payload = &message.payload;

        let patches = match topic {
            Topic::HardwareStatus => shapes::parse_hardware_status(payload),
            Topic::Status(kind) => component_frame(kind, payload),
            Topic::DigitalIo => component_frame(ComponentKind::DigitalIo, payload),
            Topic::RobotPosition => {
                shapes::parse_robot_position(payload).map(|p| vec![ComponentPatch::robot(p)])
            }
            Topic::LoadcellForce => {
                shapes::parse_force(payload).map(|p| vec![ComponentPatch::loadcell(p)])
            }
            Topic::PowerReadings => {
                shapes::parse_power_readings(payload).map(|p| vec![ComponentPatch::power(p)])
            }
            Topic::McuTemperature => {
                shapes::parse_mcu_temperature(payload).map(|p| vec![ComponentPatch::mcu(p)])
            }
            Topic::EmergencyStatus => {
                match shapes::parse_emergency(payload) {
                    Ok(active) => {
                        let event = self
                            .mirror
                            .borrow_mut()
                            .set_emergency(active, UpdateOrigin::Realtime);
                        if let Some(event) = event {
                            self.dispatch_events(&[event]);
                        }
                    }
                    Err(e) => debug!(%topic, error = %e, "ignoring frame"),
                }
                Ok(Vec::new())
            }
            Topic::Error(kind) => {
                let text = shapes::parse_error_text(payload);
                let panel = PanelId::for_component(kind);
                let message = format!("{}: {text}", kind.label());
                let repeated = self.logs.borrow().get(&panel).is_some_and(|log| {
                    log.repeats_last(LogLevel::Error, &message, Utc::now(), error_repeat_window())
                });
                if repeated {
                    trace!(%topic, "dropping repeated error frame");
                } else {
                    self.log(panel, LogLevel::Error, message);
                }
                Ok(Vec::new())
            }
            Topic::TestData | Topic::TestStatus | Topic::SystemHealth => Ok(Vec::new()),
        };

        match patches {
            Ok(patches) if !patches.is_empty() => {
                self.apply_patches(&patches, UpdateOrigin::Realtime, false)
            }
            Ok(_) => {}
            Err(e) => debug!(%topic, error = %e, "ignoring frame"),
        }

        self.forward_message(topic, payload);
    }

    /// Hand the raw frame to every mounted panel holding `topic`
    fn forward_message(&self, topic: Topic, payload: &Value) {
        let holders: Vec<PanelId> = {
            let subscriptions = self.subscriptions.borrow();
            let panels = self.panels.borrow();
            panels
                .mounted()
                .into_iter()
                .filter(|panel| subscriptions.topics_for(*panel).contains(&topic))
                .collect()
        };
        for panel in holders {
            self.with_panel(panel, |coordinator, ctx| {
                coordinator.on_message(ctx, topic, payload)
            });
        }
    }

    async fn on_bus_state(&self, state: BusConnectionState) {
        let previous = self.bus_state.replace(state);
        if previous == state {
            return;
        }
        match state {
            BusConnectionState::Connected => {
                let restored = self.subscriptions.borrow_mut().resubscribe_all(&self.bus);
                info!(restored, "realtime bus connected");
                if previous == BusConnectionState::Disconnected
                    || previous == BusConnectionState::Connecting
                {
                    self.log(PanelId::Dashboard, LogLevel::Info, "Realtime connection established");
                }
                self.refresh().await;
            }
            BusConnectionState::Disconnected => {
                warn!("realtime bus disconnected");
                let events = self
                    .mirror
                    .borrow_mut()
                    .mark_disconnected(UpdateOrigin::Realtime, Utc::now());
                self.dispatch_events(&events);
                self.log(PanelId::Dashboard, LogLevel::Warning, "Realtime connection lost");
            }
            BusConnectionState::Connecting => debug!("realtime bus connecting"),
        }
    }

    /// Drive the session: bus events as they arrive, poll ticks when due.
    /// Returns when the event channel closes.
    pub async fn run(&self, mut events: UnboundedReceiver<BusEvent>) {
        loop {
            let deadline = self.scheduler.borrow().next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_bus_event(event).await,
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    self.run_due_ticks().await;
                }
            }
        }
        debug!("session event channel closed");
    }

    // ------------------------------------------------------------------
    // Operation logs
    // ------------------------------------------------------------------

    /// Copy of `panel`'s log, oldest first
    pub fn log_entries(&self, panel: PanelId) -> Vec<LogEntry> {
        self.logs
            .borrow()
            .get(&panel)
            .map(|log| log.entries().cloned().collect())
            .unwrap_or_default()
    }

    /// `panel`'s log through the operator's saved filter
    pub fn filtered_log(&self, panel: PanelId) -> Vec<LogEntry> {
        let filter = self.preferences.borrow().log_filter(panel);
        self.logs
            .borrow()
            .get(&panel)
            .map(|log| {
                log.filter(&filter.levels, &filter.text)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_log_filter(&self, panel: PanelId, filter: LogFilter) {
        self.preferences.borrow_mut().set_log_filter(panel, filter);
    }

    pub fn clear_log(&self, panel: PanelId) {
        let now = Utc::now();
        let mut logs = self.logs.borrow_mut();
        let log = logs
            .entry(panel)
            .or_insert_with(|| new_log(&self.config, panel));
        log.clear(now);
        if let Some(marker) = log.last() {
            self.view.append_log(log.source(), marker);
        }
    }

    pub fn export_log(&self, panel: PanelId, format: ExportFormat) -> ExportedFile {
        let now = Utc::now();
        let mut logs = self.logs.borrow_mut();
        logs.entry(panel)
            .or_insert_with(|| new_log(&self.config, panel))
            .export(format, now)
    }

    // ------------------------------------------------------------------
    // Operator preferences
    // ------------------------------------------------------------------

    pub fn preferences(&self) -> OperatorPreferences {
        self.preferences.borrow().clone()
    }

    /// Load saved preferences and apply the channel labels. Returns false
    /// when nothing was saved yet.
    pub fn load_preferences(&self, store: &dyn PreferenceStore) -> Result<bool, PreferenceError> {
        let Some(saved) = store.load()? else {
            return Ok(false);
        };
        {
            let mut panels = self.panels.borrow_mut();
            let dio = &mut panels.digital_io;
            for (channel, label) in &saved.input_labels {
                if !dio.set_input_label(*channel, label.clone()) {
                    debug!(channel, "ignoring label for unknown input");
                }
            }
            for (channel, label) in &saved.output_labels {
                if !dio.set_output_label(*channel, label.clone()) {
                    debug!(channel, "ignoring label for unknown output");
                }
            }
        }
        *self.preferences.borrow_mut() = saved;
        if self.is_active(PanelId::DigitalIo) {
            self.with_panel(PanelId::DigitalIo, |panel, ctx| panel.render(ctx));
        }
        Ok(true)
    }

    /// Save the current channel labels (only the renamed ones) and log
    /// filters
    pub fn save_preferences(&self, store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        let defaults = DigitalIoPanel::new();
        let mut preferences = self.preferences.borrow().clone();
        {
            let panels = self.panels.borrow();
            let dio = &panels.digital_io;
            preferences.input_labels.clear();
            preferences.output_labels.clear();
            for channel in 0..DIO_CHANNELS {
                if let Some(label) = dio.input_label(channel) {
                    if defaults.input_label(channel) != Some(label) {
                        preferences.input_labels.insert(channel, label.to_string());
                    }
                }
                if let Some(label) = dio.output_label(channel) {
                    if defaults.output_label(channel) != Some(label) {
                        preferences.output_labels.insert(channel, label.to_string());
                    }
                }
            }
        }
        store.save(&preferences)?;
        *self.preferences.borrow_mut() = preferences;
        Ok(())
    }
}

/// Frames naming their component win over the topic's component
fn component_frame(kind: ComponentKind, payload: &Value) -> Result<Vec<ComponentPatch>, TransportError> {
    shapes::parse_component_message(payload)
        .unwrap_or_else(|| shapes::parse_component_status(kind, payload))
        .map(|patch| vec![patch])
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{DemoFailure, DemoHardware};
    use crate::host::{ConfirmationRequest, ConfirmationResponse};
    use crate::panels::testing::RecordingView;
    use crate::preferences::MemoryPreferenceStore;
    use crate::transport::{HttpMethod, SubscriptionToken};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBus {
        next: Cell<u64>,
        active: RefCell<Vec<(SubscriptionToken, Topic)>>,
    }

    impl RealtimeBus for FakeBus {
        fn subscribe(&self, topic: &Topic) -> Result<SubscriptionToken, TransportError> {
            let token = SubscriptionToken(self.next.get());
            self.next.set(token.0 + 1);
            self.active.borrow_mut().push((token, *topic));
            Ok(token)
        }

        fn unsubscribe(&self, token: SubscriptionToken) {
            self.active.borrow_mut().retain(|(t, _)| *t != token);
        }

        fn connection_state(&self) -> BusConnectionState {
            BusConnectionState::Connected
        }
    }

    #[derive(Default)]
    struct AcceptAll {
        notifications: RefCell<Vec<Notification>>,
    }

    impl ModalHost for AcceptAll {
        async fn confirm(&self, _request: ConfirmationRequest) -> ConfirmationResponse {
            ConfirmationResponse::Confirmed { acknowledged: true }
        }

        fn notify(&self, notification: Notification) {
            self.notifications.borrow_mut().push(notification);
        }
    }

    type TestSession = HardwareSession<DemoHardware, FakeBus, AcceptAll, RecordingView>;

    fn session(demo: DemoHardware) -> TestSession {
        HardwareSession::new(
            SessionConfig::default(),
            demo,
            FakeBus::default(),
            AcceptAll::default(),
            RecordingView::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_activation_wires_everything() {
        let s = session(DemoHardware::seeded(1).without_noise().all_connected());
        assert!(s.activate_panel(PanelId::Power).await);
        assert!(!s.activate_panel(PanelId::Power).await);

        assert!(s.mirror().is_connected(ComponentKind::Power));
        assert!(s.subscriptions().is_subscribed(Topic::Status(ComponentKind::Power)));
        assert!(s
            .scheduler()
            .get(PollTarget::Component(ComponentKind::Power))
            .is_some());
        assert_eq!(s.api().http().count(HttpMethod::Get, "power/status"), 1);

        assert!(s.deactivate_panel(PanelId::Power));
        assert!(!s.mirror().is_retained(ComponentKind::Power));
        assert!(s.subscriptions().is_empty());
        assert!(s.bus().active.borrow().is_empty());
        assert_eq!(s.scheduler().schedules().count(), 0);
    }

    #[tokio::test]
    async fn test_shared_component_survives_one_deactivation() {
        let s = session(DemoHardware::seeded(2).all_connected());
        s.activate_panel(PanelId::Robot).await;
        s.activate_panel(PanelId::Dashboard).await;
        s.deactivate_panel(PanelId::Dashboard);
        assert!(s.mirror().is_retained(ComponentKind::Robot));
        assert!(!s.mirror().is_retained(ComponentKind::Power));
    }

    #[tokio::test]
    async fn test_realtime_frame_updates_mirror() {
        let s = session(DemoHardware::seeded(3).without_noise().all_connected());
        s.activate_panel(PanelId::Loadcell).await;
        let before = s.panels().loadcell.force_history().len();
        s.handle_message(&BusMessage::on(
            Topic::LoadcellForce,
            json!({"force": 12.5, "unit": "kgf"}),
        ));
        let force = s
            .mirror()
            .get(ComponentKind::Loadcell)
            .and_then(|c| c.loadcell())
            .and_then(|l| l.last_force);
        assert_eq!(force, Some(12.5));
        assert_eq!(s.panels().loadcell.force_history().len(), before + 1);

        // Not subscribed: dropped
        s.handle_message(&BusMessage::on(Topic::McuTemperature, json!({"temperature": 40.0})));
        assert!(s.mirror().get(ComponentKind::Mcu).is_none());
    }

    #[tokio::test]
    async fn test_error_frame_is_logged_once() {
        let s = session(DemoHardware::seeded(4).all_connected());
        s.activate_panel(PanelId::Mcu).await;
        s.handle_message(&BusMessage::on(
            Topic::Error(ComponentKind::Mcu),
            json!({"error": "sensor fault"}),
        ));
        let errors: Vec<LogEntry> = s
            .log_entries(PanelId::Mcu)
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "MCU: sensor fault");
    }

    #[tokio::test]
    async fn test_redelivered_error_frame_is_logged_once() {
        let s = session(DemoHardware::seeded(4).all_connected());
        s.activate_panel(PanelId::Mcu).await;
        for text in ["sensor fault", "sensor fault", "sensor fault", "overtemp"] {
            s.handle_message(&BusMessage::on(
                Topic::Error(ComponentKind::Mcu),
                json!({"error": text}),
            ));
        }
        let errors: Vec<String> = s
            .log_entries(PanelId::Mcu)
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .map(|e| e.message)
            .collect();
        assert_eq!(errors, ["MCU: sensor fault", "MCU: overtemp"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_poll_failures_degrade_once() {
        let s = session(DemoHardware::seeded(5).all_connected());
        s.activate_panel(PanelId::Power).await;
        s.set_active_view(Some(PanelId::Power));
        s.api().http().fail_times("power/status", DemoFailure::Network, 3);

        // The first tick is due right away; later ones every 2 s
        assert_eq!(s.run_due_ticks().await, 1);
        for _ in 0..2 {
            tokio::time::advance(Duration::from_millis(2000)).await;
            assert_eq!(s.run_due_ticks().await, 1);
        }
        assert!(!s.mirror().is_connected(ComponentKind::Power));
        let warnings = s
            .log_entries(PanelId::Power)
            .into_iter()
            .filter(|e| e.message.contains("not responding"))
            .count();
        assert_eq!(warnings, 1);

        // Disconnected components are not polled
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(s.run_due_ticks().await, 0);
    }

    #[tokio::test]
    async fn test_failed_command_logs_and_notifies_once() {
        let s = session(DemoHardware::seeded(6).all_connected());
        s.activate_panel(PanelId::Power).await;
        s.api()
            .http()
            .fail_next("set-voltage", DemoFailure::Remote("Device busy".into()));
        let command = s.panels().power.set_voltage(10.0);
        let err = s.execute(command).await.unwrap_err();
        assert!(matches!(err, CommandError::Remote { .. }));
        let errors = s
            .log_entries(PanelId::Power)
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .count();
        assert_eq!(errors, 1);
        assert_eq!(s.modal().notifications.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_configuration_result_reaches_panel() {
        let s = session(DemoHardware::seeded(7));
        s.activate_panel(PanelId::Configuration).await;
        s.configure(ConfigRequest::ListProfiles).await.unwrap();
        assert_eq!(s.panels().configuration.profiles().to_vec(), vec!["default".to_string()]);

        let err = s
            .configure(ConfigRequest::LoadProfile { name: "../etc".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation { .. }));
        assert_eq!(s.api().http().count(HttpMethod::Get, "etc"), 0);
    }

    #[tokio::test]
    async fn test_preferences_round_trip_through_session() {
        let store = MemoryPreferenceStore::new();
        let s = session(DemoHardware::seeded(8));
        assert!(!s.load_preferences(&store).unwrap());

        s.panels_mut().digital_io.set_input_label(3, "Door");
        s.save_preferences(&store).unwrap();
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.input_labels.len(), 1);
        assert!(saved.output_labels.is_empty());

        let other = session(DemoHardware::seeded(9));
        assert!(other.load_preferences(&store).unwrap());
        assert_eq!(other.panels().digital_io.input_label(3), Some("Door"));
    }

    #[tokio::test]
    async fn test_export_uses_panel_name() {
        let s = session(DemoHardware::seeded(10));
        s.log(PanelId::Dashboard, LogLevel::Info, "hello");
        let file = s.export_log(PanelId::Dashboard, ExportFormat::Csv);
        assert!(file.file_name.starts_with("system-"));
        assert!(file.file_name.ends_with(".csv"));
        assert!(file.contents.contains("hello"));
    }
}
