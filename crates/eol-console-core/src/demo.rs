//! Demo Mode - Simulated tester server
//!
//! [`DemoHardware`] answers every endpoint the console uses, in process,
//! so a session can run without a server. Readings carry a little random
//! noise; motion completes after a configurable number of status reads.
//! Every request is recorded, and failures can be injected per path.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

use crate::mirror::{ComponentKind, DIO_CHANNELS};
use crate::transport::{HttpClient, HttpMethod, HttpResponse, TransportError};

/// One request as seen by the demo server (path without the API base)
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

/// Injected failure for a matching request
#[derive(Debug, Clone, PartialEq)]
pub enum DemoFailure {
    /// The request never reaches the server
    Network,
    Timeout,
    /// Non-2xx answer with a `detail` reason
    Http(u16),
    /// 2xx answer with `success = false`
    Remote(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoRobot {
    pub connected: bool,
    pub servo_enabled: bool,
    pub position: f64,
    pub target: f64,
    pub is_homed: bool,
    /// `idle`, `moving`, `homing` or `emergency_stopped`
    pub motion: &'static str,
    /// Status reads left before the current motion completes
    pub pending_reads: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoPower {
    pub connected: bool,
    pub output_enabled: bool,
    pub voltage: f64,
    pub current: f64,
    pub current_limit: f64,
    /// Fixed `(volts, amps)` reading regardless of the output state
    pub forced_reading: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoLoadcell {
    pub connected: bool,
    /// Force on the cell before the zero offset
    pub raw_force: f64,
    pub zero_offset: f64,
    pub held: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoMcu {
    pub connected: bool,
    pub temperature: f64,
    pub target_temperature: f64,
    pub upper_temperature: f64,
    pub fan_speed: u8,
    pub test_mode: u8,
    pub boot_complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoDigitalIo {
    pub connected: bool,
    pub inputs: [bool; DIO_CHANNELS],
    pub outputs: [bool; DIO_CHANNELS],
    pub emergency_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoTest {
    pub status: String,
    pub progress: f64,
    pub dut_serial_number: String,
}

/// Everything the simulated server knows
#[derive(Debug, Clone)]
pub struct DemoState {
    pub robot: DemoRobot,
    pub power: DemoPower,
    pub loadcell: DemoLoadcell,
    pub mcu: DemoMcu,
    pub digital_io: DemoDigitalIo,
    pub tests: BTreeMap<String, DemoTest>,
    pub active_profile: String,
    pub profiles: BTreeMap<String, Value>,
    /// Status reads a motion takes to settle
    pub motion_reads: u32,
    /// Progress added per test status read
    pub test_step: f64,
}

impl Default for DemoState {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "default".to_string(),
            json!({"velocity": 10000.0, "acceleration": 10000.0, "deceleration": 10000.0}),
        );
        Self {
            robot: DemoRobot {
                connected: false,
                servo_enabled: false,
                position: 0.0,
                target: 0.0,
                is_homed: false,
                motion: "idle",
                pending_reads: 0,
            },
            power: DemoPower {
                connected: false,
                output_enabled: false,
                voltage: 5.0,
                current: 1.0,
                current_limit: 2.0,
                forced_reading: None,
            },
            loadcell: DemoLoadcell {
                connected: false,
                raw_force: 0.25,
                zero_offset: 0.0,
                held: false,
            },
            mcu: DemoMcu {
                connected: false,
                temperature: 25.0,
                target_temperature: 25.0,
                upper_temperature: 80.0,
                fan_speed: 0,
                test_mode: 1,
                boot_complete: true,
            },
            digital_io: DemoDigitalIo {
                connected: false,
                inputs: [false; DIO_CHANNELS],
                outputs: [false; DIO_CHANNELS],
                emergency_active: false,
            },
            tests: BTreeMap::new(),
            active_profile: "default".to_string(),
            profiles,
            motion_reads: 0,
            test_step: 25.0,
        }
    }
}

impl DemoState {
    /// Connected flag of one component
    pub fn connected(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::Robot => self.robot.connected,
            ComponentKind::Power => self.power.connected,
            ComponentKind::Loadcell => self.loadcell.connected,
            ComponentKind::Mcu => self.mcu.connected,
            ComponentKind::DigitalIo => self.digital_io.connected,
        }
    }

    pub fn set_connected(&mut self, kind: ComponentKind, connected: bool) {
        match kind {
            ComponentKind::Robot => self.robot.connected = connected,
            ComponentKind::Power => self.power.connected = connected,
            ComponentKind::Loadcell => self.loadcell.connected = connected,
            ComponentKind::Mcu => self.mcu.connected = connected,
            ComponentKind::DigitalIo => self.digital_io.connected = connected,
        }
    }
}

/// Simulated tester server implementing [`HttpClient`]
pub struct DemoHardware {
    base: String,
    state: RefCell<DemoState>,
    rng: RefCell<StdRng>,
    /// Noise amplitude multiplier; 0 gives exact readings
    noise: Cell<f64>,
    latency: Cell<Duration>,
    offline: Cell<bool>,
    failures: RefCell<VecDeque<(String, DemoFailure)>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl Default for DemoHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoHardware {
    /// Simulator rooted at `/api` with entropy-seeded noise
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible simulator
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            base: crate::config::DEFAULT_API_BASE.to_string(),
            state: RefCell::new(DemoState::default()),
            rng: RefCell::new(rng),
            noise: Cell::new(1.0),
            latency: Cell::new(Duration::ZERO),
            offline: Cell::new(false),
            failures: RefCell::new(VecDeque::new()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Strip `base` instead of `/api` from incoming paths
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Exact readings
    pub fn without_noise(self) -> Self {
        self.noise.set(0.0);
        self
    }

    /// Every component connected, servo off, outputs off
    pub fn all_connected(self) -> Self {
        self.update(|state| {
            for kind in ComponentKind::ALL {
                state.set_connected(kind, true);
            }
        });
        self
    }

    /// Mutate the simulated hardware
    pub fn update<R>(&self, f: impl FnOnce(&mut DemoState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    /// Copy of the simulated hardware
    pub fn snapshot(&self) -> DemoState {
        self.state.borrow().clone()
    }

    /// Delay every answer (tokio time, so paused clocks apply)
    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    /// Refuse every request with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.get()
    }

    /// Fail the next request whose path contains `fragment`
    pub fn fail_next(&self, fragment: impl Into<String>, failure: DemoFailure) {
        self.failures.borrow_mut().push_back((fragment.into(), failure));
    }

    /// Fail the next `times` matching requests
    pub fn fail_times(&self, fragment: &str, failure: DemoFailure, times: usize) {
        for _ in 0..times {
            self.fail_next(fragment, failure.clone());
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    /// Requests with `method` whose path contains `fragment`
    pub fn requests_to(&self, method: HttpMethod, fragment: &str) -> Vec<RecordedRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.method == method && r.path.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn count(&self, method: HttpMethod, fragment: &str) -> usize {
        self.requests_to(method, fragment).len()
    }

    pub fn clear_requests(&self) {
        self.requests.borrow_mut().clear();
    }

    fn take_failure(&self, path: &str) -> Option<DemoFailure> {
        let mut failures = self.failures.borrow_mut();
        let idx = failures.iter().position(|(frag, _)| path.contains(frag.as_str()))?;
        failures.remove(idx).map(|(_, failure)| failure)
    }

    fn jitter(&self, amplitude: f64) -> f64 {
        let amplitude = amplitude * self.noise.get();
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.rng.borrow_mut().gen_range(-amplitude..amplitude)
    }

    fn relative<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.base.as_str()).unwrap_or(path)
    }

    /// Answer one request against the simulated state
    fn respond(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> HttpResponse {
        let (route, query) = match path.split_once('?') {
            Some((route, query)) => (route, Some(query)),
            None => (path, None),
        };
        let segments: Vec<&str> = route.trim_matches('/').split('/').collect();
        let body = body.cloned().unwrap_or(Value::Null);
        let mut state = self.state.borrow_mut();

        match (method, segments.as_slice()) {
            (HttpMethod::Get, ["hardware", "status"]) => ok(json!({
                "robot": state.robot.connected,
                "power": state.power.connected,
                "loadcell": state.loadcell.connected,
                "mcu": state.mcu.connected,
                "digital_io": state.digital_io.connected,
            })),
            (HttpMethod::Post, ["hardware", "emergency-stop", action]) => {
                self.emergency(&mut state, action)
            }
            (_, ["hardware", component, rest @ ..]) => {
                let Some(kind) = ComponentKind::from_name(component) else {
                    return not_found(route);
                };
                let tail = rest.join("/");
                if method == HttpMethod::Get && tail == "status" {
                    return HttpResponse::new(200, self.status(&mut state, kind));
                }
                match (method, tail.as_str()) {
                    (HttpMethod::Post, "connect") => {
                        state.set_connected(kind, true);
                        ok(json!({"connected": true}))
                    }
                    (HttpMethod::Post, "disconnect") => {
                        state.set_connected(kind, false);
                        if kind == ComponentKind::Robot {
                            state.robot.servo_enabled = false;
                        }
                        if kind == ComponentKind::Power {
                            state.power.output_enabled = false;
                        }
                        ok(json!({"connected": false}))
                    }
                    _ if !state.connected(kind) => {
                        detail(400, format!("{} not connected", kind.label()))
                    }
                    _ => match kind {
                        ComponentKind::Robot => self.robot(&mut state, method, &tail, &body, query),
                        ComponentKind::Power => self.power(&mut state, method, &tail, &body),
                        ComponentKind::Loadcell => self.loadcell(&mut state, method, &tail),
                        ComponentKind::Mcu => self.mcu(&mut state, method, &tail, &body),
                        ComponentKind::DigitalIo => self.digital_io(&mut state, method, &tail, &body),
                    },
                }
            }
            (_, ["tests", ..]) => self.tests(&mut state, method, &segments[1..], &body),
            (_, ["config", ..]) => self.config(&mut state, method, &segments[1..], &body),
            _ => not_found(route),
        }
    }

    fn status(&self, state: &mut DemoState, kind: ComponentKind) -> Value {
        match kind {
            ComponentKind::Robot => {
                let robot = &mut state.robot;
                if robot.pending_reads > 0 {
                    robot.pending_reads -= 1;
                } else if matches!(robot.motion, "moving" | "homing") {
                    robot.position = robot.target;
                    robot.motion = "idle";
                }
                json!({
                    "connected": robot.connected,
                    "servo_enabled": robot.servo_enabled,
                    "current_position": robot.position,
                    "is_moving": matches!(robot.motion, "moving" | "homing"),
                    "motion_status": robot.motion,
                    "is_homed": robot.is_homed,
                    "axis_id": 0,
                })
            }
            ComponentKind::Power => {
                let (v, a) = self.power_reading(&state.power);
                let power = &state.power;
                json!({
                    "connected": power.connected,
                    "output_enabled": power.output_enabled,
                    "voltage": power.voltage,
                    "current": power.current,
                    "current_limit": power.current_limit,
                    "measured_voltage": v,
                    "measured_current": a,
                    "power": v * a,
                })
            }
            ComponentKind::Loadcell => {
                let force = self.force(&state.loadcell);
                json!({
                    "connected": state.loadcell.connected,
                    "force": force,
                    "unit": "kgf",
                    "zero_offset": state.loadcell.zero_offset,
                })
            }
            ComponentKind::Mcu => {
                let temperature = self.temperature(&mut state.mcu);
                let mcu = &state.mcu;
                json!({
                    "connected": mcu.connected,
                    "temperature": temperature,
                    "target_temperature": mcu.target_temperature,
                    "fan_speed": mcu.fan_speed,
                    "test_mode": mcu.test_mode,
                    "boot_complete": mcu.boot_complete,
                })
            }
            ComponentKind::DigitalIo => {
                let dio = &state.digital_io;
                json!({
                    "connected": dio.connected,
                    "inputs": dio.inputs.to_vec(),
                    "outputs": dio.outputs.to_vec(),
                    "emergency_active": dio.emergency_active,
                })
            }
        }
    }

    fn power_reading(&self, power: &DemoPower) -> (f64, f64) {
        if let Some(reading) = power.forced_reading {
            return reading;
        }
        if !power.output_enabled {
            return (0.0, 0.0);
        }
        let v = (power.voltage + self.jitter(0.02)).max(0.0);
        let a = (power.current.min(power.current_limit) * 0.8 + self.jitter(0.01)).max(0.0);
        (v, a)
    }

    fn force(&self, loadcell: &DemoLoadcell) -> f64 {
        loadcell.raw_force - loadcell.zero_offset + self.jitter(0.005)
    }

    fn temperature(&self, mcu: &mut DemoMcu) -> f64 {
        mcu.temperature += (mcu.target_temperature - mcu.temperature) * 0.1;
        mcu.temperature + self.jitter(0.05)
    }

    fn robot(
        &self,
        state: &mut DemoState,
        method: HttpMethod,
        tail: &str,
        body: &Value,
        query: Option<&str>,
    ) -> HttpResponse {
        let reads = state.motion_reads;
        let emergency = state.digital_io.emergency_active;
        let robot = &mut state.robot;
        match (method, tail) {
            (HttpMethod::Post, "servo/enable") => {
                robot.servo_enabled = true;
                ok(json!({"servo_enabled": true}))
            }
            (HttpMethod::Post, "servo/disable") => {
                robot.servo_enabled = false;
                ok(json!({"servo_enabled": false}))
            }
            (HttpMethod::Post, "home-axis" | "move-absolute" | "move-relative") => {
                if !robot.servo_enabled {
                    return remote("Servo is not enabled");
                }
                if emergency || robot.motion == "emergency_stopped" {
                    return remote("Emergency stop is active");
                }
                let target = match tail {
                    "home-axis" => {
                        robot.is_homed = true;
                        0.0
                    }
                    "move-absolute" => number(body, "position").unwrap_or(robot.position),
                    _ => robot.position + number(body, "distance").unwrap_or(0.0),
                };
                robot.target = target;
                robot.motion = if tail == "home-axis" { "homing" } else { "moving" };
                robot.pending_reads = reads;
                ok(json!({"axis_id": body.get("axis_id").cloned().unwrap_or(json!(0))}))
            }
            (HttpMethod::Post, "stop-motion") => {
                robot.target = robot.position;
                robot.pending_reads = 0;
                if robot.motion != "emergency_stopped" {
                    robot.motion = "idle";
                }
                ok(json!({"stopped": true}))
            }
            (HttpMethod::Post, "emergency-stop") => {
                robot.target = robot.position;
                robot.pending_reads = 0;
                robot.motion = "emergency_stopped";
                robot.servo_enabled = false;
                ok(json!({"emergency_stopped": true}))
            }
            (HttpMethod::Get, "position") => {
                let axis_id = query
                    .and_then(|q| q.strip_prefix("axis_id="))
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                ok(json!({
                    "position": robot.position + self.jitter(0.1),
                    "axis_id": axis_id,
                    "is_moving": matches!(robot.motion, "moving" | "homing"),
                }))
            }
            _ => not_found(tail),
        }
    }

    fn power(&self, state: &mut DemoState, method: HttpMethod, tail: &str, body: &Value) -> HttpResponse {
        let power = &mut state.power;
        match (method, tail) {
            (HttpMethod::Post, "enable-output") => {
                power.output_enabled = true;
                ok(json!({"output_enabled": true}))
            }
            (HttpMethod::Post, "disable-output") => {
                power.output_enabled = false;
                ok(json!({"output_enabled": false}))
            }
            (HttpMethod::Post, "set-voltage") => match number(body, "voltage") {
                Some(v) => {
                    power.voltage = v;
                    ok(json!({"voltage": v}))
                }
                None => detail(422, "voltage is required"),
            },
            (HttpMethod::Post, "set-current") => match number(body, "current") {
                Some(a) => {
                    power.current = a;
                    ok(json!({"current": a}))
                }
                None => detail(422, "current is required"),
            },
            (HttpMethod::Post, "set-current-limit") => match number(body, "current_limit") {
                Some(a) => {
                    power.current_limit = a;
                    ok(json!({"current_limit": a}))
                }
                None => detail(422, "current_limit is required"),
            },
            (HttpMethod::Get, "readings") => {
                let (v, a) = self.power_reading(power);
                ok(json!({"voltage": v, "current": a, "power": v * a}))
            }
            _ => not_found(tail),
        }
    }

    fn loadcell(&self, state: &mut DemoState, method: HttpMethod, tail: &str) -> HttpResponse {
        let loadcell = &mut state.loadcell;
        match (method, tail) {
            (HttpMethod::Get, "force") => {
                let force = self.force(loadcell);
                ok(json!({"force": force, "unit": "kgf"}))
            }
            (HttpMethod::Post, "zero-calibration") => {
                loadcell.zero_offset = loadcell.raw_force;
                ok(json!({"zero_offset": loadcell.zero_offset}))
            }
            (HttpMethod::Post, "hold") => {
                loadcell.held = true;
                ok(json!({"held": true}))
            }
            (HttpMethod::Post, "hold-release") => {
                loadcell.held = false;
                ok(json!({"held": false}))
            }
            _ => not_found(tail),
        }
    }

    fn mcu(&self, state: &mut DemoState, method: HttpMethod, tail: &str, body: &Value) -> HttpResponse {
        let mcu = &mut state.mcu;
        match (method, tail) {
            (HttpMethod::Get, "temperature") => {
                let temperature = self.temperature(mcu);
                ok(json!({"temperature": temperature}))
            }
            (HttpMethod::Post, "set-temperature") => match number(body, "temperature") {
                Some(t) if t > mcu.upper_temperature => {
                    remote(format!("Temperature {t} exceeds upper limit {}", mcu.upper_temperature))
                }
                Some(t) => {
                    mcu.target_temperature = t;
                    ok(json!({"target_temperature": t}))
                }
                None => detail(422, "temperature is required"),
            },
            (HttpMethod::Post, "set-upper-temperature") => match number(body, "upper_temperature") {
                Some(t) => {
                    mcu.upper_temperature = t;
                    ok(json!({"upper_temperature": t}))
                }
                None => detail(422, "upper_temperature is required"),
            },
            (HttpMethod::Post, "set-fan-speed") => match number(body, "fan_speed") {
                Some(level) => {
                    mcu.fan_speed = level.clamp(0.0, 10.0) as u8;
                    ok(json!({"fan_speed": mcu.fan_speed}))
                }
                None => detail(422, "fan_speed is required"),
            },
            (HttpMethod::Post, "set-test-mode") => match number(body, "test_mode") {
                Some(mode) => {
                    mcu.test_mode = mode.clamp(0.0, 255.0) as u8;
                    ok(json!({"test_mode": mcu.test_mode}))
                }
                None => detail(422, "test_mode is required"),
            },
            (HttpMethod::Post, "wait-boot-complete") => {
                mcu.boot_complete = true;
                ok(json!({"boot_complete": true}))
            }
            (HttpMethod::Post, "start-standby-heating") => {
                let operating = number(body, "operating_temp").unwrap_or(mcu.target_temperature);
                mcu.target_temperature = operating;
                ok(json!({"target_temperature": operating}))
            }
            (HttpMethod::Post, "start-standby-cooling") => {
                mcu.target_temperature = 25.0;
                ok(json!({"target_temperature": 25.0}))
            }
            _ => not_found(tail),
        }
    }

    fn digital_io(
        &self,
        state: &mut DemoState,
        method: HttpMethod,
        tail: &str,
        body: &Value,
    ) -> HttpResponse {
        let dio = &mut state.digital_io;
        match (method, tail) {
            (HttpMethod::Post, "output/control") => {
                let channel = number(body, "channel").map(|c| c as usize);
                let level = body.get("state").and_then(Value::as_bool);
                match (channel, level) {
                    (Some(ch), Some(level)) if ch < DIO_CHANNELS => {
                        if level && dio.emergency_active {
                            return remote("Emergency stop is active");
                        }
                        dio.outputs[ch] = level;
                        ok(json!({"channel": ch, "state": level}))
                    }
                    _ => detail(422, "channel and state are required"),
                }
            }
            (HttpMethod::Post, "output/bulk") => {
                let level = match body.get("operation").and_then(Value::as_str) {
                    Some("all_on") => true,
                    Some("all_off") => false,
                    _ => return detail(422, "unknown bulk operation"),
                };
                if level && dio.emergency_active {
                    return remote("Emergency stop is active");
                }
                dio.outputs = [level; DIO_CHANNELS];
                ok(json!({"outputs": dio.outputs.to_vec()}))
            }
            _ => not_found(tail),
        }
    }

    fn emergency(&self, state: &mut DemoState, action: &str) -> HttpResponse {
        match action {
            "activate" => {
                state.digital_io.emergency_active = true;
                state.digital_io.outputs = [false; DIO_CHANNELS];
                state.power.output_enabled = false;
                state.robot.motion = "emergency_stopped";
                state.robot.pending_reads = 0;
                for test in state.tests.values_mut() {
                    if test.status == "running" || test.status == "paused" {
                        test.status = "emergency_stopped".into();
                    }
                }
                ok(json!({"emergency_active": true}))
            }
            "reset" => {
                state.digital_io.emergency_active = false;
                if state.robot.motion == "emergency_stopped" {
                    state.robot.motion = "idle";
                }
                ok(json!({"emergency_active": false}))
            }
            other => not_found(other),
        }
    }

    fn tests(&self, state: &mut DemoState, method: HttpMethod, rest: &[&str], body: &Value) -> HttpResponse {
        match (method, rest) {
            (HttpMethod::Post, ["eol-force-test"]) => {
                let missing: Vec<ComponentKind> = [
                    ComponentKind::Robot,
                    ComponentKind::Loadcell,
                    ComponentKind::Mcu,
                    ComponentKind::Power,
                ]
                .into_iter()
                .filter(|kind| !state.connected(*kind))
                .collect();
                if !missing.is_empty() {
                    return remote("Hardware not ready for test");
                }
                let test_id = Uuid::new_v4().to_string();
                let serial = body
                    .get("dut_serial_number")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                state.tests.insert(
                    test_id.clone(),
                    DemoTest {
                        status: "running".into(),
                        progress: 0.0,
                        dut_serial_number: serial,
                    },
                );
                ok(json!({"test_id": test_id, "status": "started"}))
            }
            (HttpMethod::Get, ["eol-force-test", id, "status"]) => {
                let step = state.test_step;
                let Some(test) = state.tests.get_mut(*id) else {
                    return detail(404, format!("Test {id} not found"));
                };
                if test.status == "running" {
                    test.progress = (test.progress + step).min(100.0);
                    if test.progress >= 100.0 {
                        test.status = "completed".into();
                    }
                }
                ok(json!({
                    "test_id": id,
                    "status": test.status,
                    "progress": test.progress,
                    "passed": if test.status == "completed" { json!(true) } else { Value::Null },
                }))
            }
            (HttpMethod::Post, ["eol-force-test", id, "cancel"]) => match state.tests.get_mut(*id) {
                Some(test) => {
                    test.status = "cancelled".into();
                    ok(json!({"test_id": id, "status": "cancelled"}))
                }
                None => detail(404, format!("Test {id} not found")),
            },
            (HttpMethod::Put, [id]) => {
                let Some(test) = state.tests.get_mut(*id) else {
                    return detail(404, format!("Test {id} not found"));
                };
                let next = match body.get("action").and_then(Value::as_str) {
                    Some("pause") if test.status == "running" => "paused",
                    Some("resume") if test.status == "paused" => "running",
                    Some("stop") => "stopped",
                    Some(action) => {
                        return remote(format!("Cannot {action} a {} test", test.status))
                    }
                    None => return detail(422, "action is required"),
                };
                test.status = next.into();
                ok(json!({"test_id": id, "status": next}))
            }
            _ => not_found(&rest.join("/")),
        }
    }

    fn config(&self, state: &mut DemoState, method: HttpMethod, rest: &[&str], body: &Value) -> HttpResponse {
        match (method, rest) {
            (HttpMethod::Get, ["current"]) => {
                let profile = state
                    .profiles
                    .get(&state.active_profile)
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let mut current = Map::new();
                current.insert("profile_name".into(), json!(state.active_profile));
                if let Value::Object(fields) = profile {
                    current.extend(fields);
                }
                ok(Value::Object(current))
            }
            (HttpMethod::Get, ["profiles"]) => ok(json!({
                "profiles": state.profiles.keys().collect::<Vec<_>>(),
                "current_profile": state.active_profile,
                "total_count": state.profiles.len(),
            })),
            (HttpMethod::Get, ["profiles", name]) => match state.profiles.get(*name) {
                Some(profile) => ok(json!({
                    "profile_name": name,
                    "test_configuration": profile,
                    "hardware_configuration": {},
                })),
                None => detail(404, format!("Profile {name} not found")),
            },
            (HttpMethod::Put, ["profiles", name]) => {
                let configuration = body.get("configuration").cloned().unwrap_or_else(|| json!({}));
                state.profiles.insert(name.to_string(), configuration);
                ok(json!({"profile_name": name, "updated": true}))
            }
            (HttpMethod::Post, ["validate"]) => {
                let config_type = body.get("config_type").and_then(Value::as_str).unwrap_or("");
                let mut errors = Vec::new();
                if config_type != "test_profile" && config_type != "hardware_config" {
                    errors.push(format!("Unknown configuration type: {config_type}"));
                }
                ok(json!({
                    "is_valid": errors.is_empty(),
                    "profile_name": config_type,
                    "validation_errors": errors,
                    "validation_warnings": [],
                }))
            }
            (HttpMethod::Post, ["backup"]) => ok(json!({"backup": "config-backup.zip"})),
            (HttpMethod::Post, ["import"]) => match body.get("profiles").and_then(Value::as_object) {
                Some(profiles) => {
                    for (name, profile) in profiles {
                        state.profiles.insert(name.clone(), profile.clone());
                    }
                    ok(json!({"imported": profiles.len()}))
                }
                None => detail(422, "profiles are required"),
            },
            (HttpMethod::Post, ["export-all"]) => ok(json!({"profiles": state.profiles})),
            _ => not_found(&rest.join("/")),
        }
    }
}

impl HttpClient for DemoHardware {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        let relative = self.relative(path).to_string();
        self.requests.borrow_mut().push(RecordedRequest {
            method,
            path: relative.clone(),
            body: body.cloned(),
        });
        trace!(%method, path = %relative, "demo request");

        // Let concurrently issued work interleave before the answer
        let latency = self.latency.get();
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }

        if self.offline.get() {
            return Err(TransportError::Network("connection refused".into()));
        }
        if let Some(failure) = self.take_failure(&relative) {
            return match failure {
                DemoFailure::Network => Err(TransportError::Network("connection reset".into())),
                DemoFailure::Timeout => Err(TransportError::Timeout),
                DemoFailure::Http(status) => Ok(detail(status, format!("HTTP {status}"))),
                DemoFailure::Remote(reason) => Ok(remote(reason)),
            };
        }
        Ok(self.respond(method, &relative, body))
    }
}

fn ok(data: Value) -> HttpResponse {
    HttpResponse::new(200, json!({"success": true, "data": data}))
}

fn remote(reason: impl Into<String>) -> HttpResponse {
    HttpResponse::new(200, json!({"success": false, "error": reason.into()}))
}

fn detail(status: u16, reason: impl Into<String>) -> HttpResponse {
    HttpResponse::new(status, json!({"detail": reason.into()}))
}

fn not_found(route: &str) -> HttpResponse {
    detail(404, format!("Not Found: {route}"))
}

fn number(body: &Value, key: &str) -> Option<f64> {
    body.get(key).and_then(Value::as_f64)
}
