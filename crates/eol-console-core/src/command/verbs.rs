//! Command verbs
//!
//! Each verb declares its endpoint, its single-flight class, and the mirror
//! mutation that its success implies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use super::flight::FlightClass;
use crate::mirror::{
    ComponentKind, ComponentPatch, DigitalIoPatch, LoadcellPatch, McuPatch, MotionStatus,
    PowerPatch, RobotPatch, StateMirror,
};
use crate::oplog::LogLevel;
use crate::transport::{shapes, ApiRequest, TransportError};

/// What a command is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTarget {
    Component(ComponentKind),
    /// The server-side EOL test runner
    TestRunner,
}

impl CommandTarget {
    pub fn component(self) -> Option<ComponentKind> {
        match self {
            CommandTarget::Component(kind) => Some(kind),
            CommandTarget::TestRunner => None,
        }
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Component(kind) => write!(f, "{kind}"),
            CommandTarget::TestRunner => f.write_str("test"),
        }
    }
}

/// Motion profile for absolute and relative moves (µm, µm/s, µm/s²)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionProfile {
    pub axis_id: u32,
    /// Target position (absolute) or distance (relative)
    pub amount: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub deceleration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RobotVerb {
    Connect,
    Disconnect,
    ServoOn { axis_id: u32 },
    ServoOff { axis_id: u32 },
    Home { axis_id: u32 },
    MoveAbsolute(MotionProfile),
    MoveRelative(MotionProfile),
    StopMotion { axis_id: u32 },
    EmergencyStop { axis_id: u32 },
    ReadPosition { axis_id: u32 },
    ReadStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PowerVerb {
    Connect,
    Disconnect,
    EnableOutput,
    DisableOutput,
    SetVoltage { volts: f64 },
    SetCurrent { amps: f64 },
    SetCurrentLimit { amps: f64 },
    ReadReadings,
    ReadStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadcellVerb {
    Connect,
    Disconnect,
    ReadForce,
    ZeroCalibrate,
    /// Freeze the displayed reading on the instrument
    Hold,
    ReleaseHold,
    /// Local only: switch to live monitoring rate
    StartMonitoring,
    StopMonitoring,
    ReadStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum McuVerb {
    Connect,
    Disconnect,
    ReadStatus,
    ReadTemperature,
    SetTemperature { celsius: f64 },
    SetUpperTemperature { celsius: f64 },
    SetFanSpeed { level: u8 },
    SetTestMode { mode: u8 },
    WaitBootComplete,
    StartStandbyHeating {
        operating_celsius: f64,
        standby_celsius: f64,
        hold_time_ms: u64,
    },
    StartStandbyCooling,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DigitalIoVerb {
    Connect,
    Disconnect,
    ReadStatus,
    WriteOutput { channel: usize, on: bool },
    AllOn,
    AllOff,
    ActivateEmergency,
    ResetEmergency,
}

/// Operator-entered identification for a test run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestStart {
    pub dut_serial_number: String,
    pub dut_part_number: String,
    pub operator_id: String,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestVerb {
    Start(TestStart),
    Pause { test_id: String },
    Resume { test_id: String },
    Stop { test_id: String },
    Cancel { test_id: String, reason: String },
    ReadStatus { test_id: String },
}

/// A verb addressed to one target
#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    Robot(RobotVerb),
    Power(PowerVerb),
    Loadcell(LoadcellVerb),
    Mcu(McuVerb),
    DigitalIo(DigitalIoVerb),
    Test(TestVerb),
}

fn hw(kind: ComponentKind, tail: &str) -> String {
    format!("/hardware/{}/{}", kind.path_segment(), tail)
}

fn post(kind: ComponentKind, tail: &str, body: Value) -> Option<ApiRequest> {
    Some(ApiRequest::post(hw(kind, tail), body))
}

fn status(kind: ComponentKind) -> Option<ApiRequest> {
    Some(ApiRequest::get(hw(kind, "status")))
}

fn motion_body(p: &MotionProfile, amount_key: &str) -> Value {
    json!({
        "axis_id": p.axis_id,
        amount_key: p.amount,
        "velocity": p.velocity,
        "acceleration": p.acceleration,
        "deceleration": p.deceleration,
    })
}

fn robot(patch: RobotPatch) -> Vec<ComponentPatch> {
    vec![ComponentPatch::robot(patch)]
}

fn power(patch: PowerPatch) -> Vec<ComponentPatch> {
    vec![ComponentPatch::power(patch)]
}

fn mcu(patch: McuPatch) -> Vec<ComponentPatch> {
    vec![ComponentPatch::mcu(patch)]
}

fn motion(status: MotionStatus) -> Vec<ComponentPatch> {
    robot(RobotPatch {
        motion: Some(status),
        ..Default::default()
    })
}

fn require(value: Option<&Value>, endpoint: &str) -> Result<Value, TransportError> {
    value
        .cloned()
        .ok_or_else(|| TransportError::shape(endpoint, "missing data"))
}

impl Verb {
    pub fn target(&self) -> CommandTarget {
        match self {
            Verb::Robot(_) => CommandTarget::Component(ComponentKind::Robot),
            Verb::Power(_) => CommandTarget::Component(ComponentKind::Power),
            Verb::Loadcell(_) => CommandTarget::Component(ComponentKind::Loadcell),
            Verb::Mcu(_) => CommandTarget::Component(ComponentKind::Mcu),
            Verb::DigitalIo(_) => CommandTarget::Component(ComponentKind::DigitalIo),
            Verb::Test(_) => CommandTarget::TestRunner,
        }
    }

    /// Operator-facing verb name
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Robot(v) => match v {
                RobotVerb::Connect => "connect",
                RobotVerb::Disconnect => "disconnect",
                RobotVerb::ServoOn { .. } => "servoOn",
                RobotVerb::ServoOff { .. } => "servoOff",
                RobotVerb::Home { .. } => "home",
                RobotVerb::MoveAbsolute(_) => "moveAbsolute",
                RobotVerb::MoveRelative(_) => "moveRelative",
                RobotVerb::StopMotion { .. } => "stopMotion",
                RobotVerb::EmergencyStop { .. } => "emergencyStop",
                RobotVerb::ReadPosition { .. } => "readPosition",
                RobotVerb::ReadStatus => "readStatus",
            },
            Verb::Power(v) => match v {
                PowerVerb::Connect => "connect",
                PowerVerb::Disconnect => "disconnect",
                PowerVerb::EnableOutput => "enableOutput",
                PowerVerb::DisableOutput => "disableOutput",
                PowerVerb::SetVoltage { .. } => "setVoltage",
                PowerVerb::SetCurrent { .. } => "setCurrent",
                PowerVerb::SetCurrentLimit { .. } => "setCurrentLimit",
                PowerVerb::ReadReadings => "readReadings",
                PowerVerb::ReadStatus => "readStatus",
            },
            Verb::Loadcell(v) => match v {
                LoadcellVerb::Connect => "connect",
                LoadcellVerb::Disconnect => "disconnect",
                LoadcellVerb::ReadForce => "readForce",
                LoadcellVerb::ZeroCalibrate => "zeroCalibrate",
                LoadcellVerb::Hold => "hold",
                LoadcellVerb::ReleaseHold => "releaseHold",
                LoadcellVerb::StartMonitoring => "startMonitoring",
                LoadcellVerb::StopMonitoring => "stopMonitoring",
                LoadcellVerb::ReadStatus => "readStatus",
            },
            Verb::Mcu(v) => match v {
                McuVerb::Connect => "connect",
                McuVerb::Disconnect => "disconnect",
                McuVerb::ReadStatus => "readStatus",
                McuVerb::ReadTemperature => "readTemperature",
                McuVerb::SetTemperature { .. } => "setTemperature",
                McuVerb::SetUpperTemperature { .. } => "setUpperTemperature",
                McuVerb::SetFanSpeed { .. } => "setFanSpeed",
                McuVerb::SetTestMode { .. } => "setTestMode",
                McuVerb::WaitBootComplete => "waitBootComplete",
                McuVerb::StartStandbyHeating { .. } => "startStandbyHeating",
                McuVerb::StartStandbyCooling => "startStandbyCooling",
            },
            Verb::DigitalIo(v) => match v {
                DigitalIoVerb::Connect => "connect",
                DigitalIoVerb::Disconnect => "disconnect",
                DigitalIoVerb::ReadStatus => "readStatus",
                DigitalIoVerb::WriteOutput { .. } => "writeOutput",
                DigitalIoVerb::AllOn => "allOn",
                DigitalIoVerb::AllOff => "allOff",
                DigitalIoVerb::ActivateEmergency => "activateEmergency",
                DigitalIoVerb::ResetEmergency => "resetEmergency",
            },
            Verb::Test(v) => match v {
                TestVerb::Start(_) => "start",
                TestVerb::Pause { .. } => "pause",
                TestVerb::Resume { .. } => "resume",
                TestVerb::Stop { .. } => "stop",
                TestVerb::Cancel { .. } => "cancel",
                TestVerb::ReadStatus { .. } => "readStatus",
            },
        }
    }

    /// Mutually exclusive in-flight class; `None` is never gated
    pub fn flight_class(&self) -> Option<FlightClass> {
        let kind = self.target().component();
        match self {
            Verb::Robot(RobotVerb::Connect | RobotVerb::Disconnect)
            | Verb::Power(PowerVerb::Connect | PowerVerb::Disconnect)
            | Verb::Loadcell(LoadcellVerb::Connect | LoadcellVerb::Disconnect)
            | Verb::Mcu(McuVerb::Connect | McuVerb::Disconnect)
            | Verb::DigitalIo(DigitalIoVerb::Connect | DigitalIoVerb::Disconnect) => {
                kind.map(FlightClass::Connection)
            }
            Verb::Robot(RobotVerb::ServoOn { .. } | RobotVerb::ServoOff { .. }) => {
                Some(FlightClass::RobotServo)
            }
            Verb::Robot(
                RobotVerb::Home { .. }
                | RobotVerb::MoveAbsolute(_)
                | RobotVerb::MoveRelative(_)
                | RobotVerb::StopMotion { .. },
            ) => Some(FlightClass::RobotMotion),
            Verb::Power(PowerVerb::EnableOutput | PowerVerb::DisableOutput) => {
                Some(FlightClass::PowerOutput)
            }
            Verb::Power(
                PowerVerb::SetVoltage { .. }
                | PowerVerb::SetCurrent { .. }
                | PowerVerb::SetCurrentLimit { .. },
            ) => Some(FlightClass::PowerSetpoint),
            Verb::Loadcell(
                LoadcellVerb::ZeroCalibrate | LoadcellVerb::Hold | LoadcellVerb::ReleaseHold,
            ) => Some(FlightClass::LoadcellControl),
            Verb::Mcu(
                McuVerb::SetTemperature { .. }
                | McuVerb::SetUpperTemperature { .. }
                | McuVerb::SetFanSpeed { .. }
                | McuVerb::SetTestMode { .. }
                | McuVerb::WaitBootComplete
                | McuVerb::StartStandbyHeating { .. }
                | McuVerb::StartStandbyCooling,
            ) => Some(FlightClass::McuControl),
            Verb::DigitalIo(DigitalIoVerb::WriteOutput { channel, .. }) => {
                Some(FlightClass::DioOutput(*channel))
            }
            Verb::DigitalIo(DigitalIoVerb::AllOn | DigitalIoVerb::AllOff) => {
                Some(FlightClass::DioBulk)
            }
            Verb::DigitalIo(DigitalIoVerb::ActivateEmergency | DigitalIoVerb::ResetEmergency) => {
                Some(FlightClass::DioEmergency)
            }
            Verb::Test(
                TestVerb::Start(_)
                | TestVerb::Pause { .. }
                | TestVerb::Resume { .. }
                | TestVerb::Stop { .. }
                | TestVerb::Cancel { .. },
            ) => Some(FlightClass::TestLifecycle),
            // Emergency stop and plain reads are never gated
            _ => None,
        }
    }

    /// HTTP request for this verb; `None` for local-only verbs
    pub fn request(&self) -> Option<ApiRequest> {
        use ComponentKind as K;
        match self {
            Verb::Robot(v) => match v {
                RobotVerb::Connect => post(K::Robot, "connect", json!({})),
                RobotVerb::Disconnect => post(K::Robot, "disconnect", json!({})),
                RobotVerb::ServoOn { axis_id } => {
                    post(K::Robot, "servo/enable", json!({ "axis_id": axis_id }))
                }
                RobotVerb::ServoOff { axis_id } => {
                    post(K::Robot, "servo/disable", json!({ "axis_id": axis_id }))
                }
                RobotVerb::Home { axis_id } => {
                    post(K::Robot, "home-axis", json!({ "axis_id": axis_id }))
                }
                RobotVerb::MoveAbsolute(p) => {
                    post(K::Robot, "move-absolute", motion_body(p, "position"))
                }
                RobotVerb::MoveRelative(p) => {
                    post(K::Robot, "move-relative", motion_body(p, "distance"))
                }
                RobotVerb::StopMotion { axis_id } => {
                    post(K::Robot, "stop-motion", json!({ "axis_id": axis_id }))
                }
                RobotVerb::EmergencyStop { axis_id } => {
                    post(K::Robot, "emergency-stop", json!({ "axis_id": axis_id }))
                }
                RobotVerb::ReadPosition { axis_id } => Some(ApiRequest::get(format!(
                    "{}?axis_id={}",
                    hw(K::Robot, "position"),
                    axis_id
                ))),
                RobotVerb::ReadStatus => status(K::Robot),
            },
            Verb::Power(v) => match v {
                PowerVerb::Connect => post(K::Power, "connect", json!({})),
                PowerVerb::Disconnect => post(K::Power, "disconnect", json!({})),
                PowerVerb::EnableOutput => post(K::Power, "enable-output", json!({})),
                PowerVerb::DisableOutput => post(K::Power, "disable-output", json!({})),
                PowerVerb::SetVoltage { volts } => {
                    post(K::Power, "set-voltage", json!({ "voltage": volts }))
                }
                PowerVerb::SetCurrent { amps } => {
                    post(K::Power, "set-current", json!({ "current": amps }))
                }
                PowerVerb::SetCurrentLimit { amps } => {
                    post(K::Power, "set-current-limit", json!({ "current_limit": amps }))
                }
                PowerVerb::ReadReadings => Some(ApiRequest::get(hw(K::Power, "readings"))),
                PowerVerb::ReadStatus => status(K::Power),
            },
            Verb::Loadcell(v) => match v {
                LoadcellVerb::Connect => post(K::Loadcell, "connect", json!({})),
                LoadcellVerb::Disconnect => post(K::Loadcell, "disconnect", json!({})),
                LoadcellVerb::ReadForce => Some(ApiRequest::get(hw(K::Loadcell, "force"))),
                LoadcellVerb::ZeroCalibrate => post(K::Loadcell, "zero-calibration", json!({})),
                LoadcellVerb::Hold => post(K::Loadcell, "hold", json!({})),
                LoadcellVerb::ReleaseHold => post(K::Loadcell, "hold-release", json!({})),
                LoadcellVerb::StartMonitoring | LoadcellVerb::StopMonitoring => None,
                LoadcellVerb::ReadStatus => status(K::Loadcell),
            },
            Verb::Mcu(v) => match v {
                McuVerb::Connect => post(K::Mcu, "connect", json!({})),
                McuVerb::Disconnect => post(K::Mcu, "disconnect", json!({})),
                McuVerb::ReadStatus => status(K::Mcu),
                McuVerb::ReadTemperature => Some(ApiRequest::get(hw(K::Mcu, "temperature"))),
                McuVerb::SetTemperature { celsius } => {
                    post(K::Mcu, "set-temperature", json!({ "temperature": celsius }))
                }
                McuVerb::SetUpperTemperature { celsius } => post(
                    K::Mcu,
                    "set-upper-temperature",
                    json!({ "upper_temperature": celsius }),
                ),
                McuVerb::SetFanSpeed { level } => {
                    post(K::Mcu, "set-fan-speed", json!({ "fan_speed": level }))
                }
                McuVerb::SetTestMode { mode } => {
                    post(K::Mcu, "set-test-mode", json!({ "test_mode": mode }))
                }
                McuVerb::WaitBootComplete => post(K::Mcu, "wait-boot-complete", json!({})),
                McuVerb::StartStandbyHeating {
                    operating_celsius,
                    standby_celsius,
                    hold_time_ms,
                } => post(
                    K::Mcu,
                    "start-standby-heating",
                    json!({
                        "operating_temp": operating_celsius,
                        "standby_temp": standby_celsius,
                        "hold_time_ms": hold_time_ms,
                    }),
                ),
                McuVerb::StartStandbyCooling => post(K::Mcu, "start-standby-cooling", json!({})),
            },
            Verb::DigitalIo(v) => match v {
                DigitalIoVerb::Connect => post(K::DigitalIo, "connect", json!({})),
                DigitalIoVerb::Disconnect => post(K::DigitalIo, "disconnect", json!({})),
                DigitalIoVerb::ReadStatus => status(K::DigitalIo),
                DigitalIoVerb::WriteOutput { channel, on } => post(
                    K::DigitalIo,
                    "output/control",
                    json!({ "channel": channel, "state": on }),
                ),
                DigitalIoVerb::AllOn => {
                    post(K::DigitalIo, "output/bulk", json!({ "operation": "all_on" }))
                }
                DigitalIoVerb::AllOff => {
                    post(K::DigitalIo, "output/bulk", json!({ "operation": "all_off" }))
                }
                DigitalIoVerb::ActivateEmergency => Some(ApiRequest::post(
                    "/hardware/emergency-stop/activate",
                    json!({}),
                )),
                DigitalIoVerb::ResetEmergency => {
                    Some(ApiRequest::post("/hardware/emergency-stop/reset", json!({})))
                }
            },
            Verb::Test(v) => match v {
                TestVerb::Start(start) => Some(ApiRequest::post(
                    "/tests/eol-force-test",
                    json!({
                        "dut_serial_number": start.dut_serial_number,
                        "dut_part_number": start.dut_part_number,
                        "operator_id": start.operator_id,
                        "profile": start.profile,
                    }),
                )),
                TestVerb::Pause { test_id } => test_action(test_id, "pause"),
                TestVerb::Resume { test_id } => test_action(test_id, "resume"),
                TestVerb::Stop { test_id } => test_action(test_id, "stop"),
                TestVerb::Cancel { test_id, reason } => Some(ApiRequest::post(
                    format!("/tests/eol-force-test/{test_id}/cancel"),
                    json!({ "reason": reason, "emergency_stop": false }),
                )),
                TestVerb::ReadStatus { test_id } => Some(ApiRequest::get(format!(
                    "/tests/eol-force-test/{test_id}/status"
                ))),
            },
        }
    }

    /// Whether the verb may energize outputs or start motion
    pub fn actuates(&self) -> bool {
        matches!(
            self,
            Verb::Robot(
                RobotVerb::ServoOn { .. }
                    | RobotVerb::Home { .. }
                    | RobotVerb::MoveAbsolute(_)
                    | RobotVerb::MoveRelative(_)
            ) | Verb::Power(PowerVerb::EnableOutput)
                | Verb::Mcu(
                    McuVerb::SetTemperature { .. }
                        | McuVerb::SetUpperTemperature { .. }
                        | McuVerb::StartStandbyHeating { .. }
                )
                | Verb::DigitalIo(DigitalIoVerb::WriteOutput { on: true, .. } | DigitalIoVerb::AllOn)
                | Verb::Test(TestVerb::Start(_) | TestVerb::Resume { .. })
        )
    }

    /// Verbs after whose admission the poller switches to its active rate
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Verb::Robot(
                RobotVerb::Home { .. } | RobotVerb::MoveAbsolute(_) | RobotVerb::MoveRelative(_)
            ) | Verb::Loadcell(LoadcellVerb::StartMonitoring)
        )
    }

    /// Plain reads: no operator-visible success entry beyond `info`
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Verb::Robot(RobotVerb::ReadPosition { .. } | RobotVerb::ReadStatus)
                | Verb::Power(PowerVerb::ReadReadings | PowerVerb::ReadStatus)
                | Verb::Loadcell(LoadcellVerb::ReadForce | LoadcellVerb::ReadStatus)
                | Verb::Mcu(McuVerb::ReadStatus | McuVerb::ReadTemperature)
                | Verb::DigitalIo(DigitalIoVerb::ReadStatus)
                | Verb::Test(TestVerb::ReadStatus { .. })
        )
    }

    /// Log level of the success entry
    pub fn success_level(&self) -> LogLevel {
        match self {
            Verb::Power(PowerVerb::EnableOutput) => LogLevel::Warning,
            Verb::Robot(RobotVerb::EmergencyStop { .. })
            | Verb::DigitalIo(DigitalIoVerb::ActivateEmergency | DigitalIoVerb::ResetEmergency) => {
                LogLevel::Safety
            }
            Verb::DigitalIo(DigitalIoVerb::WriteOutput { .. } | DigitalIoVerb::AllOn | DigitalIoVerb::AllOff) => {
                LogLevel::Output
            }
            v if v.is_read() => LogLevel::Info,
            _ => LogLevel::Success,
        }
    }

    /// Operator log text for a successful resolution
    pub fn success_message(&self) -> String {
        match self {
            Verb::Robot(v) => match v {
                RobotVerb::Connect => "Robot connected".into(),
                RobotVerb::Disconnect => "Robot disconnected".into(),
                RobotVerb::ServoOn { axis_id } => format!("Servo enabled on axis {axis_id}"),
                RobotVerb::ServoOff { axis_id } => format!("Servo disabled on axis {axis_id}"),
                RobotVerb::Home { axis_id } => format!("Homing axis {axis_id}"),
                RobotVerb::MoveAbsolute(p) => {
                    format!("Moving axis {} to {} µm at {} µm/s", p.axis_id, p.amount, p.velocity)
                }
                RobotVerb::MoveRelative(p) => {
                    format!("Moving axis {} by {} µm at {} µm/s", p.axis_id, p.amount, p.velocity)
                }
                RobotVerb::StopMotion { axis_id } => format!("Stopping axis {axis_id}"),
                RobotVerb::EmergencyStop { .. } => "Robot emergency stop executed".into(),
                RobotVerb::ReadPosition { .. } => "Position read".into(),
                RobotVerb::ReadStatus => "Robot status refreshed".into(),
            },
            Verb::Power(v) => match v {
                PowerVerb::Connect => "Power supply connected".into(),
                PowerVerb::Disconnect => "Power supply disconnected".into(),
                PowerVerb::EnableOutput => "Power output ENABLED".into(),
                PowerVerb::DisableOutput => "Power output disabled".into(),
                PowerVerb::SetVoltage { volts } => format!("Voltage set to {volts:.2} V"),
                PowerVerb::SetCurrent { amps } => format!("Current set to {amps:.2} A"),
                PowerVerb::SetCurrentLimit { amps } => format!("Current limit set to {amps:.2} A"),
                PowerVerb::ReadReadings => "Readings refreshed".into(),
                PowerVerb::ReadStatus => "Power status refreshed".into(),
            },
            Verb::Loadcell(v) => match v {
                LoadcellVerb::Connect => "Load cell connected".into(),
                LoadcellVerb::Disconnect => "Load cell disconnected".into(),
                LoadcellVerb::ReadForce => "Force read".into(),
                LoadcellVerb::ZeroCalibrate => "Zero calibration completed".into(),
                LoadcellVerb::Hold => "Measurement held".into(),
                LoadcellVerb::ReleaseHold => "Measurement hold released".into(),
                LoadcellVerb::StartMonitoring => "Live monitoring started".into(),
                LoadcellVerb::StopMonitoring => "Live monitoring stopped".into(),
                LoadcellVerb::ReadStatus => "Load cell status refreshed".into(),
            },
            Verb::Mcu(v) => match v {
                McuVerb::Connect => "MCU connected".into(),
                McuVerb::Disconnect => "MCU disconnected".into(),
                McuVerb::ReadStatus => "MCU status refreshed".into(),
                McuVerb::ReadTemperature => "Temperature read".into(),
                McuVerb::SetTemperature { celsius } => format!("Target temperature set to {celsius:.1} °C"),
                McuVerb::SetUpperTemperature { celsius } => {
                    format!("Upper temperature set to {celsius:.1} °C")
                }
                McuVerb::SetFanSpeed { level } => format!("Fan speed set to level {level}"),
                McuVerb::SetTestMode { mode } => format!("Test mode set to MODE_{mode}"),
                McuVerb::WaitBootComplete => "MCU boot complete".into(),
                McuVerb::StartStandbyHeating {
                    operating_celsius,
                    standby_celsius,
                    ..
                } => format!(
                    "Standby heating started: {operating_celsius:.1} °C operating, {standby_celsius:.1} °C standby"
                ),
                McuVerb::StartStandbyCooling => "Standby cooling started".into(),
            },
            Verb::DigitalIo(v) => match v {
                DigitalIoVerb::Connect => "Digital I/O connected".into(),
                DigitalIoVerb::Disconnect => "Digital I/O disconnected".into(),
                DigitalIoVerb::ReadStatus => "Digital I/O status refreshed".into(),
                DigitalIoVerb::WriteOutput { channel, on } => {
                    format!("Output {channel} {}", if *on { "ON" } else { "OFF" })
                }
                DigitalIoVerb::AllOn => "All outputs ON".into(),
                DigitalIoVerb::AllOff => "All outputs OFF".into(),
                DigitalIoVerb::ActivateEmergency => "EMERGENCY STOP ACTIVATED".into(),
                DigitalIoVerb::ResetEmergency => "Emergency stop reset".into(),
            },
            Verb::Test(v) => match v {
                TestVerb::Start(start) => format!("Test started for DUT {}", start.dut_serial_number),
                TestVerb::Pause { test_id } => format!("Test {test_id} paused"),
                TestVerb::Resume { test_id } => format!("Test {test_id} resumed"),
                TestVerb::Stop { test_id } => format!("Test {test_id} stopped"),
                TestVerb::Cancel { test_id, .. } => format!("Test {test_id} cancellation requested"),
                TestVerb::ReadStatus { .. } => "Test status refreshed".into(),
            },
        }
    }

    /// Mirror mutations implied by a successful resolution.
    ///
    /// Control verbs declare a fixed field change; read verbs parse the
    /// response through the endpoint's shape contract.
    pub fn success_patches(
        &self,
        value: Option<&Value>,
        mirror: &StateMirror,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComponentPatch>, TransportError> {
        use ComponentKind as K;
        let patches = match self {
            Verb::Robot(v) => match v {
                RobotVerb::Connect => vec![ComponentPatch::connected(K::Robot, true)],
                RobotVerb::Disconnect => vec![ComponentPatch::robot(RobotPatch {
                    servo_enabled: Some(false),
                    ..Default::default()
                })
                .with_connected(false)],
                RobotVerb::ServoOn { .. } => robot(RobotPatch {
                    servo_enabled: Some(true),
                    ..Default::default()
                }),
                RobotVerb::ServoOff { .. } => robot(RobotPatch {
                    servo_enabled: Some(false),
                    ..Default::default()
                }),
                RobotVerb::Home { .. } => motion(MotionStatus::Homing),
                RobotVerb::MoveAbsolute(_) | RobotVerb::MoveRelative(_) => {
                    motion(MotionStatus::Moving)
                }
                RobotVerb::StopMotion { .. } => motion(MotionStatus::Stopping),
                RobotVerb::EmergencyStop { .. } => motion(MotionStatus::EmergencyStopped),
                RobotVerb::ReadPosition { .. } => {
                    robot(shapes::parse_robot_position(&require(value, "robot-position")?)?)
                }
                RobotVerb::ReadStatus => vec![shapes::parse_component_status(
                    K::Robot,
                    &require(value, "robot-status")?,
                )?],
            },
            Verb::Power(v) => match v {
                PowerVerb::Connect => vec![ComponentPatch::connected(K::Power, true)],
                PowerVerb::Disconnect => vec![ComponentPatch::power(PowerPatch {
                    output_enabled: Some(false),
                    ..Default::default()
                })
                .with_connected(false)],
                PowerVerb::EnableOutput => power(PowerPatch {
                    output_enabled: Some(true),
                    ..Default::default()
                }),
                PowerVerb::DisableOutput => power(PowerPatch {
                    output_enabled: Some(false),
                    ..Default::default()
                }),
                PowerVerb::SetVoltage { volts } => power(PowerPatch {
                    setpoint_v: Some(*volts),
                    ..Default::default()
                }),
                PowerVerb::SetCurrent { amps } => power(PowerPatch {
                    setpoint_a: Some(*amps),
                    ..Default::default()
                }),
                PowerVerb::SetCurrentLimit { amps } => power(PowerPatch {
                    current_limit_a: Some(*amps),
                    ..Default::default()
                }),
                PowerVerb::ReadReadings => {
                    power(shapes::parse_power_readings(&require(value, "power-readings")?)?)
                }
                PowerVerb::ReadStatus => vec![shapes::parse_component_status(
                    K::Power,
                    &require(value, "power-status")?,
                )?],
            },
            Verb::Loadcell(v) => match v {
                LoadcellVerb::Connect => vec![ComponentPatch::connected(K::Loadcell, true)],
                LoadcellVerb::Disconnect => vec![ComponentPatch::connected(K::Loadcell, false)],
                LoadcellVerb::ReadForce => vec![ComponentPatch::loadcell(shapes::parse_force(
                    &require(value, "loadcell-force")?,
                )?)],
                LoadcellVerb::ZeroCalibrate => {
                    let zero_offset = value
                        .and_then(Value::as_object)
                        .and_then(|obj| shapes::f64_field(obj, &["zero_offset", "offset"]));
                    vec![ComponentPatch::loadcell(LoadcellPatch {
                        last_calibration: Some(now),
                        zero_offset,
                        ..Default::default()
                    })]
                }
                LoadcellVerb::Hold
                | LoadcellVerb::ReleaseHold
                | LoadcellVerb::StartMonitoring
                | LoadcellVerb::StopMonitoring => Vec::new(),
                LoadcellVerb::ReadStatus => vec![shapes::parse_component_status(
                    K::Loadcell,
                    &require(value, "loadcell-status")?,
                )?],
            },
            Verb::Mcu(v) => match v {
                McuVerb::Connect => vec![ComponentPatch::connected(K::Mcu, true)],
                McuVerb::Disconnect => vec![ComponentPatch::connected(K::Mcu, false)],
                McuVerb::ReadStatus => vec![shapes::parse_component_status(
                    K::Mcu,
                    &require(value, "mcu-status")?,
                )?],
                McuVerb::ReadTemperature => {
                    mcu(shapes::parse_mcu_temperature(&require(value, "mcu-temperature")?)?)
                }
                McuVerb::SetTemperature { celsius } => mcu(McuPatch {
                    target_temperature: Some(*celsius),
                    ..Default::default()
                }),
                McuVerb::SetFanSpeed { level } => mcu(McuPatch {
                    fan_speed: Some(*level),
                    ..Default::default()
                }),
                McuVerb::SetTestMode { mode } => mcu(McuPatch {
                    test_mode: Some(*mode),
                    ..Default::default()
                }),
                McuVerb::WaitBootComplete => mcu(McuPatch {
                    boot_complete: Some(true),
                    ..Default::default()
                }),
                McuVerb::StartStandbyHeating {
                    operating_celsius, ..
                } => mcu(McuPatch {
                    target_temperature: Some(*operating_celsius),
                    ..Default::default()
                }),
                McuVerb::SetUpperTemperature { .. } | McuVerb::StartStandbyCooling => Vec::new(),
            },
            Verb::DigitalIo(v) => match v {
                DigitalIoVerb::Connect => vec![ComponentPatch::connected(K::DigitalIo, true)],
                DigitalIoVerb::Disconnect => vec![ComponentPatch::connected(K::DigitalIo, false)],
                DigitalIoVerb::ReadStatus => vec![shapes::parse_component_status(
                    K::DigitalIo,
                    &require(value, "digital-io-status")?,
                )?],
                DigitalIoVerb::WriteOutput { channel, on } => {
                    vec![ComponentPatch::digital_io(DigitalIoPatch {
                        outputs: vec![(*channel, *on)],
                        ..Default::default()
                    })]
                }
                DigitalIoVerb::AllOn => {
                    vec![ComponentPatch::digital_io(DigitalIoPatch::all_outputs(true))]
                }
                DigitalIoVerb::AllOff => {
                    vec![ComponentPatch::digital_io(DigitalIoPatch::all_outputs(false))]
                }
                DigitalIoVerb::ActivateEmergency => vec![ComponentPatch::digital_io(DigitalIoPatch {
                    emergency_active: Some(true),
                    ..Default::default()
                })],
                DigitalIoVerb::ResetEmergency => {
                    let mut patches = vec![ComponentPatch::digital_io(DigitalIoPatch {
                        emergency_active: Some(false),
                        ..Default::default()
                    })];
                    let stopped = mirror
                        .get(K::Robot)
                        .and_then(|s| s.robot())
                        .is_some_and(|r| r.motion == MotionStatus::EmergencyStopped);
                    if stopped {
                        patches.extend(motion(MotionStatus::Idle));
                    }
                    patches
                }
            },
            Verb::Test(_) => Vec::new(),
        };
        Ok(patches)
    }
}

fn test_action(test_id: &str, action: &str) -> Option<ApiRequest> {
    Some(ApiRequest::put(
        format!("/tests/{test_id}"),
        json!({ "action": action }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpMethod;

    fn profile(amount: f64) -> MotionProfile {
        MotionProfile {
            axis_id: 0,
            amount,
            velocity: 10_000.0,
            acceleration: 10_000.0,
            deceleration: 10_000.0,
        }
    }

    #[test]
    fn test_home_request_body() {
        let req = Verb::Robot(RobotVerb::Home { axis_id: 0 }).request().unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "/hardware/robot/home-axis");
        assert_eq!(req.body, Some(json!({"axis_id": 0})));
    }

    #[test]
    fn test_move_bodies_name_amount_field() {
        let abs = Verb::Robot(RobotVerb::MoveAbsolute(profile(100.0))).request().unwrap();
        assert_eq!(abs.body.as_ref().unwrap()["position"], json!(100.0));
        let rel = Verb::Robot(RobotVerb::MoveRelative(profile(5.0))).request().unwrap();
        assert_eq!(rel.path, "/hardware/robot/move-relative");
        assert_eq!(rel.body.as_ref().unwrap()["distance"], json!(5.0));
    }

    #[test]
    fn test_flight_classes() {
        let abs = Verb::Robot(RobotVerb::MoveAbsolute(profile(1.0)));
        let rel = Verb::Robot(RobotVerb::MoveRelative(profile(1.0)));
        assert_eq!(abs.flight_class(), rel.flight_class());
        assert_eq!(Verb::Robot(RobotVerb::EmergencyStop { axis_id: 0 }).flight_class(), None);
        assert_eq!(
            Verb::DigitalIo(DigitalIoVerb::WriteOutput { channel: 4, on: true }).flight_class(),
            Some(FlightClass::DioOutput(4))
        );
        assert_eq!(Verb::Power(PowerVerb::ReadReadings).flight_class(), None);
    }

    #[test]
    fn test_local_only_verbs_have_no_request() {
        assert!(Verb::Loadcell(LoadcellVerb::StartMonitoring).request().is_none());
        assert!(Verb::Loadcell(LoadcellVerb::StartMonitoring).is_long_running());
    }

    #[test]
    fn test_actuating_verbs() {
        assert!(Verb::DigitalIo(DigitalIoVerb::AllOn).actuates());
        assert!(!Verb::DigitalIo(DigitalIoVerb::AllOff).actuates());
        assert!(!Verb::DigitalIo(DigitalIoVerb::WriteOutput { channel: 1, on: false }).actuates());
        assert!(Verb::Power(PowerVerb::EnableOutput).actuates());
        assert!(!Verb::Power(PowerVerb::SetVoltage { volts: 5.0 }).actuates());
        assert!(!Verb::Robot(RobotVerb::EmergencyStop { axis_id: 0 }).actuates());
    }

    #[test]
    fn test_reset_emergency_releases_stopped_robot() {
        let mut mirror = StateMirror::new();
        mirror.retain(ComponentKind::Robot);
        mirror.apply(
            &ComponentPatch::robot(RobotPatch {
                motion: Some(MotionStatus::EmergencyStopped),
                ..Default::default()
            }),
            crate::mirror::UpdateOrigin::Command,
            Utc::now(),
        );
        let patches = Verb::DigitalIo(DigitalIoVerb::ResetEmergency)
            .success_patches(None, &mirror, Utc::now())
            .unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].emergency_active(), Some(false));
    }

    #[test]
    fn test_read_verbs_parse_values() {
        let mirror = StateMirror::new();
        let patches = Verb::Power(PowerVerb::ReadReadings)
            .success_patches(Some(&json!({"voltage": 5.0})), &mirror, Utc::now())
            .unwrap();
        assert_eq!(
            patches,
            vec![ComponentPatch::power(PowerPatch {
                measured_v: Some(5.0),
                ..Default::default()
            })]
        );
        assert!(Verb::Power(PowerVerb::ReadReadings)
            .success_patches(None, &mirror, Utc::now())
            .is_err());
    }

    #[test]
    fn test_names_and_levels() {
        assert_eq!(Verb::Robot(RobotVerb::ServoOn { axis_id: 0 }).name(), "servoOn");
        assert_eq!(Verb::Power(PowerVerb::EnableOutput).success_level(), LogLevel::Warning);
        assert_eq!(Verb::Mcu(McuVerb::ReadStatus).success_level(), LogLevel::Info);
        assert_eq!(
            Verb::Test(TestVerb::Pause { test_id: "T1".into() }).request().unwrap().path,
            "/tests/T1"
        );
    }
}
