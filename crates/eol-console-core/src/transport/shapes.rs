//! Per-endpoint shape contracts
//!
//! Tolerant readers for every payload the core consumes. Field spellings
//! differ between routes (`position` vs `current_position`, `force` vs
//! `force_value`, ...) and unknown fields are ignored. A payload is only
//! rejected when the one field an endpoint exists to deliver is missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::TransportError;
use crate::mirror::{
    ComponentKind, ComponentPatch, DigitalIoPatch, LoadcellPatch, McuPatch, MotionStatus,
    PowerPatch, RobotPatch,
};

fn object<'a>(endpoint: &str, value: &'a Value) -> Result<&'a Map<String, Value>, TransportError> {
    value
        .as_object()
        .ok_or_else(|| TransportError::shape(endpoint, "expected a JSON object"))
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "high" | "1" => Some(true),
            "false" | "off" | "low" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn f64_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    field(obj, keys).and_then(as_f64)
}

pub(crate) fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    field(obj, keys).and_then(as_bool)
}

pub(crate) fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    field(obj, keys).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn u32_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<u32> {
    f64_field(obj, keys)
        .filter(|v| *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32)
}

fn u8_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<u8> {
    f64_field(obj, keys)
        .filter(|v| *v >= 0.0 && *v <= u8::MAX as f64)
        .map(|v| v as u8)
}

fn time_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    str_field(obj, keys)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn motion_from_str(text: &str) -> Option<MotionStatus> {
    match text.trim().to_ascii_lowercase().as_str() {
        "idle" | "ready" | "stopped" => Some(MotionStatus::Idle),
        "moving" => Some(MotionStatus::Moving),
        "homing" => Some(MotionStatus::Homing),
        "stopping" => Some(MotionStatus::Stopping),
        "emergency" | "emergency_stopped" | "emergency_stop" | "estop" => {
            Some(MotionStatus::EmergencyStopped)
        }
        _ => None,
    }
}

/// Read channel levels from any of the shapes the server emits: a plain
/// bool array, an array of `{channel, state|level}` records, or an object
/// keyed by channel index.
pub fn parse_channel_levels(value: &Value) -> Vec<(usize, bool)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| match item {
                Value::Object(rec) => {
                    let ch = u32_field(rec, &["channel", "index"])? as usize;
                    let level = bool_field(rec, &["state", "level", "value"])?;
                    Some((ch, level))
                }
                other => as_bool(other).map(|level| (idx, level)),
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| Some((k.trim().parse::<usize>().ok()?, as_bool(v)?)))
            .collect(),
        _ => Vec::new(),
    }
}

fn identity(obj: &Map<String, Value>) -> Option<String> {
    str_field(obj, &["device_identity", "identity", "device", "model"])
}

/// Status object for `kind` (`GET /hardware/<kind>/status` or a
/// `<kind>-status` frame)
pub fn parse_component_status(kind: ComponentKind, value: &Value) -> Result<ComponentPatch, TransportError> {
    let endpoint = format!("{}-status", kind.name());
    let obj = object(&endpoint, value)?;

    let mut patch = match kind {
        ComponentKind::Robot => ComponentPatch::robot(RobotPatch {
            servo_enabled: bool_field(obj, &["servo_enabled", "servo"]),
            motion: str_field(obj, &["motion_status"]).and_then(|s| motion_from_str(&s)),
            is_moving: bool_field(obj, &["is_moving", "moving"]),
            axis_id: u32_field(obj, &["axis_id", "axis"]),
            position_um: f64_field(obj, &["position", "current_position"]),
            is_homed: bool_field(obj, &["is_homed", "homed"]),
        }),
        ComponentKind::Power => ComponentPatch::power(PowerPatch {
            output_enabled: bool_field(obj, &["output_enabled", "output"]),
            setpoint_v: f64_field(obj, &["voltage_setpoint", "voltage"]),
            setpoint_a: f64_field(obj, &["current_setpoint", "current"]),
            current_limit_a: f64_field(obj, &["current_limit"]),
            measured_v: f64_field(obj, &["measured_voltage"]),
            measured_a: f64_field(obj, &["measured_current"]),
            measured_w: f64_field(obj, &["measured_power", "power"]),
        }),
        ComponentKind::Loadcell => ComponentPatch::loadcell(LoadcellPatch {
            last_force: f64_field(obj, &["force", "force_value"]),
            unit: str_field(obj, &["unit"]),
            last_calibration: time_field(obj, &["last_calibration"]),
            zero_offset: f64_field(obj, &["zero_offset"]),
        }),
        ComponentKind::Mcu => ComponentPatch::mcu(McuPatch {
            temperature: f64_field(obj, &["temperature", "current_temperature"]),
            target_temperature: f64_field(obj, &["target_temperature"]),
            fan_speed: u8_field(obj, &["fan_speed"]),
            test_mode: u8_field(obj, &["test_mode"]),
            boot_complete: bool_field(obj, &["boot_complete"]),
        }),
        ComponentKind::DigitalIo => ComponentPatch::digital_io(DigitalIoPatch {
            inputs: field(obj, &["inputs"]).map(parse_channel_levels).unwrap_or_default(),
            outputs: field(obj, &["outputs"]).map(parse_channel_levels).unwrap_or_default(),
            emergency_active: bool_field(obj, &["emergency_active", "emergency"]),
        }),
    };
    patch.connected = bool_field(obj, &["connected", "is_connected"]);
    patch.device_identity = identity(obj);
    Ok(patch)
}

/// `GET /hardware/robot/position` or a `robot-position` frame
pub fn parse_robot_position(value: &Value) -> Result<RobotPatch, TransportError> {
    let obj = object("robot-position", value)?;
    let position = f64_field(obj, &["position", "current_position"])
        .ok_or_else(|| TransportError::shape("robot-position", "missing position"))?;
    Ok(RobotPatch {
        position_um: Some(position),
        axis_id: u32_field(obj, &["axis_id"]),
        is_moving: bool_field(obj, &["is_moving"]),
        ..Default::default()
    })
}

/// `GET /hardware/power/readings` or a `power-readings` frame
pub fn parse_power_readings(value: &Value) -> Result<PowerPatch, TransportError> {
    let obj = object("power-readings", value)?;
    let patch = PowerPatch {
        measured_v: f64_field(obj, &["voltage", "measured_voltage"]),
        measured_a: f64_field(obj, &["current", "measured_current"]),
        measured_w: f64_field(obj, &["power", "measured_power"]),
        ..Default::default()
    };
    if patch.measured_v.is_none() && patch.measured_a.is_none() && patch.measured_w.is_none() {
        return Err(TransportError::shape("power-readings", "no readings present"));
    }
    Ok(patch)
}

/// `GET /hardware/loadcell/force` or a `loadcell-force` frame
pub fn parse_force(value: &Value) -> Result<LoadcellPatch, TransportError> {
    let obj = object("loadcell-force", value)?;
    let force = f64_field(obj, &["force", "force_value", "value"])
        .ok_or_else(|| TransportError::shape("loadcell-force", "missing force"))?;
    Ok(LoadcellPatch {
        last_force: Some(force),
        unit: str_field(obj, &["unit"]),
        ..Default::default()
    })
}

/// `GET /hardware/mcu/temperature`
pub fn parse_mcu_temperature(value: &Value) -> Result<McuPatch, TransportError> {
    let obj = object("mcu-temperature", value)?;
    let temperature = f64_field(obj, &["temperature", "current_temperature"])
        .ok_or_else(|| TransportError::shape("mcu-temperature", "missing temperature"))?;
    Ok(McuPatch {
        temperature: Some(temperature),
        ..Default::default()
    })
}

/// `hardware-status` frame or `GET /hardware/status`: one connected flag
/// per component, either as a bool or as a nested status object
pub fn parse_hardware_status(value: &Value) -> Result<Vec<ComponentPatch>, TransportError> {
    let obj = object("hardware-status", value)?;
    let mut patches = Vec::new();
    for kind in ComponentKind::ALL {
        let entry = field(obj, &[kind.name(), kind.path_segment()]);
        match entry {
            Some(Value::Object(_)) => {
                if let Some(v) = entry {
                    patches.push(parse_component_status(kind, v)?);
                }
            }
            Some(other) => {
                if let Some(connected) = as_bool(other) {
                    patches.push(ComponentPatch::connected(kind, connected));
                }
            }
            None => {}
        }
    }
    Ok(patches)
}

/// A frame that names its component (`{component: "power", ...}`)
pub fn parse_component_message(value: &Value) -> Option<Result<ComponentPatch, TransportError>> {
    let obj = value.as_object()?;
    let kind = str_field(obj, &["component", "hardware"]).and_then(|n| ComponentKind::from_name(&n))?;
    // Fields may sit at the top level or under `data`/`status`
    let inner = field(obj, &["data", "status"]).filter(|v| v.is_object()).unwrap_or(value);
    Some(parse_component_status(kind, inner))
}

/// `emergency-status` frame
pub fn parse_emergency(value: &Value) -> Result<bool, TransportError> {
    if let Some(active) = as_bool(value) {
        return Ok(active);
    }
    let obj = object("emergency-status", value)?;
    bool_field(obj, &["active", "emergency_active", "emergency", "state"])
        .ok_or_else(|| TransportError::shape("emergency-status", "missing active flag"))
}

/// Server-reported system health (`system-health` frame)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthReport {
    pub status: Option<String>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

pub fn parse_system_health(value: &Value) -> Result<SystemHealthReport, TransportError> {
    let obj = object("system-health", value)?;
    Ok(SystemHealthReport {
        status: str_field(obj, &["status", "health", "overall_status"]),
        cpu_percent: f64_field(obj, &["cpu_percent", "cpu_usage", "cpu"]),
        memory_percent: f64_field(obj, &["memory_percent", "memory_usage", "memory"]),
        disk_percent: f64_field(obj, &["disk_percent", "disk_usage", "disk"]),
    })
}

/// `test-status` frame or `GET /tests/{id}/status`
#[derive(Debug, Clone, PartialEq)]
pub struct TestStatusFrame {
    pub test_id: Option<String>,
    pub status: String,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub passed: Option<bool>,
}

pub fn parse_test_status(value: &Value) -> Result<TestStatusFrame, TransportError> {
    let obj = object("test-status", value)?;
    let status = str_field(obj, &["status", "state"])
        .ok_or_else(|| TransportError::shape("test-status", "missing status"))?;
    Ok(TestStatusFrame {
        test_id: str_field(obj, &["test_id", "id"]),
        status,
        progress: f64_field(obj, &["progress", "progress_percent"]),
        message: str_field(obj, &["message", "current_step"]),
        passed: bool_field(obj, &["passed", "is_passed"]),
    })
}

/// `test-data` frame: one sample of the running force test
#[derive(Debug, Clone, PartialEq)]
pub struct TestDataFrame {
    pub test_id: Option<String>,
    /// Server-side sample counter, when the route sends one
    pub sequence: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
    pub force: Option<f64>,
    pub position: Option<f64>,
    pub temperature: Option<f64>,
}

pub fn parse_test_data(value: &Value) -> Result<TestDataFrame, TransportError> {
    let obj = object("test-data", value)?;
    let frame = TestDataFrame {
        test_id: str_field(obj, &["test_id", "id"]),
        sequence: u32_field(obj, &["sequence", "seq"]),
        timestamp: time_field(obj, &["timestamp", "time"]),
        force: f64_field(obj, &["force", "force_value"]),
        position: f64_field(obj, &["position", "current_position"]),
        temperature: f64_field(obj, &["temperature"]),
    };
    if frame.force.is_none() && frame.position.is_none() && frame.temperature.is_none() {
        return Err(TransportError::shape("test-data", "no samples present"));
    }
    Ok(frame)
}

/// Error text from a `<component>-error` frame
pub fn parse_error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => str_field(obj, &["error", "message", "detail"])
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::DetailPatch;
    use serde_json::json;

    #[test]
    fn test_robot_status_accepts_current_position() {
        let patch = parse_component_status(
            ComponentKind::Robot,
            &json!({"connected": true, "axis_id": 0, "current_position": 1250.5,
                    "servo_enabled": true, "is_moving": false, "firmware": "x"}),
        )
        .unwrap();
        assert_eq!(patch.connected, Some(true));
        match patch.detail {
            DetailPatch::Robot(r) => {
                assert_eq!(r.position_um, Some(1250.5));
                assert_eq!(r.servo_enabled, Some(true));
                assert_eq!(r.is_moving, Some(false));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_robot_position_prefers_position() {
        let patch =
            parse_robot_position(&json!({"position": 10.0, "current_position": 11.0})).unwrap();
        assert_eq!(patch.position_um, Some(10.0));
        let patch = parse_robot_position(&json!({"current_position": 11.0})).unwrap();
        assert_eq!(patch.position_um, Some(11.0));
        assert!(parse_robot_position(&json!({"axis_id": 0})).is_err());
    }

    #[test]
    fn test_power_readings() {
        let patch =
            parse_power_readings(&json!({"voltage": 12.1, "current": 0.4, "power": 4.84})).unwrap();
        assert_eq!(patch.measured_v, Some(12.1));
        assert_eq!(patch.measured_a, Some(0.4));
        assert_eq!(patch.measured_w, Some(4.84));
        assert!(parse_power_readings(&json!({})).is_err());
    }

    #[test]
    fn test_force_accepts_string_numbers() {
        let patch = parse_force(&json!({"force": "3.25", "unit": "kgf"})).unwrap();
        assert_eq!(patch.last_force, Some(3.25));
        assert_eq!(patch.unit.as_deref(), Some("kgf"));
    }

    #[test]
    fn test_channel_level_shapes() {
        assert_eq!(parse_channel_levels(&json!([true, false, true])), vec![(0, true), (1, false), (2, true)]);
        assert_eq!(
            parse_channel_levels(&json!([{"channel": 4, "state": true}, {"channel": 5, "level": "LOW"}])),
            vec![(4, true), (5, false)]
        );
        let mut from_map = parse_channel_levels(&json!({"7": true, "2": false}));
        from_map.sort();
        assert_eq!(from_map, vec![(2, false), (7, true)]);
    }

    #[test]
    fn test_hardware_status_map() {
        let patches = parse_hardware_status(&json!({
            "robot": true, "mcu": false, "power": true, "loadcell": false,
            "digital_io": true, "overall_status": "partial"
        }))
        .unwrap();
        assert_eq!(patches.len(), 5);
        assert_eq!(patches[0], ComponentPatch::connected(ComponentKind::Robot, true));
    }

    #[test]
    fn test_component_message() {
        let patch = parse_component_message(&json!({"component": "power", "output_enabled": true}))
            .unwrap()
            .unwrap();
        assert_eq!(patch.kind(), ComponentKind::Power);
        assert!(parse_component_message(&json!({"foo": 1})).is_none());
    }

    #[test]
    fn test_emergency_shapes() {
        assert!(parse_emergency(&json!({"active": true})).unwrap());
        assert!(!parse_emergency(&json!({"emergency_active": false})).unwrap());
        assert!(parse_emergency(&json!(true)).unwrap());
        assert!(parse_emergency(&json!({"other": 1})).is_err());
    }

    #[test]
    fn test_test_status_and_data() {
        let status =
            parse_test_status(&json!({"test_id": "T-1", "status": "running", "progress": 40}))
                .unwrap();
        assert_eq!(status.status, "running");
        assert_eq!(status.progress, Some(40.0));

        let data = parse_test_data(&json!({"force": 1.5, "position": 200.0})).unwrap();
        assert_eq!(data.force, Some(1.5));
        assert_eq!(data.temperature, None);
        assert!(parse_test_data(&json!({"test_id": "T-1"})).is_err());
    }

    #[test]
    fn test_error_text() {
        assert_eq!(parse_error_text(&json!({"error": "overcurrent"})), "overcurrent");
        assert_eq!(parse_error_text(&json!("boom")), "boom");
    }
}
