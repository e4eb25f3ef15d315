//! Per-verb interlock, validation and confirmation rules

use super::{
    Confirmation, Refusal, SafetyContext, SafetyThresholds, PRE_TEST_COMPONENTS,
    TOWER_LAMP_CHANNELS,
};
use crate::command::{
    DigitalIoVerb, LoadcellVerb, McuVerb, MotionProfile, PowerVerb, RobotVerb, TestVerb, Verb,
};
use crate::mirror::{ComponentKind, DIO_CHANNELS};

type RuleResult = Result<Option<Confirmation>, Refusal>;

/// Inclusive range check; NaN is never in range
fn in_range(value: f64, min: f64, max: f64) -> bool {
    value >= min && value <= max
}

fn check_range(what: &str, value: f64, min: f64, max: f64, unit: &str) -> Result<(), Refusal> {
    if in_range(value, min, max) {
        Ok(())
    } else {
        Err(Refusal::validation(format!(
            "{what} must be between {min} and {max} {unit} (got {value})"
        )))
    }
}

fn require_connected(ctx: &SafetyContext<'_>, kind: ComponentKind) -> Result<(), Refusal> {
    if ctx.is_connected(kind) {
        Ok(())
    } else {
        Err(Refusal::interlock(format!("{} is not connected", kind.label())))
    }
}

pub(super) fn check(verb: &Verb, ctx: &SafetyContext<'_>) -> RuleResult {
    match verb {
        Verb::Robot(v) => robot(v, ctx),
        Verb::Power(v) => power(v, ctx),
        Verb::Loadcell(v) => loadcell(v),
        Verb::Mcu(v) => mcu(v, ctx.thresholds),
        Verb::DigitalIo(v) => digital_io(v),
        Verb::Test(v) => test(v, ctx),
    }
}

fn robot(verb: &RobotVerb, ctx: &SafetyContext<'_>) -> RuleResult {
    match verb {
        RobotVerb::ServoOn { axis_id } => {
            require_connected(ctx, ComponentKind::Robot)?;
            Ok(Some(Confirmation::warning(
                "Enable Servo",
                format!("Enabling the servo on axis {axis_id} energizes the motor. Continue?"),
            )))
        }
        RobotVerb::Home { axis_id } => {
            motion_preconditions(ctx)?;
            Ok(Some(
                Confirmation::warning(
                    "Home Axis",
                    format!("Axis {axis_id} will move to its home position. Continue?"),
                )
                .suppressible(),
            ))
        }
        RobotVerb::MoveAbsolute(profile) => {
            motion_preconditions(ctx)?;
            check_profile(profile, "Position", ctx.thresholds)?;
            Ok(Some(
                Confirmation::warning(
                    "Move Absolute",
                    format!(
                        "Move axis {} to {} µm at {} µm/s?",
                        profile.axis_id, profile.amount, profile.velocity
                    ),
                )
                .suppressible(),
            ))
        }
        RobotVerb::MoveRelative(profile) => {
            motion_preconditions(ctx)?;
            check_profile(profile, "Distance", ctx.thresholds)?;
            Ok(Some(
                Confirmation::warning(
                    "Move Relative",
                    format!(
                        "Move axis {} by {} µm at {} µm/s?",
                        profile.axis_id, profile.amount, profile.velocity
                    ),
                )
                .suppressible(),
            ))
        }
        RobotVerb::Connect
        | RobotVerb::Disconnect
        | RobotVerb::ServoOff { .. }
        | RobotVerb::StopMotion { .. }
        | RobotVerb::EmergencyStop { .. }
        | RobotVerb::ReadPosition { .. }
        | RobotVerb::ReadStatus => Ok(None),
    }
}

fn motion_preconditions(ctx: &SafetyContext<'_>) -> Result<(), Refusal> {
    require_connected(ctx, ComponentKind::Robot)?;
    let servo_enabled = ctx
        .component
        .and_then(|state| state.robot())
        .is_some_and(|robot| robot.servo_enabled);
    if !servo_enabled {
        return Err(Refusal::interlock("Servo is not enabled"));
    }
    Ok(())
}

fn check_profile(
    profile: &MotionProfile,
    amount_label: &str,
    limits: &SafetyThresholds,
) -> Result<(), Refusal> {
    check_range(amount_label, profile.amount, 0.0, limits.max_position_um, "µm")?;
    check_range(
        "Velocity",
        profile.velocity,
        limits.min_velocity,
        limits.max_velocity,
        "µm/s",
    )?;
    check_range(
        "Acceleration",
        profile.acceleration,
        limits.min_acceleration,
        limits.max_acceleration,
        "µm/s²",
    )?;
    check_range(
        "Deceleration",
        profile.deceleration,
        limits.min_acceleration,
        limits.max_acceleration,
        "µm/s²",
    )
}

fn power(verb: &PowerVerb, ctx: &SafetyContext<'_>) -> RuleResult {
    let limits = ctx.thresholds;
    match verb {
        PowerVerb::EnableOutput => {
            require_connected(ctx, ComponentKind::Power)?;
            let (volts, amps) = ctx
                .component
                .and_then(|state| state.power())
                .map(|p| (p.measured_v, p.measured_a))
                .unwrap_or_default();
            if volts > limits.high_voltage || amps > limits.high_current {
                Ok(Some(Confirmation::escalated(
                    "HIGH POWER WARNING",
                    format!(
                        "The supply reads {volts:.2} V / {amps:.3} A, above the {:.1} V / {:.1} A \
                         safety thresholds. Enabling output may damage the device under test.",
                        limits.high_voltage, limits.high_current
                    ),
                )))
            } else {
                Ok(Some(Confirmation::warning(
                    "Enable Power Output",
                    format!("Enable output at {volts:.2} V / {amps:.3} A?"),
                )))
            }
        }
        PowerVerb::SetVoltage { volts } => {
            check_range("Voltage", *volts, 0.0, limits.max_voltage, "V")?;
            Ok(None)
        }
        PowerVerb::SetCurrent { amps } => {
            check_range("Current", *amps, 0.0, limits.max_current, "A")?;
            Ok(None)
        }
        PowerVerb::SetCurrentLimit { amps } => {
            check_range("Current limit", *amps, 0.0, limits.max_current, "A")?;
            Ok(None)
        }
        PowerVerb::Connect
        | PowerVerb::Disconnect
        | PowerVerb::DisableOutput
        | PowerVerb::ReadReadings
        | PowerVerb::ReadStatus => Ok(None),
    }
}

fn loadcell(verb: &LoadcellVerb) -> RuleResult {
    match verb {
        LoadcellVerb::ZeroCalibrate => Ok(Some(Confirmation::warning(
            "Zero Calibration",
            "Remove every load from the cell before zeroing. Continue?",
        ))),
        _ => Ok(None),
    }
}

fn mcu(verb: &McuVerb, limits: &SafetyThresholds) -> RuleResult {
    let temperature = |what: &str, value: f64| {
        check_range(what, value, limits.min_temperature, limits.max_temperature, "°C")
    };
    match verb {
        McuVerb::SetTemperature { celsius } => temperature("Temperature", *celsius)?,
        McuVerb::SetUpperTemperature { celsius } => temperature("Upper temperature", *celsius)?,
        McuVerb::SetFanSpeed { level } => {
            if *level > limits.max_fan_speed {
                return Err(Refusal::validation(format!(
                    "Fan speed must be between 0 and {} (got {level})",
                    limits.max_fan_speed
                )));
            }
        }
        McuVerb::SetTestMode { mode } => {
            if *mode == 0 || *mode > limits.max_test_mode {
                return Err(Refusal::validation(format!(
                    "Test mode must be between 1 and {} (got {mode})",
                    limits.max_test_mode
                )));
            }
        }
        McuVerb::StartStandbyHeating {
            operating_celsius,
            standby_celsius,
            ..
        } => {
            temperature("Operating temperature", *operating_celsius)?;
            temperature("Standby temperature", *standby_celsius)?;
            if standby_celsius > operating_celsius {
                return Err(Refusal::validation(
                    "Standby temperature must not exceed the operating temperature",
                ));
            }
        }
        McuVerb::Connect
        | McuVerb::Disconnect
        | McuVerb::ReadStatus
        | McuVerb::ReadTemperature
        | McuVerb::WaitBootComplete
        | McuVerb::StartStandbyCooling => {}
    }
    Ok(None)
}

fn digital_io(verb: &DigitalIoVerb) -> RuleResult {
    match verb {
        DigitalIoVerb::WriteOutput { channel, on } => {
            if *channel >= DIO_CHANNELS {
                return Err(Refusal::validation(format!(
                    "Output channel must be between 0 and {} (got {channel})",
                    DIO_CHANNELS - 1
                )));
            }
            if TOWER_LAMP_CHANNELS.contains(channel) {
                let state = if *on { "ON" } else { "OFF" };
                return Ok(Some(Confirmation::warning(
                    "Tower Lamp",
                    format!("Switch tower lamp output {channel} {state}?"),
                )));
            }
            Ok(None)
        }
        DigitalIoVerb::ResetEmergency => Ok(Some(Confirmation::warning(
            "Reset Emergency Stop",
            "Make sure the cause of the emergency stop has been cleared. Reset?",
        ))),
        DigitalIoVerb::Connect
        | DigitalIoVerb::Disconnect
        | DigitalIoVerb::ReadStatus
        | DigitalIoVerb::AllOn
        | DigitalIoVerb::AllOff
        | DigitalIoVerb::ActivateEmergency => Ok(None),
    }
}

fn test(verb: &TestVerb, ctx: &SafetyContext<'_>) -> RuleResult {
    match verb {
        TestVerb::Start(start) => {
            let missing: Vec<&str> = PRE_TEST_COMPONENTS
                .iter()
                .filter(|kind| !ctx.is_connected(**kind))
                .map(|kind| kind.label())
                .collect();
            if !missing.is_empty() {
                return Err(Refusal::interlock(format!(
                    "Hardware not ready: {} not connected",
                    missing.join(", ")
                )));
            }
            if start.dut_serial_number.trim().is_empty() {
                return Err(Refusal::validation("DUT serial number is required"));
            }
            Ok(None)
        }
        TestVerb::Stop { test_id } => Ok(Some(Confirmation::warning(
            "Stop Test",
            format!("Stop test {test_id}? Collected data is kept."),
        ))),
        TestVerb::Cancel { test_id, .. } => Ok(Some(Confirmation::warning(
            "Cancel Test",
            format!("Cancel test {test_id}?"),
        ))),
        TestVerb::Pause { .. } | TestVerb::Resume { .. } | TestVerb::ReadStatus { .. } => Ok(None),
    }
}
