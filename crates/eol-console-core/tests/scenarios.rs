//! Operator scenarios driven through a session backed by the demo server

mod common;

use std::time::Duration;

use common::{entries_at, rig, session_with};
use eol_console_core::command::{CommandError, TestStart};
use eol_console_core::demo::DemoHardware;
use eol_console_core::host::ConfirmationResponse;
use eol_console_core::mirror::{ComponentKind, MotionStatus};
use eol_console_core::oplog::LogLevel;
use eol_console_core::panels::PanelId;
use eol_console_core::poller::{PollRate, PollTarget};
use eol_console_core::safety::ConfirmLevel;
use eol_console_core::transport::{BusConnectionState, BusEvent, BusMessage, HttpMethod, Topic};
use pretty_assertions::assert_eq;
use serde_json::json;

const ROBOT: PollTarget = PollTarget::Component(ComponentKind::Robot);

fn servo_ready() -> DemoHardware {
    let demo = DemoHardware::seeded(11).without_noise().all_connected();
    demo.update(|s| s.robot.servo_enabled = true);
    demo
}

fn robot_motion(session: &common::Session) -> Option<MotionStatus> {
    session
        .mirror()
        .get(ComponentKind::Robot)
        .and_then(|c| c.robot())
        .map(|r| r.motion)
}

#[tokio::test(start_paused = true)]
async fn test_robot_homing_happy_path() {
    let s = session_with(servo_ready());
    s.activate_panel(PanelId::Robot).await;
    s.set_active_view(Some(PanelId::Robot));
    assert_eq!(robot_motion(&s), Some(MotionStatus::Idle));
    assert_eq!(s.scheduler().rate(ROBOT), Some(PollRate::Idle));

    let home = s.panels().robot.home();
    s.execute(home).await.unwrap();

    let posts = s.api().http().requests_to(HttpMethod::Post, "home-axis");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].body, Some(json!({"axis_id": 0})));
    assert_eq!(s.modal().asked.borrow().len(), 1);
    assert_eq!(s.modal().asked.borrow()[0].level, ConfirmLevel::Warning);

    assert_eq!(robot_motion(&s), Some(MotionStatus::Homing));
    assert_eq!(s.scheduler().rate(ROBOT), Some(PollRate::Active));
    assert_eq!(s.scheduler().interval(ROBOT), Some(Duration::from_millis(250)));

    // The first status answer reports the axis settled
    tokio::time::advance(Duration::from_millis(250)).await;
    assert_eq!(s.run_due_ticks().await, 1);
    assert_eq!(robot_motion(&s), Some(MotionStatus::Idle));
    assert_eq!(s.scheduler().rate(ROBOT), Some(PollRate::Idle));
    assert_eq!(s.scheduler().interval(ROBOT), Some(Duration::from_millis(1000)));
}

#[tokio::test]
async fn test_power_enable_above_thresholds_needs_acknowledgement() {
    let demo = DemoHardware::seeded(12).without_noise().all_connected();
    demo.update(|s| s.power.forced_reading = Some((18.0, 0.2)));
    let s = session_with(demo);
    s.activate_panel(PanelId::Power).await;

    // Confirming without ticking "I understand" counts as declining
    s.modal().answer(ConfirmationResponse::Confirmed { acknowledged: false });
    let enable = s.panels().power.enable_output();
    let err = s.execute(enable).await.unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));
    assert_eq!(s.api().http().count(HttpMethod::Post, "enable-output"), 0);

    let enable = s.panels().power.enable_output();
    s.execute(enable).await.unwrap();
    let asked = s.modal().asked.borrow().clone();
    assert_eq!(asked.len(), 2);
    assert!(asked.iter().all(|r| r.level == ConfirmLevel::Error && r.require_acknowledgement));
    assert_eq!(s.api().http().count(HttpMethod::Post, "enable-output"), 1);

    let enabled = s
        .mirror()
        .get(ComponentKind::Power)
        .and_then(|c| c.power())
        .map(|p| p.output_enabled);
    assert_eq!(enabled, Some(true));
    assert!(entries_at(&s, PanelId::Power, LogLevel::Warning)
        .iter()
        .any(|m| m == "Power output ENABLED"));
}

#[tokio::test]
async fn test_all_on_refused_during_emergency() {
    let s = rig();
    s.activate_panel(PanelId::DigitalIo).await;
    s.activate_panel(PanelId::Dashboard).await;
    s.handle_message(&BusMessage::on(Topic::EmergencyStatus, json!({"active": true})));
    assert!(s.mirror().emergency_active());

    let safety_before = entries_at(&s, PanelId::DigitalIo, LogLevel::Safety).len();
    let outputs_before = s
        .mirror()
        .get(ComponentKind::DigitalIo)
        .and_then(|c| c.digital_io())
        .map(|d| d.outputs);
    let requests_before = s.api().http().requests().len();

    let all_on = s.panels().digital_io.all_on();
    let err = s.execute(all_on).await.unwrap_err();
    assert!(matches!(err, CommandError::SafetyRefusal { .. }));

    assert_eq!(s.api().http().requests().len(), requests_before);
    assert_eq!(
        entries_at(&s, PanelId::DigitalIo, LogLevel::Safety).len(),
        safety_before + 1
    );
    let outputs_after = s
        .mirror()
        .get(ComponentKind::DigitalIo)
        .and_then(|c| c.digital_io())
        .map(|d| d.outputs);
    assert_eq!(outputs_after, outputs_before);
}

#[tokio::test]
async fn test_reconnect_resubscribes_and_refreshes() {
    let s = rig();
    s.activate_panel(PanelId::Robot).await;
    let topics = s.bus().active_topics();
    assert!(!topics.is_empty());
    let status_reads = s.api().http().count(HttpMethod::Get, "robot/status");

    s.bus().set_state(BusConnectionState::Disconnected);
    s.handle_bus_event(BusEvent::Connection(BusConnectionState::Disconnected))
        .await;
    assert!(!s.mirror().is_connected(ComponentKind::Robot));
    assert!(s.bus().active_topics().is_empty());

    s.bus().set_state(BusConnectionState::Connected);
    s.handle_bus_event(BusEvent::Connection(BusConnectionState::Connected))
        .await;

    assert_eq!(s.bus().active_topics(), topics);
    assert_eq!(
        s.api().http().count(HttpMethod::Get, "robot/status"),
        status_reads + 1
    );
    assert!(s.mirror().is_connected(ComponentKind::Robot));
    assert!(entries_at(&s, PanelId::Dashboard, LogLevel::Warning)
        .iter()
        .any(|m| m.contains("lost")));
}

#[tokio::test(start_paused = true)]
async fn test_second_motion_is_busy_while_first_runs() {
    let s = session_with(servo_ready());
    s.activate_panel(PanelId::Robot).await;
    s.api().http().set_latency(Duration::from_millis(50));

    let absolute = s.panels().robot.move_absolute(100.0);
    let relative = s.panels().robot.move_relative(5.0);
    let (first, second) = tokio::join!(s.execute(absolute), s.execute(relative));

    assert!(first.is_ok());
    assert!(matches!(second, Err(CommandError::Busy { .. })));
    assert_eq!(s.api().http().count(HttpMethod::Post, "move-"), 1);
    assert_eq!(
        s.api().http().count(HttpMethod::Post, "move-absolute"),
        1
    );
}

#[tokio::test]
async fn test_test_run_to_completion() {
    let s = rig();
    s.activate_panel(PanelId::EolTest).await;
    let start = s.panels().eol_test.start(TestStart {
        dut_serial_number: "SN-42".into(),
        ..Default::default()
    });
    s.execute(start).await.unwrap();
    assert!(s.panels().eol_test.lifecycle().is_active());

    for _ in 0..4 {
        let Some(read) = s.panels().eol_test.read_status() else {
            break;
        };
        s.execute(read).await.unwrap();
    }
    assert_eq!(s.panels().eol_test.passed(), Some(true));
    assert!(!s.panels().eol_test.lifecycle().is_active());
}

#[tokio::test]
async fn test_start_refused_after_component_drops_out() {
    let s = rig();
    s.activate_panel(PanelId::EolTest).await;
    assert_eq!(s.view().enabled.borrow().get("eol_test-start-btn"), Some(&true));

    s.handle_message(&BusMessage::on(
        Topic::Status(ComponentKind::Loadcell),
        json!({"connected": false}),
    ));
    assert!(!s.mirror().is_connected(ComponentKind::Loadcell));
    assert_eq!(s.view().enabled.borrow().get("eol_test-start-btn"), Some(&false));

    let start = s.panels().eol_test.start(TestStart {
        dut_serial_number: "SN-43".into(),
        ..Default::default()
    });
    let err = s.execute(start).await.unwrap_err();
    assert!(matches!(err, CommandError::SafetyRefusal { .. }));
    assert_eq!(s.api().http().count(HttpMethod::Post, "eol-force-test"), 0);

    // The aggregate frame counts too
    s.handle_message(&BusMessage::on(
        Topic::HardwareStatus,
        json!({"robot": true, "power": true, "loadcell": true, "mcu": false}),
    ));
    assert!(s.mirror().is_connected(ComponentKind::Loadcell));
    assert!(!s.mirror().is_connected(ComponentKind::Mcu));
    assert_eq!(s.view().enabled.borrow().get("eol_test-start-btn"), Some(&false));
}
