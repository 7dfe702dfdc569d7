//! End-to-end runs of the bench routines against a spawned simulated server.

use std::time::Duration;

use xpad::args::{LoadConfig, SaveConfigL};
use xpad::detector::{attr, CalibrationKind, TriggerMode};
use xpad::routines::{ping_report, save_dacl, snap_loop};
use xpad::{
    reasons, DevState, DeviceData, DeviceProxy, FailureReport, LimaDetector, PollConfig,
    ProxyConfig, TcpDeviceProxy, XpadDevice,
};
use xpad_sim::{DeviceServer, ServerConfig, ServerHandle, XpadModel};

fn spawn_server(model: XpadModel) -> ServerHandle {
    let config = ServerConfig::default()
        .with_bind("127.0.0.1:0")
        .with_model(model);
    DeviceServer::bind(&config).unwrap().spawn().unwrap()
}

fn connect(handle: &ServerHandle, device: &str) -> TcpDeviceProxy {
    let name = format!("tcp://{}/{}", handle.addr(), device);
    TcpDeviceProxy::connect_with(&name, &ProxyConfig::default()).unwrap()
}

fn poll() -> PollConfig {
    PollConfig::default().with_timeout(Duration::from_secs(10))
}

#[test]
fn test_snap_loop_over_tcp() {
    let server = spawn_server(XpadModel::ImxpadS540);
    let mut generic = connect(&server, "det/xpad/limaxpad-swing");

    let line = ping_report("xpad_generic", &mut generic).unwrap();
    assert!(line.starts_with("-> ping(xpad_generic)  "));
    assert!(line.ends_with("  us"));

    let mut detector = LimaDetector::new(generic);
    let summary = snap_loop(&mut detector, 3, Duration::from_millis(5), &poll()).unwrap();
    assert_eq!(summary.images, 3);
    assert_eq!(summary.last_frame_count, 1);

    assert_eq!(detector.state().unwrap(), DevState::Standby);
    assert_eq!(detector.exposure_time().unwrap(), Duration::from_millis(5));
    assert_eq!(detector.image_size().unwrap(), (560, 960));
    assert_eq!(detector.detector_model().unwrap(), "IMXPAD_S540");
}

#[test]
fn test_save_dacl_over_tcp() {
    let server = spawn_server(XpadModel::ImxpadS540);
    let mut xpad = XpadDevice::new(connect(&server, "det/xpad/xpad.1"));

    let row = SaveConfigL::uniform(4, 0, 0, 0, 34);
    let load = LoadConfig {
        module: 4,
        calib_id: 0,
    };
    save_dacl(&mut xpad, &row, load).unwrap();
    assert_eq!(xpad.state().unwrap(), DevState::Standby);
}

#[test]
fn test_load_config_failure_report() {
    let server = spawn_server(XpadModel::ImxpadS540);
    let mut xpad = XpadDevice::new(connect(&server, "det/xpad/xpad-swing"));

    let err = xpad
        .load_config(LoadConfig {
            module: 4,
            calib_id: 9,
        })
        .unwrap_err();
    assert_eq!(err.errors.len(), 2);
    assert_eq!(err.reason(), Some(reasons::INVALID_PARAMETER));
    assert!(err.has_reason(reasons::COMMAND_FAILED));

    let report = FailureReport(&err).to_string();
    assert!(report.starts_with("Failed with exception ! DevFailed"));
    assert_eq!(report.matches("------- ERROR ELEMENT -------").count(), 2);
    assert!(report.contains("XpadSpecific::LoadConfig"));
}

#[test]
fn test_module_outside_smaller_detector() {
    let server = spawn_server(XpadModel::ImxpadS140);
    let mut xpad = XpadDevice::new(connect(&server, "det/xpad/xpad-swing"));

    let err = xpad
        .save_config_l(&SaveConfigL::uniform(4, 0, 0, 0, 34))
        .unwrap_err();
    assert_eq!(err.reason(), Some(reasons::INVALID_PARAMETER));
    assert!(err.errors[0].desc.contains("module 4"));
}

#[test]
fn test_unknown_device_and_attribute() {
    let server = spawn_server(XpadModel::ImxpadS70);

    let name = format!("tcp://{}/det/xpad/missing", server.addr());
    let err = TcpDeviceProxy::connect_with(&name, &ProxyConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.reason(), Some(reasons::DEVICE_NOT_DEFINED));

    let mut generic = connect(&server, "det/xpad/limaxpad-swing");
    let err = generic.read_attribute("noSuchAttribute").unwrap_err();
    assert_eq!(err.reason(), Some(reasons::ATTR_NOT_FOUND));
    let err = generic
        .write_attribute(attr::CURRENT_FRAME, DeviceData::Long(3))
        .unwrap_err();
    assert_eq!(err.reason(), Some(reasons::ATTR_NOT_WRITABLE));
}

#[test]
fn test_live_acquisition_stop() {
    let server = spawn_server(XpadModel::ImxpadS70);
    let mut detector = LimaDetector::new(connect(&server, "det/xpad/limaxpad-swing"));

    detector.set_exposure_time(Duration::from_millis(2)).unwrap();
    detector.set_trigger_mode(TriggerMode::InternalSingle).unwrap();
    detector.start().unwrap();
    assert_eq!(detector.state().unwrap(), DevState::Running);

    std::thread::sleep(Duration::from_millis(50));
    detector.stop().unwrap();
    assert_eq!(detector.state().unwrap(), DevState::Standby);
    assert!(detector.acquired_frames().unwrap() >= 1);
}

#[test]
fn test_calibration_round_trip_over_tcp() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("otn_slow");
    let path = path.to_str().unwrap();

    let server = spawn_server(XpadModel::ImxpadS70);
    let mut xpad = XpadDevice::new(connect(&server, "det/xpad/xpad-swing"));

    xpad.calibrate(CalibrationKind::OtnSlow, path).unwrap();
    let state = xpad::wait_while_state(xpad.proxy(), DevState::Running, &poll()).unwrap();
    assert_eq!(state, DevState::Standby);

    let err = xpad.calibrate(CalibrationKind::OtnSlow, path).unwrap_err();
    assert_eq!(err.reason(), Some(reasons::INVALID_PARAMETER));

    xpad.upload_calibration(path).unwrap();
    let state = xpad::wait_while_state(xpad.proxy(), DevState::Running, &poll()).unwrap();
    assert_eq!(state, DevState::Standby);
}
