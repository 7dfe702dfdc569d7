//! Device classes served on top of the simulated camera.
//!
//! Two devices share one [`XpadCamera`]: the generic detector device
//! ([`GenericDetector`]) and the model specific device ([`XpadSpecific`]).
//! Both answer the same [`DeviceHandler`] calls and report the camera status
//! as a device state.
//!
//! A command failing inside the camera carries two records: the camera's own
//! record first, then one naming the device command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use xpad::args::{CommandArgs, LoadAllConfigG, LoadConfig, LoadConfigG, SaveConfigG, SaveConfigL};
use xpad::detector::{attr, cmd, AcquisitionType, CalibrationKind, TriggerMode};
use xpad::wire::Call;
use xpad::{reasons, DevFailed, DevResult, DevState, DeviceData};

use crate::camera::{Status, XpadCamera, DETECTOR_TYPE};

/// Server side of one device.
pub trait DeviceHandler: Send {
    /// Class name used as the origin of failure records.
    fn class_name(&self) -> &'static str;

    fn state(&self) -> DevState;

    fn status(&self) -> String;

    fn read_attribute(&mut self, name: &str) -> DevResult<DeviceData>;

    fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()>;

    fn command(&mut self, name: &str, arg: DeviceData) -> DevResult<DeviceData>;
}

/// Run one call against a device.
pub fn dispatch(device: &mut dyn DeviceHandler, call: Call) -> DevResult<DeviceData> {
    match call {
        Call::Ping => Ok(DeviceData::Void),
        Call::State => Ok(DeviceData::State(device.state())),
        Call::Status => Ok(DeviceData::String(device.status())),
        Call::ReadAttribute { name } => device.read_attribute(&name),
        Call::WriteAttribute { name, value } => {
            device.write_attribute(&name, value)?;
            Ok(DeviceData::Void)
        }
        Call::Command { name, .. } if name.eq_ignore_ascii_case("State") => {
            Ok(DeviceData::State(device.state()))
        }
        Call::Command { name, .. } if name.eq_ignore_ascii_case("Status") => {
            Ok(DeviceData::String(device.status()))
        }
        Call::Command { name, arg } => device.command(&name, arg),
    }
}

/// Device state reported for a camera status.
pub fn camera_state(status: Status) -> DevState {
    match status {
        Status::Ready => DevState::Standby,
        Status::Exposure | Status::Readout | Status::Calibrating => DevState::Running,
        Status::Fault => DevState::Fault,
    }
}

fn camera_status(camera: &XpadCamera) -> String {
    match camera.status() {
        Status::Ready => "Waiting for request".to_string(),
        Status::Exposure => "Acquisition running".to_string(),
        Status::Readout => "Reading out images".to_string(),
        Status::Calibrating => "Calibration running".to_string(),
        Status::Fault => format!(
            "Camera in fault: {}",
            camera.last_error().unwrap_or_default()
        ),
    }
}

fn attribute_not_found(class: &str, name: &str) -> DevFailed {
    DevFailed::new(
        reasons::ATTR_NOT_FOUND,
        format!("Attribute {name} not found"),
        format!("{class}::read_attribute"),
    )
}

fn attribute_not_writable(class: &str, name: &str) -> DevFailed {
    DevFailed::new(
        reasons::ATTR_NOT_WRITABLE,
        format!("Attribute {name} is read only"),
        format!("{class}::write_attribute"),
    )
}

fn command_not_found(class: &str, name: &str) -> DevFailed {
    DevFailed::new(
        reasons::COMMAND_NOT_FOUND,
        format!("Command {name} not found"),
        format!("{class}::command"),
    )
}

fn command_failed(failure: DevFailed, class: &str, device: &str, command: &str) -> DevFailed {
    failure.rethrow(
        reasons::COMMAND_FAILED,
        format!("Failed to execute {command} on device {device}"),
        format!("{class}::{command}"),
    )
}

/// Accept a Long where a Double is expected.
fn number(value: &DeviceData) -> DevResult<f64> {
    match value {
        DeviceData::Long(v) => Ok(*v as f64),
        other => other.as_double(),
    }
}

fn unsigned(value: &DeviceData, what: &str) -> DevResult<u32> {
    let v = value.as_long()?;
    u32::try_from(v).map_err(|_| {
        DevFailed::new(
            reasons::INVALID_PARAMETER,
            format!("{what} = {v} is outside 0..={}", u32::MAX),
            "devices::unsigned",
        )
    })
}

fn unsigned_array(value: &DeviceData, what: &str) -> DevResult<Vec<u32>> {
    value
        .as_long_array()?
        .iter()
        .map(|&v| unsigned(&DeviceData::Long(v), what))
        .collect()
}

/// Generic detector device: exposure, frames, snap and acquisition state.
pub struct GenericDetector {
    name: String,
    camera: Arc<XpadCamera>,
}

impl GenericDetector {
    pub const CLASS: &'static str = "GenericDetector";

    pub fn new(name: impl Into<String>, camera: Arc<XpadCamera>) -> Self {
        Self {
            name: name.into(),
            camera,
        }
    }
}

impl DeviceHandler for GenericDetector {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn state(&self) -> DevState {
        camera_state(self.camera.status())
    }

    fn status(&self) -> String {
        camera_status(&self.camera)
    }

    fn read_attribute(&mut self, name: &str) -> DevResult<DeviceData> {
        let camera = &self.camera;
        let value = match name {
            attr::EXPOSURE_TIME => DeviceData::Double(camera.exposure_time().as_secs_f64() * 1e3),
            attr::NB_FRAMES => DeviceData::Long(camera.nb_frames() as i64),
            attr::TRIGGER_MODE => DeviceData::String(camera.trigger_mode().to_string()),
            attr::PIXEL_DEPTH => DeviceData::Long(camera.pixel_depth() as i64),
            attr::DETECTOR_TYPE => DeviceData::from(DETECTOR_TYPE),
            attr::DETECTOR_MODEL => DeviceData::String(camera.model().to_string()),
            attr::DETECTOR_WIDTH => DeviceData::Long(camera.image_size().0 as i64),
            attr::DETECTOR_HEIGHT => DeviceData::Long(camera.image_size().1 as i64),
            attr::CURRENT_FRAME => DeviceData::Long(camera.acquired_frames() as i64),
            _ => return Err(attribute_not_found(Self::CLASS, name)),
        };
        Ok(value)
    }

    fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()> {
        let camera = &self.camera;
        match name {
            attr::EXPOSURE_TIME => {
                let ms = number(&value)?;
                let exposure = Duration::try_from_secs_f64(ms / 1e3).map_err(|e| {
                    DevFailed::new(
                        reasons::INVALID_PARAMETER,
                        format!("exposureTime = {ms} ms is not a valid exposure: {e}"),
                        "GenericDetector::write_attribute",
                    )
                })?;
                camera.set_exposure_time(exposure)?;
            }
            attr::NB_FRAMES => camera.set_nb_frames(unsigned(&value, name)?)?,
            attr::TRIGGER_MODE => {
                let text = value.as_str()?;
                let mode: TriggerMode = text.parse().map_err(|_| {
                    DevFailed::new(
                        reasons::INVALID_PARAMETER,
                        format!("Unknown trigger mode '{text}'"),
                        "GenericDetector::write_attribute",
                    )
                })?;
                camera.set_trigger_mode(mode)?;
            }
            attr::PIXEL_DEPTH => camera.set_pixel_depth(unsigned(&value, name)?)?,
            attr::DETECTOR_TYPE
            | attr::DETECTOR_MODEL
            | attr::DETECTOR_WIDTH
            | attr::DETECTOR_HEIGHT
            | attr::CURRENT_FRAME => return Err(attribute_not_writable(Self::CLASS, name)),
            _ => return Err(attribute_not_found(Self::CLASS, name)),
        }
        Ok(())
    }

    fn command(&mut self, name: &str, _arg: DeviceData) -> DevResult<DeviceData> {
        let result = match name {
            cmd::SNAP => self.camera.start(),
            cmd::START => self.camera.start_live(),
            cmd::STOP => self.camera.stop(),
            _ => return Err(command_not_found(Self::CLASS, name)),
        };
        result
            .map(|_| DeviceData::Void)
            .map_err(|e| command_failed(e.into(), Self::CLASS, &self.name, name))
    }
}

/// Model specific XPAD device: chip configuration, calibrations and timing.
pub struct XpadSpecific {
    name: String,
    camera: Arc<XpadCamera>,
}

impl XpadSpecific {
    pub const CLASS: &'static str = "XpadSpecific";

    pub fn new(name: impl Into<String>, camera: Arc<XpadCamera>) -> Self {
        Self {
            name: name.into(),
            camera,
        }
    }

    fn run(&self, name: &str, arg: &DeviceData) -> DevResult<()> {
        let camera = &self.camera;
        match name {
            cmd::SAVE_CONFIG_L => {
                camera.save_config_l(&SaveConfigL::from_args(arg.as_long_array()?)?)?
            }
            cmd::SAVE_CONFIG_G => {
                camera.save_config_g(&SaveConfigG::from_args(arg.as_long_array()?)?)?
            }
            cmd::LOAD_CONFIG => camera.load_config(LoadConfig::from_args(arg.as_long_array()?)?)?,
            cmd::LOAD_FLAT_CONFIG => camera.load_flat_config(unsigned(arg, name)?)?,
            cmd::LOAD_ALL_CONFIG_G => {
                camera.load_all_config_g(&LoadAllConfigG::from_args(arg.as_long_array()?)?)?
            }
            cmd::LOAD_CONFIG_G => {
                camera.load_config_g(LoadConfigG::from_args(arg.as_long_array()?)?)?
            }
            cmd::LOAD_AUTO_TEST => camera.load_auto_test(unsigned(arg, name)?)?,
            cmd::RESET => camera.reset()?,
            cmd::CALIBRATE_OTN_SLOW => {
                camera.calibrate(CalibrationKind::OtnSlow, Path::new(arg.as_str()?))?
            }
            cmd::CALIBRATE_OTN_MEDIUM => {
                camera.calibrate(CalibrationKind::OtnMedium, Path::new(arg.as_str()?))?
            }
            cmd::CALIBRATE_OTN_HIGH => {
                camera.calibrate(CalibrationKind::OtnHigh, Path::new(arg.as_str()?))?
            }
            cmd::UPLOAD_CALIBRATION => camera.upload_calibration(Path::new(arg.as_str()?))?,
            cmd::UPLOAD_WAIT_TIMES => camera.upload_wait_times(&unsigned_array(arg, name)?)?,
            cmd::INCREMENT_ITHL => camera.increment_ithl()?,
            cmd::DECREMENT_ITHL => camera.decrement_ithl()?,
            _ => return Err(command_not_found(Self::CLASS, name)),
        }
        Ok(())
    }

    fn is_command(name: &str) -> bool {
        [
            cmd::SAVE_CONFIG_L,
            cmd::SAVE_CONFIG_G,
            cmd::LOAD_CONFIG,
            cmd::LOAD_FLAT_CONFIG,
            cmd::LOAD_ALL_CONFIG_G,
            cmd::LOAD_CONFIG_G,
            cmd::LOAD_AUTO_TEST,
            cmd::RESET,
            cmd::CALIBRATE_OTN_SLOW,
            cmd::CALIBRATE_OTN_MEDIUM,
            cmd::CALIBRATE_OTN_HIGH,
            cmd::UPLOAD_CALIBRATION,
            cmd::UPLOAD_WAIT_TIMES,
            cmd::INCREMENT_ITHL,
            cmd::DECREMENT_ITHL,
        ]
        .contains(&name)
    }
}

impl DeviceHandler for XpadSpecific {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn state(&self) -> DevState {
        camera_state(self.camera.status())
    }

    fn status(&self) -> String {
        camera_status(&self.camera)
    }

    fn read_attribute(&mut self, name: &str) -> DevResult<DeviceData> {
        let camera = &self.camera;
        let params = camera.specific_parameters();
        let value = match name {
            attr::ACQUISITION_TYPE => DeviceData::Long(camera.acquisition_type() as i64),
            attr::DEAD_TIME => DeviceData::Long(params.dead_time_us as i64),
            attr::INIT_TIME => DeviceData::Long(params.init_time_us as i64),
            attr::SHUTTER_TIME => DeviceData::Long(params.shutter_time_us as i64),
            attr::OVERFLOW_TIME => DeviceData::Long(params.overflow_time_us as i64),
            attr::GEOM_CORRECTION => DeviceData::Bool(params.geom_correction),
            attr::CALIBRATION_ADJUSTING_NUMBER => {
                DeviceData::Long(camera.calibration_adjusting_number() as i64)
            }
            _ => return Err(attribute_not_found(Self::CLASS, name)),
        };
        Ok(value)
    }

    fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()> {
        let camera = &self.camera;
        let mut params = camera.specific_parameters();
        match name {
            attr::ACQUISITION_TYPE => {
                let code = value.as_long()?;
                let acq = AcquisitionType::from_code(code).ok_or_else(|| {
                    DevFailed::new(
                        reasons::INVALID_PARAMETER,
                        format!("Unknown acquisition type {code} (0 = SYNC, 1 = ASYNC)"),
                        "XpadSpecific::write_attribute",
                    )
                })?;
                return Ok(camera.set_acquisition_type(acq)?);
            }
            attr::CALIBRATION_ADJUSTING_NUMBER => {
                return Ok(camera.set_calibration_adjusting_number(unsigned(&value, name)?)?);
            }
            attr::DEAD_TIME => params.dead_time_us = unsigned(&value, name)?,
            attr::INIT_TIME => params.init_time_us = unsigned(&value, name)?,
            attr::SHUTTER_TIME => params.shutter_time_us = unsigned(&value, name)?,
            attr::OVERFLOW_TIME => params.overflow_time_us = unsigned(&value, name)?,
            attr::GEOM_CORRECTION => params.geom_correction = value.as_bool()?,
            _ => return Err(attribute_not_found(Self::CLASS, name)),
        }
        Ok(camera.set_specific_parameters(params)?)
    }

    fn command(&mut self, name: &str, arg: DeviceData) -> DevResult<DeviceData> {
        // unknown commands fail with a single record
        if !Self::is_command(name) {
            return Err(command_not_found(Self::CLASS, name));
        }
        self.run(name, &arg)
            .map(|_| DeviceData::Void)
            .map_err(|e| command_failed(e, Self::CLASS, &self.name, name))
    }
}
