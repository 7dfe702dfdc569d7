//! Typed wrappers over a [`DeviceProxy`] for the two XPAD device classes.
//!
//! - [`LimaDetector`] drives the generic detector device: exposure, frame
//!   count, snap, stop and acquisition state.
//! - [`XpadDevice`] drives the model specific device: detector RAM
//!   configuration, calibrations and threshold tuning.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use xpad::{LimaDetector, PollConfig, TcpDeviceProxy};
//!
//! let proxy = TcpDeviceProxy::connect("det/xpad/limaxpad-swing")?;
//! let mut det = LimaDetector::new(proxy);
//! det.set_exposure_time(Duration::from_millis(100))?;
//! det.snap()?;
//! det.wait_end_acquisition(&PollConfig::default())?;
//! # Ok::<(), xpad::DevFailed>(())
//! ```

use std::time::Duration;

use strum::{Display, EnumIter, EnumString};
use tracing::{debug, info};

use crate::args::{
    CommandArgs, LoadAllConfigG, LoadConfig, LoadConfigG, SaveConfigG, SaveConfigL,
};
use crate::failure::{reasons, DevFailed, DevResult};
use crate::poll::{wait_while_state, PollConfig};
use crate::proxy::{DevState, DeviceData, DeviceName, DeviceProxy};

/// Attribute names of the generic detector device.
pub mod attr {
    pub const EXPOSURE_TIME: &str = "exposureTime";
    pub const NB_FRAMES: &str = "nbFrames";
    pub const TRIGGER_MODE: &str = "triggerMode";
    pub const PIXEL_DEPTH: &str = "pixelDepth";
    pub const DETECTOR_TYPE: &str = "detectorType";
    pub const DETECTOR_MODEL: &str = "detectorModel";
    pub const DETECTOR_WIDTH: &str = "detectorWidth";
    pub const DETECTOR_HEIGHT: &str = "detectorHeight";
    pub const CURRENT_FRAME: &str = "currentFrame";

    // Model specific device
    pub const ACQUISITION_TYPE: &str = "acquisitionType";
    pub const DEAD_TIME: &str = "deadTime";
    pub const INIT_TIME: &str = "initTime";
    pub const SHUTTER_TIME: &str = "shutterTime";
    pub const OVERFLOW_TIME: &str = "overflowTime";
    pub const GEOM_CORRECTION: &str = "geomCorrection";
    pub const CALIBRATION_ADJUSTING_NUMBER: &str = "calibrationAdjustingNumber";
}

/// Command names of both device classes.
pub mod cmd {
    pub const SNAP: &str = "Snap";
    pub const START: &str = "Start";
    pub const STOP: &str = "Stop";

    pub const SAVE_CONFIG_L: &str = "SaveConfigL";
    pub const SAVE_CONFIG_G: &str = "SaveConfigG";
    pub const LOAD_CONFIG: &str = "LoadConfig";
    pub const LOAD_FLAT_CONFIG: &str = "LoadFlatConfig";
    pub const LOAD_ALL_CONFIG_G: &str = "LoadAllConfigG";
    pub const LOAD_CONFIG_G: &str = "LoadConfigG";
    pub const LOAD_AUTO_TEST: &str = "LoadAutoTest";
    pub const RESET: &str = "Reset";
    pub const CALIBRATE_OTN_SLOW: &str = "CalibrateOTNSlow";
    pub const CALIBRATE_OTN_MEDIUM: &str = "CalibrateOTNMedium";
    pub const CALIBRATE_OTN_HIGH: &str = "CalibrateOTNHigh";
    pub const UPLOAD_CALIBRATION: &str = "UploadCalibration";
    pub const UPLOAD_WAIT_TIMES: &str = "UploadWaitTimes";
    pub const INCREMENT_ITHL: &str = "IncrementITHL";
    pub const DECREMENT_ITHL: &str = "DecrementITHL";
}

/// Trigger modes understood by the generic detector device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerMode {
    /// Software start, internal gates
    InternalSingle = 0,
    /// External gate defines each exposure
    ExternalGate = 1,
    /// One external trigger starts N internal gates
    ExternalSingle = 2,
    /// N external triggers start N internal gates
    ExternalMulti = 3,
}

impl TriggerMode {
    /// Code programmed into the detector.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Over-the-noise calibration speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CalibrationKind {
    OtnSlow,
    OtnMedium,
    OtnHigh,
}

impl CalibrationKind {
    pub fn command(self) -> &'static str {
        match self {
            CalibrationKind::OtnSlow => cmd::CALIBRATE_OTN_SLOW,
            CalibrationKind::OtnMedium => cmd::CALIBRATE_OTN_MEDIUM,
            CalibrationKind::OtnHigh => cmd::CALIBRATE_OTN_HIGH,
        }
    }
}

/// Frame transfer mode of the model specific device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AcquisitionType {
    /// All frames acquired, then read out
    Sync = 0,
    /// Frames read out as they are acquired
    Async = 1,
}

impl AcquisitionType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AcquisitionType::Sync),
            1 => Some(AcquisitionType::Async),
            _ => None,
        }
    }
}

fn non_negative(value: i64, what: &str, origin: &str) -> DevResult<u64> {
    u64::try_from(value).map_err(|_| {
        DevFailed::new(
            reasons::INVALID_PARAMETER,
            format!("{what} cannot be negative ({value})"),
            origin,
        )
    })
}

/// Generic detector device.
pub struct LimaDetector<P> {
    proxy: P,
}

impl<P: DeviceProxy> LimaDetector<P> {
    pub fn new(proxy: P) -> Self {
        Self { proxy }
    }

    pub fn name(&self) -> &DeviceName {
        self.proxy.name()
    }

    pub fn proxy(&mut self) -> &mut P {
        &mut self.proxy
    }

    pub fn into_inner(self) -> P {
        self.proxy
    }

    pub fn ping(&mut self) -> DevResult<Duration> {
        self.proxy.ping()
    }

    pub fn state(&mut self) -> DevResult<DevState> {
        self.proxy.state()
    }

    /// Set the exposure time (written in milliseconds).
    pub fn set_exposure_time(&mut self, exposure: Duration) -> DevResult<()> {
        let ms = exposure.as_secs_f64() * 1e3;
        debug!("{}: exposureTime = {} ms", self.name(), ms);
        self.proxy
            .write_attribute(attr::EXPOSURE_TIME, DeviceData::Double(ms))
    }

    pub fn exposure_time(&mut self) -> DevResult<Duration> {
        let ms = self.proxy.read_attribute(attr::EXPOSURE_TIME)?.as_double()?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(DevFailed::new(
                reasons::INVALID_PARAMETER,
                format!("Device reported exposure time {ms} ms"),
                "LimaDetector::exposure_time",
            ));
        }
        Ok(Duration::from_secs_f64(ms / 1e3))
    }

    /// Frames per acquisition; 0 acquires until stopped.
    pub fn set_nb_frames(&mut self, nb_frames: u32) -> DevResult<()> {
        self.proxy
            .write_attribute(attr::NB_FRAMES, DeviceData::Long(nb_frames as i64))
    }

    pub fn nb_frames(&mut self) -> DevResult<u32> {
        let value = self.proxy.read_attribute(attr::NB_FRAMES)?.as_long()?;
        let value = non_negative(value, "nbFrames", "LimaDetector::nb_frames")?;
        Ok(value as u32)
    }

    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> DevResult<()> {
        self.proxy
            .write_attribute(attr::TRIGGER_MODE, DeviceData::String(mode.to_string()))
    }

    pub fn trigger_mode(&mut self) -> DevResult<TriggerMode> {
        let value = self.proxy.read_attribute(attr::TRIGGER_MODE)?;
        let text = value.as_str()?;
        text.parse().map_err(|_| {
            DevFailed::new(
                reasons::INCOMPATIBLE_ARGUMENT,
                format!("Unknown trigger mode '{text}'"),
                "LimaDetector::trigger_mode",
            )
        })
    }

    /// Detector image size in pixels, `(width, height)`.
    pub fn image_size(&mut self) -> DevResult<(u32, u32)> {
        let width = self.proxy.read_attribute(attr::DETECTOR_WIDTH)?.as_long()?;
        let height = self.proxy.read_attribute(attr::DETECTOR_HEIGHT)?.as_long()?;
        let origin = "LimaDetector::image_size";
        Ok((
            non_negative(width, "detectorWidth", origin)? as u32,
            non_negative(height, "detectorHeight", origin)? as u32,
        ))
    }

    pub fn detector_model(&mut self) -> DevResult<String> {
        Ok(self
            .proxy
            .read_attribute(attr::DETECTOR_MODEL)?
            .as_str()?
            .to_string())
    }

    /// Frames published by the last acquisition.
    pub fn acquired_frames(&mut self) -> DevResult<u64> {
        let value = self.proxy.read_attribute(attr::CURRENT_FRAME)?.as_long()?;
        non_negative(value, "currentFrame", "LimaDetector::acquired_frames")
    }

    /// Acquire `nbFrames` images.
    pub fn snap(&mut self) -> DevResult<()> {
        self.proxy.command(cmd::SNAP)?;
        Ok(())
    }

    /// Start a live acquisition.
    pub fn start(&mut self) -> DevResult<()> {
        self.proxy.command(cmd::START)?;
        Ok(())
    }

    pub fn stop(&mut self) -> DevResult<()> {
        self.proxy.command(cmd::STOP)?;
        Ok(())
    }

    /// Wait for the device to leave `RUNNING`; returns the state it settled in.
    pub fn wait_end_acquisition(&mut self, poll: &PollConfig) -> DevResult<DevState> {
        let state = wait_while_state(&mut self.proxy, DevState::Running, poll)?;
        if state == DevState::Fault {
            let status = self.proxy.status().unwrap_or_default();
            return Err(DevFailed::new(
                reasons::HARDWARE_ERROR,
                format!("Acquisition ended in FAULT: {status}"),
                "LimaDetector::wait_end_acquisition",
            ));
        }
        Ok(state)
    }
}

/// Model specific XPAD device.
pub struct XpadDevice<P> {
    proxy: P,
}

impl<P: DeviceProxy> XpadDevice<P> {
    pub fn new(proxy: P) -> Self {
        Self { proxy }
    }

    pub fn name(&self) -> &DeviceName {
        self.proxy.name()
    }

    pub fn proxy(&mut self) -> &mut P {
        &mut self.proxy
    }

    pub fn into_inner(self) -> P {
        self.proxy
    }

    pub fn ping(&mut self) -> DevResult<Duration> {
        self.proxy.ping()
    }

    pub fn state(&mut self) -> DevResult<DevState> {
        self.proxy.state()
    }

    fn send<A: CommandArgs>(&mut self, args: &A) -> DevResult<()> {
        self.proxy
            .command_inout(A::COMMAND, DeviceData::LongArray(args.to_args()))?;
        Ok(())
    }

    /// Save one DACL row into a calibration slot of the detector RAM.
    pub fn save_config_l(&mut self, row: &SaveConfigL) -> DevResult<()> {
        info!(
            "{}: SaveConfigL module={} calib={} chip={} row={}",
            self.name(),
            row.module,
            row.calib_id,
            row.chip,
            row.row
        );
        self.send(row)
    }

    pub fn save_config_g(&mut self, save: &SaveConfigG) -> DevResult<()> {
        self.send(save)
    }

    /// Load a saved calibration slot into the detector chips.
    pub fn load_config(&mut self, load: LoadConfig) -> DevResult<()> {
        info!(
            "{}: LoadConfig module={} calib={}",
            self.name(),
            load.module,
            load.calib_id
        );
        self.send(&load)
    }

    /// Give every pixel the same DACL value.
    pub fn load_flat_config(&mut self, value: u32) -> DevResult<()> {
        self.proxy
            .command_inout(cmd::LOAD_FLAT_CONFIG, DeviceData::Long(value as i64))?;
        Ok(())
    }

    pub fn load_all_config_g(&mut self, load: &LoadAllConfigG) -> DevResult<()> {
        self.send(load)
    }

    pub fn load_config_g(&mut self, load: LoadConfigG) -> DevResult<()> {
        self.send(&load)
    }

    /// Preload every pixel counter with a known value.
    pub fn load_auto_test(&mut self, known_value: u32) -> DevResult<()> {
        self.proxy
            .command_inout(cmd::LOAD_AUTO_TEST, DeviceData::Long(known_value as i64))?;
        Ok(())
    }

    pub fn reset(&mut self) -> DevResult<()> {
        self.proxy.command(cmd::RESET)?;
        Ok(())
    }

    /// Run an over-the-noise calibration writing its files into `path`.
    pub fn calibrate(&mut self, kind: CalibrationKind, path: &str) -> DevResult<()> {
        info!("{}: {} -> {}", self.name(), kind.command(), path);
        self.proxy
            .command_inout(kind.command(), DeviceData::String(path.to_string()))?;
        Ok(())
    }

    /// Load a calibration previously written to `path`.
    pub fn upload_calibration(&mut self, path: &str) -> DevResult<()> {
        self.proxy
            .command_inout(cmd::UPLOAD_CALIBRATION, DeviceData::String(path.to_string()))?;
        Ok(())
    }

    /// Wait time before each image of a sequence, one value per frame.
    pub fn upload_wait_times(&mut self, wait_times: &[Duration]) -> DevResult<()> {
        let us = wait_times
            .iter()
            .map(|d| d.as_micros().min(u32::MAX as u128) as i64)
            .collect();
        self.proxy
            .command_inout(cmd::UPLOAD_WAIT_TIMES, DeviceData::LongArray(us))?;
        Ok(())
    }

    pub fn increment_ithl(&mut self) -> DevResult<()> {
        self.proxy.command(cmd::INCREMENT_ITHL)?;
        Ok(())
    }

    pub fn decrement_ithl(&mut self) -> DevResult<()> {
        self.proxy.command(cmd::DECREMENT_ITHL)?;
        Ok(())
    }

    pub fn set_acquisition_type(&mut self, acq: AcquisitionType) -> DevResult<()> {
        self.proxy
            .write_attribute(attr::ACQUISITION_TYPE, DeviceData::Long(acq as i64))
    }

    pub fn acquisition_type(&mut self) -> DevResult<AcquisitionType> {
        let code = self.proxy.read_attribute(attr::ACQUISITION_TYPE)?.as_long()?;
        AcquisitionType::from_code(code).ok_or_else(|| {
            DevFailed::new(
                reasons::INCOMPATIBLE_ARGUMENT,
                format!("Unknown acquisition type {code}"),
                "XpadDevice::acquisition_type",
            )
        })
    }

    /// Dead time between images of a sequence.
    pub fn set_dead_time(&mut self, dead_time: Duration) -> DevResult<()> {
        let us = dead_time.as_micros().min(u32::MAX as u128) as i64;
        self.proxy
            .write_attribute(attr::DEAD_TIME, DeviceData::Long(us))
    }
}
