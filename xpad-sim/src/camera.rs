//! Simulated XPAD camera.
//!
//! [`XpadCamera`] models the detector behind the two devices: acquisition
//! settings, the ready-modules mask, the chip configuration of each module
//! and a worker thread that runs acquisitions and calibrations. Commands are
//! posted to the worker over a channel and the camera reports
//! [`Status::Exposure`], [`Status::Readout`] or [`Status::Calibrating`] until
//! the task is over.
//!
//! An error inside a worker task leaves the camera in [`Status::Fault`] until
//! [`XpadCamera::reset`].
//!
//! ```
//! use std::time::Duration;
//! use xpad_sim::camera::{Status, XpadCamera, XpadModel};
//!
//! let camera = XpadCamera::new(XpadModel::ImxpadS140, None).unwrap();
//! assert_eq!(camera.image_size(), (560, 240));
//!
//! camera.set_exposure_time(Duration::from_millis(2)).unwrap();
//! camera.start().unwrap();
//! while camera.status() != Status::Ready {
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! assert_eq!(camera.acquired_frames(), 1);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::Array2;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use xpad::args::{
    module_count, module_mask, LoadAllConfigG, LoadConfig, LoadConfigG, SaveConfigG, SaveConfigL,
    CHIP_NB_ROW, MAX_MODULES,
};
use xpad::detector::{AcquisitionType, CalibrationKind, TriggerMode};
use xpad::{reasons, DevFailed};

use crate::calibration;
use crate::chip_config::{ConfigRam, ModuleConfig, MODULE_NB_COLUMN};

/// Pixel pitch in micrometres.
pub const PIXEL_SIZE_UM: f64 = 130.0;

pub const DETECTOR_TYPE: &str = "XPAD";

/// Most adjusting passes a calibration may run.
pub const MAX_CALIBRATION_ADJUSTING_NUMBER: u32 = 100;

/// Longest sleep of the worker between two abort checks.
const TICK: Duration = Duration::from_millis(1);

/// How long `stop` waits for the worker to give up an acquisition.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Detector models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum XpadModel {
    #[strum(serialize = "BACKPLANE")]
    Backplane,
    #[strum(serialize = "HUB")]
    Hub,
    #[strum(serialize = "IMXPAD_S70")]
    ImxpadS70,
    #[strum(serialize = "IMXPAD_S140")]
    ImxpadS140,
    #[strum(serialize = "IMXPAD_S340")]
    ImxpadS340,
    #[strum(serialize = "IMXPAD_S540")]
    ImxpadS540,
}

impl XpadModel {
    /// Parse a model name as found in the device properties.
    pub fn from_name(name: &str) -> Result<Self, CameraError> {
        name.trim()
            .parse()
            .map_err(|_| CameraError::UnsupportedModel(name.to_string()))
    }

    /// Modules fitted to this model.
    pub fn modules(self) -> u8 {
        match self {
            XpadModel::ImxpadS70 => 1,
            XpadModel::ImxpadS140 => 2,
            XpadModel::ImxpadS340 => 5,
            XpadModel::Backplane | XpadModel::Hub | XpadModel::ImxpadS540 => MAX_MODULES,
        }
    }

    /// Mask with every fitted module set.
    pub fn full_mask(self) -> u8 {
        ((1u16 << self.modules()) - 1) as u8
    }
}

/// Camera status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Status {
    Ready,
    Exposure,
    Readout,
    Fault,
    Calibrating,
}

impl Status {
    pub fn is_acquiring(self) -> bool {
        matches!(self, Status::Exposure | Status::Readout)
    }

    /// A worker task is running: acquiring or calibrating.
    pub fn is_busy(self) -> bool {
        self.is_acquiring() || self == Status::Calibrating
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Xpad Model not supported: {0}")]
    UnsupportedModel(String),

    #[error("{op} is not allowed while the camera is {status}")]
    WrongState { op: &'static str, status: Status },

    #[error("module {module} is not in the ready modules mask {mask:#04x}")]
    ModuleNotReady { module: u8, mask: u8 },

    #[error("nothing saved for module {module} in calibration slot {calib_id}")]
    EmptySlot { module: u8, calib_id: u32 },

    #[error("{0}")]
    InvalidParameter(String),

    #[error("calibration path {} already exists", .0.display())]
    CalibrationPathExists(PathBuf),

    #[error("calibration file {}: {why}", path.display())]
    Calibration { path: PathBuf, why: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot start the camera worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error("camera worker is not running")]
    WorkerGone,

    #[error("acquisition did not stop within {0:?}")]
    StopTimeout(Duration),
}

impl From<CameraError> for DevFailed {
    fn from(err: CameraError) -> Self {
        let reason = match &err {
            CameraError::WrongState { .. } => reasons::WRONG_STATE,
            CameraError::UnsupportedModel(_)
            | CameraError::ModuleNotReady { .. }
            | CameraError::EmptySlot { .. }
            | CameraError::InvalidParameter(_)
            | CameraError::CalibrationPathExists(_) => reasons::INVALID_PARAMETER,
            CameraError::Calibration { .. }
            | CameraError::Io { .. }
            | CameraError::Worker(_)
            | CameraError::WorkerGone
            | CameraError::StopTimeout(_) => reasons::HARDWARE_ERROR,
        };
        DevFailed::new(reason, err.to_string(), "XpadCamera")
    }
}

/// Timing and option parameters of the model specific device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificParameters {
    /// Dead time between two images
    pub dead_time_us: u32,
    /// Delay before the first image
    pub init_time_us: u32,
    pub shutter_time_us: u32,
    /// Counter overflow refresh period
    pub overflow_time_us: u32,
    pub n: u32,
    pub p: u32,
    pub busy_out_sel: u32,
    pub geom_correction: bool,
    pub gp: [u32; 4],
}

impl Default for SpecificParameters {
    fn default() -> Self {
        Self {
            dead_time_us: 5000,
            init_time_us: 0,
            shutter_time_us: 0,
            overflow_time_us: 4000,
            n: 0,
            p: 0,
            busy_out_sel: 0,
            geom_correction: false,
            gp: [0; 4],
        }
    }
}

#[derive(Debug, Clone)]
struct Settings {
    exposure_us: u64,
    nb_frames: u32,
    pixel_depth: u32,
    trigger_mode: TriggerMode,
    acquisition_type: AcquisitionType,
    calibration_adjusting_number: u32,
    specific: SpecificParameters,
    wait_times_us: Vec<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exposure_us: 1_000_000,
            nb_frames: 1,
            pixel_depth: 16,
            trigger_mode: TriggerMode::InternalSingle,
            acquisition_type: AcquisitionType::Sync,
            calibration_adjusting_number: 1,
            specific: SpecificParameters::default(),
            wait_times_us: Vec::new(),
        }
    }
}

struct CameraState {
    status: Status,
    settings: Settings,
    abort: bool,
    acquired: u64,
    last_image: Option<Array2<u32>>,
    auto_test: Option<u32>,
    ram: ConfigRam,
    modules: BTreeMap<u8, ModuleConfig>,
    last_error: Option<String>,
}

enum Task {
    StartSync { nb_frames: u32 },
    StartAsync { nb_frames: u32 },
    Calibrate { kind: CalibrationKind, path: PathBuf },
    UploadCalibration { path: PathBuf },
    Exit,
}

#[derive(Debug, Clone, Copy)]
struct Geometry {
    width: usize,
    height: usize,
}

fn lock(state: &Mutex<CameraState>) -> MutexGuard<'_, CameraState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ensure_ready(state: &CameraState, op: &'static str) -> Result<(), CameraError> {
    if state.status != Status::Ready {
        return Err(CameraError::WrongState {
            op,
            status: state.status,
        });
    }
    Ok(())
}

/// Simulated detector with its worker thread.
pub struct XpadCamera {
    model: XpadModel,
    modules_mask: u8,
    state: Arc<Mutex<CameraState>>,
    tasks: Sender<Task>,
    worker: Option<JoinHandle<()>>,
}

impl XpadCamera {
    /// Create a camera with `modules_mask` ready, every fitted module if `None`.
    pub fn new(model: XpadModel, modules_mask: Option<u8>) -> Result<Self, CameraError> {
        let full = model.full_mask();
        let mask = modules_mask.unwrap_or(full);
        if mask == 0 || mask & !full != 0 {
            return Err(CameraError::InvalidParameter(format!(
                "modules mask {mask:#04x} does not fit {model} (mask {full:#04x})"
            )));
        }

        let modules = (1..=MAX_MODULES)
            .filter(|&m| module_mask(m).is_ok_and(|bit| mask & bit != 0))
            .map(|m| (m, ModuleConfig::default()))
            .collect();

        let state = Arc::new(Mutex::new(CameraState {
            status: Status::Ready,
            settings: Settings::default(),
            abort: false,
            acquired: 0,
            last_image: None,
            auto_test: None,
            ram: ConfigRam::default(),
            modules,
            last_error: None,
        }));

        let geometry = Geometry {
            width: MODULE_NB_COLUMN,
            height: CHIP_NB_ROW * module_count(mask),
        };
        let (tasks, inbox) = unbounded();
        let worker_state = state.clone();
        let worker = thread::Builder::new()
            .name("xpad-camera".to_string())
            .spawn(move || worker_loop(inbox, worker_state, geometry))
            .map_err(CameraError::Worker)?;

        info!("XPAD camera {} ready, modules mask {:#04x}", model, mask);

        Ok(Self {
            model,
            modules_mask: mask,
            state,
            tasks,
            worker: Some(worker),
        })
    }

    pub fn model(&self) -> XpadModel {
        self.model
    }

    pub fn modules_mask(&self) -> u8 {
        self.modules_mask
    }

    pub fn status(&self) -> Status {
        lock(&self.state).status
    }

    /// Message of the worker error that put the camera in fault, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    /// Image size in pixels, `(width, height)`.
    pub fn image_size(&self) -> (u32, u32) {
        (
            MODULE_NB_COLUMN as u32,
            (CHIP_NB_ROW * module_count(self.modules_mask)) as u32,
        )
    }

    /// Pixel size in micrometres, `(x, y)`.
    pub fn pixel_size(&self) -> (f64, f64) {
        (PIXEL_SIZE_UM, PIXEL_SIZE_UM)
    }

    fn ensure_module(&self, module: u8) -> Result<(), CameraError> {
        match module_mask(module) {
            Ok(bit) if self.modules_mask & bit != 0 => Ok(()),
            _ => Err(CameraError::ModuleNotReady {
                module,
                mask: self.modules_mask,
            }),
        }
    }

    fn post(&self, state: &mut CameraState, busy: Status, task: Task) -> Result<(), CameraError> {
        state.abort = false;
        state.status = busy;
        if self.tasks.send(task).is_err() {
            state.status = Status::Fault;
            return Err(CameraError::WorkerGone);
        }
        Ok(())
    }

    // Acquisition settings

    pub fn set_exposure_time(&self, exposure: Duration) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "set_exposure_time")?;
        state.settings.exposure_us = exposure.as_micros().min(u64::MAX as u128) as u64;
        debug!("exposure time {} us", state.settings.exposure_us);
        Ok(())
    }

    pub fn exposure_time(&self) -> Duration {
        Duration::from_micros(lock(&self.state).settings.exposure_us)
    }

    /// Frames per acquisition; 0 acquires until stopped.
    pub fn set_nb_frames(&self, nb_frames: u32) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "set_nb_frames")?;
        state.settings.nb_frames = nb_frames;
        Ok(())
    }

    pub fn nb_frames(&self) -> u32 {
        lock(&self.state).settings.nb_frames
    }

    pub fn set_pixel_depth(&self, depth: u32) -> Result<(), CameraError> {
        if depth != 16 && depth != 32 {
            return Err(CameraError::InvalidParameter(format!(
                "pixel depth {depth} not supported (16 or 32 bits)"
            )));
        }
        let mut state = lock(&self.state);
        ensure_ready(&state, "set_pixel_depth")?;
        state.settings.pixel_depth = depth;
        Ok(())
    }

    pub fn pixel_depth(&self) -> u32 {
        lock(&self.state).settings.pixel_depth
    }

    pub fn set_trigger_mode(&self, mode: TriggerMode) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "set_trigger_mode")?;
        state.settings.trigger_mode = mode;
        Ok(())
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        lock(&self.state).settings.trigger_mode
    }

    pub fn set_acquisition_type(&self, acq: AcquisitionType) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "set_acquisition_type")?;
        state.settings.acquisition_type = acq;
        Ok(())
    }

    pub fn acquisition_type(&self) -> AcquisitionType {
        lock(&self.state).settings.acquisition_type
    }

    pub fn set_calibration_adjusting_number(&self, number: u32) -> Result<(), CameraError> {
        if !(1..=MAX_CALIBRATION_ADJUSTING_NUMBER).contains(&number) {
            return Err(CameraError::InvalidParameter(format!(
                "calibration adjusting number {number} outside 1..={MAX_CALIBRATION_ADJUSTING_NUMBER}"
            )));
        }
        lock(&self.state).settings.calibration_adjusting_number = number;
        Ok(())
    }

    pub fn calibration_adjusting_number(&self) -> u32 {
        lock(&self.state).settings.calibration_adjusting_number
    }

    pub fn set_specific_parameters(&self, params: SpecificParameters) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "set_specific_parameters")?;
        debug!("specific parameters {:?}", params);
        state.settings.specific = params;
        Ok(())
    }

    pub fn specific_parameters(&self) -> SpecificParameters {
        lock(&self.state).settings.specific.clone()
    }

    /// Wait time before each image of the next acquisition, one per frame.
    pub fn upload_wait_times(&self, wait_times_us: &[u32]) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "upload_wait_times")?;
        if wait_times_us.len() != state.settings.nb_frames as usize {
            return Err(CameraError::InvalidParameter(format!(
                "{} wait times given for {} images",
                wait_times_us.len(),
                state.settings.nb_frames
            )));
        }
        state.settings.wait_times_us = wait_times_us.to_vec();
        Ok(())
    }

    // Acquisition

    /// Acquire `nb_frames` images.
    pub fn start(&self) -> Result<(), CameraError> {
        let nb_frames = lock(&self.state).settings.nb_frames;
        self.start_frames(nb_frames)
    }

    /// Acquire until [`stop`](Self::stop) is called.
    pub fn start_live(&self) -> Result<(), CameraError> {
        self.start_frames(0)
    }

    fn start_frames(&self, nb_frames: u32) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "start")?;
        state.abort = false;
        state.acquired = 0;
        state.last_image = None;

        let task = match state.settings.acquisition_type {
            AcquisitionType::Sync if nb_frames > 0 => Task::StartSync { nb_frames },
            _ => Task::StartAsync { nb_frames },
        };
        info!(
            "Starting acquisition of {} frame(s), trigger {} (code {})",
            nb_frames,
            state.settings.trigger_mode,
            state.settings.trigger_mode.code()
        );
        self.post(&mut state, Status::Exposure, task)
    }

    /// Abort the running acquisition; no-op if none is running.
    /// Abort the running acquisition or calibration and wait for the worker
    /// to return to Ready.
    pub fn stop(&self) -> Result<(), CameraError> {
        {
            let mut state = lock(&self.state);
            if !state.status.is_busy() {
                return Ok(());
            }
            state.abort = true;
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        while Instant::now() < deadline {
            if !self.status().is_busy() {
                info!("Camera stopped");
                return Ok(());
            }
            thread::sleep(TICK);
        }
        Err(CameraError::StopTimeout(STOP_TIMEOUT))
    }

    /// Frames published since the last start.
    pub fn acquired_frames(&self) -> u64 {
        lock(&self.state).acquired
    }

    pub fn last_image(&self) -> Option<Array2<u32>> {
        lock(&self.state).last_image.clone()
    }

    // Chip configuration

    pub fn save_config_l(&self, save: &SaveConfigL) -> Result<(), CameraError> {
        self.ensure_module(save.module)?;
        let mut state = lock(&self.state);
        ensure_ready(&state, "save_config_l")?;
        state.ram.save_dacl_row(save);
        debug!(
            "saved DACL module {} calib {} chip {} row {}",
            save.module, save.calib_id, save.chip, save.row
        );
        Ok(())
    }

    pub fn save_config_g(&self, save: &SaveConfigG) -> Result<(), CameraError> {
        self.ensure_module(save.module)?;
        let mut state = lock(&self.state);
        ensure_ready(&state, "save_config_g")?;
        state.ram.save_register(save);
        Ok(())
    }

    /// Copy a saved calibration slot into the module's active configuration.
    pub fn load_config(&self, load: LoadConfig) -> Result<(), CameraError> {
        self.ensure_module(load.module)?;
        let mut state = lock(&self.state);
        ensure_ready(&state, "load_config")?;

        let CameraState { ram, modules, .. } = &mut *state;
        let target = modules
            .get_mut(&load.module)
            .ok_or(CameraError::ModuleNotReady {
                module: load.module,
                mask: self.modules_mask,
            })?;
        if !ram.load_into(load.module, load.calib_id, target) {
            return Err(CameraError::EmptySlot {
                module: load.module,
                calib_id: load.calib_id,
            });
        }
        info!("Loaded calibration slot {} into module {}", load.calib_id, load.module);
        Ok(())
    }

    /// Give every pixel of every ready module the same DACL.
    pub fn load_flat_config(&self, value: u32) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "load_flat_config")?;
        for config in state.modules.values_mut() {
            config.dacl.fill(value);
        }
        Ok(())
    }

    pub fn load_all_config_g(&self, load: &LoadAllConfigG) -> Result<(), CameraError> {
        self.ensure_module(load.module)?;
        let mut state = lock(&self.state);
        ensure_ready(&state, "load_all_config_g")?;
        if let Some(config) = state.modules.get_mut(&load.module) {
            config.set_all_registers(load);
        }
        Ok(())
    }

    /// Set one register on every chip of every ready module.
    pub fn load_config_g(&self, load: LoadConfigG) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "load_config_g")?;
        for config in state.modules.values_mut() {
            config.set_register(load.register, load.value);
        }
        Ok(())
    }

    /// Preload every pixel counter with `value`; images then carry it.
    pub fn load_auto_test(&self, value: u32) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "load_auto_test")?;
        state.auto_test = Some(value);
        Ok(())
    }

    pub fn increment_ithl(&self) -> Result<(), CameraError> {
        self.shift_ithl("increment_ithl", 1)
    }

    pub fn decrement_ithl(&self) -> Result<(), CameraError> {
        self.shift_ithl("decrement_ithl", -1)
    }

    fn shift_ithl(&self, op: &'static str, delta: i64) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, op)?;
        for config in state.modules.values_mut() {
            config.shift_ithl(delta);
        }
        Ok(())
    }

    /// Active configuration of a ready module.
    pub fn module_config(&self, module: u8) -> Option<ModuleConfig> {
        lock(&self.state).modules.get(&module).cloned()
    }

    /// Abort any acquisition, clear the chip configuration and the fault.
    pub fn reset(&self) -> Result<(), CameraError> {
        self.stop()?;
        let mut state = lock(&self.state);
        for config in state.modules.values_mut() {
            *config = ModuleConfig::default();
        }
        state.ram.clear();
        state.auto_test = None;
        state.settings.wait_times_us.clear();
        state.last_error = None;
        state.status = Status::Ready;
        info!("Camera reset");
        Ok(())
    }

    // Calibrations

    /// Run an over-the-noise calibration writing its file set into `path`.
    pub fn calibrate(&self, kind: CalibrationKind, path: &Path) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "calibrate")?;
        if path.exists() {
            return Err(CameraError::CalibrationPathExists(path.to_path_buf()));
        }
        info!("Calibration {} into {}", kind, path.display());
        self.post(
            &mut state,
            Status::Calibrating,
            Task::Calibrate {
                kind,
                path: path.to_path_buf(),
            },
        )
    }

    /// Load a calibration file set into the ready modules.
    pub fn upload_calibration(&self, path: &Path) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        ensure_ready(&state, "upload_calibration")?;
        self.post(
            &mut state,
            Status::Calibrating,
            Task::UploadCalibration {
                path: path.to_path_buf(),
            },
        )
    }
}

impl Drop for XpadCamera {
    fn drop(&mut self) {
        lock(&self.state).abort = true;
        let _ = self.tasks.send(Task::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inbox: Receiver<Task>, state: Arc<Mutex<CameraState>>, geometry: Geometry) {
    for task in inbox.iter() {
        let result = match task {
            Task::StartSync { nb_frames } => acquire(&state, geometry, nb_frames, false),
            Task::StartAsync { nb_frames } => acquire(&state, geometry, nb_frames, true),
            Task::Calibrate { kind, path } => run_calibration(&state, kind, &path),
            Task::UploadCalibration { path } => upload_calibration(&state, &path),
            Task::Exit => break,
        };

        if let Err(e) = result {
            error!("Camera task failed: {}", e);
            let mut state = lock(&state);
            state.status = Status::Fault;
            state.last_error = Some(e.to_string());
        }
    }
    debug!("Camera worker exiting");
}

/// Sleep for `duration` in ticks; returns false if the running task was aborted.
fn sleep_unless_aborted(state: &Mutex<CameraState>, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if lock(state).abort {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(TICK.min(deadline - now));
    }
}

fn publish(state: &Mutex<CameraState>, image: Array2<u32>) {
    let mut state = lock(state);
    state.acquired += 1;
    state.last_image = Some(image);
}

fn finish_aborted(state: &Mutex<CameraState>) -> Result<(), CameraError> {
    let mut state = lock(state);
    state.abort = false;
    state.status = Status::Ready;
    warn!("Acquisition aborted after {} frame(s)", state.acquired);
    Ok(())
}

fn acquire(
    state: &Mutex<CameraState>,
    geometry: Geometry,
    nb_frames: u32,
    publish_each: bool,
) -> Result<(), CameraError> {
    let (settings, auto_test) = {
        let state = lock(state);
        (state.settings.clone(), state.auto_test)
    };

    let max_value = if settings.pixel_depth == 16 {
        u16::MAX as u32
    } else {
        u32::MAX
    };
    let exposure_ms = (settings.exposure_us / 1000).min(u32::MAX as u64) as u32;
    let value = auto_test.unwrap_or(exposure_ms).min(max_value);
    let exposure = Duration::from_micros(settings.exposure_us);

    let mut pending = Vec::new();
    let mut frame: u32 = 0;
    while nb_frames == 0 || frame < nb_frames {
        let gap_us = if frame == 0 {
            settings.specific.init_time_us
        } else {
            settings.specific.dead_time_us
        };
        let wait_us = settings
            .wait_times_us
            .get(frame as usize)
            .copied()
            .unwrap_or(0);
        let delay = Duration::from_micros(gap_us as u64 + wait_us as u64) + exposure;
        if !sleep_unless_aborted(state, delay) {
            return finish_aborted(state);
        }

        let image = Array2::from_elem((geometry.height, geometry.width), value);
        if publish_each {
            publish(state, image);
        } else {
            pending.push(image);
        }
        frame = frame.saturating_add(1);
    }

    if !pending.is_empty() {
        lock(state).status = Status::Readout;
        for image in pending {
            publish(state, image);
        }
    }

    let mut state = lock(state);
    state.status = Status::Ready;
    debug!("Acquisition done, {} frame(s)", state.acquired);
    Ok(())
}

fn run_calibration(
    state: &Mutex<CameraState>,
    kind: CalibrationKind,
    path: &Path,
) -> Result<(), CameraError> {
    let (modules, passes) = {
        let state = lock(state);
        (
            state.modules.clone(),
            state.settings.calibration_adjusting_number,
        )
    };

    for pass in 0..passes {
        if !sleep_unless_aborted(state, calibration::pass_duration(kind)) {
            let mut state = lock(state);
            state.abort = false;
            state.status = Status::Ready;
            warn!("Calibration {} aborted after {} pass(es)", kind, pass);
            return Ok(());
        }
    }

    let calibrated: Vec<(u8, ModuleConfig)> = modules
        .iter()
        .map(|(&module, config)| (module, calibration::calibrated(kind, config)))
        .collect();
    calibration::write_set(path, kind, &calibrated)?;

    let mut state = lock(state);
    state.modules.extend(calibrated);
    state.status = Status::Ready;
    info!("Calibration {} written to {}", kind, path.display());
    Ok(())
}

fn upload_calibration(state: &Mutex<CameraState>, path: &Path) -> Result<(), CameraError> {
    let modules: Vec<u8> = lock(state).modules.keys().copied().collect();
    let loaded = modules
        .into_iter()
        .map(|module| calibration::read_module(path, module).map(|config| (module, config)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut state = lock(state);
    state.modules.extend(loaded);
    state.status = Status::Ready;
    info!("Calibration uploaded from {}", path.display());
    Ok(())
}
