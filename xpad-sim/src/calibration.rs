//! Calibration file sets.
//!
//! An over-the-noise calibration writes one JSON file per ready module into a
//! fresh directory; `UploadCalibration` reads the same set back into the
//! active configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xpad::args::{ConfigGRegister, CHIPS_PER_MODULE, CHIP_NB_ROW, CONFIG_G_REGISTERS};
use xpad::detector::CalibrationKind;

use crate::camera::CameraError;
use crate::chip_config::{ModuleConfig, MODULE_NB_COLUMN};

/// DACL given to every pixel by a calibration, middle of the 6-bit range.
pub const CALIBRATED_DACL: u32 = 32;

/// One module of a calibration file set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCalibration {
    pub module: u8,
    pub kind: String,
    /// `CHIP_NB_ROW` rows of `MODULE_NB_COLUMN` values
    pub dacl: Vec<Vec<u32>>,
    /// One row of registers per chip
    pub config_g: Vec<Vec<u32>>,
}

impl ModuleCalibration {
    pub fn from_config(module: u8, kind: &str, config: &ModuleConfig) -> Self {
        Self {
            module,
            kind: kind.to_string(),
            dacl: config.dacl.rows().into_iter().map(|r| r.to_vec()).collect(),
            config_g: config.config_g.rows().into_iter().map(|r| r.to_vec()).collect(),
        }
    }

    pub fn into_config(self, path: &Path) -> Result<ModuleConfig, CameraError> {
        Ok(ModuleConfig {
            dacl: to_array(self.dacl, CHIP_NB_ROW, MODULE_NB_COLUMN, path)?,
            config_g: to_array(self.config_g, CHIPS_PER_MODULE, CONFIG_G_REGISTERS, path)?,
        })
    }
}

fn to_array(
    rows: Vec<Vec<u32>>,
    nrows: usize,
    ncols: usize,
    path: &Path,
) -> Result<Array2<u32>, CameraError> {
    let bad_shape = || CameraError::Calibration {
        path: path.to_path_buf(),
        why: format!("expected {nrows}x{ncols} values"),
    };
    if rows.len() != nrows || rows.iter().any(|r| r.len() != ncols) {
        return Err(bad_shape());
    }
    Array2::from_shape_vec((nrows, ncols), rows.into_iter().flatten().collect())
        .map_err(|_| bad_shape())
}

/// File holding one module of a set.
pub fn module_file(dir: &Path, module: u8) -> PathBuf {
    dir.join(format!("module_{module}.json"))
}

/// Target ITHL reached by each calibration speed.
pub fn ithl_target(kind: CalibrationKind) -> u32 {
    match kind {
        CalibrationKind::OtnSlow => 25,
        CalibrationKind::OtnMedium => 30,
        CalibrationKind::OtnHigh => 35,
    }
}

/// Simulated duration of one adjusting pass.
pub fn pass_duration(kind: CalibrationKind) -> Duration {
    match kind {
        CalibrationKind::OtnSlow => Duration::from_millis(30),
        CalibrationKind::OtnMedium => Duration::from_millis(20),
        CalibrationKind::OtnHigh => Duration::from_millis(10),
    }
}

/// Configuration of a module after an over-the-noise calibration.
pub fn calibrated(kind: CalibrationKind, current: &ModuleConfig) -> ModuleConfig {
    let mut config = current.clone();
    config.dacl.fill(CALIBRATED_DACL);
    config.set_register(ConfigGRegister::Ithl, ithl_target(kind));
    config
}

/// Write a file set into `dir`, which must not exist yet.
pub fn write_set(
    dir: &Path,
    kind: CalibrationKind,
    modules: &[(u8, ModuleConfig)],
) -> Result<(), CameraError> {
    if dir.exists() {
        return Err(CameraError::CalibrationPathExists(dir.to_path_buf()));
    }
    fs::create_dir_all(dir).map_err(|source| CameraError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for (module, config) in modules {
        let path = module_file(dir, *module);
        let file = ModuleCalibration::from_config(*module, &kind.to_string(), config);
        let json = serde_json::to_string(&file).map_err(|e| CameraError::Calibration {
            path: path.clone(),
            why: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|source| CameraError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote calibration of module {} to {}", module, path.display());
    }
    Ok(())
}

/// Read the file of one module from a set.
pub fn read_module(dir: &Path, module: u8) -> Result<ModuleConfig, CameraError> {
    let path = module_file(dir, module);
    let json = fs::read_to_string(&path).map_err(|source| CameraError::Io {
        path: path.clone(),
        source,
    })?;
    let file: ModuleCalibration =
        serde_json::from_str(&json).map_err(|e| CameraError::Calibration {
            path: path.clone(),
            why: e.to_string(),
        })?;
    if file.module != module {
        return Err(CameraError::Calibration {
            path,
            why: format!("file holds module {}, expected {module}", file.module),
        });
    }
    file.into_config(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_set() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("otn");

        let config = calibrated(CalibrationKind::OtnMedium, &ModuleConfig::default());
        write_set(&dir, CalibrationKind::OtnMedium, &[(1, config.clone()), (2, config.clone())])
            .unwrap();

        assert!(module_file(&dir, 1).exists());
        assert!(module_file(&dir, 2).exists());
        let back = read_module(&dir, 2).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.register(0, ConfigGRegister::Ithl), 30);
        assert_eq!(back.dacl[[119, MODULE_NB_COLUMN - 1]], CALIBRATED_DACL);
    }

    #[test]
    fn test_existing_directory_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = write_set(tmp.path(), CalibrationKind::OtnSlow, &[]).unwrap_err();
        assert!(matches!(err, CameraError::CalibrationPathExists(_)));
    }

    #[test]
    fn test_missing_module_file() {
        let tmp = TempDir::new().unwrap();
        let err = read_module(tmp.path(), 3).unwrap_err();
        assert!(matches!(err, CameraError::Io { .. }));
    }

    #[test]
    fn test_bad_shape_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = ModuleCalibration {
            module: 1,
            kind: "otnslow".to_string(),
            dacl: vec![vec![0; 3]],
            config_g: vec![],
        };
        fs::write(
            module_file(tmp.path(), 1),
            serde_json::to_string(&file).unwrap(),
        )
        .unwrap();

        let err = read_module(tmp.path(), 1).unwrap_err();
        assert!(matches!(err, CameraError::Calibration { .. }));
    }
}
