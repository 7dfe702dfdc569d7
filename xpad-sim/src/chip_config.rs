//! Chip configuration of the simulated modules.
//!
//! Each module has an active configuration (a DACL value per pixel and the
//! eleven global registers of each chip) and a detector RAM holding saved
//! calibration slots. `LoadConfig` copies a slot into the active
//! configuration.

use std::collections::{BTreeMap, HashMap};

use ndarray::{s, Array2, ArrayView1};
use xpad::args::{
    ConfigGRegister, LoadAllConfigG, SaveConfigG, SaveConfigL, CHIPS_PER_MODULE, CHIP_NB_COLUMN,
    CHIP_NB_ROW, CONFIG_G_REGISTERS,
};

/// Pixel columns of one module, chips side by side.
pub const MODULE_NB_COLUMN: usize = CHIP_NB_COLUMN * CHIPS_PER_MODULE;

/// Active configuration of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConfig {
    /// DACL per pixel, `CHIP_NB_ROW x MODULE_NB_COLUMN`
    pub dacl: Array2<u32>,
    /// Global registers, one row per chip in [`ConfigGRegister`] order
    pub config_g: Array2<u32>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            dacl: Array2::zeros((CHIP_NB_ROW, MODULE_NB_COLUMN)),
            config_g: Array2::zeros((CHIPS_PER_MODULE, CONFIG_G_REGISTERS)),
        }
    }
}

impl ModuleConfig {
    pub fn set_dacl_row(&mut self, chip: u8, row: u16, values: &[u32]) {
        let first = chip as usize * CHIP_NB_COLUMN;
        self.dacl
            .slice_mut(s![row as usize, first..first + CHIP_NB_COLUMN])
            .assign(&ArrayView1::from(values));
    }

    pub fn dacl_row(&self, chip: u8, row: u16) -> Vec<u32> {
        let first = chip as usize * CHIP_NB_COLUMN;
        self.dacl
            .slice(s![row as usize, first..first + CHIP_NB_COLUMN])
            .to_vec()
    }

    pub fn register(&self, chip: u8, register: ConfigGRegister) -> u32 {
        self.config_g[[chip as usize, register.code() as usize]]
    }

    /// Set one register on every chip.
    pub fn set_register(&mut self, register: ConfigGRegister, value: u32) {
        self.config_g
            .column_mut(register.code() as usize)
            .fill(value);
    }

    /// Set one register chip by chip.
    pub fn set_register_per_chip(&mut self, register: ConfigGRegister, values: &[u32]) {
        self.config_g
            .column_mut(register.code() as usize)
            .assign(&ArrayView1::from(values));
    }

    pub fn set_all_registers(&mut self, load: &LoadAllConfigG) {
        self.config_g
            .row_mut(load.chip_index())
            .assign(&ArrayView1::from(&load.values[..]));
    }

    /// Add `delta` to ITHL on every chip, clamped at zero.
    pub fn shift_ithl(&mut self, delta: i64) {
        self.config_g
            .column_mut(ConfigGRegister::Ithl.code() as usize)
            .mapv_inplace(|v| (v as i64 + delta).clamp(0, u32::MAX as i64) as u32);
    }
}

#[derive(Debug, Default)]
struct Slot {
    dacl_rows: BTreeMap<(u8, u16), Vec<u32>>,
    registers: HashMap<ConfigGRegister, Vec<u32>>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.dacl_rows.is_empty() && self.registers.is_empty()
    }
}

/// Saved calibration slots, keyed by `(module, calib_id)`.
#[derive(Debug, Default)]
pub struct ConfigRam {
    slots: HashMap<(u8, u32), Slot>,
}

impl ConfigRam {
    pub fn save_dacl_row(&mut self, save: &SaveConfigL) {
        self.slots
            .entry((save.module, save.calib_id))
            .or_default()
            .dacl_rows
            .insert((save.chip, save.row), save.values.clone());
    }

    pub fn save_register(&mut self, save: &SaveConfigG) {
        self.slots
            .entry((save.module, save.calib_id))
            .or_default()
            .registers
            .insert(save.register, save.values.clone());
    }

    /// Copy a slot into `target`. Returns false if nothing was saved there.
    pub fn load_into(&self, module: u8, calib_id: u32, target: &mut ModuleConfig) -> bool {
        let Some(slot) = self.slots.get(&(module, calib_id)).filter(|s| !s.is_empty()) else {
            return false;
        };
        for (&(chip, row), values) in &slot.dacl_rows {
            target.set_dacl_row(chip, row, values);
        }
        for (&register, values) in &slot.registers {
            target.set_register_per_chip(register, values);
        }
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
