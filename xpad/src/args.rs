//! Flat argument layouts of the XPAD configuration commands.
//!
//! The model specific device takes its configuration commands as flat lists
//! of longs. Each layout here knows how to build that list and how to parse
//! and validate it back.
//!
//! Modules are numbered from 1 and addressed on the detector by a one-bit
//! mask (`module 4 -> 0x08`). Chips and rows are numbered from 0.
//!
//! ```
//! use xpad::args::{CommandArgs, SaveConfigL, CHIP_NB_COLUMN};
//!
//! let row = SaveConfigL::uniform(4, 0, 0, 0, 34);
//! let args = row.to_args();
//! assert_eq!(args.len(), 4 + CHIP_NB_COLUMN);
//! assert_eq!(&args[..5], &[4, 0, 0, 0, 34]);
//! assert_eq!(SaveConfigL::from_args(&args).unwrap(), row);
//! ```

use std::ops::RangeInclusive;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

use crate::failure::{reasons, DevFailed};

/// Pixel columns of one chip.
pub const CHIP_NB_COLUMN: usize = 80;
/// Pixel rows of one chip.
pub const CHIP_NB_ROW: usize = 120;
/// Chips side by side in one module.
pub const CHIPS_PER_MODULE: usize = 7;
/// Global (config G) registers of one chip.
pub const CONFIG_G_REGISTERS: usize = 11;
/// Modules addressable by an 8-bit module mask.
pub const MAX_MODULES: u8 = 8;

/// Invalid argument list for a configuration command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("{command}: expected {expected} values, got {got}")]
    WrongCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{command}: {field} = {value} is outside {min}..={max}")]
    OutOfRange {
        command: &'static str,
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{command}: unknown config G register {code}")]
    UnknownRegister { command: &'static str, code: i64 },
}

impl From<ArgsError> for DevFailed {
    fn from(err: ArgsError) -> Self {
        let (reason, command) = match &err {
            ArgsError::WrongCount { command, .. } => (reasons::WRONG_NUMBER_OF_ARGS, *command),
            ArgsError::OutOfRange { command, .. } => (reasons::INVALID_PARAMETER, *command),
            ArgsError::UnknownRegister { command, .. } => (reasons::INVALID_PARAMETER, *command),
        };
        DevFailed::new(reason, err.to_string(), format!("args::{command}"))
    }
}

/// Mask addressing a single 1-based module.
pub fn module_mask(module: u8) -> Result<u8, ArgsError> {
    if module == 0 || module > MAX_MODULES {
        return Err(ArgsError::OutOfRange {
            command: "module_mask",
            field: "module",
            value: module as i64,
            min: 1,
            max: MAX_MODULES as i64,
        });
    }
    Ok(1 << (module - 1))
}

/// Number of modules set in a module mask.
pub fn module_count(mask: u8) -> usize {
    mask.count_ones() as usize
}

/// A command argument layout.
pub trait CommandArgs: Sized {
    /// Device command taking this layout.
    const COMMAND: &'static str;

    fn to_args(&self) -> Vec<i64>;

    fn from_args(args: &[i64]) -> Result<Self, ArgsError>;
}

fn expect_count(command: &'static str, args: &[i64], expected: usize) -> Result<(), ArgsError> {
    if args.len() != expected {
        return Err(ArgsError::WrongCount {
            command,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn in_range(
    command: &'static str,
    field: &'static str,
    value: i64,
    range: RangeInclusive<i64>,
) -> Result<i64, ArgsError> {
    if !range.contains(&value) {
        return Err(ArgsError::OutOfRange {
            command,
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(value)
}

fn module_arg(command: &'static str, value: i64) -> Result<u8, ArgsError> {
    Ok(in_range(command, "module", value, 1..=MAX_MODULES as i64)? as u8)
}

fn u32_arg(command: &'static str, field: &'static str, value: i64) -> Result<u32, ArgsError> {
    Ok(in_range(command, field, value, 0..=u32::MAX as i64)? as u32)
}

fn u32_values(command: &'static str, values: &[i64]) -> Result<Vec<u32>, ArgsError> {
    values.iter().map(|&v| u32_arg(command, "value", v)).collect()
}

/// One DACL row of one chip, saved into a calibration slot of the
/// detector RAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveConfigL {
    pub module: u8,
    pub calib_id: u32,
    pub chip: u8,
    pub row: u16,
    /// One value per pixel column
    pub values: Vec<u32>,
}

impl SaveConfigL {
    /// Row where every pixel gets `value`.
    pub fn uniform(module: u8, calib_id: u32, chip: u8, row: u16, value: u32) -> Self {
        Self {
            module,
            calib_id,
            chip,
            row,
            values: vec![value; CHIP_NB_COLUMN],
        }
    }
}

impl CommandArgs for SaveConfigL {
    const COMMAND: &'static str = "SaveConfigL";

    fn to_args(&self) -> Vec<i64> {
        let mut args = vec![
            self.module as i64,
            self.calib_id as i64,
            self.chip as i64,
            self.row as i64,
        ];
        args.extend(self.values.iter().map(|&v| v as i64));
        args
    }

    fn from_args(args: &[i64]) -> Result<Self, ArgsError> {
        let cmd = Self::COMMAND;
        expect_count(cmd, args, 4 + CHIP_NB_COLUMN)?;
        Ok(Self {
            module: module_arg(cmd, args[0])?,
            calib_id: u32_arg(cmd, "calib_id", args[1])?,
            chip: in_range(cmd, "chip", args[2], 0..=CHIPS_PER_MODULE as i64 - 1)? as u8,
            row: in_range(cmd, "row", args[3], 0..=CHIP_NB_ROW as i64 - 1)? as u16,
            values: u32_values(cmd, &args[4..])?,
        })
    }
}

/// One global register for every chip of a module, saved into a
/// calibration slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveConfigG {
    pub module: u8,
    pub calib_id: u32,
    pub register: ConfigGRegister,
    /// One value per chip
    pub values: Vec<u32>,
}

impl CommandArgs for SaveConfigG {
    const COMMAND: &'static str = "SaveConfigG";

    fn to_args(&self) -> Vec<i64> {
        let mut args = vec![
            self.module as i64,
            self.calib_id as i64,
            self.register.code(),
        ];
        args.extend(self.values.iter().map(|&v| v as i64));
        args
    }

    fn from_args(args: &[i64]) -> Result<Self, ArgsError> {
        let cmd = Self::COMMAND;
        expect_count(cmd, args, 3 + CHIPS_PER_MODULE)?;
        Ok(Self {
            module: module_arg(cmd, args[0])?,
            calib_id: u32_arg(cmd, "calib_id", args[1])?,
            register: ConfigGRegister::from_code(cmd, args[2])?,
            values: u32_values(cmd, &args[3..])?,
        })
    }
}

/// Load a saved calibration slot into a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    pub module: u8,
    pub calib_id: u32,
}

impl CommandArgs for LoadConfig {
    const COMMAND: &'static str = "LoadConfig";

    fn to_args(&self) -> Vec<i64> {
        vec![self.module as i64, self.calib_id as i64]
    }

    fn from_args(args: &[i64]) -> Result<Self, ArgsError> {
        let cmd = Self::COMMAND;
        expect_count(cmd, args, 2)?;
        Ok(Self {
            module: module_arg(cmd, args[0])?,
            calib_id: u32_arg(cmd, "calib_id", args[1])?,
        })
    }
}

/// All eleven global registers of one chip, in [`ConfigGRegister`] order.
///
/// Unlike the other commands, the chip is numbered from 1 here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadAllConfigG {
    pub module: u8,
    /// 1..=7
    pub chip: u8,
    pub values: [u32; CONFIG_G_REGISTERS],
}

impl LoadAllConfigG {
    /// 0-based chip index.
    pub fn chip_index(&self) -> usize {
        usize::from(self.chip.saturating_sub(1))
    }
}

impl CommandArgs for LoadAllConfigG {
    const COMMAND: &'static str = "LoadAllConfigG";

    fn to_args(&self) -> Vec<i64> {
        let mut args = vec![self.module as i64, self.chip as i64];
        args.extend(self.values.iter().map(|&v| v as i64));
        args
    }

    fn from_args(args: &[i64]) -> Result<Self, ArgsError> {
        let cmd = Self::COMMAND;
        expect_count(cmd, args, 2 + CONFIG_G_REGISTERS)?;
        let mut values = [0u32; CONFIG_G_REGISTERS];
        for (slot, &v) in values.iter_mut().zip(&args[2..]) {
            *slot = u32_arg(cmd, "value", v)?;
        }
        Ok(Self {
            module: module_arg(cmd, args[0])?,
            chip: in_range(cmd, "chip", args[1], 1..=CHIPS_PER_MODULE as i64)? as u8,
            values,
        })
    }
}

/// One global register value for every chip of every ready module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfigG {
    pub register: ConfigGRegister,
    pub value: u32,
}

impl CommandArgs for LoadConfigG {
    const COMMAND: &'static str = "LoadConfigG";

    fn to_args(&self) -> Vec<i64> {
        vec![self.register.code(), self.value as i64]
    }

    fn from_args(args: &[i64]) -> Result<Self, ArgsError> {
        let cmd = Self::COMMAND;
        expect_count(cmd, args, 2)?;
        Ok(Self {
            register: ConfigGRegister::from_code(cmd, args[0])?,
            value: u32_arg(cmd, "value", args[1])?,
        })
    }
}

/// Global (config G) registers of a chip, in register-file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigGRegister {
    CmosTp,
    AmpTp,
    Ithh,
    Vadj,
    Vref,
    Imfp,
    Iota,
    Ipre,
    Ithl,
    Itune,
    Ibuffer,
}

impl ConfigGRegister {
    /// Position in the register file, as used on the wire.
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(command: &'static str, code: i64) -> Result<Self, ArgsError> {
        ConfigGRegister::iter()
            .find(|r| r.code() == code)
            .ok_or(ArgsError::UnknownRegister { command, code })
    }
}
