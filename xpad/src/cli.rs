//! Command line arguments shared by the bench binaries.

use std::time::Duration;

use clap::Args;

use crate::args::{LoadConfig, SaveConfigL};
use crate::poll::PollConfig;
use crate::tcp::ProxyConfig;

/// Images snapped by the acquisition loop.
pub const DEFAULT_ITERATIONS: u32 = 10;
/// Exposure of each snapped image, in milliseconds.
pub const DEFAULT_EXPOSURE_MS: u64 = 1000;

pub const DEFAULT_MODULE: u8 = 4;
pub const DEFAULT_CALIB_ID: u32 = 0;
pub const DEFAULT_CHIP: u8 = 0;
pub const DEFAULT_ROW: u16 = 0;
pub const DEFAULT_DACL_VALUE: u32 = 34;

/// How to reach the device server.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Device server address (host:port); defaults to $XPAD_HOST or 127.0.0.1:10000
    #[arg(long)]
    pub host: Option<String>,

    /// Timeout of a single device call in milliseconds
    #[arg(long, default_value = "3000")]
    pub timeout_ms: u64,

    /// Give up waiting for an acquisition after this many seconds
    #[arg(long, default_value = "30")]
    pub poll_timeout_s: u64,
}

/// Single image acquisitions run in a loop.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SnapArgs {
    /// Number of images to snap
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: u32,

    /// Exposure time of each image in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_EXPOSURE_MS)]
    pub exposure_ms: u64,
}

impl Default for SnapArgs {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            exposure_ms: DEFAULT_EXPOSURE_MS,
        }
    }
}

impl SnapArgs {
    pub fn exposure(&self) -> Duration {
        Duration::from_millis(self.exposure_ms)
    }
}

/// DACL row written by the SaveConfigL tests; the defaults are the values
/// used on the bench.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DaclArgs {
    /// Module number (1-based)
    #[arg(long, default_value_t = DEFAULT_MODULE)]
    pub module: u8,

    /// Calibration slot in the detector RAM
    #[arg(long, default_value_t = DEFAULT_CALIB_ID)]
    pub calib_id: u32,

    /// Chip within the module (0-based)
    #[arg(long, default_value_t = DEFAULT_CHIP)]
    pub chip: u8,

    /// Pixel row within the chip (0-based)
    #[arg(long, default_value_t = DEFAULT_ROW)]
    pub row: u16,

    /// DACL value written to every pixel of the row
    #[arg(long, default_value_t = DEFAULT_DACL_VALUE)]
    pub value: u32,
}

impl Default for DaclArgs {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE,
            calib_id: DEFAULT_CALIB_ID,
            chip: DEFAULT_CHIP,
            row: DEFAULT_ROW,
            value: DEFAULT_DACL_VALUE,
        }
    }
}

impl DaclArgs {
    pub fn save_config_l(&self) -> SaveConfigL {
        SaveConfigL::uniform(self.module, self.calib_id, self.chip, self.row, self.value)
    }

    pub fn load_config(&self) -> LoadConfig {
        LoadConfig {
            module: self.module,
            calib_id: self.calib_id,
        }
    }
}

impl ConnectionArgs {
    pub fn proxy_config(&self) -> ProxyConfig {
        let config = ProxyConfig::default().with_timeout(Duration::from_millis(self.timeout_ms));
        match &self.host {
            Some(host) => config.with_host(host.clone()),
            None => config,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::default().with_timeout(Duration::from_secs(self.poll_timeout_s))
    }
}
