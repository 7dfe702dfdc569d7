//! Simulated XPAD detector and device server.
//!
//! Lets the bench tools run without hardware: [`camera::XpadCamera`] models
//! the detector, [`devices`] exposes it as the generic detector device and
//! the model specific device, and [`server::DeviceServer`] serves both over
//! TCP with the framing of [`xpad::wire`].
//!
//! # Modules
//!
//! - [`camera`] - detector model, acquisition and calibration worker
//! - [`chip_config`] - per-module DACL and global registers, detector RAM
//! - [`calibration`] - calibration file sets
//! - [`devices`] - device classes mapped onto the camera
//! - [`server`] - TCP device server and in-process proxy
//! - [`config`] - server configuration

pub mod calibration;
pub mod camera;
pub mod chip_config;
pub mod config;
pub mod devices;
pub mod server;

pub use camera::{CameraError, Status, XpadCamera, XpadModel};
pub use config::ServerConfig;
pub use server::{DeviceServer, LocalProxy, Registry, ServerError, ServerHandle};
