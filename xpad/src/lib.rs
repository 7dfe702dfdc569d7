//! Client side of the XPAD detector bench.
//!
//! This crate talks to XPAD detector devices through a [`DeviceProxy`]: a
//! synchronous handle on a named remote device that can be pinged, have its
//! attributes read and written, run commands and report its state.
//!
//! Every remote call fails with a single error type, [`DevFailed`], which
//! carries the stack of [`DevError`] records produced along the way.
//!
//! # Modules
//!
//! - [`proxy`] - device names, states, call values and the proxy trait
//! - [`failure`] - failure records and their console report
//! - [`wire`] - newline-delimited JSON framing shared with the device server
//! - [`tcp`] - the TCP implementation of [`DeviceProxy`]
//! - [`poll`] - bounded state polling with backoff
//! - [`args`] - flat argument layouts of the XPAD configuration commands
//! - [`detector`] - typed wrappers for the generic and the XPAD specific device
//! - [`routines`] - the manual test sequences used by the bench binaries
//! - [`cli`] - command line arguments shared by the binaries

pub mod args;
pub mod cli;
pub mod detector;
pub mod failure;
pub mod poll;
pub mod proxy;
pub mod routines;
pub mod tcp;
pub mod wire;

pub use detector::{LimaDetector, XpadDevice};
pub use failure::{reasons, DevError, DevFailed, DevResult, ErrSeverity, FailureReport};
pub use poll::{wait_while_state, PollConfig};
pub use proxy::{DevState, DeviceData, DeviceName, DeviceProxy};
pub use tcp::{ProxyConfig, TcpDeviceProxy, DEFAULT_HOST, HOST_ENV_VAR};
