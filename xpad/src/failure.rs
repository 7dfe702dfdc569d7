//! Failure records returned by device calls.
//!
//! A failed remote call produces a [`DevFailed`] holding one or more
//! [`DevError`] records. The first record is the innermost cause; each layer
//! that re-throws the failure appends its own record with
//! [`DevFailed::rethrow`].
//!
//! # Example
//!
//! ```
//! use xpad::failure::{reasons, DevFailed, FailureReport};
//!
//! let failure = DevFailed::new(
//!     reasons::HARDWARE_ERROR,
//!     "module 4 is not ready",
//!     "XpadCamera::save_config_l",
//! )
//! .rethrow(reasons::COMMAND_FAILED, "SaveConfigL failed", "XpadSpecific::SaveConfigL");
//!
//! assert_eq!(failure.errors.len(), 2);
//! let report = FailureReport(&failure).to_string();
//! assert!(report.contains("reason: XPAD_HardwareError"));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Well-known failure reason codes.
pub mod reasons {
    pub const CANT_CONNECT: &str = "API_CantConnectToDevice";
    pub const DEVICE_TIMED_OUT: &str = "API_DeviceTimedOut";
    pub const COMMUNICATION_FAILED: &str = "API_CommunicationFailed";
    pub const DEVICE_NOT_DEFINED: &str = "API_DeviceNotDefined";
    pub const WRONG_DEVICE_NAME: &str = "API_WrongDeviceName";
    pub const COMMAND_NOT_FOUND: &str = "API_CommandNotFound";
    pub const COMMAND_FAILED: &str = "API_CommandFailed";
    pub const ATTR_NOT_FOUND: &str = "API_AttrNotFound";
    pub const ATTR_NOT_WRITABLE: &str = "API_AttrNotWritable";
    pub const INCOMPATIBLE_ARGUMENT: &str = "API_IncompatibleArgumentType";
    pub const WRONG_NUMBER_OF_ARGS: &str = "API_WrongNumberOfArgs";
    pub const POLL_TIMEOUT: &str = "API_PollTimeout";
    pub const HARDWARE_ERROR: &str = "XPAD_HardwareError";
    pub const WRONG_STATE: &str = "XPAD_WrongState";
    pub const INVALID_PARAMETER: &str = "XPAD_InvalidParameter";
}

/// Severity of a failure record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrSeverity {
    Warn,
    #[default]
    Err,
    Panic,
}

/// One failure record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevError {
    /// Short machine-readable code, e.g. `API_DeviceTimedOut`
    pub reason: String,
    /// Human readable description
    pub desc: String,
    /// Call site that raised the record
    pub origin: String,
    pub severity: ErrSeverity,
}

impl DevError {
    pub fn new(reason: impl Into<String>, desc: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            desc: desc.into(),
            origin: origin.into(),
            severity: ErrSeverity::Err,
        }
    }

    pub fn with_severity(mut self, severity: ErrSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// The single failure condition of every device call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("device call failed: {}", summary(.errors))]
pub struct DevFailed {
    /// Records, innermost cause first
    pub errors: Vec<DevError>,
}

fn summary(errors: &[DevError]) -> String {
    match errors.first() {
        Some(first) => format!("{} ({})", first.desc, first.reason),
        None => "no error records".to_string(),
    }
}

/// Result type for device calls.
pub type DevResult<T> = Result<T, DevFailed>;

impl DevFailed {
    /// Create a failure with a single `ERR` record.
    pub fn new(reason: impl Into<String>, desc: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            errors: vec![DevError::new(reason, desc, origin)],
        }
    }

    pub fn from_records(errors: Vec<DevError>) -> Self {
        Self { errors }
    }

    /// Append an outer record and return the failure.
    pub fn rethrow(
        mut self,
        reason: impl Into<String>,
        desc: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        self.errors.push(DevError::new(reason, desc, origin));
        self
    }

    /// Reason of the innermost record.
    pub fn reason(&self) -> Option<&str> {
        self.errors.first().map(|e| e.reason.as_str())
    }

    /// True if any record carries `reason`.
    pub fn has_reason(&self, reason: &str) -> bool {
        self.errors.iter().any(|e| e.reason == reason)
    }
}

/// Console rendering of a [`DevFailed`], one element block per record.
pub struct FailureReport<'a>(pub &'a DevFailed);

impl fmt::Display for FailureReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Failed with exception ! DevFailed")?;
        for err in &self.0.errors {
            writeln!(f, "------- ERROR ELEMENT -------")?;
            writeln!(f, "reason: {}", err.reason)?;
            writeln!(f, "description: {}", err.desc)?;
            writeln!(f, "origin: {}", err.origin)?;
            writeln!(f, "severity: {}", err.severity)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rethrow_keeps_innermost_first() {
        let failure = DevFailed::new(reasons::HARDWARE_ERROR, "inner", "camera")
            .rethrow(reasons::COMMAND_FAILED, "outer", "device");

        assert_eq!(failure.reason(), Some(reasons::HARDWARE_ERROR));
        assert_eq!(failure.errors[1].origin, "device");
        assert!(failure.has_reason(reasons::COMMAND_FAILED));
        assert!(!failure.has_reason(reasons::POLL_TIMEOUT));
    }

    #[test]
    fn test_report_prints_every_record() {
        let failure = DevFailed::from_records(vec![
            DevError::new("R1", "first", "o1"),
            DevError::new("R2", "second", "o2").with_severity(ErrSeverity::Panic),
        ]);

        let report = FailureReport(&failure).to_string();
        let expected = "Failed with exception ! DevFailed\n\
            ------- ERROR ELEMENT -------\n\
            reason: R1\n\
            description: first\n\
            origin: o1\n\
            severity: ERR\n\
            ------- ERROR ELEMENT -------\n\
            reason: R2\n\
            description: second\n\
            origin: o2\n\
            severity: PANIC\n";
        assert_eq!(report, expected);
    }

    #[test]
    fn test_display_uses_innermost_record() {
        let failure = DevFailed::new(reasons::DEVICE_TIMED_OUT, "no reply", "proxy");
        assert_eq!(
            failure.to_string(),
            "device call failed: no reply (API_DeviceTimedOut)"
        );
    }

    #[test]
    fn test_severity_parses_case_insensitive() {
        assert_eq!("warn".parse::<ErrSeverity>().unwrap(), ErrSeverity::Warn);
        assert_eq!(ErrSeverity::Err.to_string(), "ERR");
    }

    #[test]
    fn test_records_serialize_with_upper_case_severity() {
        let err = DevError::new("R", "d", "o");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"severity\":\"ERR\""));
    }
}
