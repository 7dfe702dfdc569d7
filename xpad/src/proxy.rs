//! Device proxy API: names, states, call values and the [`DeviceProxy`] trait.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::failure::{reasons, DevFailed, DevResult};

/// Name of a remote device: `domain/family/member`.
///
/// Names compare case-insensitively and are stored lowercase. A name may
/// carry the address of the server hosting it: `tcp://host:port/d/f/m`.
///
/// ```
/// use xpad::DeviceName;
///
/// let name: DeviceName = "tcp://10.0.0.5:10000/det/XPAD/xpad.1".parse().unwrap();
/// assert_eq!(name.as_str(), "det/xpad/xpad.1");
/// assert_eq!(name.host(), Some("10.0.0.5:10000"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceName {
    name: String,
    host: Option<String>,
}

impl DeviceName {
    /// The `domain/family/member` part.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Host override carried by the name, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn domain(&self) -> &str {
        self.parts().0
    }

    pub fn family(&self) -> &str {
        self.parts().1
    }

    pub fn member(&self) -> &str {
        self.parts().2
    }

    fn parts(&self) -> (&str, &str, &str) {
        let mut it = self.name.splitn(3, '/');
        (
            it.next().unwrap_or_default(),
            it.next().unwrap_or_default(),
            it.next().unwrap_or_default(),
        )
    }
}

impl FromStr for DeviceName {
    type Err = DevFailed;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wrong = |why: &str| {
            DevFailed::new(
                reasons::WRONG_DEVICE_NAME,
                format!("Invalid device name '{s}': {why}"),
                "DeviceName::from_str",
            )
        };

        let trimmed = s.trim();
        let (host, rest) = match trimmed.strip_prefix("tcp://") {
            Some(rest) => {
                let (host, name) = rest
                    .split_once('/')
                    .ok_or_else(|| wrong("missing device name after host"))?;
                if host.is_empty() {
                    return Err(wrong("empty host"));
                }
                (Some(host.to_string()), name)
            }
            None => (None, trimmed),
        };

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 3 {
            return Err(wrong("expected domain/family/member"));
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(wrong("empty name component"));
        }

        Ok(Self {
            name: rest.to_ascii_lowercase(),
            host,
        })
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "tcp://{host}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Operating state reported by a device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum DevState {
    On,
    Off,
    Close,
    Open,
    Insert,
    Extract,
    Moving,
    Standby,
    Fault,
    Init,
    Running,
    Alarm,
    Disable,
    Unknown,
}

/// Value carried by an attribute or a command argument/result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DeviceData {
    #[default]
    Void,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    State(DevState),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
}

impl DeviceData {
    /// Name of the carried type, used in failure descriptions.
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceData::Void => "void",
            DeviceData::Bool(_) => "bool",
            DeviceData::Long(_) => "long",
            DeviceData::Double(_) => "double",
            DeviceData::String(_) => "string",
            DeviceData::State(_) => "state",
            DeviceData::LongArray(_) => "long array",
            DeviceData::DoubleArray(_) => "double array",
        }
    }

    fn mismatch(&self, expected: &str) -> DevFailed {
        DevFailed::new(
            reasons::INCOMPATIBLE_ARGUMENT,
            format!("Expected {expected}, got {}", self.type_name()),
            "DeviceData::extract",
        )
    }

    pub fn as_bool(&self) -> DevResult<bool> {
        match self {
            DeviceData::Bool(v) => Ok(*v),
            DeviceData::Long(v) => Ok(*v != 0),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_long(&self) -> DevResult<i64> {
        match self {
            DeviceData::Long(v) => Ok(*v),
            other => Err(other.mismatch("long")),
        }
    }

    /// Numeric value as `f64`. Longs are widened.
    pub fn as_double(&self) -> DevResult<f64> {
        match self {
            DeviceData::Double(v) => Ok(*v),
            DeviceData::Long(v) => Ok(*v as f64),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn as_str(&self) -> DevResult<&str> {
        match self {
            DeviceData::String(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_state(&self) -> DevResult<DevState> {
        match self {
            DeviceData::State(v) => Ok(*v),
            other => Err(other.mismatch("state")),
        }
    }

    pub fn as_long_array(&self) -> DevResult<&[i64]> {
        match self {
            DeviceData::LongArray(v) => Ok(v),
            other => Err(other.mismatch("long array")),
        }
    }

    pub fn as_double_array(&self) -> DevResult<&[f64]> {
        match self {
            DeviceData::DoubleArray(v) => Ok(v),
            other => Err(other.mismatch("double array")),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, DeviceData::Void)
    }
}

impl From<bool> for DeviceData {
    fn from(v: bool) -> Self {
        DeviceData::Bool(v)
    }
}

impl From<i64> for DeviceData {
    fn from(v: i64) -> Self {
        DeviceData::Long(v)
    }
}

impl From<f64> for DeviceData {
    fn from(v: f64) -> Self {
        DeviceData::Double(v)
    }
}

impl From<&str> for DeviceData {
    fn from(v: &str) -> Self {
        DeviceData::String(v.to_string())
    }
}

impl From<String> for DeviceData {
    fn from(v: String) -> Self {
        DeviceData::String(v)
    }
}

impl From<DevState> for DeviceData {
    fn from(v: DevState) -> Self {
        DeviceData::State(v)
    }
}

impl From<Vec<i64>> for DeviceData {
    fn from(v: Vec<i64>) -> Self {
        DeviceData::LongArray(v)
    }
}

impl From<Vec<f64>> for DeviceData {
    fn from(v: Vec<f64>) -> Self {
        DeviceData::DoubleArray(v)
    }
}

/// Synchronous handle on a named remote device.
///
/// Every call blocks until the device answers or the transport gives up.
/// Implementations report all failures as [`DevFailed`].
pub trait DeviceProxy {
    /// Name of the device this proxy talks to.
    fn name(&self) -> &DeviceName;

    /// Round trip to the device.
    fn ping(&mut self) -> DevResult<Duration>;

    fn state(&mut self) -> DevResult<DevState>;

    fn status(&mut self) -> DevResult<String>;

    fn read_attribute(&mut self, name: &str) -> DevResult<DeviceData>;

    fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()>;

    /// Run a command with one input argument and return its output.
    fn command_inout(&mut self, name: &str, arg: DeviceData) -> DevResult<DeviceData>;

    /// Run a command that takes no argument.
    fn command(&mut self, name: &str) -> DevResult<DeviceData> {
        self.command_inout(name, DeviceData::Void)
    }
}

impl<P: DeviceProxy + ?Sized> DeviceProxy for Box<P> {
    fn name(&self) -> &DeviceName {
        (**self).name()
    }

    fn ping(&mut self) -> DevResult<Duration> {
        (**self).ping()
    }

    fn state(&mut self) -> DevResult<DevState> {
        (**self).state()
    }

    fn status(&mut self) -> DevResult<String> {
        (**self).status()
    }

    fn read_attribute(&mut self, name: &str) -> DevResult<DeviceData> {
        (**self).read_attribute(name)
    }

    fn write_attribute(&mut self, name: &str, value: DeviceData) -> DevResult<()> {
        (**self).write_attribute(name, value)
    }

    fn command_inout(&mut self, name: &str, arg: DeviceData) -> DevResult<DeviceData> {
        (**self).command_inout(name, arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_device_name_parts() {
        let name: DeviceName = "det/xpad/limaxpad-swing".parse().unwrap();
        assert_eq!(name.domain(), "det");
        assert_eq!(name.family(), "xpad");
        assert_eq!(name.member(), "limaxpad-swing");
        assert_eq!(name.host(), None);
        assert_eq!(name.to_string(), "det/xpad/limaxpad-swing");
    }

    #[test]
    fn test_device_name_is_case_insensitive() {
        let a: DeviceName = "DET/Xpad/XPAD.1".parse().unwrap();
        let b: DeviceName = "det/xpad/xpad.1".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_device_name_with_host() {
        let name: DeviceName = "tcp://localhost:10000/det/xpad/xpad.1".parse().unwrap();
        assert_eq!(name.host(), Some("localhost:10000"));
        assert_eq!(name.to_string(), "tcp://localhost:10000/det/xpad/xpad.1");
    }

    #[test]
    fn test_device_name_rejects_malformed() {
        for bad in ["det/xpad", "det/xpad/a/b", "det//xpad", "", "tcp:///det/xpad/x", "tcp://host"] {
            let err = bad.parse::<DeviceName>().unwrap_err();
            assert_eq!(err.reason(), Some(reasons::WRONG_DEVICE_NAME), "{bad}");
        }
    }

    #[test]
    fn test_dev_state_round_trips_through_strings() {
        for state in DevState::iter() {
            let text = state.to_string();
            assert_eq!(text, text.to_uppercase());
            assert_eq!(text.parse::<DevState>().unwrap(), state);
        }
        assert_eq!("running".parse::<DevState>().unwrap(), DevState::Running);
    }

    #[test]
    fn test_device_data_extractors() {
        assert_eq!(DeviceData::Long(5).as_double().unwrap(), 5.0);
        assert!(DeviceData::Long(1).as_bool().unwrap());
        assert_eq!(DeviceData::from("abc").as_str().unwrap(), "abc");
        assert_eq!(
            DeviceData::from(vec![1i64, 2]).as_long_array().unwrap(),
            &[1, 2]
        );

        let err = DeviceData::Double(1.5).as_long().unwrap_err();
        assert_eq!(err.reason(), Some(reasons::INCOMPATIBLE_ARGUMENT));
        assert!(err.errors[0].desc.contains("got double"));
    }

    #[test]
    fn test_device_data_wire_shape() {
        let json = serde_json::to_string(&DeviceData::State(DevState::Running)).unwrap();
        assert_eq!(json, r#"{"type":"state","value":"RUNNING"}"#);

        let json = serde_json::to_string(&DeviceData::Void).unwrap();
        assert_eq!(json, r#"{"type":"void"}"#);
    }
}
