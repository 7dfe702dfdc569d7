//! Device server configuration.

use crate::camera::XpadModel;

pub const DEFAULT_BIND: &str = "127.0.0.1:10000";
pub const GENERIC_DEVICE: &str = "det/xpad/limaxpad-swing";
pub const SPECIFIC_DEVICE: &str = "det/xpad/xpad-swing";
/// Other name the bench scripts use for the specific device.
pub const SPECIFIC_ALIAS: &str = "det/xpad/xpad.1";

/// What the server hosts and where it listens.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address, `host:port` (port 0 picks a free one)
    pub bind: String,
    pub model: XpadModel,
    pub generic_name: String,
    pub specific_name: String,
    /// Extra names resolving to the specific device
    pub specific_aliases: Vec<String>,
    /// Ready modules mask; every fitted module if `None`
    pub modules: Option<u8>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            model: XpadModel::ImxpadS540,
            generic_name: GENERIC_DEVICE.to_string(),
            specific_name: SPECIFIC_DEVICE.to_string(),
            specific_aliases: vec![SPECIFIC_ALIAS.to_string()],
            modules: None,
        }
    }
}

impl ServerConfig {
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_model(mut self, model: XpadModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_modules(mut self, mask: u8) -> Self {
        self.modules = Some(mask);
        self
    }
}
