//! Registry configuration
//!
//! The binary fills this from its command line, which falls back to the
//! `MICROWS_REGISTRY_*` environment variables.

use serde::{Deserialize, Serialize};

/// Port the registry listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 8427;

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interface to bind
    pub host: String,
    /// Listen port; 0 picks a free one
    pub port: u16,
    /// Host announced on outbound dials
    pub announce_host: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            announce_host: "127.0.0.1".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Set the listen port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind interface
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}
