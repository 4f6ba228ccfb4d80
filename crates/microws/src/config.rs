//! Agent configuration

use crate::{AgentError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the agent's JSON configuration
pub const CONFIG_ENV: &str = "MICROWS_AGENT_CONFIGS";

/// Durations travel as integer milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Backoff for re-establishing the registry link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Random extra delay as a fraction of the base delay
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the zero-based `attempt`, never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let base = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0))
        } else {
            0.0
        };

        let delay = base * (1.0 + jitter);
        if delay.is_finite() {
            Duration::from_secs_f64(delay.min(max))
        } else {
            self.max_delay
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Registry `host:port`
    pub registry: String,
    /// Namespace this agent announces
    pub namespace: String,
    /// Preferred listen port; 0 picks a free one
    pub port: u16,
    /// Interface the listener binds to
    pub listen_host: String,
    /// Host announced to the registry and to dialed peers
    pub host: String,
    /// Default timeout for outbound calls
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Upper bound on one outbound dial
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Registry reconnection backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            registry: "127.0.0.1:8427".to_string(),
            namespace: String::new(),
            port: 0,
            listen_host: "0.0.0.0".to_string(),
            host: "127.0.0.1".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Configuration for `namespace` announcing to `registry`
    pub fn new(registry: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Read the JSON document in `MICROWS_AGENT_CONFIGS`
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(CONFIG_ENV)
            .map_err(|_| AgentError::Config(format!("{} is not set", CONFIG_ENV)))?;
        Self::from_json(&raw)
    }

    /// Read the JSON document at `path`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| AgentError::Config(format!("Invalid agent configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations an agent cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(AgentError::Config("namespace must not be empty".to_string()));
        }
        if self.registry.is_empty() {
            return Err(AgentError::Config("registry must not be empty".to_string()));
        }
        Ok(())
    }

    /// Set the preferred listen port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the listen interface
    pub fn with_listen_host(mut self, listen_host: impl Into<String>) -> Self {
        self.listen_host = listen_host.into();
        self
    }

    /// Set the announced host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the default call timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the dial timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the registry reconnection policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
