//! Host daemon configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the host daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// TCP port the direct listener binds
    pub tcp_port: u16,

    /// Relay router settings
    pub router: RouterConfig,

    /// Persistent user list
    #[serde(default)]
    pub users: Vec<UserEntry>,

    /// Backoff configuration for router reconnects
    pub backoff: BackoffConfig,

    /// Interval between configuration-file polls
    #[serde(with = "duration_secs")]
    pub watch_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tcp_port: 8050,
            router: RouterConfig::default(),
            users: Vec::new(),
            backoff: BackoffConfig::default(),
            watch_interval: Duration::from_secs(2),
        }
    }
}

/// Relay router connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Whether to maintain a router connection at all
    pub enabled: bool,

    /// Router host name or address
    pub address: String,

    /// Router control port
    pub port: u16,

    /// Router public key, hex-encoded
    pub public_key: String,

    /// Host key assigned by the router, hex-encoded. Empty until the
    /// router assigns one.
    pub host_key: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            port: 8060,
            public_key: String::new(),
            host_key: String::new(),
        }
    }
}

/// A persistent user entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    /// Login name
    pub name: String,
    /// Shared secret
    pub secret: String,
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

// Helper module for Duration serialization as whole seconds
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
