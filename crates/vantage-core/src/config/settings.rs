//! In-memory settings snapshot backed by the configuration file
//!
//! The orchestrator never reads the file directly; it reads this
//! snapshot, and calls [`Settings::sync`] when the watcher reports a
//! change. A failed re-read leaves the previous snapshot authoritative.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{load_config, save_config, HostConfig};
use crate::error::ConfigError;
use crate::types::{RouterParameters, UserList, UserRecord};

/// Handle over the configuration file and its current in-memory value
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    current: HostConfig,
}

impl Settings {
    /// Load settings from a file
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let current = load_config(&path)?;
        Ok(Self { path, current })
    }

    /// Create settings with an explicit initial value, writing it to disk
    pub fn create(path: impl Into<PathBuf>, config: HostConfig) -> Result<Self, ConfigError> {
        let path = path.into();
        save_config(&path, &config)?;
        Ok(Self {
            path,
            current: config,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file.
    ///
    /// On failure the previous in-memory snapshot remains authoritative
    /// and the error is returned to the caller.
    pub fn sync(&mut self) -> Result<(), ConfigError> {
        self.current = load_config(&self.path)?;
        Ok(())
    }

    /// Direct listener port
    pub fn tcp_port(&self) -> u16 {
        self.current.tcp_port
    }

    /// Override the listener port in memory, without touching the file.
    /// The port is read once, when the listener is bound.
    pub fn set_tcp_port(&mut self, port: u16) {
        self.current.tcp_port = port;
    }

    /// Whether a router connection should be maintained
    pub fn is_router_enabled(&self) -> bool {
        self.current.router.enabled
    }

    /// Current router connection parameters
    pub fn router_parameters(&self) -> RouterParameters {
        RouterParameters {
            address: self.current.router.address.clone(),
            port: self.current.router.port,
            public_key: decode_key(&self.current.router.public_key, "router.public_key"),
            host_key: decode_key(&self.current.router.host_key, "router.host_key"),
        }
    }

    /// Persistent users from configuration
    pub fn persistent_users(&self) -> UserList {
        UserList::from_persistent(
            self.current
                .users
                .iter()
                .map(|u| UserRecord::persistent(u.name.clone(), u.secret.clone().into_bytes()))
                .collect(),
        )
    }

    /// Reconnect backoff settings
    pub fn backoff(&self) -> super::BackoffConfig {
        self.current.backoff.clone()
    }

    /// Configuration-file poll interval
    pub fn watch_interval(&self) -> std::time::Duration {
        self.current.watch_interval
    }

    /// Persist a rotated host key.
    ///
    /// Updates the in-memory snapshot and writes the file before
    /// returning, so the new key survives a crash that follows the
    /// rotation.
    pub fn set_host_key(&mut self, key: &Bytes) -> Result<(), ConfigError> {
        self.current.router.host_key = hex::encode(key);
        save_config(&self.path, &self.current)
    }
}

fn decode_key(encoded: &str, field: &str) -> Bytes {
    if encoded.is_empty() {
        return Bytes::new();
    }
    match hex::decode(encoded) {
        Ok(raw) => Bytes::from(raw),
        Err(e) => {
            warn!(field, error = %e, "key field is not valid hex; treating as empty");
            Bytes::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RouterConfig, UserEntry};

    fn test_config() -> HostConfig {
        HostConfig {
            tcp_port: 8050,
            router: RouterConfig {
                enabled: true,
                address: "r.example.com".to_string(),
                port: 8060,
                public_key: hex::encode(b"router-pub"),
                host_key: String::new(),
            },
            users: vec![UserEntry {
                name: "alice".to_string(),
                secret: "s3cret".to_string(),
            }],
            ..HostConfig::default()
        }
    }

    #[test]
    fn test_sync_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let mut settings = Settings::create(&path, test_config()).unwrap();
        assert_eq!(settings.tcp_port(), 8050);

        let mut edited = test_config();
        edited.tcp_port = 9000;
        save_config(&path, &edited).unwrap();

        settings.sync().unwrap();
        assert_eq!(settings.tcp_port(), 9000);
    }

    #[test]
    fn test_sync_failure_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let mut settings = Settings::create(&path, test_config()).unwrap();

        std::fs::write(&path, "tcp_port = not-a-number").unwrap();

        assert!(settings.sync().is_err());
        assert_eq!(settings.tcp_port(), 8050);
        assert!(settings.is_router_enabled());
    }

    #[test]
    fn test_set_host_key_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let mut settings = Settings::create(&path, test_config()).unwrap();

        let key = Bytes::from_static(b"rotated-key");
        settings.set_host_key(&key).unwrap();
        assert_eq!(settings.router_parameters().host_key, key);

        // A fresh load must see the rotated key
        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.router_parameters().host_key, key);
    }

    #[test]
    fn test_invalid_hex_key_treated_as_empty() {
        let mut config = test_config();
        config.router.public_key = "zz-not-hex".to_string();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let settings = Settings::create(&path, config).unwrap();
        assert!(settings.router_parameters().public_key.is_empty());
    }

    #[test]
    fn test_persistent_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let settings = Settings::create(&path, test_config()).unwrap();
        let users = settings.persistent_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users.find("alice").unwrap().secret.as_ref(), b"s3cret");
    }
}
