//! Core error types for Vantage

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can fail host startup.
///
/// Deliberately small: every other failure in the control plane is
/// non-fatal by contract (logged, state published, or retried) and
/// never surfaces as an error.
#[derive(Error, Debug)]
pub enum HostError {
    /// The direct listener could not be bound
    #[error("Failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Router-connection errors
#[derive(Error, Debug)]
pub enum RouterError {
    /// Connection attempt failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost after establishment
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Malformed control frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error on the control connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
