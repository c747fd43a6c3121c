//! vantage-core: Shared abstractions for the Vantage host
//!
//! Domain types, configuration handling (including the change watcher
//! that drives reconciliation), error types, and the dispatch primitive
//! that confines all orchestration state to its owning task.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod types;

pub use error::{ConfigError, HostError, RouterError};
