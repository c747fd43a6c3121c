//! Relay router integration: wire protocol, reconnect policy, and the
//! stateful client the orchestrator reconciles against configuration.

pub mod backoff;
pub mod client;
pub mod protocol;

pub use client::{RouterClient, RouterEvent, RouterEventKind};
pub use protocol::{RouterCodec, RouterMessage, ROUTER_PROTOCOL_VERSION};
