//! vantage-host: Remote-access host daemon
//!
//! The host runs on the machine being accessed. It listens for direct
//! TCP connections, maintains an outbound connection to a relay router
//! for peers that cannot reach it directly, authenticates every inbound
//! connection against the configured user list, and tracks live
//! sessions. Configuration changes are picked up at runtime without a
//! restart.

pub mod admission;
pub mod auth;
pub mod firewall;
pub mod orchestrator;
pub mod registry;
pub mod router;

pub use orchestrator::HostOrchestrator;
pub use registry::SessionRegistry;
