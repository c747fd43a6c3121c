//! Firewall rule boundary
//!
//! Rule management is best-effort everywhere: neither a missing
//! platform backend, an unresolvable executable path, nor a failed rule
//! operation may abort host startup or shutdown. Add and delete are
//! both safe to call regardless of whether the rule currently exists.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, warn};

/// Well-known name of the single inbound rule this host manages
pub const FIREWALL_RULE_NAME: &str = "Vantage Host Service";

/// Description attached to the rule
pub const FIREWALL_RULE_DESCRIPTION: &str = "Allow incoming TCP connections";

/// Platform firewall backend.
///
/// The actual rule mechanics live behind this trait; the host only
/// requires idempotent add/delete of one named TCP rule bound to the
/// running executable.
pub trait FirewallControl: Send {
    /// Add an inbound TCP rule. Returns `false` when the backend is
    /// present but declined the rule. Must be idempotent.
    fn add_tcp_rule(
        &mut self,
        name: &str,
        description: &str,
        app_path: &Path,
        port: u16,
    ) -> Result<bool>;

    /// Delete a rule by name. Must be idempotent; deleting an absent
    /// rule is not an error.
    fn delete_rule(&mut self, name: &str) -> Result<()>;
}

/// Backend used when no platform integration is available
#[derive(Debug, Default)]
pub struct DisabledFirewall;

impl FirewallControl for DisabledFirewall {
    fn add_tcp_rule(
        &mut self,
        name: &str,
        _description: &str,
        _app_path: &Path,
        _port: u16,
    ) -> Result<bool> {
        debug!(rule = name, "no firewall backend; rule not installed");
        Ok(false)
    }

    fn delete_rule(&mut self, name: &str) -> Result<()> {
        debug!(rule = name, "no firewall backend; nothing to delete");
        Ok(())
    }
}

/// Install the host's inbound rule. Best-effort.
pub fn apply_rules(firewall: &mut dyn FirewallControl, port: u16) {
    let app_path = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            warn!(error = %e, "cannot resolve executable path; skipping firewall rule");
            return;
        }
    };

    match firewall.add_tcp_rule(FIREWALL_RULE_NAME, FIREWALL_RULE_DESCRIPTION, &app_path, port) {
        Ok(true) => info!(port, "rule added to the firewall"),
        Ok(false) => debug!(port, "firewall rule not installed"),
        Err(e) => warn!(error = %e, "failed to add firewall rule"),
    }
}

/// Remove the host's inbound rule. Best-effort.
pub fn remove_rules(firewall: &mut dyn FirewallControl) {
    if let Err(e) = firewall.delete_rule(FIREWALL_RULE_NAME) {
        warn!(error = %e, "failed to delete firewall rule");
    }
}
