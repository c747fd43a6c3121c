//! Host orchestrator
//!
//! Owns the whole control plane: the direct listener, the router client,
//! the authentication coordinator, the session registry, and the
//! configuration watcher. All of it lives on one control task; every
//! event source funnels into a single loop, so no orchestration state is
//! ever touched concurrently. External callers reach the registry
//! through the [`DispatchProxy`] handed out while the host runs.
//!
//! Reconfiguration is reconciliation, not restart: when the settings
//! file changes, the loop re-reads it and adjusts only what differs
//! (user list, router client), leaving live sessions untouched.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vantage_core::config::{ChangeEvent, ConfigWatcher, Settings};
use vantage_core::dispatch::{dispatch_pair, DispatchProxy, DispatchQueue, Job};
use vantage_core::types::RouterState;
use vantage_core::HostError;

use crate::admission::{admit, Ingress};
use crate::auth::{AuthCoordinator, Authenticator, ChallengeAuthenticator, SessionDescriptor};
use crate::firewall::{self, DisabledFirewall, FirewallControl};
use crate::registry::SessionRegistry;
use crate::router::{RouterClient, RouterEvent, RouterEventKind};

/// Capacity of the authenticated-session handoff channel
const SESSION_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the router event channel
const ROUTER_EVENT_CHANNEL_CAPACITY: usize = 32;

/// Everything that exists only while the host is started
struct Running {
    watcher: ConfigWatcher,
    change_rx: mpsc::Receiver<ChangeEvent>,
    auth: AuthCoordinator,
    session_rx: mpsc::Receiver<SessionDescriptor>,
    registry: SessionRegistry,
    registry_queue: DispatchQueue<SessionRegistry>,
    registry_proxy: DispatchProxy<SessionRegistry>,
    listener: TcpListener,
    /// At most one client instance; replaced atomically on parameter
    /// change
    router: Option<RouterClient>,
    router_events_tx: mpsc::Sender<RouterEvent>,
    router_events_rx: mpsc::Receiver<RouterEvent>,
}

/// One unit of work for the control loop
enum Event {
    Accepted(TcpStream),
    AcceptFailed(io::Error),
    Router(RouterEvent),
    Config(ChangeEvent),
    Session(SessionDescriptor),
    RegistryJob(Job<SessionRegistry>),
}

/// What reconciliation decided about the router client
enum RouterAction {
    Keep,
    Create,
    Recreate,
    Destroy,
}

/// The host control plane
pub struct HostOrchestrator {
    settings: Settings,
    firewall: Box<dyn FirewallControl>,
    authenticator: Arc<dyn Authenticator>,
    running: Option<Running>,
    /// Monotonic; bumped on every client creation so events from a
    /// destroyed instance are recognizable
    router_generation: u64,
}

impl HostOrchestrator {
    /// Create an orchestrator with the default collaborators
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            firewall: Box::new(DisabledFirewall),
            authenticator: Arc::new(ChallengeAuthenticator),
            running: None,
            router_generation: 0,
        }
    }

    /// Replace the firewall backend. Only meaningful before `start`.
    pub fn with_firewall(mut self, firewall: Box<dyn FirewallControl>) -> Self {
        self.firewall = firewall;
        self
    }

    /// Replace the authentication collaborator. Only meaningful before
    /// `start`.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Bring the host up.
    ///
    /// Idempotent: a second start while running is a warning, not an
    /// error. Only a listener bind failure is fatal; the firewall rule
    /// and the router connection are best-effort.
    pub async fn start(&mut self) -> Result<(), HostError> {
        if self.running.is_some() {
            warn!("start requested while already running");
            return Ok(());
        }
        info!(config = %self.settings.path().display(), "starting host");

        let (watcher, change_rx) = ConfigWatcher::spawn(
            self.settings.path().to_path_buf(),
            self.settings.watch_interval(),
        );

        let (session_tx, session_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let auth = AuthCoordinator::new(
            Arc::clone(&self.authenticator),
            self.settings.persistent_users(),
            session_tx,
        );

        let registry = SessionRegistry::new();
        let (registry_queue, registry_proxy) = dispatch_pair();

        let port = self.settings.tcp_port();
        firewall::apply_rules(self.firewall.as_mut(), port);

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                firewall::remove_rules(self.firewall.as_mut());
                return Err(HostError::Bind { port, source: e });
            }
        };
        info!(port, "listening for direct connections");

        let (router_events_tx, router_events_rx) = mpsc::channel(ROUTER_EVENT_CHANNEL_CAPACITY);

        self.running = Some(Running {
            watcher,
            change_rx,
            auth,
            session_rx,
            registry,
            registry_queue,
            registry_proxy,
            listener,
            router: None,
            router_events_tx,
            router_events_rx,
        });

        if self.settings.is_router_enabled() {
            self.connect_router();
        }
        Ok(())
    }

    /// Tear the host down: watcher, then authentication, then the
    /// registry, then both ingress paths, then the firewall rule.
    /// Synchronous on the control task, so nothing interleaves.
    ///
    /// Idempotent; safe to call when not running.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("stopping host");

        let Running {
            watcher,
            change_rx,
            auth,
            session_rx,
            registry,
            mut registry_queue,
            registry_proxy,
            listener,
            router,
            router_events_tx,
            router_events_rx,
        } = running;

        // No further configuration events.
        watcher.stop();
        drop(change_rx);

        // Abort in-flight handshakes.
        drop(auth);
        drop(session_rx);

        // Invalidate external registry calls before the registry goes.
        registry_queue.detach();
        drop(registry_proxy);
        drop(registry);

        // Both ingress paths, then the firewall rule.
        drop(router);
        drop(router_events_rx);
        drop(router_events_tx);
        drop(listener);
        firewall::remove_rules(self.firewall.as_mut());

        info!("host stopped");
    }

    /// Re-read the configuration file and adjust the running host.
    ///
    /// An unreadable file leaves the previous settings authoritative.
    /// Live sessions are never touched; only the merged user list and
    /// the router client are reconciled.
    pub fn reconcile(&mut self) {
        if self.running.is_none() {
            return;
        }
        if let Err(e) = self.settings.sync() {
            warn!(error = %e, "configuration re-read failed; keeping previous settings");
            return;
        }
        debug!("reconciling against updated configuration");

        let action = {
            let running = self.running.as_mut().expect("checked above");

            let mut users = self.settings.persistent_users();
            users.merge(&running.registry.ephemeral_users());
            running.auth.set_user_list(users);

            let configured_port = self.settings.tcp_port();
            if configured_port != 0 && configured_port != local_port(&running.listener) {
                // The listener is bound for the host's lifetime; a port
                // change applies on the next start.
                warn!(
                    port = configured_port,
                    "listener port change requires a restart to take effect"
                );
            }

            match (&running.router, self.settings.is_router_enabled()) {
                (None, true) => RouterAction::Create,
                (None, false) => RouterAction::Keep,
                (Some(_), false) => RouterAction::Destroy,
                (Some(client), true) => {
                    if client.params() != &self.settings.router_parameters() {
                        RouterAction::Recreate
                    } else {
                        RouterAction::Keep
                    }
                }
            }
        };

        match action {
            RouterAction::Keep => {}
            RouterAction::Create | RouterAction::Recreate => self.connect_router(),
            RouterAction::Destroy => self.disconnect_router(),
        }
    }

    /// Replace the router client with a fresh instance built from the
    /// current settings. The old instance, if any, is destroyed first.
    fn connect_router(&mut self) {
        let params = self.settings.router_parameters();
        let backoff = self.settings.backoff();
        self.router_generation += 1;
        let generation = self.router_generation;

        let Some(running) = self.running.as_mut() else {
            return;
        };
        if let Some(old) = running.router.take() {
            debug!(generation = old.generation(), "destroying router client");
            drop(old);
        }

        info!(
            address = %params.address,
            port = params.port,
            generation,
            "connecting to the router"
        );
        running.router = Some(RouterClient::connect(
            params,
            generation,
            backoff,
            running.router_events_tx.clone(),
        ));
    }

    /// Destroy the router client, if any, and publish the disabled state
    fn disconnect_router(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if let Some(old) = running.router.take() {
            info!(generation = old.generation(), "router disabled; destroying client");
            drop(old);
            running.registry.set_router_state(RouterState::Disabled);
        }
    }

    /// Wait for the next unit of work from any event source
    async fn next_event(running: &mut Running) -> Event {
        tokio::select! {
            result = running.listener.accept() => match result {
                Ok((stream, _)) => Event::Accepted(stream),
                Err(e) => Event::AcceptFailed(e),
            },
            Some(event) = running.router_events_rx.recv() => Event::Router(event),
            Some(change) = running.change_rx.recv() => Event::Config(change),
            Some(descriptor) = running.session_rx.recv() => Event::Session(descriptor),
            Some(job) = running.registry_queue.recv() => Event::RegistryJob(job),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accepted(stream) => self.handle_ingress(Ingress::Direct(stream)),
            Event::AcceptFailed(e) => {
                warn!(error = %e, "accept failed");
            }
            Event::Router(event) => self.handle_router_event(event),
            Event::Config(change) => {
                if change.error {
                    warn!(
                        path = %change.path.display(),
                        "configuration file unreadable; keeping previous settings"
                    );
                } else {
                    self.reconcile();
                }
            }
            Event::Session(descriptor) => {
                if let Some(running) = self.running.as_mut() {
                    running.registry.add_session(descriptor);
                }
            }
            Event::RegistryJob(job) => {
                if let Some(running) = self.running.as_mut() {
                    running.registry_queue.apply(job, &mut running.registry);
                }
            }
        }
    }

    /// Admit a connection and hand it to authentication; past this point
    /// its origin is gone
    fn handle_ingress(&mut self, ingress: Ingress) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        match admit(ingress) {
            Ok(channel) => running.auth.enqueue(channel),
            Err(e) => warn!(error = %e, "admission failed; dropping connection"),
        }
    }

    fn handle_router_event(&mut self, event: RouterEvent) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let Some(router) = running.router.as_mut() else {
            debug!(generation = event.generation, "event from destroyed router client");
            return;
        };
        if router.generation() != event.generation {
            debug!(
                generation = event.generation,
                current = router.generation(),
                "stale router event"
            );
            return;
        }

        match event.kind {
            RouterEventKind::StateChanged(state) => {
                running.registry.set_router_state(state);
            }
            RouterEventKind::IdentityAssigned {
                identity,
                rotated_key,
            } => {
                if let Some(key) = rotated_key {
                    // Persist before the identity becomes visible; a
                    // failed write is logged but never blocks the
                    // assignment.
                    if let Err(e) = self.settings.set_host_key(&key) {
                        warn!(error = %e, "failed to persist rotated host key");
                    }
                    router.note_rotated_key(key);
                }
                running.registry.set_host_id(identity.host_id);
            }
            RouterEventKind::Relayed(stream) => {
                match admit(Ingress::Relayed(stream)) {
                    Ok(channel) => running.auth.enqueue(channel),
                    Err(e) => warn!(error = %e, "admission failed; dropping relayed connection"),
                }
            }
        }
    }

    /// Process exactly one event. Tests drive the loop with this.
    pub async fn poll_once(&mut self) {
        let event = {
            let Some(running) = self.running.as_mut() else {
                return;
            };
            Self::next_event(running).await
        };
        self.handle_event(event);
    }

    /// Run the control loop until cancelled, then stop the host
    pub async fn run(&mut self, cancel: CancellationToken) {
        while self.running.is_some() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }
        self.stop();
    }

    /// Whether the host is started
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address of the direct listener, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .and_then(|r| r.listener.local_addr().ok())
    }

    /// The router client, while one exists
    pub fn router(&self) -> Option<&RouterClient> {
        self.running.as_ref().and_then(|r| r.router.as_ref())
    }

    /// The session registry, while running
    pub fn registry(&self) -> Option<&SessionRegistry> {
        self.running.as_ref().map(|r| &r.registry)
    }

    /// Proxy for reaching the registry from outside the control task
    pub fn registry_proxy(&self) -> Option<DispatchProxy<SessionRegistry>> {
        self.running.as_ref().map(|r| r.registry_proxy.clone())
    }

    /// Current settings snapshot
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl Drop for HostOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn local_port(listener: &TcpListener) -> u16 {
    listener.local_addr().map(|a| a.port()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_core::config::HostConfig;

    fn disabled_router_settings() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let config = HostConfig {
            tcp_port: 0,
            ..HostConfig::default()
        };
        let settings = Settings::create(&path, config).unwrap();
        (dir, settings)
    }

    #[tokio::test]
    async fn test_start_binds_listener() {
        let (_dir, settings) = disabled_router_settings();
        let mut host = HostOrchestrator::new(settings);

        host.start().await.unwrap();
        assert!(host.is_running());
        assert!(host.local_addr().is_some());
        assert!(host.router().is_none());

        host.stop();
        assert!(!host.is_running());
    }

    #[tokio::test]
    async fn test_double_start_is_benign() {
        let (_dir, settings) = disabled_router_settings();
        let mut host = HostOrchestrator::new(settings);

        host.start().await.unwrap();
        let addr = host.local_addr().unwrap();

        // Second start must not replace the listener.
        host.start().await.unwrap();
        assert_eq!(host.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let (_dir, settings) = disabled_router_settings();
        let mut host = HostOrchestrator::new(settings);
        host.stop();
        host.stop();
        assert!(!host.is_running());
    }

    #[tokio::test]
    async fn test_bind_failure_rolls_back_firewall_rule() {
        use crate::firewall::FIREWALL_RULE_NAME;
        use std::path::Path;
        use std::sync::{Arc as StdArc, Mutex};

        #[derive(Default, Clone)]
        struct SharedRecorder {
            added: StdArc<Mutex<Vec<String>>>,
            deleted: StdArc<Mutex<Vec<String>>>,
        }

        impl FirewallControl for SharedRecorder {
            fn add_tcp_rule(
                &mut self,
                name: &str,
                _description: &str,
                _app_path: &Path,
                _port: u16,
            ) -> anyhow::Result<bool> {
                self.added.lock().unwrap().push(name.to_string());
                Ok(true)
            }

            fn delete_rule(&mut self, name: &str) -> anyhow::Result<()> {
                self.deleted.lock().unwrap().push(name.to_string());
                Ok(())
            }
        }

        // Occupy a port, then configure the host to bind the same one.
        let blocker = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        let config = HostConfig {
            tcp_port: port,
            ..HostConfig::default()
        };
        let settings = Settings::create(&path, config).unwrap();

        let recorder = SharedRecorder::default();
        let mut host =
            HostOrchestrator::new(settings).with_firewall(Box::new(recorder.clone()));

        let result = host.start().await;
        assert!(matches!(result, Err(HostError::Bind { .. })));
        assert!(!host.is_running());

        // The rule added before the bind attempt must be cleaned up.
        assert_eq!(
            recorder.added.lock().unwrap().as_slice(),
            &[FIREWALL_RULE_NAME.to_string()]
        );
        assert_eq!(
            recorder.deleted.lock().unwrap().as_slice(),
            &[FIREWALL_RULE_NAME.to_string()]
        );
    }

    #[tokio::test]
    async fn test_registry_proxy_detached_after_stop() {
        let (_dir, settings) = disabled_router_settings();
        let mut host = HostOrchestrator::new(settings);

        host.start().await.unwrap();
        let proxy = host.registry_proxy().unwrap();
        assert!(!proxy.is_detached());

        host.stop();
        assert!(proxy.is_detached());
        // Posting after teardown is a silent no-op.
        proxy.invoke(|r| {
            r.set_host_id(vantage_core::types::HostId::new(1));
        });
    }
}
