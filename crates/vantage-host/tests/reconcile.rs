//! Configuration reconciliation against a running host

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{timeout, Instant};

use vantage_core::config::{save_config, BackoffConfig, HostConfig, RouterConfig, Settings, UserEntry};
use vantage_core::types::RouterState;
use vantage_host::HostOrchestrator;

const WAIT: Duration = Duration::from_secs(10);

fn base_config() -> HostConfig {
    HostConfig {
        tcp_port: 0,
        backoff: BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        },
        watch_interval: Duration::from_secs(1),
        ..HostConfig::default()
    }
}

fn enabled_router(port: u16) -> RouterConfig {
    RouterConfig {
        enabled: true,
        address: "127.0.0.1".to_string(),
        port,
        public_key: "aabbcc".to_string(),
        host_key: String::new(),
    }
}

async fn started_host(config: HostConfig) -> (TempDir, HostOrchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.toml");
    let settings = Settings::create(&path, config).unwrap();
    let mut host = HostOrchestrator::new(settings);
    host.start().await.unwrap();
    (dir, host)
}

fn rewrite(dir: &TempDir, config: &HostConfig) {
    save_config(&dir.path().join("host.toml"), config).unwrap();
}

/// Drive the control loop until the predicate holds
async fn drive_until(
    host: &mut HostOrchestrator,
    what: &str,
    predicate: impl Fn(&HostOrchestrator) -> bool,
) {
    let deadline = Instant::now() + WAIT;
    while !predicate(host) {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        let _ = timeout(Duration::from_millis(50), host.poll_once()).await;
    }
}

#[tokio::test]
async fn test_enabling_router_creates_client_from_file() {
    let (dir, mut host) = started_host(base_config()).await;
    assert!(host.router().is_none());

    let mut config = base_config();
    config.router = enabled_router(8061);
    rewrite(&dir, &config);
    host.reconcile();

    let client = host.router().expect("client created");
    assert_eq!(client.params().address, "127.0.0.1");
    assert_eq!(client.params().port, 8061);
    assert_eq!(client.params().public_key.as_ref(), &[0xaa, 0xbb, 0xcc]);
}

#[tokio::test]
async fn test_parameter_change_recreates_client_exactly_once() {
    let mut config = base_config();
    config.router = enabled_router(8061);
    let (dir, mut host) = started_host(config).await;

    let before = host.router().unwrap().generation();

    let mut changed = base_config();
    changed.router = enabled_router(8062);
    rewrite(&dir, &changed);
    host.reconcile();

    let client = host.router().unwrap();
    assert_eq!(client.generation(), before + 1);
    // Unchanged fields are preserved.
    assert_eq!(client.params().address, "127.0.0.1");
    assert_eq!(client.params().public_key.as_ref(), &[0xaa, 0xbb, 0xcc]);
    assert_eq!(client.params().port, 8062);
}

#[tokio::test]
async fn test_identical_rewrite_leaves_client_alone() {
    let mut config = base_config();
    config.router = enabled_router(8061);
    let (dir, mut host) = started_host(config.clone()).await;

    let before = host.router().unwrap().generation();

    // Byte-for-byte identical settings: a client would observe a
    // disconnect if the instance were replaced, so it must not be.
    rewrite(&dir, &config);
    host.reconcile();
    host.reconcile();

    assert_eq!(host.router().unwrap().generation(), before);
}

#[tokio::test]
async fn test_disabling_router_destroys_client_and_publishes_state() {
    let mut config = base_config();
    config.router = enabled_router(8061);
    let (dir, mut host) = started_host(config).await;
    assert!(host.router().is_some());

    let transitions_before = host.registry().unwrap().router_transitions();

    rewrite(&dir, &base_config());
    host.reconcile();

    assert!(host.router().is_none());
    let registry = host.registry().unwrap();
    assert_eq!(registry.router_state(), RouterState::Disabled);
    assert_eq!(registry.router_transitions(), transitions_before + 1);

    // A second pass with the router still disabled publishes nothing.
    host.reconcile();
    assert_eq!(
        host.registry().unwrap().router_transitions(),
        transitions_before + 1
    );
}

#[tokio::test]
async fn test_unreadable_file_keeps_previous_settings() {
    let mut config = base_config();
    config.router = enabled_router(8061);
    config.users = vec![UserEntry {
        name: "alice".to_string(),
        secret: "s3cret".to_string(),
    }];
    let (dir, mut host) = started_host(config).await;

    std::fs::write(dir.path().join("host.toml"), "router = not-a-table").unwrap();
    host.reconcile();

    // Previous snapshot stays authoritative: the client survives.
    let client = host.router().expect("client kept");
    assert_eq!(client.params().port, 8061);
}

#[tokio::test]
async fn test_watcher_triggers_reconciliation() {
    let (dir, mut host) = started_host(base_config()).await;
    assert!(host.router().is_none());

    // Let the watcher record its baseline before the edit.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Only the file edit; the watcher and control loop do the rest.
    let mut config = base_config();
    config.router = enabled_router(8061);
    rewrite(&dir, &config);

    drive_until(&mut host, "router client", |h| h.router().is_some()).await;
    assert_eq!(host.router().unwrap().params().port, 8061);
}
