//! Live authentication monitor behaviour.

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use aegis_verify_core::monitor::AuthenticatedPath;
use aegis_verify_core::{
    InMemoryLockupManager, KeyType, LiveAuthenticationMonitor, LockupManager, LogAlertPlayer,
    MonitorDependencies, MonitorState, PlatformEvent, TrustContext, VerificationEvent,
    VerifyConfig, LOCKUP_KEY,
};
use tokio::sync::mpsc;

use crate::support::{assert_quiet, media, next_event, production_config, sign_media, Harness};

fn auth_failed_message(event: VerificationEvent) -> String {
    match event {
        VerificationEvent::AuthFailed { message } => message,
        other => panic!("expected AuthFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsigned_mount_fails_closed_in_production() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "bingo", &[("ball.bin", b"balls")]);

    let mut h = Harness::enabled(production_config());
    h.monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });

    let message = auth_failed_message(h.next_event().await);
    assert!(message.contains("bingo"), "{message}");
    assert!(h.monitor.is_locked());
    assert_eq!(h.lockups.message(LOCKUP_KEY), Some(message));
    assert_eq!(h.alerts.played.lock().unwrap().len(), 1);
    assert!(matches!(
        h.monitor.authenticated_paths()[0].1,
        AuthenticatedPath::Tombstone { .. }
    ));
}

#[tokio::test]
async fn test_unsigned_mount_skipped_in_development() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "bingo", &[("ball.bin", b"balls")]);

    let mut h = Harness::enabled(VerifyConfig::default());
    h.monitor.handle(PlatformEvent::MediaMounted { path });
    assert!(h.monitor.authenticated_paths().is_empty());
    assert!(!h.monitor.is_locked());

    assert!(h.monitor.request_verification());
    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
}

#[tokio::test]
async fn test_only_invalid_path_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let p1 = media(root.path(), "keno", &[("draw.bin", b"draws")]);
    sign_media(&p1, KeyType::Game);
    let p2 = media(root.path(), "craps", &[("dice.bin", b"dice")]);

    let mut h = Harness::enabled(production_config());
    h.monitor.handle(PlatformEvent::MediaMounted { path: p1.clone() });
    h.monitor.handle(PlatformEvent::MediaMounted { path: p2.clone() });

    let at_mount = auth_failed_message(h.next_event().await);
    assert!(at_mount.contains("craps"));

    assert!(h.monitor.request_verification());
    let at_sweep = auth_failed_message(h.next_event().await);
    assert!(at_sweep.contains("craps"), "{at_sweep}");
    assert!(!at_sweep.contains("keno"), "{at_sweep}");
    assert!(h.monitor.is_locked());

    assert_quiet(&mut h.rx, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_failed_mount_supersedes_running_sweep() {
    let root = tempfile::tempdir().unwrap();
    let p1 = media(root.path(), "keno", &[("draw.bin", b"draws")]);
    sign_media(&p1, KeyType::Game);
    let p2 = media(root.path(), "craps", &[("dice.bin", b"dice")]);

    let mut h = Harness::enabled(production_config());
    h.monitor.handle(PlatformEvent::MediaMounted { path: p1 });
    assert!(h.monitor.request_verification());
    assert_eq!(h.monitor.state(), MonitorState::Verifying);

    // The sweep snapshot predates this mount.
    h.monitor.handle(PlatformEvent::MediaMounted { path: p2 });
    assert_eq!(h.monitor.state(), MonitorState::Idle);

    let message = auth_failed_message(h.next_event().await);
    assert!(message.contains("craps"), "{message}");
    assert_eq!(h.next_event().await, VerificationEvent::AuthCanceled);
    assert_quiet(&mut h.rx, Duration::from_millis(200)).await;
    assert!(h.monitor.is_locked());
    assert_eq!(h.lockups.message(LOCKUP_KEY), Some(message));
}

#[tokio::test]
async fn test_recovers_after_content_restored() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "poker", &[("deck.bin", b"52 cards")]);
    sign_media(&path, KeyType::Game);

    let mut h = Harness::enabled(production_config());
    h.monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });
    assert!(!h.monitor.is_locked());

    std::fs::write(path.join("deck.bin"), b"53 cards").unwrap();
    assert!(h.monitor.request_verification());
    let message = auth_failed_message(h.next_event().await);
    assert!(message.contains("poker"));
    assert!(h.monitor.is_locked());
    assert_eq!(h.monitor.state(), MonitorState::Idle);

    std::fs::write(path.join("deck.bin"), b"52 cards").unwrap();
    assert!(h.monitor.request_verification());
    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
}

#[tokio::test]
async fn test_recovers_after_manifest_restored() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "roulette", &[("wheel.bin", b"0-36")]);

    let mut h = Harness::enabled(production_config());
    h.monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });
    auth_failed_message(h.next_event().await);
    assert!(h.monitor.is_locked());

    sign_media(&path, KeyType::Game);
    assert!(h.monitor.request_verification());
    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
    assert!(matches!(
        h.monitor.authenticated_paths()[0].1,
        AuthenticatedPath::Expected(_)
    ));
}

#[tokio::test]
async fn test_unmount_evicts_failing_path() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "slots", &[("reel.bin", b"cherries")]);

    let mut h = Harness::enabled(production_config());
    h.monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });
    auth_failed_message(h.next_event().await);

    h.monitor.handle(PlatformEvent::MediaUnmounted { path });
    assert!(h.monitor.request_verification());
    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
}

#[tokio::test]
async fn test_foreign_lockup_forces_sweep() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "blackjack", &[("shoe.bin", b"six decks")]);
    sign_media(&path, KeyType::Game);

    let mut h = Harness::enabled(VerifyConfig::default());
    h.monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });

    h.lockups.add_lockup("DoorOpen", "Main door open");
    h.monitor.handle(PlatformEvent::LockupAdded {
        key: "DoorOpen".into(),
    });
    assert!(h.monitor.is_locked());
    assert_eq!(h.monitor.state(), MonitorState::Verifying);

    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
    assert!(h.lockups.is_locked_by("DoorOpen"));

    // Already tracked: no second sweep.
    h.monitor.handle(PlatformEvent::LockupAdded {
        key: "DoorOpen".into(),
    });
    assert_quiet(&mut h.rx, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_sole_remaining_lockup_triggers_sweep() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "baccarat", &[("table.bin", b"banker")]);
    sign_media(&path, KeyType::Game);

    let mut h = Harness::enabled(VerifyConfig::default());
    h.monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });

    std::fs::write(path.join("table.bin"), b"player").unwrap();
    for key in ["DoorOpen", "Tilt"] {
        h.lockups.add_lockup(key, key);
        h.monitor.handle(PlatformEvent::LockupAdded { key: key.into() });
    }
    // Second trigger supersedes the first sweep.
    let mut events = vec![h.next_event().await, h.next_event().await];
    events.sort_by_key(|e| matches!(e, VerificationEvent::AuthFailed { .. }));
    assert_eq!(events[0], VerificationEvent::AuthCanceled);
    assert!(matches!(events[1], VerificationEvent::AuthFailed { .. }));
    assert!(h.monitor.is_locked());

    std::fs::write(path.join("table.bin"), b"banker").unwrap();

    h.lockups.remove_lockup("DoorOpen");
    h.monitor.handle(PlatformEvent::LockupRemoved {
        key: "DoorOpen".into(),
    });
    assert_quiet(&mut h.rx, Duration::from_millis(200)).await;

    h.lockups.remove_lockup("Tilt");
    h.monitor.handle(PlatformEvent::LockupRemoved { key: "Tilt".into() });
    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
    assert!(h.lockups.active_lockups().is_empty());
}

#[tokio::test]
async fn test_enable_with_existing_lockup() {
    let lockups = Arc::new(InMemoryLockupManager::new());
    lockups.add_lockup("Jackpot", "Hand pay pending");

    let mut h = Harness::with_lockups(VerifyConfig::default(), lockups);
    h.monitor.enable();
    assert!(h.monitor.is_locked());

    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);
    assert!(!h.monitor.is_locked());
    assert!(h.lockups.is_locked_by("Jackpot"));
}

#[tokio::test]
async fn test_boot_sweep_follows_configuration() {
    let mut h = Harness::enabled(VerifyConfig::default());
    h.monitor.handle(PlatformEvent::PlatformBooted);
    assert_eq!(h.next_event().await, VerificationEvent::AuthComplete);

    let config = VerifyConfig {
        verify_after_reboot: false,
        ..VerifyConfig::default()
    };
    let mut h = Harness::enabled(config);
    h.monitor.handle(PlatformEvent::PlatformBooted);
    assert_quiet(&mut h.rx, Duration::from_millis(200)).await;
    assert_eq!(h.monitor.state(), MonitorState::Idle);
}

#[tokio::test]
async fn test_disable_cancels_sweep_and_releases_lockup() {
    let lockups = Arc::new(InMemoryLockupManager::new());
    lockups.add_lockup("Tilt", "Reel tilt");

    let mut h = Harness::with_lockups(VerifyConfig::default(), lockups);
    h.monitor.enable();
    assert!(h.monitor.is_locked());

    h.monitor.disable();
    assert_eq!(h.monitor.state(), MonitorState::Disabled);
    assert_eq!(h.next_event().await, VerificationEvent::AuthCanceled);
    assert!(!h.monitor.is_locked());
    assert!(h.lockups.is_locked_by("Tilt"));

    h.monitor.disable();
    assert_quiet(&mut h.rx, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_wrong_key_slot_fails() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "os-update", &[("kernel.bin", b"kernel")]);
    sign_media(&path, KeyType::System);

    let other = ed25519_dalek::SigningKey::from_bytes(&[5u8; 32]).verifying_key();
    let trust = TrustContext::new(Some(other), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let lockups = Arc::new(InMemoryLockupManager::new());
    let monitor = LiveAuthenticationMonitor::with_trust(
        production_config(),
        trust,
        MonitorDependencies {
            lockups: lockups.clone(),
            events: Arc::new(tx),
            alerts: Arc::new(LogAlertPlayer),
        },
    )
    .unwrap();
    monitor.enable();

    monitor.handle(PlatformEvent::MediaMounted { path });
    let message = auth_failed_message(next_event(&mut rx).await);
    assert!(message.contains("Signature rejected"), "{message}");
    assert!(lockups.is_locked_by(LOCKUP_KEY));
}

#[tokio::test]
async fn test_run_consumes_platform_events() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "keno", &[("draw.bin", b"20 of 80")]);
    sign_media(&path, KeyType::Game);

    let Harness {
        monitor, mut rx, ..
    } = Harness::enabled(VerifyConfig::default());
    let monitor = Arc::new(monitor);

    let (tx, events) = mpsc::channel(8);
    let driver = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run(events).await })
    };

    tx.send(PlatformEvent::MediaMounted { path: path.clone() }).await.unwrap();
    tx.send(PlatformEvent::PlatformBooted).await.unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        VerificationEvent::AuthComplete
    );
    assert_eq!(monitor.authenticated_paths().len(), 1);

    drop(tx);
    driver.await.unwrap();
}

/// Lockup manager that reads the monitor state from inside its callbacks.
#[derive(Default)]
struct ObservingLockups {
    inner: InMemoryLockupManager,
    monitor: OnceLock<Weak<LiveAuthenticationMonitor>>,
    seen: Mutex<Vec<MonitorState>>,
}

impl ObservingLockups {
    fn observe(&self) {
        if let Some(monitor) = self.monitor.get().and_then(Weak::upgrade) {
            self.seen.lock().unwrap().push(monitor.state());
        }
    }
}

impl LockupManager for ObservingLockups {
    fn add_lockup(&self, key: &str, message: &str) {
        self.observe();
        self.inner.add_lockup(key, message);
    }

    fn remove_lockup(&self, key: &str) {
        self.observe();
        self.inner.remove_lockup(key);
    }

    fn active_lockups(&self) -> Vec<String> {
        self.inner.active_lockups()
    }
}

#[tokio::test]
async fn test_collaborators_may_query_state_when_sweep_ends() {
    let root = tempfile::tempdir().unwrap();
    let path = media(root.path(), "roulette", &[("wheel.bin", b"double zero")]);
    sign_media(&path, KeyType::Game);

    let lockups = Arc::new(ObservingLockups::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = Arc::new(
        LiveAuthenticationMonitor::with_trust(
            production_config(),
            TrustContext::development(),
            MonitorDependencies {
                lockups: lockups.clone(),
                events: Arc::new(tx),
                alerts: Arc::new(LogAlertPlayer),
            },
        )
        .unwrap(),
    );
    lockups.monitor.set(Arc::downgrade(&monitor)).unwrap();
    monitor.enable();
    monitor.handle(PlatformEvent::MediaMounted { path: path.clone() });

    assert!(monitor.request_verification());
    assert_eq!(next_event(&mut rx).await, VerificationEvent::AuthComplete);

    std::fs::write(path.join("wheel.bin"), b"single zero").unwrap();
    assert!(monitor.request_verification());
    assert!(matches!(next_event(&mut rx).await, VerificationEvent::AuthFailed { .. }));
    assert!(monitor.is_locked());

    let seen = lockups.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![MonitorState::Idle, MonitorState::Idle]);
}
