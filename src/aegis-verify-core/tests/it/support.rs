//! Shared fixtures.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aegis_verify_core::manifest::content_digest;
use aegis_verify_core::trust::development_signing_key;
use aegis_verify_core::{
    AlertPlayer, ImageManifest, InMemoryLockupManager, KeyType, LiveAuthenticationMonitor,
    MonitorDependencies, SecurityProfile, TrustContext, VerificationEvent, VerifyConfig,
};
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Next event, failing the test if none arrives in time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<VerificationEvent>) -> VerificationEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert no event arrives within `wait`.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<VerificationEvent>, wait: Duration) {
    if let Ok(event) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected event {event:?}");
    }
}

/// Create a media directory with the given files.
pub fn media(root: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for (file, content) in files {
        std::fs::write(dir.join(file), content).unwrap();
    }
    dir
}

/// Write a development-signed sibling manifest for the current content.
pub fn sign_media(path: &Path, key_type: KeyType) {
    let digest = content_digest(path).unwrap();
    let name = path.file_stem().unwrap().to_string_lossy().into_owned();
    let manifest_path = path.with_extension("manifest");
    ImageManifest::sign(name, "1.0.0", key_type, digest, &development_signing_key())
        .write(&manifest_path)
        .unwrap();
}

pub fn production_config() -> VerifyConfig {
    VerifyConfig {
        security_profile: SecurityProfile::Production,
        alert_sound: Some(PathBuf::from("/sounds/tilt.wav")),
        ..VerifyConfig::default()
    }
}

/// Alert player that remembers what it played.
#[derive(Default)]
pub struct RecordingAlerts {
    pub played: Mutex<Vec<PathBuf>>,
}

impl AlertPlayer for RecordingAlerts {
    fn play(&self, sound: &Path) {
        self.played.lock().unwrap().push(sound.to_path_buf());
    }
}

pub struct Harness {
    pub monitor: LiveAuthenticationMonitor,
    pub lockups: Arc<InMemoryLockupManager>,
    pub alerts: Arc<RecordingAlerts>,
    pub rx: mpsc::UnboundedReceiver<VerificationEvent>,
}

impl Harness {
    /// Monitor trusting the development key, not yet enabled.
    pub fn new(config: VerifyConfig) -> Self {
        Self::with_lockups(config, Arc::new(InMemoryLockupManager::new()))
    }

    pub fn with_lockups(config: VerifyConfig, lockups: Arc<InMemoryLockupManager>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let alerts = Arc::new(RecordingAlerts::default());
        let deps = MonitorDependencies {
            lockups: lockups.clone(),
            events: Arc::new(tx),
            alerts: alerts.clone(),
        };
        let monitor =
            LiveAuthenticationMonitor::with_trust(config, TrustContext::development(), deps).unwrap();
        Self {
            monitor,
            lockups,
            alerts,
            rx,
        }
    }

    /// Monitor that is already enabled.
    pub fn enabled(config: VerifyConfig) -> Self {
        let harness = Self::new(config);
        harness.monitor.enable();
        harness
    }

    pub async fn next_event(&mut self) -> VerificationEvent {
        next_event(&mut self.rx).await
    }
}
