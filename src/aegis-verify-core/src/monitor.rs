//! Live media authentication.
//!
//! The monitor keeps a cache of mounted paths and the content digest their
//! signed manifests promise. Trust-relevant platform events (boot, lockups
//! raised or cleared by other subsystems) start a sweep that re-hashes
//! every cached path and compares it against the promise. A mismatch holds
//! the platform in lockup until a later sweep succeeds.
//!
//! At most one sweep is in flight: starting a sweep cancels the previous
//! one under the same lock that installs the new handle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use aegis_hash::constant_time_eq;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{SecurityProfile, VerifyConfig};
use crate::error::VerifyError;
use crate::manifest::{content_digest, find_sibling_manifest, newest_manifest, read_verified};
use crate::ports::{AlertPlayer, EventSink, LockupManager};
use crate::trust::TrustContext;
use crate::types::{PlatformEvent, VerificationEvent};

/// Lockup key owned by the monitor.
pub const LOCKUP_KEY: &str = "LiveAuthentication";

const PENDING_MESSAGE: &str = "Verifying media authenticity";

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Not listening to platform events.
    Disabled,
    /// Enabled, no sweep in flight.
    Idle,
    /// Enabled, a sweep is in flight.
    Verifying,
}

/// Cache entry for a mounted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticatedPath {
    /// Digest promised by a verified manifest.
    Expected(String),
    /// No acceptable manifest; fails every sweep until one appears.
    Tombstone {
        /// Why the manifest was rejected.
        reason: String,
    },
}

/// Collaborators the monitor drives.
#[derive(Clone)]
pub struct MonitorDependencies {
    /// Platform lockup manager.
    pub lockups: Arc<dyn LockupManager>,
    /// Sink for authentication lifecycle events.
    pub events: Arc<dyn EventSink>,
    /// Alert sound player.
    pub alerts: Arc<dyn AlertPlayer>,
}

enum SweepOutcome {
    Complete,
    Failed { message: String },
    Cancelled,
}

struct SweepHandle {
    id: u64,
    cancel: CancellationToken,
}

/// Event-driven live authentication monitor.
pub struct LiveAuthenticationMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    config: VerifyConfig,
    trust: Arc<TrustContext>,
    lockups: Arc<dyn LockupManager>,
    events: Arc<dyn EventSink>,
    alerts: Arc<dyn AlertPlayer>,
    runtime: Handle,
    enabled: AtomicBool,
    cache: RwLock<HashMap<PathBuf, AuthenticatedPath>>,
    sweep: Mutex<Option<SweepHandle>>,
    tracked_lockups: Mutex<HashSet<String>>,
    next_sweep_id: AtomicU64,
}

impl LiveAuthenticationMonitor {
    /// Create a monitor, loading trust keys from `config`.
    ///
    /// # Errors
    ///
    /// Returns error if called outside a tokio runtime.
    pub fn new(config: VerifyConfig, deps: MonitorDependencies) -> Result<Self, VerifyError> {
        let trust = TrustContext::load(&config);
        Self::with_trust(config, trust, deps)
    }

    /// Create a monitor over an already loaded trust context.
    ///
    /// In the fully locked profile the platform directory is seeded into
    /// the cache, keyed to the newest platform manifest.
    ///
    /// # Errors
    ///
    /// Returns error if called outside a tokio runtime.
    pub fn with_trust(
        config: VerifyConfig,
        trust: TrustContext,
        deps: MonitorDependencies,
    ) -> Result<Self, VerifyError> {
        let runtime = Handle::try_current().map_err(|e| VerifyError::ConfigError {
            message: format!("Live authentication needs a tokio runtime: {e}"),
        })?;

        let inner = Arc::new(Inner {
            config,
            trust: Arc::new(trust),
            lockups: deps.lockups,
            events: deps.events,
            alerts: deps.alerts,
            runtime,
            enabled: AtomicBool::new(false),
            cache: RwLock::new(HashMap::new()),
            sweep: Mutex::new(None),
            tracked_lockups: Mutex::new(HashSet::new()),
            next_sweep_id: AtomicU64::new(0),
        });

        if inner.config.security_profile == SecurityProfile::FullyLocked {
            inner.seed_platform_path();
        }

        Ok(Self { inner })
    }

    /// Start reacting to platform events. If another subsystem already
    /// holds a lockup, the monitor raises its own and sweeps.
    pub fn enable(&self) {
        let inner = &self.inner;
        if inner.enabled.swap(true, Ordering::SeqCst) {
            debug!("Live authentication already enabled");
            return;
        }
        info!(profile = ?inner.config.security_profile, "Live authentication enabled");

        let others: HashSet<String> = inner
            .lockups
            .active_lockups()
            .into_iter()
            .filter(|key| key != LOCKUP_KEY)
            .collect();
        let locked_by_other = !others.is_empty();
        *inner.tracked() = others;

        if locked_by_other {
            info!("Platform already locked; verifying before trusting media");
            inner.lockups.add_lockup(LOCKUP_KEY, PENDING_MESSAGE);
            inner.start_sweep();
        }
    }

    /// Stop reacting to platform events and cancel any sweep. Safe to call
    /// repeatedly and before [`enable`](Self::enable).
    pub fn disable(&self) {
        let inner = &self.inner;
        let was_enabled = inner.enabled.swap(false, Ordering::SeqCst);
        inner.tracked().clear();

        if let Some(sweep) = inner.sweep_slot().take() {
            info!(sweep_id = sweep.id, "Cancelling live authentication sweep");
            sweep.cancel.cancel();
        }

        if was_enabled {
            info!("Live authentication disabled");
        }
    }

    /// Apply one platform event. Ignored while disabled.
    #[instrument(skip(self))]
    pub fn handle(&self, event: PlatformEvent) {
        let inner = &self.inner;
        if !inner.enabled.load(Ordering::SeqCst) {
            debug!("Live authentication disabled; event ignored");
            return;
        }

        match event {
            PlatformEvent::MediaMounted { path } => inner.add_authenticated_path(&path),
            PlatformEvent::MediaUnmounted { path } => {
                if inner.cache_write().remove(&path).is_some() {
                    info!(path = ?path, "Authenticated path removed");
                }
            },
            PlatformEvent::PlatformBooted => {
                if inner.config.verify_after_reboot {
                    inner.start_sweep();
                }
            },
            PlatformEvent::LockupAdded { key } => {
                if key == LOCKUP_KEY {
                    return;
                }
                if inner.tracked().insert(key.clone()) {
                    info!(lockup = %key, "Lockup raised elsewhere; re-verifying media");
                    inner.lockups.add_lockup(LOCKUP_KEY, PENDING_MESSAGE);
                    inner.start_sweep();
                }
            },
            PlatformEvent::LockupRemoved { key } => {
                if key == LOCKUP_KEY {
                    return;
                }
                inner.tracked().remove(&key);
                let remaining = inner.lockups.active_lockups();
                if remaining.len() == 1 && remaining[0] == LOCKUP_KEY {
                    info!(lockup = %key, "Only live authentication lockup remains; re-verifying");
                    inner.start_sweep();
                }
            },
        }
    }

    /// Start a sweep now. Returns `false` while disabled.
    pub fn request_verification(&self) -> bool {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.start_sweep();
        true
    }

    /// Drive the monitor from a channel until it closes.
    pub async fn run(&self, mut events: mpsc::Receiver<PlatformEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("Platform event channel closed");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            MonitorState::Disabled
        } else if self.inner.sweep_slot().is_some() {
            MonitorState::Verifying
        } else {
            MonitorState::Idle
        }
    }

    /// Whether the monitor's lockup is raised.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.lockups.is_locked_by(LOCKUP_KEY)
    }

    /// Copy of the authenticated-path cache.
    #[must_use]
    pub fn authenticated_paths(&self) -> Vec<(PathBuf, AuthenticatedPath)> {
        let mut paths: Vec<_> = self
            .inner
            .cache_read()
            .iter()
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));
        paths
    }
}

impl Drop for LiveAuthenticationMonitor {
    fn drop(&mut self) {
        if let Some(sweep) = self.inner.sweep_slot().take() {
            sweep.cancel.cancel();
        }
    }
}

impl Inner {
    fn add_authenticated_path(&self, path: &Path) {
        match resolve_expected(path, &self.trust) {
            Ok(expected) => {
                info!(path = ?path, "Authenticated path added");
                self.cache_write()
                    .insert(path.to_path_buf(), AuthenticatedPath::Expected(expected));
            },
            Err(e) if !self.config.security_profile.is_production() => {
                warn!(path = ?path, error = %e, "No trusted manifest; path not authenticated");
            },
            Err(e) => {
                let reason = e.to_string();
                self.cache_write().insert(
                    path.to_path_buf(),
                    AuthenticatedPath::Tombstone {
                        reason: reason.clone(),
                    },
                );
                // A sweep in flight never saw this path; it must not release the lockup.
                if let Some(sweep) = self.sweep_slot().take() {
                    debug!(sweep_id = sweep.id, "Superseding sweep after failed mount");
                    sweep.cancel.cancel();
                }
                self.fail(&format!("{}: {}", path.display(), reason));
            },
        }
    }

    fn seed_platform_path(&self) {
        let platform_dir = match self.config.platform_dir.clone().or_else(executable_dir) {
            Some(dir) => dir,
            None => {
                error!("Cannot locate the platform directory");
                return;
            },
        };

        let manifest = match &self.config.platform_manifest_dir {
            Some(dir) => newest_manifest(dir),
            None => find_sibling_manifest(&platform_dir),
        };

        let entry = manifest
            .ok_or_else(|| VerifyError::ManifestMissing {
                path: platform_dir.clone(),
            })
            .and_then(|m| read_verified(&m, &self.trust))
            .map_or_else(
                |e| AuthenticatedPath::Tombstone {
                    reason: e.to_string(),
                },
                |verified| AuthenticatedPath::Expected(verified.expected_hash),
            );

        info!(path = ?platform_dir, entry = ?entry, "Seeded platform path");
        self.cache_write().insert(platform_dir, entry);
    }

    fn start_sweep(self: &Arc<Self>) {
        let id = self.next_sweep_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let mut slot = self.sweep_slot();
        if let Some(previous) = slot.take() {
            debug!(sweep_id = previous.id, "Superseding live authentication sweep");
            previous.cancel.cancel();
        }

        let inner = Arc::clone(self);
        let token = cancel.clone();
        self.runtime.spawn(async move { inner.sweep(id, token).await });
        *slot = Some(SweepHandle { id, cancel });
    }

    async fn sweep(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        let entries: Vec<(PathBuf, AuthenticatedPath)> = self
            .cache_read()
            .iter()
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        info!(sweep_id = id, paths = entries.len(), "Live authentication sweep started");

        let outcome = tokio::select! {
            () = cancel.cancelled() => SweepOutcome::Cancelled,
            outcome = self.check_all(entries) => outcome,
        };
        self.finish_sweep(id, outcome);
    }

    async fn check_all(&self, entries: Vec<(PathBuf, AuthenticatedPath)>) -> SweepOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism()));
        let mut tasks = JoinSet::new();

        for (path, entry) in entries {
            let trust = Arc::clone(&self.trust);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || check_entry(&task_path, &entry, &trust))
                    .await
                    .map_err(|e| VerifyError::internal(format!("sweep worker failed: {e}")))
                    .and_then(|checked| checked);
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(upgraded))) => {
                    debug!(path = ?path, "Path authenticated");
                    if let Some(expected) = upgraded {
                        self.upgrade_tombstone(&path, expected);
                    }
                },
                Ok((path, Err(e))) => {
                    tasks.abort_all();
                    return SweepOutcome::Failed {
                        message: format!("{}: {}", path.display(), e),
                    };
                },
                Err(e) => {
                    tasks.abort_all();
                    return SweepOutcome::Failed {
                        message: format!("sweep worker failed: {e}"),
                    };
                },
            }
        }
        SweepOutcome::Complete
    }

    fn finish_sweep(&self, id: u64, outcome: SweepOutcome) {
        let current = {
            let mut slot = self.sweep_slot();
            let current = slot.as_ref().map(|s| s.id) == Some(id);
            if current {
                *slot = None;
            }
            current
        };

        if !current {
            info!(sweep_id = id, "Live authentication sweep cancelled");
            if !self.enabled.load(Ordering::SeqCst) {
                self.lockups.remove_lockup(LOCKUP_KEY);
            }
            self.events.publish(VerificationEvent::AuthCanceled);
            return;
        }

        match outcome {
            SweepOutcome::Complete => {
                if let Some(path) = self.first_tombstone() {
                    warn!(sweep_id = id, path = ?path, "Untrusted path still mounted; lockup kept");
                    self.events.publish(VerificationEvent::AuthCanceled);
                    return;
                }
                info!(sweep_id = id, "Live authentication sweep complete");
                self.lockups.remove_lockup(LOCKUP_KEY);
                self.events.publish(VerificationEvent::AuthComplete);
            },
            SweepOutcome::Failed { message } => self.fail(&message),
            SweepOutcome::Cancelled => {
                info!(sweep_id = id, "Live authentication sweep cancelled");
                self.events.publish(VerificationEvent::AuthCanceled);
            },
        }
    }

    fn first_tombstone(&self) -> Option<PathBuf> {
        self.cache_read()
            .iter()
            .find(|(_, entry)| matches!(entry, AuthenticatedPath::Tombstone { .. }))
            .map(|(path, _)| path.clone())
    }

    fn fail(&self, message: &str) {
        error!(severity = "fatal", reason = %message, "Live authentication failed");
        self.lockups.add_lockup(LOCKUP_KEY, message);
        if let Some(sound) = &self.config.alert_sound {
            self.alerts.play(sound);
        }
        self.events.publish(VerificationEvent::AuthFailed {
            message: message.to_string(),
        });
    }

    fn upgrade_tombstone(&self, path: &Path, expected: String) {
        let mut cache = self.cache_write();
        if let Some(entry @ AuthenticatedPath::Tombstone { .. }) = cache.get_mut(path) {
            info!(path = ?path, "Manifest now trusted; tombstone replaced");
            *entry = AuthenticatedPath::Expected(expected);
        }
    }

    fn cache_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, AuthenticatedPath>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, AuthenticatedPath>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep_slot(&self) -> MutexGuard<'_, Option<SweepHandle>> {
        self.sweep.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracked(&self) -> MutexGuard<'_, HashSet<String>> {
        self.tracked_lockups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Expected digest for `path` from its verified sibling manifest.
fn resolve_expected(path: &Path, trust: &TrustContext) -> Result<String, VerifyError> {
    let manifest = find_sibling_manifest(path).ok_or_else(|| VerifyError::ManifestMissing {
        path: path.to_path_buf(),
    })?;
    Ok(read_verified(&manifest, trust)?.expected_hash)
}

/// Check one cached path against live content. Tombstones get one more
/// manifest lookup; `Ok(Some(_))` carries the digest that replaced one.
fn check_entry(
    path: &Path,
    entry: &AuthenticatedPath,
    trust: &TrustContext,
) -> Result<Option<String>, VerifyError> {
    let (expected, upgraded) = match entry {
        AuthenticatedPath::Expected(expected) => (expected.clone(), None),
        AuthenticatedPath::Tombstone { .. } => {
            let expected = resolve_expected(path, trust)?;
            (expected.clone(), Some(expected))
        },
    };

    if expected.is_empty() {
        return Err(VerifyError::HashMismatch {
            path: path.to_path_buf(),
        });
    }

    let actual = content_digest(path)?;
    if !constant_time_eq(actual.as_bytes(), expected.as_bytes()) {
        return Err(VerifyError::HashMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(upgraded)
}

fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
