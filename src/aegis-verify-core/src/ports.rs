//! Interfaces to external collaborators.
//!
//! The verification core reads components from a catalog, queries
//! hardware through a device registry and an OS partition service, drives
//! a lockup manager, and reports through an event sink. Platform
//! integrations implement these traits; the in-memory implementations
//! below back the CLI and tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::VerifyError;
use crate::types::{Component, FirmwareKind, HardwareSource, VerificationEvent};

/// Live enumeration of installed components.
pub trait ComponentCatalog: Send + Sync {
    /// All known components.
    fn components(&self) -> Vec<Component>;

    /// Look up a component by id.
    fn component(&self, id: &str) -> Option<Component> {
        self.components().into_iter().find(|c| c.id == id)
    }
}

/// A peripheral that can compute a CRC over its own firmware.
#[async_trait]
pub trait CrcDevice: Send + Sync {
    /// Compute the firmware CRC-32 starting from `seed`.
    async fn calculate_crc(&self, seed: u32) -> Result<u32, VerifyError>;
}

/// Access to connected peripherals.
pub trait DeviceRegistry: Send + Sync {
    /// The CRC-capable device behind `source`, if connected.
    fn crc_device(&self, source: HardwareSource) -> Option<Arc<dyn CrcDevice>>;
}

/// Operating system partition data.
pub trait OsPartitionService: Send + Sync {
    /// The operating system hash blob.
    fn operating_system_hash(&self) -> Result<Vec<u8>, VerifyError>;

    /// Raw firmware image bytes.
    fn firmware_image(&self, kind: FirmwareKind) -> Result<Vec<u8>, VerifyError>;
}

/// Platform-wide disable conditions, keyed by owner.
pub trait LockupManager: Send + Sync {
    /// Raise (or re-raise with a new message) the lockup for `key`.
    fn add_lockup(&self, key: &str, message: &str);

    /// Clear the lockup for `key`.
    fn remove_lockup(&self, key: &str);

    /// Keys of all active lockups.
    fn active_lockups(&self) -> Vec<String>;

    /// Whether `key` currently holds a lockup.
    fn is_locked_by(&self, key: &str) -> bool {
        self.active_lockups().iter().any(|k| k == key)
    }

    /// Whether any key other than `key` holds a lockup.
    fn is_locked_by_other(&self, key: &str) -> bool {
        self.active_lockups().iter().any(|k| k != key)
    }
}

/// Receiver of verification events.
pub trait EventSink: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: VerificationEvent);
}

impl EventSink for mpsc::UnboundedSender<VerificationEvent> {
    fn publish(&self, event: VerificationEvent) {
        if self.send(event).is_err() {
            debug!("Event receiver dropped; discarding event");
        }
    }
}

/// Audible alerts.
pub trait AlertPlayer: Send + Sync {
    /// Play the sound file at `sound`.
    fn play(&self, sound: &Path);
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Catalog backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    components: Vec<Component>,
}

impl StaticCatalog {
    /// Catalog over `components`.
    #[must_use]
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// Load a JSON array of components.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let data = std::fs::read_to_string(path).map_err(|e| VerifyError::ConfigError {
            message: format!("Cannot read catalog {}: {}", path.display(), e),
        })?;
        let components: Vec<Component> =
            serde_json::from_str(&data).map_err(|e| VerifyError::ConfigError {
                message: format!("Cannot parse catalog {}: {}", path.display(), e),
            })?;
        Ok(Self::new(components))
    }
}

impl ComponentCatalog for StaticCatalog {
    fn components(&self) -> Vec<Component> {
        self.components.clone()
    }
}

/// Lockup manager holding keys and messages in memory.
#[derive(Debug, Default)]
pub struct InMemoryLockupManager {
    lockups: RwLock<BTreeMap<String, String>>,
}

impl InMemoryLockupManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Message attached to `key`'s lockup.
    #[must_use]
    pub fn message(&self, key: &str) -> Option<String> {
        self.lockups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl LockupManager for InMemoryLockupManager {
    fn add_lockup(&self, key: &str, message: &str) {
        info!(key = %key, message = %message, "Lockup raised");
        self.lockups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), message.to_string());
    }

    fn remove_lockup(&self, key: &str) {
        if self
            .lockups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
        {
            info!(key = %key, "Lockup cleared");
        }
    }

    fn active_lockups(&self) -> Vec<String> {
        self.lockups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// Host without peripherals or an OS partition service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardware;

impl DeviceRegistry for NoHardware {
    fn crc_device(&self, _source: HardwareSource) -> Option<Arc<dyn CrcDevice>> {
        None
    }
}

impl OsPartitionService for NoHardware {
    fn operating_system_hash(&self) -> Result<Vec<u8>, VerifyError> {
        Err(VerifyError::DeviceUnavailable {
            device: HardwareSource::OperatingSystem.name().to_string(),
        })
    }

    fn firmware_image(&self, kind: FirmwareKind) -> Result<Vec<u8>, VerifyError> {
        let device = match kind {
            FirmwareKind::Fpga => HardwareSource::Fpga,
            FirmwareKind::Bios => HardwareSource::Bios,
        };
        Err(VerifyError::DeviceUnavailable {
            device: device.name().to_string(),
        })
    }
}

/// Alert player that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertPlayer;

impl AlertPlayer for LogAlertPlayer {
    fn play(&self, sound: &Path) {
        warn!(sound = ?sound, "Alert sound requested");
    }
}
