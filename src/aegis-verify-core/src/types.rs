//! Component, verification record and event types.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aegis_hash::{HashAlgorithm, HashParameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a component's bytes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A single file.
    File,
    /// A directory fingerprinted as one unit.
    Directory,
    /// Hardware-resident content (OS partition, device firmware).
    Hardware,
}

/// Logical role of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// Operating system image.
    OperatingSystem,
    /// Platform module.
    Module,
    /// Installed package (game, media).
    Package,
    /// Peripheral hardware.
    Hardware,
    /// Board firmware.
    Firmware,
    /// Anything else.
    Other,
}

impl ComponentType {
    /// Whether components of this type ship a sibling manifest.
    #[must_use]
    pub fn carries_manifest(&self) -> bool {
        matches!(self, Self::Module | Self::Package)
    }
}

/// A unit subject to integrity verification, as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Unique component id.
    pub id: String,
    /// Storage kind.
    pub kind: ComponentKind,
    /// Filesystem path, or a hardware source name for hardware components.
    pub path: String,
    /// Logical type.
    pub component_type: ComponentType,
}

impl Component {
    /// Create a component description.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: ComponentKind,
        path: impl Into<String>,
        component_type: ComponentType,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            path: path.into(),
            component_type,
        }
    }
}

/// Where a hardware component's fingerprint comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareSource {
    /// Operating system partition hash blob.
    OperatingSystem,
    /// Printer firmware CRC.
    Printer,
    /// Note acceptor firmware CRC.
    NoteAcceptor,
    /// FPGA firmware image.
    Fpga,
    /// BIOS firmware image.
    Bios,
}

impl HardwareSource {
    /// Map a hardware component path to its source. The last path segment
    /// is matched case-insensitively, ignoring `-` and `_`.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let name: String = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path)
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        match name.as_str() {
            "os" | "operatingsystem" => Some(Self::OperatingSystem),
            "printer" => Some(Self::Printer),
            "noteacceptor" => Some(Self::NoteAcceptor),
            "fpga" => Some(Self::Fpga),
            "bios" => Some(Self::Bios),
            _ => None,
        }
    }

    /// Device name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OperatingSystem => "operating-system",
            Self::Printer => "printer",
            Self::NoteAcceptor => "note-acceptor",
            Self::Fpga => "fpga",
            Self::Bios => "bios",
        }
    }
}

/// Firmware image held in memory by the OS partition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareKind {
    /// FPGA image.
    Fpga,
    /// BIOS image.
    Bios,
}

/// A computed digest and when it was computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResult {
    /// Digest bytes.
    #[serde(with = "hex::serde")]
    pub digest: Vec<u8>,
    /// Completion time.
    pub computed_at: DateTime<Utc>,
}

/// Point-in-time copy of a verification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSnapshot {
    /// Component id.
    pub component_id: String,
    /// Parameters the record is configured with.
    pub parameters: HashParameters,
    /// Digest computed under exactly those parameters, if any.
    pub result: Option<HashResult>,
}

#[derive(Debug, Clone)]
struct VerificationState {
    parameters: HashParameters,
    result: Option<HashResult>,
}

/// Fingerprint record for one component.
///
/// Parameters and result live under one lock: reconfiguring clears the
/// result in the same write, and a result is only stored if the
/// parameters it was computed under are still current. Readers therefore
/// never see a digest that belongs to other parameters.
#[derive(Debug)]
pub struct ComponentVerification {
    component_id: String,
    state: RwLock<VerificationState>,
}

impl ComponentVerification {
    /// New record with whole-stream SHA-1 parameters and no result.
    #[must_use]
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            state: RwLock::new(VerificationState {
                parameters: HashParameters::new(HashAlgorithm::Sha1),
                result: None,
            }),
        }
    }

    /// Component id.
    #[must_use]
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Current parameters.
    #[must_use]
    pub fn parameters(&self) -> HashParameters {
        self.read().parameters.clone()
    }

    /// Last result, if one was computed under the current parameters.
    #[must_use]
    pub fn result(&self) -> Option<HashResult> {
        self.read().result.clone()
    }

    /// Consistent copy of parameters and result.
    #[must_use]
    pub fn snapshot(&self) -> VerificationSnapshot {
        let state = self.read();
        VerificationSnapshot {
            component_id: self.component_id.clone(),
            parameters: state.parameters.clone(),
            result: state.result.clone(),
        }
    }

    /// Replace the parameters and clear any stale result.
    pub fn reconfigure(&self, parameters: HashParameters) {
        let mut state = self.write();
        state.parameters = parameters;
        state.result = None;
    }

    /// Store a digest computed under `parameters`.
    ///
    /// Returns `false` (and stores nothing) if the record has been
    /// reconfigured since the computation started.
    pub fn record_result(&self, parameters: &HashParameters, digest: Vec<u8>) -> bool {
        let mut state = self.write();
        if state.parameters != *parameters {
            return false;
        }
        state.result = Some(HashResult {
            digest,
            computed_at: Utc::now(),
        });
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, VerificationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VerificationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Events published by the registry and the live monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VerificationEvent {
    /// One component's digest was computed.
    HashComplete {
        /// The updated record.
        verification: VerificationSnapshot,
    },
    /// One component could not be fingerprinted.
    HashError {
        /// The record at the time of failure.
        verification: VerificationSnapshot,
        /// Failure text.
        message: String,
    },
    /// A bulk pass finished. Always the last event of its pass.
    BatchComplete {
        /// Some component failed or the pass did not run to completion.
        had_failure: bool,
    },
    /// Live authentication failed.
    AuthFailed {
        /// Display text, also used as the lockup message.
        message: String,
    },
    /// A live authentication sweep was cancelled.
    AuthCanceled,
    /// A live authentication sweep found no mismatches.
    AuthComplete,
}

/// Platform notifications consumed by the live monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Media was mounted at `path`.
    MediaMounted {
        /// Mounted physical path.
        path: PathBuf,
    },
    /// Media at `path` was unmounted.
    MediaUnmounted {
        /// Unmounted physical path.
        path: PathBuf,
    },
    /// A subsystem raised a lockup.
    LockupAdded {
        /// Lockup key.
        key: String,
    },
    /// A lockup was cleared.
    LockupRemoved {
        /// Lockup key.
        key: String,
    },
    /// The platform finished booting.
    PlatformBooted,
}
