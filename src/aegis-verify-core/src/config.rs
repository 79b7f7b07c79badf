//! Configuration for the verification core.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// How strictly trust failures are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    /// Development build: bundled development key, unsigned media skipped.
    #[default]
    Development,
    /// Retail build: configured keys only, unsigned media fails closed.
    Production,
    /// Production plus the platform's own directory is authenticated.
    FullyLocked,
}

impl SecurityProfile {
    /// Whether failures must fail closed.
    #[must_use]
    pub fn is_production(&self) -> bool {
        !matches!(self, Self::Development)
    }
}

/// Configuration for the verification core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    /// Enforcement profile.
    pub security_profile: SecurityProfile,
    /// System trust key file (raw 32 bytes or hex).
    pub system_key_path: Option<PathBuf>,
    /// Game trust key file (raw 32 bytes or hex).
    pub game_key_path: Option<PathBuf>,
    /// Run a sweep whenever the platform reports a boot.
    pub verify_after_reboot: bool,
    /// Sound played when live authentication fails.
    pub alert_sound: Option<PathBuf>,
    /// Platform executable directory (authenticated in fully locked builds).
    pub platform_dir: Option<PathBuf>,
    /// Directory holding platform manifests.
    pub platform_manifest_dir: Option<PathBuf>,
    /// Upper bound on a hardware CRC query.
    pub hardware_timeout_secs: u64,
    /// Worker cap for bulk passes and sweeps (default: 75% of cores).
    pub max_parallelism: Option<usize>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            security_profile: SecurityProfile::Development,
            system_key_path: None,
            game_key_path: None,
            verify_after_reboot: true,
            alert_sound: None,
            platform_dir: None,
            platform_manifest_dir: None,
            hardware_timeout_secs: 5,
            max_parallelism: None,
        }
    }
}

impl VerifyConfig {
    /// Load a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let data = std::fs::read_to_string(path).map_err(|e| VerifyError::ConfigError {
            message: format!("Cannot read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&data).map_err(|e| VerifyError::ConfigError {
            message: format!("Cannot parse {}: {}", path.display(), e),
        })
    }

    /// Hardware query timeout.
    #[must_use]
    pub fn hardware_timeout(&self) -> Duration {
        Duration::from_secs(self.hardware_timeout_secs)
    }

    /// Effective worker cap.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.max_parallelism
            .filter(|n| *n > 0)
            .unwrap_or_else(default_parallelism)
    }
}

/// Three quarters of the available execution units, at least one.
#[must_use]
pub fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    (cores * 3 / 4).max(1)
}
