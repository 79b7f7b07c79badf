//! # aegis-verify-core
//!
//! Integrity verification core for a regulated gaming platform: on-demand
//! component fingerprinting and live authentication of mounted media.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 VerificationRegistry                       │
//! │   one ComponentVerification per component id               │
//! │   bulk passes: bounded fan-out, one pass at a time         │
//! │                          │                                 │
//! │                          ▼                                 │
//! │  ┌─────────────────────────────────────────────────┐      │
//! │  │               HashCalculator                     │      │
//! │  │  file / directory / OS blob / device CRC         │      │
//! │  └─────────────────────────────────────────────────┘      │
//! │                          │                                 │
//! │                          ▼                                 │
//! │                 aegis_hash::compute_hash                   │
//! └───────────────────────────────────────────────────────────┘
//!
//! ┌───────────────────────────────────────────────────────────┐
//! │              LiveAuthenticationMonitor                     │
//! │   mount ──▶ signed manifest ──▶ path cache                 │
//! │   boot / lockup events ──▶ sweep ──▶ lockup or release     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Fail-closed**: in production profiles a missing or rejected
//!   manifest locks the platform
//! - **Single sweep**: a new sweep cancels the previous one
//! - **No torn reads**: a record's parameters and digest change together

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod calculator;
pub mod config;
pub mod error;
pub mod manifest;
pub mod monitor;
pub mod ports;
pub mod registry;
pub mod trust;
pub mod types;

pub use calculator::HashCalculator;
pub use config::{SecurityProfile, VerifyConfig};
pub use error::VerifyError;
pub use manifest::{content_digest, ImageManifest};
pub use monitor::{LiveAuthenticationMonitor, MonitorDependencies, MonitorState, LOCKUP_KEY};
pub use ports::{
    AlertPlayer, ComponentCatalog, CrcDevice, DeviceRegistry, EventSink, InMemoryLockupManager,
    LockupManager, LogAlertPlayer, NoHardware, OsPartitionService, StaticCatalog,
};
pub use registry::{ComponentSelection, HashRequest, VerificationRegistry};
pub use trust::{KeyType, TrustContext};
pub use types::{
    Component, ComponentKind, ComponentType, ComponentVerification, PlatformEvent,
    VerificationEvent,
};
