//! Resolves a component to a byte source and fingerprints it.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aegis_hash::{
    compute_hash, seed_u32, DirectoryStream, FileSelection, HashAlgorithm, HashParameters,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::VerifyError;
use crate::manifest::find_sibling_manifest;
use crate::ports::{ComponentCatalog, DeviceRegistry, OsPartitionService};
use crate::types::{
    Component, ComponentKind, ComponentVerification, FirmwareKind, HardwareSource,
};

/// Computes component fingerprints.
///
/// File and directory hashing runs on the blocking pool. Device CRC queries
/// wait at most `hardware_timeout` and give up early on cancellation.
pub struct HashCalculator {
    devices: Arc<dyn DeviceRegistry>,
    os: Arc<dyn OsPartitionService>,
    hardware_timeout: Duration,
}

impl HashCalculator {
    /// Create a calculator over the given hardware services.
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        os: Arc<dyn OsPartitionService>,
        hardware_timeout: Duration,
    ) -> Self {
        Self {
            devices,
            os,
            hardware_timeout,
        }
    }

    /// Fingerprint `component` with the parameters currently held by
    /// `verification` and store the result there.
    ///
    /// # Errors
    ///
    /// Returns error if the byte source cannot be resolved or read, the
    /// device fails or times out, or `cancel` fires first.
    #[instrument(skip_all, fields(component_id = %component.id, kind = ?component.kind))]
    pub async fn calculate_hash(
        &self,
        component: &Component,
        verification: &ComponentVerification,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, VerifyError> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        let params = verification.parameters();
        let digest = match component.kind {
            ComponentKind::File => {
                let path = PathBuf::from(&component.path);
                let task_params = params.clone();
                run_blocking(cancel, move || {
                    let mut file = File::open(&path)?;
                    Ok(compute_hash(&mut file, &task_params)?)
                })
                .await?
            },
            ComponentKind::Directory => {
                let path = PathBuf::from(&component.path);
                let task_params = params.clone();
                run_blocking(cancel, move || {
                    let mut stream =
                        DirectoryStream::from_directory(&path, &["*"], &FileSelection::recursive())?;
                    Ok(compute_hash(&mut stream, &task_params)?)
                })
                .await?
            },
            ComponentKind::Hardware => self.hardware_digest(component, &params, cancel).await?,
        };

        if !verification.record_result(&params, digest.clone()) {
            debug!("Parameters changed during computation; result not stored");
        }
        Ok(digest)
    }

    async fn hardware_digest(
        &self,
        component: &Component,
        params: &HashParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, VerifyError> {
        let source = HardwareSource::from_path(&component.path).ok_or_else(|| {
            VerifyError::UnsupportedComponent {
                id: component.id.clone(),
                reason: format!("unknown hardware source '{}'", component.path),
            }
        })?;

        match source {
            HardwareSource::OperatingSystem => {
                let blob = self.os.operating_system_hash()?;
                Ok(compute_hash(&mut Cursor::new(blob), params)?)
            },
            HardwareSource::Printer | HardwareSource::NoteAcceptor => {
                let seed = seed_u32(params.key.as_deref().or(params.salt.as_deref()));
                let crc = self.device_crc(source, seed, cancel).await?;
                Ok(crc.to_be_bytes().to_vec())
            },
            HardwareSource::Fpga => self.os.firmware_image(FirmwareKind::Fpga),
            HardwareSource::Bios => self.os.firmware_image(FirmwareKind::Bios),
        }
    }

    async fn device_crc(
        &self,
        source: HardwareSource,
        seed: u32,
        cancel: &CancellationToken,
    ) -> Result<u32, VerifyError> {
        let device_name = source.name().to_string();
        let device = self
            .devices
            .crc_device(source)
            .ok_or_else(|| VerifyError::DeviceUnavailable {
                device: device_name.clone(),
            })?;

        debug!(device = %device_name, seed, "Requesting device CRC");
        tokio::select! {
            () = cancel.cancelled() => Err(VerifyError::Cancelled),
            answer = tokio::time::timeout(self.hardware_timeout, device.calculate_crc(seed)) => {
                answer.map_err(|_| VerifyError::HardwareTimeout {
                    device: device_name,
                    timeout_secs: self.hardware_timeout.as_secs(),
                })?
            },
        }
    }

    /// Composite platform identity digest: the OS hash blob followed by the
    /// sibling manifest bytes of every manifest-bearing component, in
    /// component id order. Components without a manifest are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the OS hash blob or a found manifest cannot be read.
    #[instrument(skip(self, catalog))]
    pub fn calculate_rom_hash(
        &self,
        catalog: &dyn ComponentCatalog,
        algorithm: HashAlgorithm,
    ) -> Result<Vec<u8>, VerifyError> {
        let mut data = self.os.operating_system_hash()?;

        let mut components: Vec<Component> = catalog
            .components()
            .into_iter()
            .filter(|c| c.component_type.carries_manifest())
            .collect();
        components.sort_by(|a, b| a.id.cmp(&b.id));

        for component in &components {
            match find_sibling_manifest(Path::new(&component.path)) {
                Some(manifest) => data.extend(std::fs::read(&manifest)?),
                None => warn!(component_id = %component.id, path = %component.path, "No manifest; skipped in ROM hash"),
            }
        }

        Ok(compute_hash(&mut Cursor::new(data), &HashParameters::new(algorithm))?)
    }

    /// Seeded CRC-32 of the lowercase hex SHA-1 ROM hash.
    ///
    /// # Errors
    ///
    /// Returns error if the ROM hash cannot be computed.
    pub fn calculate_rom_crc32(
        &self,
        catalog: &dyn ComponentCatalog,
        seed: u32,
    ) -> Result<u32, VerifyError> {
        let rom_hash = hex::encode(self.calculate_rom_hash(catalog, HashAlgorithm::Sha1)?);
        let params = HashParameters::new(HashAlgorithm::Crc32).with_key(seed.to_le_bytes());
        let digest = compute_hash(&mut Cursor::new(rom_hash.into_bytes()), &params)?;

        let bytes: [u8; 4] = digest
            .as_slice()
            .try_into()
            .map_err(|_| VerifyError::internal("CRC-32 digest is not 4 bytes"))?;
        Ok(u32::from_be_bytes(bytes))
    }
}

/// Run blocking hash work off the async workers, abandoning the wait if
/// `cancel` fires.
async fn run_blocking<F>(cancel: &CancellationToken, work: F) -> Result<Vec<u8>, VerifyError>
where
    F: FnOnce() -> Result<Vec<u8>, VerifyError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        () = cancel.cancelled() => Err(VerifyError::Cancelled),
        joined = task => joined.map_err(|e| VerifyError::internal(format!("hash task failed: {e}")))?,
    }
}
