//! Component verification registry and bulk scheduler.
//!
//! One [`ComponentVerification`] record exists per component id. A bulk
//! pass fingerprints a selection of components in parallel, bounded by
//! the configured parallelism, and publishes one event per component plus
//! exactly one [`VerificationEvent::BatchComplete`] at the end. Passes are
//! serialized: a second pass waits for the first to finish.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use aegis_hash::{HashAlgorithm, HashParameters};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::calculator::HashCalculator;
use crate::error::VerifyError;
use crate::ports::{ComponentCatalog, EventSink};
use crate::types::{Component, ComponentType, ComponentVerification, VerificationEvent};

/// Which components a bulk pass covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ComponentSelection {
    /// Every catalog component.
    #[default]
    All,
    /// Components of the listed types.
    Types(Vec<ComponentType>),
    /// One component by id.
    Single(String),
}

/// Parameters of a bulk pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRequest {
    /// Algorithm applied to every selected component.
    pub algorithm: HashAlgorithm,
    /// Salt, or key/seed for keyed algorithms.
    pub seed_or_salt: Option<Vec<u8>>,
    /// Components to fingerprint.
    pub selection: ComponentSelection,
    /// First byte hashed.
    pub start_offset: u64,
}

impl HashRequest {
    /// Whole-content pass over all components.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            seed_or_salt: None,
            selection: ComponentSelection::All,
            start_offset: 0,
        }
    }

    /// Set the salt or seed.
    #[must_use]
    pub fn with_seed_or_salt(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.seed_or_salt = Some(bytes.into());
        self
    }

    /// Restrict the pass.
    #[must_use]
    pub fn with_selection(mut self, selection: ComponentSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Start hashing at `offset`.
    #[must_use]
    pub fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    fn parameters(&self) -> HashParameters {
        HashParameters::new(self.algorithm)
            .with_seed_or_salt(self.seed_or_salt.clone())
            .with_range(self.start_offset, None)
    }
}

/// Publishes the batch-complete event when dropped, so it fires exactly
/// once on every exit path.
struct BatchGuard {
    events: Arc<dyn EventSink>,
    had_failure: bool,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.events.publish(VerificationEvent::BatchComplete {
            had_failure: self.had_failure,
        });
    }
}

/// Owns verification records and runs bulk passes.
pub struct VerificationRegistry {
    catalog: Arc<dyn ComponentCatalog>,
    calculator: Arc<HashCalculator>,
    events: Arc<dyn EventSink>,
    records: RwLock<HashMap<String, Arc<ComponentVerification>>>,
    gate: Mutex<()>,
    max_parallelism: usize,
}

impl VerificationRegistry {
    /// Create a registry. `max_parallelism` is clamped to at least 1.
    pub fn new(
        catalog: Arc<dyn ComponentCatalog>,
        calculator: Arc<HashCalculator>,
        events: Arc<dyn EventSink>,
        max_parallelism: usize,
    ) -> Self {
        Self {
            catalog,
            calculator,
            events,
            records: RwLock::new(HashMap::new()),
            gate: Mutex::new(()),
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Records for every catalog component, created on first use.
    pub fn verifications(&self) -> Vec<Arc<ComponentVerification>> {
        self.catalog
            .components()
            .iter()
            .map(|c| self.verification(c))
            .collect()
    }

    /// The record for `component`, created on first use. Repeated and
    /// concurrent calls for one id return the same record.
    pub fn verification(&self, component: &Component) -> Arc<ComponentVerification> {
        self.record(&component.id)
    }

    /// Drop every record.
    pub fn reset(&self) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        info!(count = records.len(), "Resetting verification registry");
        records.clear();
    }

    /// Fingerprint the selected components.
    ///
    /// Per-component failures are published as
    /// [`VerificationEvent::HashError`] and do not stop the pass.
    /// Cancelled components publish nothing. The closing
    /// [`VerificationEvent::BatchComplete`] carries `had_failure = true` if
    /// any component failed or the pass was cancelled.
    ///
    /// Returns `true` if every selected component was fingerprinted.
    #[instrument(skip(self, request, cancel), fields(algorithm = %request.algorithm, selection = ?request.selection))]
    pub async fn get_component_hashes(
        &self,
        request: HashRequest,
        cancel: CancellationToken,
    ) -> bool {
        let _gate = self.gate.lock().await;
        let mut batch = BatchGuard {
            events: Arc::clone(&self.events),
            had_failure: false,
        };

        let components = match self.select(&request.selection) {
            Ok(components) => components,
            Err((id, e)) => {
                warn!(component_id = %id, error = %e, "Bulk pass selection failed");
                let record = self.record(&id);
                self.events.publish(VerificationEvent::HashError {
                    verification: record.snapshot(),
                    message: e.to_string(),
                });
                batch.had_failure = true;
                return false;
            },
        };

        let total = components.len();
        info!(total, parallelism = self.max_parallelism, "Starting bulk verification pass");

        let params = request.parameters();
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut tasks = JoinSet::new();

        for component in components {
            let record = self.verification(&component);
            record.reconfigure(params.clone());

            let calculator = Arc::clone(&self.calculator);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = tokio::select! {
                    () = cancel.cancelled() => Err(VerifyError::Cancelled),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(_permit) => calculator.calculate_hash(&component, &record, &cancel).await,
                        Err(_) => Err(VerifyError::internal("parallelism limiter closed")),
                    },
                };
                (record, result)
            });
        }

        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((record, Ok(_))) => {
                    completed += 1;
                    debug!(component_id = %record.component_id(), "Component hashed");
                    self.events.publish(VerificationEvent::HashComplete {
                        verification: record.snapshot(),
                    });
                },
                Ok((record, Err(e))) if e.is_cancellation() => {
                    debug!(component_id = %record.component_id(), "Component hash cancelled");
                },
                Ok((record, Err(e))) => {
                    warn!(
                        component_id = %record.component_id(),
                        error = %e,
                        authentication = e.is_authentication_failure(),
                        "Component hash failed"
                    );
                    self.events.publish(VerificationEvent::HashError {
                        verification: record.snapshot(),
                        message: e.to_string(),
                    });
                },
                Err(e) => error!(error = %e, "Component hash task aborted"),
            }
        }

        batch.had_failure = completed < total || cancel.is_cancelled();
        info!(total, completed, had_failure = batch.had_failure, "Bulk verification pass finished");
        !batch.had_failure
    }

    /// Composite platform identity digest over the OS blob and component
    /// manifests.
    ///
    /// # Errors
    ///
    /// Returns error if the OS hash blob or a manifest cannot be read.
    pub fn rom_hash(&self, algorithm: HashAlgorithm) -> Result<Vec<u8>, VerifyError> {
        self.calculator.calculate_rom_hash(self.catalog.as_ref(), algorithm)
    }

    /// Seeded CRC-32 of the ROM hash.
    ///
    /// # Errors
    ///
    /// Returns error if the ROM hash cannot be computed.
    pub fn rom_crc32(&self, seed: u32) -> Result<u32, VerifyError> {
        self.calculator.calculate_rom_crc32(self.catalog.as_ref(), seed)
    }

    fn select(&self, selection: &ComponentSelection) -> Result<Vec<Component>, (String, VerifyError)> {
        match selection {
            ComponentSelection::All => Ok(self.catalog.components()),
            ComponentSelection::Types(types) => Ok(self
                .catalog
                .components()
                .into_iter()
                .filter(|c| types.contains(&c.component_type))
                .collect()),
            ComponentSelection::Single(id) => self
                .catalog
                .component(id)
                .map(|c| vec![c])
                .ok_or_else(|| (id.clone(), VerifyError::ComponentNotFound { id: id.clone() })),
        }
    }

    fn record(&self, id: &str) -> Arc<ComponentVerification> {
        if let Some(record) = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Arc::clone(record);
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            records
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(ComponentVerification::new(id))),
        )
    }
}
