//! Reconciliation logic for Services.
//!
//! This module handles the add, update and delete notifications for
//! Services, ensuring every in-scope Service has a public address, a NAT
//! mapping and a security rule on the firewall, and that those are released
//! once no Service references them.

use crate::allocation::{AllocationState, Allocator};
use crate::cleanup::{CleanupCoordinator, CleanupOutcome};
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::guard::in_scope;
use crate::policy::PolicySynchronizer;
use crds::{ANN_KEY_EXTERNAL_POOL, ANN_KEY_SERVICE_REFRESH, OWNED_ANNOTATION_KEYS};
use resource_gateway::{ResourceGateway, ServiceRecord};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of one `sync_spec` pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Service is not managed; nothing was read or written
    OutOfScope,
    Synced {
        state: AllocationState,
        /// Whether the annotations had to be written back
        persisted: bool,
    },
}

/// Reconciles Services against the firewall resources.
pub struct ReconcileEngine {
    gateway: Arc<dyn ResourceGateway>,
    config: Arc<OperatorConfig>,
    allocator: Allocator,
    policy: PolicySynchronizer,
    cleanup: CleanupCoordinator,
}

impl ReconcileEngine {
    /// Creates a new engine instance.
    pub fn new(gateway: Arc<dyn ResourceGateway>, config: Arc<OperatorConfig>) -> Self {
        Self {
            allocator: Allocator::new(gateway.clone(), config.default_pool.clone()),
            policy: PolicySynchronizer::new(gateway.clone(), config.clone()),
            cleanup: CleanupCoordinator::new(gateway.clone(), config.default_pool.clone()),
            gateway,
            config,
        }
    }

    /// Handles a Service seen for the first time.
    pub async fn on_add(&self, record: ServiceRecord) {
        debug!("Received add on Service {}", record.key());
        let mut record = record;
        if let Err(e) = self.sync_spec(&mut record).await {
            error!("Failed to sync spec on Service {}: {}", record.key(), e);
        }
    }

    /// Handles a changed (or resynced) Service; terminating Services are left to `on_delete`.
    pub async fn on_update(&self, old: ServiceRecord, new: ServiceRecord) {
        debug!(
            "Received update on Service {} ({:?} -> {:?})",
            new.key(),
            old.resource_version,
            new.resource_version
        );
        if new.deletion_requested {
            debug!("Service {} is being deleted, skipping sync", new.key());
            return;
        }
        let mut record = new;
        if let Err(e) = self.sync_spec(&mut record).await {
            error!("Failed to sync spec on Service {}: {}", record.key(), e);
        }
    }

    /// Handles a removed Service, releasing its firewall resources when unused.
    pub async fn on_delete(&self, record: ServiceRecord) {
        debug!("Received delete on Service {}", record.key());
        if !in_scope(&record, &self.config.ignore_namespaces) {
            return;
        }
        match self.cleanup.release(&record).await {
            Ok(CleanupOutcome::Released { address }) => {
                info!("Released firewall resources of {} for Service {}", address, record.key());
            }
            Ok(outcome) => debug!("Cleanup of Service {}: {:?}", record.key(), outcome),
            Err(e) => error!("Failed to cleanup on Service {}: {}", record.key(), e),
        }
    }

    /// Default the pool annotation so it is visible (and editable) on the Service.
    fn ensure_pool_annotation(&self, record: &mut ServiceRecord) {
        record
            .annotations
            .entry(ANN_KEY_EXTERNAL_POOL.to_string())
            .or_insert_with(|| self.config.default_pool.clone());
    }

    /// Bring one Service and its firewall resources in line.
    ///
    /// This method:
    /// 1. Skips Services that are out of scope
    /// 2. Defaults the pool annotation
    /// 3. Advances the address allocation (fatal on failure, `record` left untouched)
    /// 4. Upserts NAT and Security once an address is allocated (best effort)
    /// 5. Stamps or clears the refresh token
    /// 6. Writes the owned annotations back when they changed
    pub async fn sync_spec(&self, record: &mut ServiceRecord) -> Result<SyncOutcome, ControllerError> {
        if !in_scope(record, &self.config.ignore_namespaces) {
            return Ok(SyncOutcome::OutOfScope);
        }

        let delivered = owned_annotations(record);
        let mut next = record.clone();
        self.ensure_pool_annotation(&mut next);

        let state = self.allocator.sync(&mut next).await?;

        if let Some(address) = state.address() {
            let outcome = self.policy.sync(&next, address).await;
            if !outcome.converged() {
                debug!("Policies for Service {} partially synced: {:?}", next.key(), outcome);
            }
            next.annotations.remove(ANN_KEY_SERVICE_REFRESH);
        } else {
            next.annotations.insert(
                ANN_KEY_SERVICE_REFRESH.to_string(),
                uuid::Uuid::new_v4().to_string(),
            );
        }

        if owned_annotations(&next) == delivered {
            debug!("Service {} annotations unchanged", next.key());
            *record = next;
            return Ok(SyncOutcome::Synced { state, persisted: false });
        }

        let updated = self.gateway.update_service_record(&next).await?;
        next.resource_version = updated.resource_version;
        *record = next;
        debug!("Updated annotations on Service {}", record.key());
        Ok(SyncOutcome::Synced { state, persisted: true })
    }
}

fn owned_annotations(record: &ServiceRecord) -> Vec<Option<String>> {
    OWNED_ANNOTATION_KEYS
        .iter()
        .map(|k| record.annotations.get(*k).cloned())
        .collect()
}
