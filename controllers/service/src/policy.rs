//! NAT and Security policy sync for an allocated public address.

use crate::config::OperatorConfig;
use crds::policy_resource_name;
use resource_gateway::{ResourceGateway, SecurityParams, ServiceRecord};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which of the two policy objects were written this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// NAT upsert succeeded
    pub nat: bool,
    /// Security upsert succeeded
    pub security: bool,
}

impl PolicyOutcome {
    /// Both objects are in place
    pub fn converged(&self) -> bool {
        self.nat && self.security
    }
}

/// Upserts the NAT and Security objects named after a public address
pub struct PolicySynchronizer {
    gateway: Arc<dyn ResourceGateway>,
    config: Arc<OperatorConfig>,
}

impl PolicySynchronizer {
    pub fn new(gateway: Arc<dyn ResourceGateway>, config: Arc<OperatorConfig>) -> Self {
        Self { gateway, config }
    }

    /// Security parameters for `address`, from the static configuration.
    pub fn security_params(&self, address: IpAddr) -> SecurityParams {
        let address = address.to_string();
        SecurityParams {
            name: policy_resource_name(&address),
            address,
            log_setting: self.config.log_setting.clone(),
            group: self.config.group.clone(),
            services: self.config.services.clone(),
            destination_zones: self.config.destination_zones.clone(),
        }
    }

    /// Upsert both objects. Failures are logged and reported, never raised:
    /// a later event converges whatever did not land this time.
    pub async fn sync(&self, record: &ServiceRecord, address: IpAddr) -> PolicyOutcome {
        PolicyOutcome {
            nat: self.sync_nat(record, address).await,
            security: self.sync_security(record, address).await,
        }
    }

    async fn sync_nat(&self, record: &ServiceRecord, address: IpAddr) -> bool {
        let address = address.to_string();
        let name = policy_resource_name(&address);
        // In-scope records always carry at least one external address.
        let Some(dat_address) = record.first_external_address() else {
            return false;
        };

        match self
            .gateway
            .create_or_update_nat(&name, &address, dat_address, record)
            .await
        {
            Ok(()) => {
                debug!("NAT {}/{} synced for Service {}", record.namespace, name, record.key());
                true
            }
            Err(e) => {
                warn!("Failed to create NAT resource {}/{}: {}", record.namespace, name, e);
                false
            }
        }
    }

    async fn sync_security(&self, record: &ServiceRecord, address: IpAddr) -> bool {
        let params = self.security_params(address);
        match self.gateway.create_or_update_security(&params, record).await {
            Ok(()) => {
                debug!("Security {}/{} synced for Service {}", record.namespace, params.name, record.key());
                true
            }
            Err(e) => {
                warn!(
                    "Failed to create and update Security resource {}/{}: {}",
                    record.namespace, params.name, e
                );
                false
            }
        }
    }
}
