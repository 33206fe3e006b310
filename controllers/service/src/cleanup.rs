//! Reference-counted release of the firewall objects behind a public address.
//!
//! NAT and Security objects are shared by every Service resolving to the same
//! public address, so they are only released once the last such Service in
//! the namespace is gone.
//!
//! The reference check (list, filter) and the deletes are not atomic: a
//! Service that claims the same address between the two steps can lose its
//! shared objects. The next sync of that Service recreates them, but its `IP`
//! request is gone and has to be allocated again.

use crate::allocation::{pool, public_ip};
use crate::error::ControllerError;
use crds::policy_resource_name;
use resource_gateway::{ResourceGateway, ServiceRecord};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a cleanup pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The Service never got a public address; nothing to release
    NotAllocated,
    /// Other Services still use the address
    StillReferenced { address: IpAddr, referrers: usize },
    /// The `IP` object was deleted; NAT and Security deletes were attempted
    Released { address: IpAddr },
}

/// Releases allocation, NAT and Security objects on Service removal
pub struct CleanupCoordinator {
    gateway: Arc<dyn ResourceGateway>,
    default_pool: String,
}

impl CleanupCoordinator {
    /// Creates a new coordinator; `default_pool` must match the allocator's.
    pub fn new(gateway: Arc<dyn ResourceGateway>, default_pool: impl Into<String>) -> Self {
        Self {
            gateway,
            default_pool: default_pool.into(),
        }
    }

    /// Release the objects of a deleted (in-scope) Service if nothing else references them.
    pub async fn release(&self, record: &ServiceRecord) -> Result<CleanupOutcome, ControllerError> {
        let pool = pool(&record.annotations, &self.default_pool);
        let (Some(address), Some(allocation)) = (public_ip(&record.annotations), record.first_external_address()) else {
            return Ok(CleanupOutcome::NotAllocated);
        };
        if pool.is_empty() {
            return Ok(CleanupOutcome::NotAllocated);
        }
        let namespace = &record.namespace;

        let referrers = self
            .gateway
            .list_service_records(namespace)
            .await?
            .iter()
            .filter(|other| !is_same_service(other, record))
            .filter(|other| public_ip(&other.annotations) == Some(address))
            .count();
        if referrers > 0 {
            info!(
                "Public IP {} still used by {} Service(s) in {}, keeping firewall resources",
                address, referrers, namespace
            );
            return Ok(CleanupOutcome::StillReferenced { address, referrers });
        }

        match self.gateway.delete_allocation(allocation, namespace).await {
            Ok(()) => info!("Released IP {}/{} ({})", namespace, allocation, address),
            // Released by an earlier pass; the policies may still be left over.
            Err(e) if e.is_not_found() => debug!("IP {}/{} already released", namespace, allocation),
            Err(source) => {
                return Err(ControllerError::CleanupFailed {
                    name: format!("{namespace}/{allocation}"),
                    source,
                });
            }
        }

        let name = policy_resource_name(&address.to_string());
        if let Err(e) = self.gateway.delete_security(&name, namespace).await {
            warn!("Failed to delete Security resource {}/{}: {}", namespace, name, e);
        }
        if let Err(e) = self.gateway.delete_nat(&name, namespace).await {
            warn!("Failed to delete NAT resource {}/{}: {}", namespace, name, e);
        }

        Ok(CleanupOutcome::Released { address })
    }
}

/// The live list can still contain the deleted Service; never count it as a referrer.
fn is_same_service(other: &ServiceRecord, deleted: &ServiceRecord) -> bool {
    match (&other.uid, &deleted.uid) {
        (Some(a), Some(b)) => a == b,
        _ => other.namespace == deleted.namespace && other.name == deleted.name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ANN_KEY_EXTERNAL_POOL, ANN_KEY_PUBLIC_IP};
    use resource_gateway::{MockGateway, Operation, PortSpec, ResourceKind};

    const ADDR: &str = "140.11.22.33";
    const NAME: &str = "k8s-140.11.22.33";

    fn allocated(name: &str) -> ServiceRecord {
        ServiceRecord::new("default", name)
            .with_ports(vec![PortSpec::tcp(80)])
            .with_external_addresses(["172.11.22.33"])
            .with_annotation(ANN_KEY_EXTERNAL_POOL, "internet")
            .with_annotation(ANN_KEY_PUBLIC_IP, ADDR)
    }

    async fn seeded() -> (MockGateway, ServiceRecord) {
        let gw = MockGateway::new();
        let record = gw.add_service_record(allocated("test"));
        gw.add_allocation("172.11.22.33", "default", "internet", ADDR);
        gw.create_or_update_nat(NAME, ADDR, "172.11.22.33", &record).await.unwrap();
        let params = resource_gateway::SecurityParams {
            name: NAME.to_string(),
            address: ADDR.to_string(),
            log_setting: String::new(),
            group: String::new(),
            services: Vec::new(),
            destination_zones: Vec::new(),
        };
        gw.create_or_update_security(&params, &record).await.unwrap();
        gw.clear_calls();
        (gw, record)
    }

    #[tokio::test]
    async fn test_release_last_referrer() {
        let (gw, record) = seeded().await;
        gw.remove_service_record("default", "test");
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let outcome = cleanup.release(&record).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Released { address: ADDR.parse().unwrap() });
        assert!(gw.allocation("172.11.22.33", "default").is_none());
        assert!(gw.nat(NAME, "default").is_none());
        assert!(gw.security(NAME, "default").is_none());
    }

    #[tokio::test]
    async fn test_release_without_pool_annotation_uses_default_pool() {
        let (gw, mut record) = seeded().await;
        record.annotations.remove(ANN_KEY_EXTERNAL_POOL);
        gw.remove_service_record("default", "test");
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let outcome = cleanup.release(&record).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Released { address: ADDR.parse().unwrap() });
        assert!(gw.allocation("172.11.22.33", "default").is_none());
        assert!(gw.nat(NAME, "default").is_none());
        assert!(gw.security(NAME, "default").is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_annotation_is_not_allocated() {
        let (gw, record) = seeded().await;
        let record = record.with_annotation(ANN_KEY_EXTERNAL_POOL, "");
        gw.remove_service_record("default", "test");
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        assert_eq!(cleanup.release(&record).await.unwrap(), CleanupOutcome::NotAllocated);
        assert!(gw.calls().is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_delete_releases_leftover_policies() {
        let (gw, record) = seeded().await;
        gw.remove_service_record("default", "test");
        gw.fail_on(Operation::Delete, ResourceKind::Nat);
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        cleanup.release(&record).await.unwrap();
        assert!(gw.allocation("172.11.22.33", "default").is_none());
        assert!(gw.nat(NAME, "default").is_some());

        gw.clear_failures();
        let outcome = cleanup.release(&record).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Released { address: ADDR.parse().unwrap() });
        assert!(gw.nat(NAME, "default").is_none());
        assert!(gw.security(NAME, "default").is_none());
    }

    #[tokio::test]
    async fn test_release_when_allocation_already_gone() {
        let gw = MockGateway::new();
        let record = allocated("test");
        gw.create_or_update_nat(NAME, ADDR, "172.11.22.33", &record).await.unwrap();
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let outcome = cleanup.release(&record).await.unwrap();
        assert!(matches!(outcome, CleanupOutcome::Released { .. }));
        assert!(gw.nat(NAME, "default").is_none());
        assert_eq!(gw.count(Operation::Delete, ResourceKind::Security), 1);
    }

    #[tokio::test]
    async fn test_deleted_service_still_listed_is_ignored() {
        let (gw, record) = seeded().await;
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let outcome = cleanup.release(&record).await.unwrap();
        assert!(matches!(outcome, CleanupOutcome::Released { .. }));
    }

    #[tokio::test]
    async fn test_keeps_shared_resources() {
        let (gw, record) = seeded().await;
        gw.add_service_record(allocated("other"));
        gw.remove_service_record("default", "test");
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let outcome = cleanup.release(&record).await.unwrap();
        assert_eq!(
            outcome,
            CleanupOutcome::StillReferenced { address: ADDR.parse().unwrap(), referrers: 1 }
        );
        assert!(gw.allocation("172.11.22.33", "default").is_some());
        assert!(gw.nat(NAME, "default").is_some());
        assert!(gw.security(NAME, "default").is_some());
        assert_eq!(gw.count(Operation::Delete, ResourceKind::Allocation), 0);
    }

    #[tokio::test]
    async fn test_other_namespace_does_not_count() {
        let (gw, record) = seeded().await;
        let mut other = allocated("other");
        other.namespace = "staging".to_string();
        gw.add_service_record(other);
        gw.remove_service_record("default", "test");
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        assert!(matches!(
            cleanup.release(&record).await.unwrap(),
            CleanupOutcome::Released { .. }
        ));
    }

    #[tokio::test]
    async fn test_allocation_delete_failure_aborts() {
        let (gw, record) = seeded().await;
        gw.remove_service_record("default", "test");
        gw.fail_on(Operation::Delete, ResourceKind::Allocation);
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let err = cleanup.release(&record).await.unwrap_err();
        assert!(matches!(err, ControllerError::CleanupFailed { .. }));
        assert!(gw.nat(NAME, "default").is_some());
        assert!(gw.security(NAME, "default").is_some());
    }

    #[tokio::test]
    async fn test_policy_delete_failures_are_best_effort() {
        let (gw, record) = seeded().await;
        gw.remove_service_record("default", "test");
        gw.fail_on(Operation::Delete, ResourceKind::Security);
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");

        let outcome = cleanup.release(&record).await.unwrap();
        assert!(matches!(outcome, CleanupOutcome::Released { .. }));
        assert!(gw.security(NAME, "default").is_some());
        assert!(gw.nat(NAME, "default").is_none());
    }

    #[tokio::test]
    async fn test_unallocated_service_is_skipped() {
        let gw = MockGateway::new();
        let cleanup = CleanupCoordinator::new(Arc::new(gw.clone()), "internet");
        let mut record = allocated("test");
        record.annotations.remove(ANN_KEY_PUBLIC_IP);

        assert_eq!(cleanup.release(&record).await.unwrap(), CleanupOutcome::NotAllocated);
        assert!(gw.calls().is_empty());
    }
}
