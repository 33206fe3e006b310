//! Mock ResourceGateway for unit testing
//!
//! This module provides an in-memory implementation of `ResourceGateway` that
//! records every call and can be configured to fail specific operations, so the
//! reconciliation core can be tested without a cluster.

use crate::error::GatewayError;
use crate::gateway_trait::ResourceGateway;
use crate::models::{ResourceKind, SecurityParams, ServiceRecord};
use crds::{IP, IPSpec, IPStatus, NAT, NATSpec, ResourcePhase, Security, SecurityAction, SecuritySpec};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Operations exposed by the gateway, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Upsert,
    Delete,
    List,
    Update,
}

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub op: Operation,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

/// Mock ResourceGateway for testing
///
/// Cloning shares the underlying stores, so a test can keep a handle while the
/// code under test owns another.
#[derive(Clone, Default)]
pub struct MockGateway {
    allocations: Arc<Mutex<BTreeMap<Key, IP>>>,
    nats: Arc<Mutex<BTreeMap<Key, NAT>>>,
    securities: Arc<Mutex<BTreeMap<Key, Security>>>,
    services: Arc<Mutex<BTreeMap<Key, ServiceRecord>>>,
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    failures: Arc<Mutex<HashSet<(Operation, ResourceKind)>>>,
    next_version: Arc<Mutex<u64>>,
}

impl MockGateway {
    /// Create an empty mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `IP` object (for test setup). An empty `address` leaves the status unset.
    pub fn add_allocation(&self, name: &str, namespace: &str, pool: &str, address: &str) {
        let mut ip = IP::new(name, IPSpec { pool_name: pool.to_string() });
        ip.metadata.namespace = Some(namespace.to_string());
        if !address.is_empty() {
            ip.status = Some(IPStatus {
                address: address.to_string(),
                phase: ResourcePhase::Active,
                ..Default::default()
            });
        }
        self.allocations.lock().unwrap().insert(key(namespace, name), ip);
    }

    /// Simulate the pool allocator assigning an address to an existing `IP`
    pub fn assign_address(&self, name: &str, namespace: &str, address: &str) {
        if let Some(ip) = self.allocations.lock().unwrap().get_mut(&key(namespace, name)) {
            ip.status = Some(IPStatus {
                address: address.to_string(),
                phase: ResourcePhase::Active,
                ..Default::default()
            });
        }
    }

    /// Add a Service (for test setup). Assigns a uid and resource version when missing.
    pub fn add_service_record(&self, record: ServiceRecord) -> ServiceRecord {
        let mut record = record;
        if record.uid.is_none() {
            record.uid = Some(format!("uid-{}", record.key()));
        }
        record.resource_version = Some(self.bump_version());
        self.services
            .lock()
            .unwrap()
            .insert(key(&record.namespace, &record.name), record.clone());
        record
    }

    /// Remove a Service, as the API server does before delivering a delete event
    pub fn remove_service_record(&self, namespace: &str, name: &str) -> Option<ServiceRecord> {
        self.services.lock().unwrap().remove(&key(namespace, name))
    }

    /// Make every `(op, kind)` call fail until cleared
    pub fn fail_on(&self, op: Operation, kind: ResourceKind) {
        self.failures.lock().unwrap().insert((op, kind));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn allocation(&self, name: &str, namespace: &str) -> Option<IP> {
        self.allocations.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn nat(&self, name: &str, namespace: &str) -> Option<NAT> {
        self.nats.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn security(&self, name: &str, namespace: &str) -> Option<Security> {
        self.securities.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn service_record(&self, namespace: &str, name: &str) -> Option<ServiceRecord> {
        self.services.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded `(op, kind)` calls
    pub fn count(&self, op: Operation, kind: ResourceKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.op == op && c.kind == kind)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn bump_version(&self) -> String {
        let mut v = self.next_version.lock().unwrap();
        *v += 1;
        v.to_string()
    }

    /// Record the call and return the injected failure, if any
    fn record(&self, op: Operation, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall {
            op,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if self.failures.lock().unwrap().contains(&(op, kind)) {
            return Err(GatewayError::Api {
                kind,
                name: name.to_string(),
                message: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }

    fn remove<T>(store: &Mutex<BTreeMap<Key, T>>, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), GatewayError> {
        store
            .lock()
            .unwrap()
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound {
                kind,
                name: name.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ResourceGateway for MockGateway {
    async fn get_allocation(&self, name: &str, namespace: &str) -> Result<IP, GatewayError> {
        self.record(Operation::Get, ResourceKind::Allocation, namespace, name)?;
        self.allocation(name, namespace).ok_or_else(|| GatewayError::NotFound {
            kind: ResourceKind::Allocation,
            name: name.to_string(),
        })
    }

    async fn create_allocation(&self, name: &str, namespace: &str, pool: &str) -> Result<IP, GatewayError> {
        self.record(Operation::Create, ResourceKind::Allocation, namespace, name)?;
        let mut store = self.allocations.lock().unwrap();
        if store.contains_key(&key(namespace, name)) {
            return Err(GatewayError::AlreadyExists {
                kind: ResourceKind::Allocation,
                name: name.to_string(),
            });
        }
        let mut ip = IP::new(name, IPSpec { pool_name: pool.to_string() });
        ip.metadata.namespace = Some(namespace.to_string());
        store.insert(key(namespace, name), ip.clone());
        Ok(ip)
    }

    async fn delete_allocation(&self, name: &str, namespace: &str) -> Result<(), GatewayError> {
        self.record(Operation::Delete, ResourceKind::Allocation, namespace, name)?;
        Self::remove(&self.allocations, ResourceKind::Allocation, namespace, name)
    }

    async fn create_or_update_nat(&self, name: &str, address: &str, dat_address: &str, owner: &ServiceRecord) -> Result<(), GatewayError> {
        self.record(Operation::Upsert, ResourceKind::Nat, &owner.namespace, name)?;
        let mut store = self.nats.lock().unwrap();
        let nat = store.entry(key(&owner.namespace, name)).or_insert_with(|| {
            let mut nat = NAT::new(
                name,
                NATSpec {
                    destination_addresses: Vec::new(),
                    dat_address: String::new(),
                    description: None,
                },
            );
            nat.metadata.namespace = Some(owner.namespace.clone());
            nat
        });
        nat.spec.destination_addresses = vec![address.to_string()];
        nat.spec.dat_address = dat_address.to_string();
        crate::client::ensure_owner(&mut nat.metadata, owner.owner_reference());
        Ok(())
    }

    async fn delete_nat(&self, name: &str, namespace: &str) -> Result<(), GatewayError> {
        self.record(Operation::Delete, ResourceKind::Nat, namespace, name)?;
        Self::remove(&self.nats, ResourceKind::Nat, namespace, name)
    }

    async fn create_or_update_security(&self, params: &SecurityParams, owner: &ServiceRecord) -> Result<(), GatewayError> {
        self.record(Operation::Upsert, ResourceKind::Security, &owner.namespace, &params.name)?;
        let mut security = Security::new(
            &params.name,
            SecuritySpec {
                destination_addresses: vec![params.address.clone()],
                destination_zones: params.destination_zones.clone(),
                services: params.services.clone(),
                log_setting: params.log_setting.clone(),
                group: params.group.clone(),
                action: SecurityAction::Allow,
                description: None,
            },
        );
        security.metadata.namespace = Some(owner.namespace.clone());
        let mut store = self.securities.lock().unwrap();
        if let Some(existing) = store.get(&key(&owner.namespace, &params.name)) {
            security.metadata.owner_references = existing.metadata.owner_references.clone();
        }
        crate::client::ensure_owner(&mut security.metadata, owner.owner_reference());
        store.insert(key(&owner.namespace, &params.name), security);
        Ok(())
    }

    async fn delete_security(&self, name: &str, namespace: &str) -> Result<(), GatewayError> {
        self.record(Operation::Delete, ResourceKind::Security, namespace, name)?;
        Self::remove(&self.securities, ResourceKind::Security, namespace, name)
    }

    async fn list_service_records(&self, namespace: &str) -> Result<Vec<ServiceRecord>, GatewayError> {
        self.record(Operation::List, ResourceKind::Service, namespace, "")?;
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn update_service_record(&self, record: &ServiceRecord) -> Result<ServiceRecord, GatewayError> {
        self.record(Operation::Update, ResourceKind::Service, &record.namespace, &record.name)?;
        let version = self.bump_version();
        let mut store = self.services.lock().unwrap();
        let stored = store
            .get_mut(&key(&record.namespace, &record.name))
            .ok_or_else(|| GatewayError::NotFound {
                kind: ResourceKind::Service,
                name: record.name.clone(),
            })?;
        if record.resource_version.is_some() && record.resource_version != stored.resource_version {
            return Err(GatewayError::Conflict {
                kind: ResourceKind::Service,
                name: record.name.clone(),
            });
        }
        for k in crds::OWNED_ANNOTATION_KEYS {
            match record.annotations.get(k) {
                Some(v) => stored.annotations.insert(k.to_string(), v.clone()),
                None => stored.annotations.remove(k),
            };
        }
        stored.resource_version = Some(version);
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PortSpec;

    #[tokio::test]
    async fn test_create_allocation_already_exists() {
        let gw = MockGateway::new();
        gw.create_allocation("172.11.22.33", "default", "internet").await.unwrap();
        let err = gw.create_allocation("172.11.22.33", "default", "internet").await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(gw.count(Operation::Create, ResourceKind::Allocation), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let gw = MockGateway::new();
        assert!(gw.delete_nat("k8s-1.2.3.4", "default").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let gw = MockGateway::new();
        gw.fail_on(Operation::Get, ResourceKind::Allocation);
        let err = gw.get_allocation("x", "default").await.unwrap_err();
        assert!(matches!(err, GatewayError::Api { .. }));
        gw.clear_failures();
        assert!(gw.get_allocation("x", "default").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_detects_stale_version() {
        let gw = MockGateway::new();
        let record = gw.add_service_record(
            ServiceRecord::new("default", "test").with_ports(vec![PortSpec::tcp(80)]),
        );
        let updated = gw.update_service_record(&record).await.unwrap();
        assert_ne!(updated.resource_version, record.resource_version);

        let err = gw.update_service_record(&record).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_nat_upsert_keeps_owners_deduplicated() {
        let gw = MockGateway::new();
        let a = gw.add_service_record(ServiceRecord::new("default", "a"));
        let b = gw.add_service_record(ServiceRecord::new("default", "b"));
        for owner in [&a, &b, &a] {
            gw.create_or_update_nat("k8s-140.11.22.33", "140.11.22.33", "172.11.22.33", owner)
                .await
                .unwrap();
        }
        let nat = gw.nat("k8s-140.11.22.33", "default").unwrap();
        assert_eq!(nat.metadata.owner_references.map(|r| r.len()), Some(2));
    }
}
