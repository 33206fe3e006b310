//! Gateway data model
//!
//! `ServiceRecord` is the controller's view of a `v1/Service`: identity, the
//! fields that decide whether it is managed, and its annotations.

use crate::error::GatewayError;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use std::fmt;

/// Resource kinds reachable through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `IP` custom resource (pooled address request)
    Allocation,
    /// `NAT` custom resource
    Nat,
    /// `Security` custom resource
    Security,
    /// `v1/Service`
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allocation => "IP",
            Self::Nat => "NAT",
            Self::Security => "Security",
            Self::Service => "Service",
        };
        f.write_str(s)
    }
}

/// A single Service port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: Option<String>,
    pub port: i32,
    pub protocol: Option<String>,
}

impl PortSpec {
    pub fn tcp(port: i32) -> Self {
        Self {
            name: None,
            port,
            protocol: Some("TCP".to_string()),
        }
    }
}

/// Controller view of a Service
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRecord {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    /// Version the record was read at; sent back on update for optimistic concurrency
    pub resource_version: Option<String>,
    pub ports: Vec<PortSpec>,
    /// `spec.externalIPs`, in order. The first entry names the `IP` request.
    pub external_addresses: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    /// Set once the API server has stamped a deletion timestamp
    pub deletion_requested: bool,
}

impl ServiceRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_ports(mut self, ports: Vec<PortSpec>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_external_addresses<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_addresses = addrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn first_external_address(&self) -> Option<&str> {
        self.external_addresses.first().map(String::as_str)
    }

    /// Non-controlling owner reference pointing at this Service.
    ///
    /// `None` until the API server has assigned a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.uid.as_ref().map(|uid| OwnerReference {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            name: self.name.clone(),
            uid: uid.clone(),
            controller: None,
            block_owner_deletion: None,
        })
    }
}

impl TryFrom<&Service> for ServiceRecord {
    type Error = GatewayError;

    fn try_from(svc: &Service) -> Result<Self, Self::Error> {
        let meta = &svc.metadata;
        let name = meta.name.clone().ok_or_else(|| GatewayError::InvalidObject {
            kind: ResourceKind::Service,
            reason: "missing metadata.name".to_string(),
        })?;
        let namespace = meta.namespace.clone().unwrap_or_else(|| "default".to_string());
        let spec = svc.spec.as_ref();

        let ports = spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| PortSpec {
                        name: p.name.clone(),
                        port: p.port,
                        protocol: p.protocol.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            namespace,
            name,
            uid: meta.uid.clone(),
            resource_version: meta.resource_version.clone(),
            ports,
            external_addresses: spec.and_then(|s| s.external_ips.clone()).unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            deletion_requested: meta.deletion_timestamp.is_some(),
        })
    }
}

/// Static parameters of a Security object for one public address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityParams {
    pub name: String,
    pub address: String,
    pub log_setting: String,
    pub group: String,
    pub services: Vec<String>,
    pub destination_zones: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn test_service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("test".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                resource_version: Some("42".to_string()),
                annotations: Some(BTreeMap::from([(
                    "inwinstack.com/external-pool".to_string(),
                    "internet".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 80,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                external_ips: Some(vec!["172.11.22.33".to_string()]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_record_from_service() {
        let record = ServiceRecord::try_from(&test_service()).unwrap();
        assert_eq!(record.key(), "default/test");
        assert_eq!(record.ports, vec![PortSpec::tcp(80)]);
        assert_eq!(record.first_external_address(), Some("172.11.22.33"));
        assert_eq!(record.resource_version.as_deref(), Some("42"));
        assert_eq!(record.annotation("inwinstack.com/external-pool"), Some("internet"));
        assert!(!record.deletion_requested);
    }

    #[test]
    fn test_record_from_service_without_spec() {
        let mut svc = test_service();
        svc.spec = None;
        let record = ServiceRecord::try_from(&svc).unwrap();
        assert!(record.ports.is_empty());
        assert!(record.external_addresses.is_empty());
    }

    #[test]
    fn test_record_from_service_missing_name() {
        let mut svc = test_service();
        svc.metadata.name = None;
        let err = ServiceRecord::try_from(&svc).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidObject { .. }));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let record = ServiceRecord::new("default", "test");
        assert!(record.owner_reference().is_none());

        let record = ServiceRecord {
            uid: Some("uid-1".to_string()),
            ..record
        };
        let owner = record.owner_reference().unwrap();
        assert_eq!(owner.kind, "Service");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, None);
    }
}
