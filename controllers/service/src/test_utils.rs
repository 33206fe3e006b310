//! Test utilities for unit testing the reconciliation engine
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::config::OperatorConfig;
#[cfg(test)]
use crate::reconciler::ReconcileEngine;
#[cfg(test)]
use resource_gateway::{MockGateway, PortSpec, ServiceRecord};
#[cfg(test)]
use std::sync::Arc;

/// Configuration used by engine tests
#[cfg(test)]
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        ignore_namespaces: ["kube-system".to_string()].into_iter().collect(),
        log_setting: "k8s-log".to_string(),
        group: "k8s-group".to_string(),
        services: vec!["any".to_string()],
        destination_zones: vec!["untrust".to_string()],
        ..Default::default()
    }
}

/// Helper to create a Service exposing `ports` on `external_ip`
#[cfg(test)]
pub fn create_test_service(name: &str, namespace: &str, ports: &[i32], external_ip: Option<&str>) -> ServiceRecord {
    ServiceRecord::new(namespace, name)
        .with_ports(ports.iter().copied().map(PortSpec::tcp).collect())
        .with_external_addresses(external_ip)
}

/// Helper to create an engine over a shared mock gateway
#[cfg(test)]
pub fn create_test_engine(gateway: &MockGateway) -> ReconcileEngine {
    ReconcileEngine::new(Arc::new(gateway.clone()), Arc::new(test_config()))
}
