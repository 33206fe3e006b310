//! ResourceGateway trait for mocking
//!
//! This trait abstracts cluster access so the reconciliation core can be
//! exercised against an in-memory implementation in unit tests.

use crate::error::GatewayError;
use crate::models::{SecurityParams, ServiceRecord};
use crds::IP;

/// Trait for the cluster operations the service controller needs
///
/// Lookups report absence as `GatewayError::NotFound`; creations report a
/// pre-existing object as `GatewayError::AlreadyExists`.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceGateway: Send + Sync {
    // Allocation (IP) operations
    async fn get_allocation(&self, name: &str, namespace: &str) -> Result<IP, GatewayError>;
    async fn create_allocation(&self, name: &str, namespace: &str, pool: &str) -> Result<IP, GatewayError>;
    async fn delete_allocation(&self, name: &str, namespace: &str) -> Result<(), GatewayError>;

    // Firewall policy operations. The owner's namespace is the namespace of the object.
    async fn create_or_update_nat(&self, name: &str, address: &str, dat_address: &str, owner: &ServiceRecord) -> Result<(), GatewayError>;
    async fn delete_nat(&self, name: &str, namespace: &str) -> Result<(), GatewayError>;
    async fn create_or_update_security(&self, params: &SecurityParams, owner: &ServiceRecord) -> Result<(), GatewayError>;
    async fn delete_security(&self, name: &str, namespace: &str) -> Result<(), GatewayError>;

    // Service operations
    async fn list_service_records(&self, namespace: &str) -> Result<Vec<ServiceRecord>, GatewayError>;
    /// Persist the controller-owned annotations of `record`.
    async fn update_service_record(&self, record: &ServiceRecord) -> Result<ServiceRecord, GatewayError>;
}
