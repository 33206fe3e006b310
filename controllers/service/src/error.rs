//! Controller-specific error types.
//!
//! This module defines error types specific to the Service Controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use resource_gateway::GatewayError;
use thiserror::Error;

/// Errors that can occur in the Service Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Resource gateway error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Address allocation could not be requested or observed
    #[error("IP allocation failed for {name}: {source}")]
    AllocationFailed {
        name: String,
        #[source]
        source: GatewayError,
    },

    /// Allocation release failed; NAT and Security were left in place
    #[error("Cleanup failed for {name}: {source}")]
    CleanupFailed {
        name: String,
        #[source]
        source: GatewayError,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Work queue closed
    #[error("Work queue closed: {0}")]
    Queue(String),
}
