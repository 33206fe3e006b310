//! Resource gateway errors

use crate::models::ResourceKind;
use thiserror::Error;

/// Errors that can occur when reading or writing cluster resources
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Resource not found
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    /// Resource already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// Write rejected because the object changed since it was read
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: ResourceKind, name: String },

    /// Any other Kubernetes API error
    #[error("Kubernetes error on {kind} {name}: {source}")]
    Kube {
        kind: ResourceKind,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object returned by the API is missing required metadata
    #[error("Invalid {kind} object: {reason}")]
    InvalidObject { kind: ResourceKind, reason: String },

    /// Failure injected by a test double
    #[error("{kind} {name}: {message}")]
    Api {
        kind: ResourceKind,
        name: String,
        message: String,
    },
}

impl GatewayError {
    /// Map a kube error onto the typed variants for `kind`/`name`.
    pub fn from_kube(err: kube::Error, kind: ResourceKind, name: &str) -> Self {
        let name = name.to_string();
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::NotFound { kind, name },
            kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::AlreadyExists { kind, name }
            }
            kube::Error::Api(ref resp) if resp.code == 409 => Self::Conflict { kind, name },
            source => Self::Kube { kind, name, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
