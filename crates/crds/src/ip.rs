//! IP CRD
//!
//! Requests a public address from a named pool. The address itself is filled
//! in asynchronously by the pool allocator, never by the service controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use crate::ResourcePhase;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "inwinstack.com",
    version = "v1",
    kind = "IP",
    plural = "ips",
    namespaced,
    status = "IPStatus",
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".spec.poolName"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.address"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPSpec {
    /// Name of the pool to allocate from
    pub pool_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IPStatus {
    /// Allocated address (empty until the allocator assigns one)
    #[serde(default)]
    pub address: String,

    /// Allocation phase
    #[serde(default)]
    pub phase: ResourcePhase,

    /// Failure reason reported by the allocator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Last time the allocator touched this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl IP {
    /// Address assigned by the allocator, if any.
    pub fn allocated_address(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.address.as_str())
            .filter(|a| !a.is_empty())
    }
}
