//! NAT CRD
//!
//! Destination NAT from a public address onto the Service's external address.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use crate::ResourcePhase;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "inwinstack.com",
    version = "v1",
    kind = "NAT",
    plural = "nats",
    namespaced,
    status = "NATStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NATSpec {
    /// Public addresses matched by the rule
    pub destination_addresses: Vec<String>,

    /// Translated (internal) address
    pub dat_address: String,

    /// Free-form description shown on the firewall
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NATStatus {
    #[serde(default)]
    pub phase: ResourcePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<chrono::DateTime<chrono::Utc>>,
}
