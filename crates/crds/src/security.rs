//! Security CRD
//!
//! Security rule allowing traffic towards a public address.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use crate::ResourcePhase;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "inwinstack.com",
    version = "v1",
    kind = "Security",
    plural = "securities",
    namespaced,
    status = "SecurityStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Public addresses the rule applies to
    pub destination_addresses: Vec<String>,

    /// Destination zones
    #[serde(default)]
    pub destination_zones: Vec<String>,

    /// Service objects allowed by the rule
    #[serde(default)]
    pub services: Vec<String>,

    /// Log forwarding profile
    #[serde(default)]
    pub log_setting: String,

    /// Security profile group
    #[serde(default)]
    pub group: String,

    /// Rule action
    #[serde(default = "default_action")]
    pub action: SecurityAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_action() -> SecurityAction {
    SecurityAction::Allow
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityAction {
    #[default]
    Allow,
    Deny,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    #[serde(default)]
    pub phase: ResourcePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<chrono::DateTime<chrono::Utc>>,
}
