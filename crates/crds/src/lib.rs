//! Firewall CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the service controller:
//! - `IP`: requests a public address from a named pool
//! - `NAT`: maps a public address onto a cluster external address
//! - `Security`: permits traffic to a public address under a policy group

pub mod annotations;
pub mod ip;
pub mod nat;
pub mod security;

pub use annotations::*;
pub use ip::*;
pub use nat::*;
pub use security::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by all firewall CRDs
pub const API_GROUP: &str = "inwinstack.com";

/// Prefix of every NAT and Security object created for a public address
pub const POLICY_NAME_PREFIX: &str = "k8s-";

/// Name of the NAT and Security objects owned by a public address.
///
/// The name is derived from the address alone, so every Service that resolves
/// to the same address shares the same pair of firewall objects.
pub fn policy_resource_name(address: &str) -> String {
    format!("{POLICY_NAME_PREFIX}{address}")
}

/// Lifecycle phase reported by the firewall-side operators
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ResourcePhase {
    /// Waiting for the firewall-side operator
    #[default]
    Pending,

    /// Applied on the firewall (or address assigned, for `IP`)
    Active,

    /// The firewall-side operator gave up
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_resource_name() {
        assert_eq!(policy_resource_name("140.11.22.33"), "k8s-140.11.22.33");
    }

    #[test]
    fn test_crds_share_api_group() {
        use kube::Resource;

        assert_eq!(IP::group(&()), API_GROUP);
        assert_eq!(NAT::group(&()), API_GROUP);
        assert_eq!(Security::group(&()), API_GROUP);
    }

    #[test]
    fn test_phase_defaults_to_pending() {
        assert_eq!(ResourcePhase::default(), ResourcePhase::Pending);
    }
}
