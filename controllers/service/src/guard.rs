//! Scope check for Services.

use resource_gateway::ServiceRecord;
use std::collections::BTreeSet;

/// Whether the controller manages `record` at all.
///
/// A Service is managed only outside the ignored namespaces and only when it
/// exposes at least one port on at least one external address.
pub fn in_scope(record: &ServiceRecord, ignore_namespaces: &BTreeSet<String>) -> bool {
    !ignore_namespaces.contains(&record.namespace)
        && !record.ports.is_empty()
        && !record.external_addresses.is_empty()
}
