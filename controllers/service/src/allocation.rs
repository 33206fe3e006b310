//! Public address allocation.
//!
//! The allocation state of a Service lives entirely in its annotations:
//!
//! | state           | annotations / cluster                                   |
//! |-----------------|---------------------------------------------------------|
//! | `Unallocated`   | pool annotation explicitly empty                        |
//! | `PoolRequested` | no valid public IP, `IP` object just requested          |
//! | `Pending`       | `IP` object exists, allocator has not set an address    |
//! | `Allocated`     | public IP annotation parses as an address               |
//!
//! `evaluate` and `advance` are pure; `Allocator` runs them against the
//! gateway and performs the single side effect (creating the `IP` object).

use crate::error::ControllerError;
use crds::{ANN_KEY_EXTERNAL_POOL, ANN_KEY_PUBLIC_IP, ANN_KEY_SERVICE_REFRESH};
use resource_gateway::{GatewayError, ResourceGateway, ServiceRecord};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Allocation state derived for one sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// Allocation disabled by an empty pool annotation
    Unallocated,
    /// The `IP` object was requested this cycle
    PoolRequested,
    /// Waiting for the pool allocator to assign an address
    Pending,
    /// Public address known and valid
    Allocated(IpAddr),
}

impl AllocationState {
    /// The public address, once allocated
    pub fn address(&self) -> Option<IpAddr> {
        match self {
            Self::Allocated(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// What the pool allocator reports for the Service's `IP` object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Missing,
    Unassigned,
    Assigned(String),
}

/// Result of inspecting the annotations alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to look up this cycle
    Settled(AllocationState),
    /// The `IP` object `name` (requested from `pool`) must be observed
    Lookup { name: String, pool: String },
}

/// Outcome of `advance`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: AllocationState,
    pub annotations: BTreeMap<String, String>,
    /// Pool to request an `IP` object from, when one must be created
    pub create_from_pool: Option<String>,
}

/// Parse the public IP annotation; anything that is not an address is treated as unset.
pub fn public_ip(annotations: &BTreeMap<String, String>) -> Option<IpAddr> {
    annotations
        .get(ANN_KEY_PUBLIC_IP)
        .and_then(|v| v.parse().ok())
}

/// Pool to allocate from: the annotation when present (even if empty), else `default_pool`.
pub fn pool(annotations: &BTreeMap<String, String>, default_pool: &str) -> String {
    annotations
        .get(ANN_KEY_EXTERNAL_POOL)
        .cloned()
        .unwrap_or_else(|| default_pool.to_string())
}

/// Decide from the annotations whether the `IP` object must be consulted.
pub fn evaluate(record: &ServiceRecord, default_pool: &str) -> Step {
    if let Some(addr) = public_ip(&record.annotations) {
        return Step::Settled(AllocationState::Allocated(addr));
    }
    let pool = pool(&record.annotations, default_pool);
    match record.first_external_address() {
        Some(name) if !pool.is_empty() => Step::Lookup {
            name: name.to_string(),
            pool,
        },
        _ => Step::Settled(AllocationState::Unallocated),
    }
}

/// Fold what the allocator reports into the annotations.
pub fn advance(annotations: &BTreeMap<String, String>, pool: &str, observed: Observed) -> Transition {
    let mut next = annotations.clone();
    match observed {
        Observed::Assigned(address) => {
            next.remove(ANN_KEY_SERVICE_REFRESH);
            next.insert(ANN_KEY_PUBLIC_IP.to_string(), address);
            // The allocator's value is only trusted once it parses.
            let state = public_ip(&next).map_or(AllocationState::Pending, AllocationState::Allocated);
            Transition {
                state,
                annotations: next,
                create_from_pool: None,
            }
        }
        Observed::Unassigned => Transition {
            state: AllocationState::Pending,
            annotations: next,
            create_from_pool: None,
        },
        Observed::Missing => Transition {
            state: AllocationState::PoolRequested,
            annotations: next,
            create_from_pool: Some(pool.to_string()),
        },
    }
}

/// Drives the allocation state machine against the gateway
pub struct Allocator {
    gateway: Arc<dyn ResourceGateway>,
    default_pool: String,
}

impl Allocator {
    pub fn new(gateway: Arc<dyn ResourceGateway>, default_pool: impl Into<String>) -> Self {
        Self {
            gateway,
            default_pool: default_pool.into(),
        }
    }

    /// Advance the allocation of `record`, rewriting its annotations in place.
    ///
    /// Failing to read or create the `IP` object is fatal for the cycle; the
    /// annotations are left untouched in that case.
    pub async fn sync(&self, record: &mut ServiceRecord) -> Result<AllocationState, ControllerError> {
        let (name, pool) = match evaluate(record, &self.default_pool) {
            Step::Settled(state) => return Ok(state),
            Step::Lookup { name, pool } => (name, pool),
        };

        let observed = match self.gateway.get_allocation(&name, &record.namespace).await {
            Ok(ip) => ip
                .allocated_address()
                .map_or(Observed::Unassigned, |a| Observed::Assigned(a.to_string())),
            Err(e) if e.is_not_found() => Observed::Missing,
            Err(source) => return Err(ControllerError::AllocationFailed { name, source }),
        };

        let transition = advance(&record.annotations, &pool, observed);
        if let Some(pool) = &transition.create_from_pool {
            match self.gateway.create_allocation(&name, &record.namespace, pool).await {
                Ok(_) => info!("Requested IP {}/{} from pool {}", record.namespace, name, pool),
                // Another worker got there first; wait for the allocator like everyone else.
                Err(GatewayError::AlreadyExists { .. }) => {
                    debug!("IP {}/{} already requested", record.namespace, name);
                }
                Err(source) => return Err(ControllerError::AllocationFailed { name, source }),
            }
        }

        match transition.state {
            AllocationState::Allocated(addr) => {
                info!("Service {} allocated public IP {}", record.key(), addr);
            }
            state => debug!("Service {} allocation {:?}", record.key(), state),
        }
        record.annotations = transition.annotations;
        Ok(transition.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_gateway::{MockGateway, Operation, PortSpec, ResourceKind};

    fn record() -> ServiceRecord {
        ServiceRecord::new("default", "test")
            .with_ports(vec![PortSpec::tcp(80)])
            .with_external_addresses(["172.11.22.33"])
    }

    #[test]
    fn test_evaluate_valid_public_ip_is_allocated() {
        let r = record().with_annotation(ANN_KEY_PUBLIC_IP, "140.11.22.33");
        assert_eq!(
            evaluate(&r, "internet"),
            Step::Settled(AllocationState::Allocated("140.11.22.33".parse().unwrap()))
        );
    }

    #[test]
    fn test_evaluate_invalid_public_ip_needs_lookup() {
        let r = record().with_annotation(ANN_KEY_PUBLIC_IP, "not-an-ip");
        assert_eq!(
            evaluate(&r, "internet"),
            Step::Lookup {
                name: "172.11.22.33".to_string(),
                pool: "internet".to_string(),
            }
        );
    }

    #[test]
    fn test_evaluate_pool_annotation_wins_over_default() {
        let r = record().with_annotation(ANN_KEY_EXTERNAL_POOL, "dmz");
        assert!(matches!(evaluate(&r, "internet"), Step::Lookup { pool, .. } if pool == "dmz"));
    }

    #[test]
    fn test_evaluate_empty_pool_is_unallocated() {
        let r = record().with_annotation(ANN_KEY_EXTERNAL_POOL, "");
        assert_eq!(evaluate(&r, "internet"), Step::Settled(AllocationState::Unallocated));
    }

    #[test]
    fn test_advance_assigned_sets_ip_and_clears_refresh() {
        let annotations = BTreeMap::from([(ANN_KEY_SERVICE_REFRESH.to_string(), "x".to_string())]);
        let t = advance(&annotations, "internet", Observed::Assigned("140.11.22.33".to_string()));
        assert_eq!(t.state, AllocationState::Allocated("140.11.22.33".parse().unwrap()));
        assert_eq!(t.annotations.get(ANN_KEY_PUBLIC_IP).map(String::as_str), Some("140.11.22.33"));
        assert!(!t.annotations.contains_key(ANN_KEY_SERVICE_REFRESH));
        assert_eq!(t.create_from_pool, None);
    }

    #[test]
    fn test_advance_unassigned_is_pending() {
        let t = advance(&BTreeMap::new(), "internet", Observed::Unassigned);
        assert_eq!(t.state, AllocationState::Pending);
        assert!(t.annotations.is_empty());
        assert_eq!(t.create_from_pool, None);
    }

    #[test]
    fn test_advance_missing_requests_pool() {
        let t = advance(&BTreeMap::new(), "internet", Observed::Missing);
        assert_eq!(t.state, AllocationState::PoolRequested);
        assert_eq!(t.create_from_pool.as_deref(), Some("internet"));
    }

    #[test]
    fn test_advance_garbage_from_allocator_stays_pending() {
        let t = advance(&BTreeMap::new(), "internet", Observed::Assigned("garbage".to_string()));
        assert_eq!(t.state, AllocationState::Pending);
    }

    #[tokio::test]
    async fn test_sync_creates_allocation_once() {
        let gw = MockGateway::new();
        let allocator = Allocator::new(Arc::new(gw.clone()), "internet");
        let mut r = record();

        let state = allocator.sync(&mut r).await.unwrap();
        assert_eq!(state, AllocationState::PoolRequested);
        assert_eq!(gw.count(Operation::Create, ResourceKind::Allocation), 1);
        assert_eq!(
            gw.allocation("172.11.22.33", "default").map(|ip| ip.spec.pool_name),
            Some("internet".to_string())
        );

        // Second pass finds the request and waits.
        let state = allocator.sync(&mut r).await.unwrap();
        assert_eq!(state, AllocationState::Pending);
        assert_eq!(gw.count(Operation::Create, ResourceKind::Allocation), 1);
    }

    #[tokio::test]
    async fn test_sync_create_failure_is_fatal() {
        let gw = MockGateway::new();
        gw.fail_on(Operation::Create, ResourceKind::Allocation);
        let allocator = Allocator::new(Arc::new(gw.clone()), "internet");
        let mut r = record();

        let err = allocator.sync(&mut r).await.unwrap_err();
        assert!(matches!(err, ControllerError::AllocationFailed { .. }));
        assert_eq!(r, record());
    }

    #[tokio::test]
    async fn test_sync_allocated_skips_gateway() {
        let gw = MockGateway::new();
        let allocator = Allocator::new(Arc::new(gw.clone()), "internet");
        let mut r = record().with_annotation(ANN_KEY_PUBLIC_IP, "140.11.22.33");

        let state = allocator.sync(&mut r).await.unwrap();
        assert_eq!(state.address(), Some("140.11.22.33".parse().unwrap()));
        assert!(gw.calls().is_empty());
    }
}
